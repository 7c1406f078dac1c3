mod cli;
mod config;
mod dispatch;
mod error;
mod handler;
mod jail;
mod listener;
mod signals;

use clap::Parser;
use cli::Args;
use config::ServerConfig;
use error::Result;
use handler::HandlerRef;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    if let Err(e) = run(Args::parse()) {
        error!("{}", e);
        eprintln!("sockexec: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = ServerConfig::from_args(&args)?;

    let handler = HandlerRef::open(&config.handler_path, config.interpreted)?;

    // Ordering is fixed: the handler descriptor and its privilege check must
    // predate the root change, and the jail must be in place before any
    // socket exists.
    if let Some(dir) = &config.chroot_dir {
        handler.verify_unprivileged()?;
        jail::enter(dir)?;
    }

    signals::set_child_autoreap()?;

    let listener = listener::bind_and_listen(&config)?;

    info!(
        "serving {} on {}",
        config.handler_path.display(),
        config.bind_address()
    );
    let never = dispatch::serve(&listener, &handler, &config.handler_args)?;
    match never {}
}
