use clap::Parser;
use std::path::PathBuf;

/// sockexec - expose any executable as a TCP service
///
/// Listens on a TCP port and runs the handler program once per accepted
/// connection, with the connection attached to the handler's stdin and
/// stdout. No networking code required in the handler.
#[derive(Parser, Debug)]
#[command(name = "sockexec")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    # Serve a shell script on port 8080
    sockexec ./greet.sh

    # Echo server on the loopback interface, port 7777
    sockexec -l -p 7777 /bin/cat

    # Chrooted handler with an explicit argv (argv[0] included)
    sockexec -c /srv/jail -p 80 /srv/jail/handler handler --quiet

    # Interpreted handler that must be able to re-read its own file
    sockexec -i -p 8080 ./service.py
")]
pub struct Args {
    /// Bind to the loopback interface (127.0.0.1) instead of the wildcard address
    #[arg(short = 'l', long, conflicts_with = "bind")]
    pub loopback: bool,

    /// Handler is an interpreted script that needs access to itself to run
    #[arg(short = 'i', long)]
    pub interpreted: bool,

    /// Chroot into this directory after resolving the handler, before accepting connections
    #[arg(short = 'c', long, value_name = "DIR")]
    pub chroot: Option<PathBuf>,

    /// Listen on this port instead of the default 8080
    ///
    /// Carried as a raw string so malformed values are diagnosed by the
    /// server core, not the argument parser.
    #[arg(short = 'p', long, value_name = "PORT", allow_hyphen_values = true)]
    pub port: Option<String>,

    /// Bind to this address instead of the default 0.0.0.0
    #[arg(short = 'b', long, value_name = "ADDR", allow_hyphen_values = true)]
    pub bind: Option<String>,

    /// Program executed for each incoming connection with its stdin and stdout
    /// attached to the connection socket
    pub handler: PathBuf,

    /// Argument vector for the handler. Passed verbatim, so include a value
    /// for argv[0] as well (usually the program name)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub handler_args: Vec<String>,
}
