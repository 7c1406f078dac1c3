//! Process-lifetime server configuration.
//!
//! Built once from the CLI surface, validated, and never mutated afterwards.
//! Port and bind address arrive as raw strings so that malformed values
//! surface as [`SockexecError::InvalidBindConfig`] from the core rather than
//! as a parse error in the CLI layer.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

use crate::cli::Args;
use crate::error::{Result, SockexecError};

/// Port used when none is configured.
pub const DEFAULT_PORT: u16 = 8080;

/// Validated, immutable startup configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub loopback: bool,
    pub port: u16,
    pub bind_addr: Option<Ipv4Addr>,
    pub chroot_dir: Option<PathBuf>,
    pub handler_path: PathBuf,
    pub handler_args: Vec<String>,
    pub interpreted: bool,
}

impl ServerConfig {
    pub fn from_args(args: &Args) -> Result<Self> {
        // clap already rejects -l together with -b, but the invariant belongs
        // to the core: the combination must fail before any socket exists.
        if args.loopback && args.bind.is_some() {
            return Err(SockexecError::InvalidBindConfig(
                "loopback and an explicit bind address are mutually exclusive".to_string(),
            ));
        }

        let port = match &args.port {
            Some(raw) => raw.parse::<u16>().map_err(|_| {
                SockexecError::InvalidBindConfig(format!("invalid port \"{raw}\""))
            })?,
            None => DEFAULT_PORT,
        };

        let bind_addr = match &args.bind {
            Some(raw) => Some(raw.parse::<Ipv4Addr>().map_err(|_| {
                SockexecError::InvalidBindConfig(format!("invalid bind address \"{raw}\""))
            })?),
            None => None,
        };

        Ok(ServerConfig {
            loopback: args.loopback,
            port,
            bind_addr,
            chroot_dir: args.chroot.clone(),
            handler_path: args.handler.clone(),
            handler_args: args.handler_args.clone(),
            interpreted: args.interpreted,
        })
    }

    /// The address the listener binds: loopback flag wins, then an explicit
    /// address, then the wildcard.
    pub fn bind_address(&self) -> SocketAddrV4 {
        let ip = if self.loopback {
            Ipv4Addr::LOCALHOST
        } else {
            self.bind_addr.unwrap_or(Ipv4Addr::UNSPECIFIED)
        };
        SocketAddrV4::new(ip, self.port)
    }
}
