//! Listening socket setup.
//!
//! socket/bind/listen with a fixed backlog. Failures are fatal: a bind that
//! does not succeed at startup is misconfiguration or resource exhaustion,
//! never something worth retrying.

use std::os::fd::{AsRawFd, OwnedFd};

use nix::sys::socket::{
    bind, listen, socket, AddressFamily, Backlog, SockFlag, SockProtocol, SockType, SockaddrIn,
};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::{Result, SockexecError};

/// Pending-connection queue depth.
pub const BACKLOG: i32 = 32;

/// Create, bind, and mark the listening socket per the configured policy.
pub fn bind_and_listen(config: &ServerConfig) -> Result<OwnedFd> {
    let addr = config.bind_address();
    let fail = |source| SockexecError::ListenerSetupFailed {
        addr: addr.to_string(),
        source,
    };

    let fd = socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_CLOEXEC,
        SockProtocol::Tcp,
    )
    .map_err(fail)?;

    // Debug builds only: skip the TIME_WAIT delay between restarts.
    #[cfg(debug_assertions)]
    nix::sys::socket::setsockopt(&fd, nix::sys::socket::sockopt::ReuseAddr, &true)
        .map_err(fail)?;

    bind(fd.as_raw_fd(), &SockaddrIn::from(addr)).map_err(fail)?;
    listen(&fd, Backlog::new(BACKLOG).map_err(fail)?).map_err(fail)?;

    info!("listening on {} (backlog {})", addr, BACKLOG);
    Ok(fd)
}
