use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Errors that can occur in sockexec
#[derive(Error, Debug)]
pub enum SockexecError {
    #[error("invalid bind configuration: {0}")]
    InvalidBindConfig(String),

    #[error("invalid handler program \"{path}\": {source}")]
    HandlerUnavailable { path: PathBuf, source: Errno },

    #[error("invalid handler argument {0:?}: contains a NUL byte")]
    InvalidHandlerArg(String),

    #[error("it is forbidden to combine chroot with a setuid/setgid handler program")]
    UnsafePrivilegedHandler,

    #[error("unable to chroot into \"{path}\": {source}")]
    SandboxSetupFailed { path: PathBuf, source: Errno },

    #[error("failed to set signal action for SIGCHLD (this is a bug): {0}")]
    SignalSetupFailed(Errno),

    #[error("unable to listen on {addr}: {source}")]
    ListenerSetupFailed { addr: String, source: Errno },

    #[error("client accept failed: {0}")]
    AcceptFailed(Errno),

    #[error("failed to create child for connection: {0}")]
    ChildCreationFailed(Errno),

    #[error("failed to execute handler for connection")]
    HandlerExecFailed,
}

pub type Result<T> = std::result::Result<T, SockexecError>;
