//! SIGCHLD disposition.
//!
//! The dispatcher never waits on its children. Setting `SA_NOCLDWAIT` (with
//! SIGCHLD ignored) tells the kernel not to keep terminated children around
//! for collection, so handler processes vanish on exit instead of
//! accumulating as zombies.

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use tracing::debug;

use crate::error::{Result, SockexecError};

/// One-time, process-wide, idempotent. Call during single-threaded startup,
/// before the first fork.
pub fn set_child_autoreap() -> Result<()> {
    let action = SigAction::new(
        SigHandler::SigIgn,
        SaFlags::SA_NOCLDWAIT,
        SigSet::empty(),
    );
    // SAFETY: SigIgn installs no handler code, so no async-signal-safety
    // obligations are taken on.
    unsafe { sigaction(Signal::SIGCHLD, &action) }.map_err(SockexecError::SignalSetupFailed)?;
    debug!("SIGCHLD set to ignore with SA_NOCLDWAIT");
    Ok(())
}
