//! Chroot jail installation.
//!
//! The jail directory is pinned with an open descriptor first, and the root
//! change is issued against that descriptor (`fchdir` + `chroot(".")`) rather
//! than re-resolving the path string. Swapping the directory out between
//! validation and the root change therefore has no effect.
//!
//! Must run after the handler is resolved and its privilege bits verified,
//! and before the listener starts accepting.

use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::path::Path;

use nix::fcntl::{open, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{chdir, chroot, fchdir};
use tracing::info;

use crate::error::{Result, SockexecError};

/// Make `dir` the filesystem root for the remainder of the process's life
/// and move the working directory inside it. Irreversible.
pub fn enter(dir: &Path) -> Result<()> {
    let fail = |source| SockexecError::SandboxSetupFailed {
        path: dir.to_path_buf(),
        source,
    };

    let fd = open(dir, OFlag::O_DIRECTORY | OFlag::O_CLOEXEC, Mode::empty()).map_err(fail)?;
    // SAFETY: fd was just returned by open() and is owned by no one else
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    fchdir(fd.as_raw_fd()).map_err(fail)?;
    chroot(".").map_err(fail)?;
    chdir("/").map_err(fail)?;

    info!("entered chroot jail at {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Actually entering a jail needs CAP_SYS_CHROOT and would confine the
    // whole test binary, so only the failure paths are exercised here.

    #[test]
    fn test_missing_directory_fails() {
        let result = enter(Path::new("/no/such/jail"));
        match result {
            Err(SockexecError::SandboxSetupFailed { path, source }) => {
                assert_eq!(path, Path::new("/no/such/jail"));
                assert_eq!(source, nix::errno::Errno::ENOENT);
            }
            other => panic!("expected SandboxSetupFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_regular_file_is_not_a_jail() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let result = enter(file.path());
        assert!(matches!(
            result,
            Err(SockexecError::SandboxSetupFailed {
                source: nix::errno::Errno::ENOTDIR,
                ..
            })
        ));
    }
}
