//! Handler resolution.
//!
//! The handler program is opened once at startup as an `O_PATH` descriptor
//! and held for the lifetime of the server. Opening it before the chroot is
//! installed is what keeps it executable afterwards: the descriptor is never
//! re-resolved by path, so the jail boundary cannot invalidate it.
//!
//! Two invocation styles exist. A directly executable handler is run by
//! descriptor (`fexecve`), so the descriptor carries `O_CLOEXEC`. An
//! interpreted handler must be able to locate and re-read its own file, so
//! the descriptor is kept inheritable and the handler is invoked through the
//! `/proc/self/fd/<N>` self-path instead.

use std::ffi::CString;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::path::{Path, PathBuf};

use nix::fcntl::{open, OFlag};
use nix::libc;
use nix::sys::stat::{fstat, Mode};
use tracing::debug;

use crate::error::{Result, SockexecError};

/// An open reference to the handler program, valid across the jail boundary.
#[derive(Debug)]
pub struct HandlerRef {
    fd: OwnedFd,
    path: PathBuf,
    interpreted: bool,
}

impl HandlerRef {
    /// Open `path` as an `O_PATH` reference.
    ///
    /// In interpreted mode the descriptor stays inheritable across exec so
    /// the interpreter can re-read the script through the self-path.
    pub fn open(path: &Path, interpreted: bool) -> Result<Self> {
        let mut flags = OFlag::O_PATH;
        if !interpreted {
            flags |= OFlag::O_CLOEXEC;
        }
        let fd = open(path, flags, Mode::empty()).map_err(|source| {
            SockexecError::HandlerUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        // SAFETY: fd was just returned by open() and is owned by no one else
        let fd = unsafe { OwnedFd::from_raw_fd(fd) };
        debug!("opened handler {} as fd {}", path.display(), fd.as_raw_fd());
        Ok(HandlerRef {
            fd,
            path: path.to_path_buf(),
            interpreted,
        })
    }

    /// Refuse a handler whose mode bits elevate privilege on execution.
    ///
    /// Checked on the held descriptor, not the path, and only when a chroot
    /// is configured: a setuid/setgid program inside an operator-chosen jail
    /// is forbidden outright.
    pub fn verify_unprivileged(&self) -> Result<()> {
        let stat = fstat(self.fd.as_raw_fd()).map_err(|source| {
            SockexecError::HandlerUnavailable {
                path: self.path.clone(),
                source,
            }
        })?;
        if stat.st_mode & (libc::S_ISUID | libc::S_ISGID) != 0 {
            return Err(SockexecError::UnsafePrivilegedHandler);
        }
        Ok(())
    }

    pub fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    pub fn interpreted(&self) -> bool {
        self.interpreted
    }

    /// Self-referential path for interpreted handlers. The fd number is
    /// inherited unchanged across fork, so the path stays valid in the child.
    pub fn self_exec_path(&self) -> CString {
        // A RawFd renders as a short decimal; the format cannot contain NUL.
        CString::new(format!("/proc/self/fd/{}", self.fd.as_raw_fd()))
            .unwrap_or_else(|_| unreachable!())
    }
}
