//! Connection dispatch: the accept→fork→attach→exec loop.
//!
//! One process per accepted connection. The child discards the listening
//! socket, dup2s the connection over stdin and stdout, and replaces itself
//! with the handler program. The parent closes its copy of the connection
//! and goes back to accepting. No child is ever waited on; SIGCHLD
//! disposition (see `signals`) keeps terminated handlers from lingering.
//!
//! # Async-Signal-Safety
//!
//! After fork the child may only call async-signal-safe functions until
//! exec. Everything the child needs (argv/envp pointer arrays, the exec
//! target, the failure diagnostic) is prepared in the parent, where
//! allocation is safe. The child runs raw libc calls exclusively and leaves
//! via `_exit` if exec fails.

use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;

use nix::errno::Errno;
use nix::libc;
use nix::sys::socket::{accept4, SockFlag};
use nix::unistd::{close, fork, ForkResult};
use tracing::{debug, warn};

use crate::error::{Result, SockexecError};
use crate::handler::HandlerRef;

/// How the child reaches the handler's program image.
enum ExecTarget {
    /// Directly executable: exec by the held descriptor.
    Descriptor(RawFd),
    /// Interpreted: exec the `/proc/self/fd/<N>` self-path so the
    /// interpreter can re-open the script file.
    SelfPath(CString),
}

/// Everything a spawned child needs, prepared once before the accept loop.
pub struct SpawnPlan {
    target: ExecTarget,
    argv: Vec<CString>,
    envp: Vec<CString>,
    exec_error_msg: Vec<u8>,
}

impl SpawnPlan {
    /// Convert the handler reference and argument vector into exec-ready
    /// form. `args` is passed verbatim as the handler's argv, argv[0]
    /// included; the inherited environment is snapshotted as envp.
    pub fn prepare(handler: &HandlerRef, args: &[String]) -> Result<Self> {
        let argv = args
            .iter()
            .map(|arg| {
                CString::new(arg.as_bytes())
                    .map_err(|_| SockexecError::InvalidHandlerArg(arg.clone()))
            })
            .collect::<Result<Vec<_>>>()?;

        // OS-supplied environment entries cannot contain NUL; skip any that
        // somehow do rather than failing startup over them.
        let envp = std::env::vars_os()
            .filter_map(|(key, value)| {
                let mut entry = key.as_bytes().to_vec();
                entry.push(b'=');
                entry.extend_from_slice(value.as_bytes());
                CString::new(entry).ok()
            })
            .collect();

        let target = if handler.interpreted() {
            ExecTarget::SelfPath(handler.self_exec_path())
        } else {
            ExecTarget::Descriptor(handler.raw_fd())
        };

        Ok(SpawnPlan {
            target,
            argv,
            envp,
            exec_error_msg: format!("sockexec: {}\n", SockexecError::HandlerExecFailed)
                .into_bytes(),
        })
    }
}

/// Accept failures that should not take the whole server down: interruption,
/// a peer that aborted before accept, and momentary fd/buffer exhaustion.
fn accept_error_is_transient(errno: Errno) -> bool {
    matches!(
        errno,
        Errno::EINTR
            | Errno::ECONNABORTED
            | Errno::EPROTO
            | Errno::EMFILE
            | Errno::ENFILE
            | Errno::ENOBUFS
            | Errno::ENOMEM
    )
}

fn fork_error_is_transient(errno: Errno) -> bool {
    matches!(errno, Errno::EAGAIN | Errno::ENOMEM)
}

/// Accept one connection and hand it to a fresh handler process.
///
/// Transient accept/fork failures are logged and swallowed (the connection,
/// if any, is closed); anything else is fatal to the server.
pub fn dispatch_one(listener: &OwnedFd, plan: &SpawnPlan) -> Result<()> {
    let client = match accept4(listener.as_raw_fd(), SockFlag::SOCK_CLOEXEC) {
        Ok(fd) => fd,
        Err(errno) if accept_error_is_transient(errno) => {
            warn!("dropping connection, accept failed: {}", errno);
            return Ok(());
        }
        Err(errno) => return Err(SockexecError::AcceptFailed(errno)),
    };

    // Null-terminated pointer arrays for exec, built while allocation is
    // still allowed.
    let argv_ptrs: Vec<*const libc::c_char> = plan
        .argv
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let envp_ptrs: Vec<*const libc::c_char> = plan
        .envp
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect();
    let listener_fd = listener.as_raw_fd();

    // SAFETY: the child calls only async-signal-safe functions until exec()
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            // The child owns its duplicate of the connection now.
            let _ = close(client);
            debug!("connection dispatched to pid {}", child);
            Ok(())
        }
        Ok(ForkResult::Child) => {
            // CHILD: no allocations from here until exec
            unsafe {
                libc::close(listener_fd);
                libc::dup2(client, libc::STDIN_FILENO);
                libc::dup2(client, libc::STDOUT_FILENO);
                match &plan.target {
                    ExecTarget::Descriptor(fd) => {
                        libc::fexecve(*fd, argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    }
                    ExecTarget::SelfPath(path) => {
                        libc::execve(path.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    }
                }
                // exec only returns on error; report and vanish without
                // touching the parent's state
                libc::write(
                    libc::STDERR_FILENO,
                    plan.exec_error_msg.as_ptr().cast(),
                    plan.exec_error_msg.len(),
                );
                libc::_exit(127)
            }
        }
        Err(errno) => {
            let _ = close(client);
            if fork_error_is_transient(errno) {
                warn!(
                    "dropping connection: {}",
                    SockexecError::ChildCreationFailed(errno)
                );
                Ok(())
            } else {
                Err(SockexecError::ChildCreationFailed(errno))
            }
        }
    }
}

/// Steady state: dispatch connections in acceptance order until the process
/// is killed or a non-transient dispatch error surfaces.
pub fn serve(
    listener: &OwnedFd,
    handler: &HandlerRef,
    args: &[String],
) -> Result<std::convert::Infallible> {
    let plan = SpawnPlan::prepare(handler, args)?;
    loop {
        dispatch_one(listener, &plan)?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::{listener, signals};
    use nix::sys::socket::{getsockname, SockaddrIn};
    use std::fs;
    use std::io::{Read, Write};
    use std::net::{Ipv4Addr, Shutdown, TcpStream};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use std::thread::JoinHandle;

    /// Bind an ephemeral loopback listener and run `connections` dispatch
    /// cycles on a background thread.
    fn spawn_server(
        handler_path: &Path,
        interpreted: bool,
        args: &[&str],
        connections: usize,
    ) -> (u16, JoinHandle<()>) {
        signals::set_child_autoreap().unwrap();

        let config = ServerConfig {
            loopback: true,
            port: 0,
            bind_addr: None,
            chroot_dir: None,
            handler_path: handler_path.to_path_buf(),
            handler_args: args.iter().map(|s| s.to_string()).collect(),
            interpreted,
        };
        let listener_fd = listener::bind_and_listen(&config).unwrap();
        let port = getsockname::<SockaddrIn>(listener_fd.as_raw_fd())
            .unwrap()
            .port();

        let handler = HandlerRef::open(&config.handler_path, interpreted).unwrap();
        let handler_args = config.handler_args.clone();
        let server = std::thread::spawn(move || {
            let plan = SpawnPlan::prepare(&handler, &handler_args).unwrap();
            for _ in 0..connections {
                dispatch_one(&listener_fd, &plan).unwrap();
            }
        });
        (port, server)
    }

    fn exchange(port: u16, payload: &[u8]) -> Vec<u8> {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).unwrap();
        stream.write_all(payload).unwrap();
        stream.shutdown(Shutdown::Write).unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).unwrap();
        response
    }

    #[test]
    fn test_nul_in_handler_arg_names_the_argument() {
        let handler = HandlerRef::open(Path::new("/bin/cat"), false).unwrap();
        let args = vec!["cat".to_string(), "bad\0arg".to_string()];
        match SpawnPlan::prepare(&handler, &args) {
            Err(SockexecError::InvalidHandlerArg(arg)) => assert_eq!(arg, "bad\0arg"),
            other => panic!("expected InvalidHandlerArg, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_echo_handler_round_trip() {
        let (port, server) = spawn_server(Path::new("/bin/cat"), false, &["cat"], 1);
        assert_eq!(exchange(port, b"ping over the wire"), b"ping over the wire");
        server.join().unwrap();
    }

    #[test]
    fn test_handler_argv_passed_verbatim() {
        let (port, server) =
            spawn_server(Path::new("/bin/echo"), false, &["echo", "alpha", "beta"], 1);
        assert_eq!(exchange(port, b""), b"alpha beta\n");
        server.join().unwrap();
    }

    #[test]
    fn test_sequential_cycles_keep_accepting() {
        // Handlers that exit instantly with no output must not wedge the
        // accept loop or require any collection step in between.
        const CYCLES: usize = 8;
        let (port, server) = spawn_server(Path::new("/bin/true"), false, &["true"], CYCLES);
        for _ in 0..CYCLES {
            assert_eq!(exchange(port, b""), b"");
        }
        server.join().unwrap();
    }

    #[test]
    fn test_concurrent_clients_all_echoed() {
        const CLIENTS: usize = 32;
        let (port, server) = spawn_server(Path::new("/bin/cat"), false, &["cat"], CLIENTS);

        let clients: Vec<_> = (0..CLIENTS)
            .map(|i| {
                std::thread::spawn(move || {
                    let payload = format!("client {i} says hello");
                    assert_eq!(exchange(port, payload.as_bytes()), payload.as_bytes());
                })
            })
            .collect();
        for client in clients {
            client.join().unwrap();
        }
        server.join().unwrap();
    }

    #[test]
    fn test_interpreted_handler_runs_via_self_path() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("greeter.sh");
        fs::write(&script, "#!/bin/sh\necho scripted\n").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();

        let (port, server) = spawn_server(&script, true, &["greeter.sh"], 1);
        assert_eq!(exchange(port, b""), b"scripted\n");
        server.join().unwrap();
    }
}
