//! Spawning broker children in new hierarchical namespaces
//!
//! This module uses `unsafe` for clone(2): a running multi-threaded process
//! can't move itself into new user or PID namespaces, so a new child process
//! is cloned directly into them and then execs the broker executable.

#![allow(unsafe_code)]

use std::ffi::{CString, c_char, c_int, c_void};
use std::fs::{self, File};
use std::io::Read;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;

use burrow_core::{Error, NamespaceSet, Result};
use nix::fcntl::OFlag;
use nix::sched::clone;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, pipe2, write};
use tracing::{debug, error, info, warn};

const CHILD_STACK_SIZE: usize = 256 * 1024;

/// How to start a broker child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnConfig {
    /// Executable to run in the child
    pub executable: PathBuf,
    /// Arguments following the executable name
    pub args: Vec<String>,
    /// Descriptor number the channel end is installed at in the child
    pub channel_slot: RawFd,
}

impl Default for SpawnConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/proc/self/exe"),
            args: vec!["serve".to_string()],
            channel_slot: 3,
        }
    }
}

/// A started broker child process.
#[derive(Debug)]
pub struct BrokerChild {
    pid: Pid,
}

impl BrokerChild {
    /// Process ID of the child, as seen from the parent.
    #[must_use]
    pub const fn pid(&self) -> Pid {
        self.pid
    }

    /// Block until the child has terminated.
    pub fn wait(self) -> Result<WaitStatus> {
        loop {
            match waitpid(self.pid, None) {
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    return Ok(status);
                }
                Ok(status) => debug!(pid = self.pid.as_raw(), ?status, "Broker child status"),
                Err(nix::errno::Errno::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Reap the child on tokio's blocking pool, logging its termination.
    ///
    /// Must be called from within a tokio runtime.
    pub fn reap_in_background(self) -> tokio::task::JoinHandle<()> {
        let pid = self.pid.as_raw();
        info!(pid, "Waiting in background for broker child to terminate");
        tokio::task::spawn_blocking(move || match self.wait() {
            Ok(status) => info!(pid, ?status, "Broker child terminated"),
            Err(e) => warn!(pid, error = %e, "Cannot wait for broker child"),
        })
    }

    fn kill_and_reap(self) {
        let _ = kill(self.pid, Signal::SIGKILL);
        let _ = self.wait();
    }
}

/// Start the broker executable as a new child process in new namespaces of
/// the (hierarchical) types in `spaces`, with `channel` installed at the
/// configured descriptor slot.
///
/// With a new user namespace, root is mapped to root (size 1) before the
/// child gets to exec. Exec failures are reported synchronously.
pub fn spawn_broker(
    config: &SpawnConfig,
    spaces: NamespaceSet,
    channel: BorrowedFd<'_>,
) -> Result<BrokerChild> {
    if !spaces.is_hierarchical() {
        return Err(Error::invalid_request(format!(
            "not a set of hierarchical namespace types: {spaces}"
        )));
    }

    let exe = CString::new(config.executable.as_os_str().as_bytes())
        .map_err(|e| Error::Spawn { message: format!("invalid executable path: {e}") })?;
    let mut argv_owned = vec![exe.clone()];
    for arg in &config.args {
        argv_owned.push(
            CString::new(arg.as_bytes())
                .map_err(|e| Error::Spawn { message: format!("invalid argument: {e}") })?,
        );
    }
    let mut argv: Vec<*const c_char> = argv_owned.iter().map(|arg| arg.as_ptr()).collect();
    argv.push(std::ptr::null());

    let (sync_rd, sync_wr) = pipe2(OFlag::O_CLOEXEC)?;
    let (err_rd, err_wr) = pipe2(OFlag::O_CLOEXEC)?;

    let child_sync_rd = sync_rd.as_raw_fd();
    let child_sync_wr = sync_wr.as_raw_fd();
    let child_err_rd = err_rd.as_raw_fd();
    let child_err_wr = err_wr.as_raw_fd();
    let child_channel = channel.as_raw_fd();
    let slot = config.channel_slot;
    let exe_ptr = exe.as_ptr();
    let argv_ptr = argv.as_ptr();

    // Only async-signal-safe calls from here on, the child being a copy of
    // a multi-threaded process.
    let child = move || -> isize {
        // SAFETY: all descriptors and pointers were set up by the parent
        // before cloning and are valid in the child's copy of its memory.
        unsafe {
            libc::close(child_sync_wr);
            libc::close(child_err_rd);
            let mut err_wr = child_err_wr;
            let mut byte = 0u8;
            if libc::read(child_sync_rd, (&raw mut byte).cast::<c_void>(), 1) != 1 {
                libc::_exit(126);
            }
            if err_wr == slot {
                err_wr = libc::fcntl(err_wr, libc::F_DUPFD_CLOEXEC, slot + 1);
            }
            let installed = if child_channel == slot {
                libc::fcntl(slot, libc::F_SETFD, 0)
            } else {
                libc::dup2(child_channel, slot)
            };
            if installed >= 0 {
                libc::execv(exe_ptr, argv_ptr);
            }
            report_errno(err_wr);
            libc::_exit(127)
        }
    };

    let mut stack = vec![0u8; CHILD_STACK_SIZE];
    let clone_flags = spaces.clone_flags();
    // SAFETY: the child doesn't touch the parent's locks or allocator and
    // ends either in execv or _exit.
    let pid = unsafe {
        clone(
            Box::new(child),
            &mut stack,
            clone_flags,
            Some(Signal::SIGCHLD as c_int),
        )
    }
    .map_err(|e| {
        error!(error = %e, "Cannot clone broker child");
        Error::Spawn { message: format!("cannot clone child in new {spaces} namespaces: {e}") }
    })?;
    drop(sync_rd);
    drop(err_wr);
    let child = BrokerChild { pid };
    debug!(pid = pid.as_raw(), namespaces = %spaces, "Cloned broker child");

    if spaces.contains(burrow_core::NamespaceType::User) {
        if let Err(e) = map_root(pid) {
            child.kill_and_reap();
            return Err(e);
        }
    }

    if let Err(e) = write(&sync_wr, &[0u8]) {
        child.kill_and_reap();
        return Err(Error::Spawn { message: format!("cannot release broker child: {e}") });
    }
    drop(sync_wr);

    let mut report = Vec::with_capacity(4);
    if let Err(e) = File::from(err_rd).read_to_end(&mut report) {
        child.kill_and_reap();
        return Err(Error::Spawn { message: format!("cannot learn broker child state: {e}") });
    }
    if let Ok(raw) = <[u8; 4]>::try_from(report.as_slice()) {
        let errno = std::io::Error::from_raw_os_error(i32::from_ne_bytes(raw));
        child.kill_and_reap();
        error!(executable = %config.executable.display(), error = %errno, "Cannot start broker child");
        return Err(Error::Spawn {
            message: format!("cannot execute {}: {errno}", config.executable.display()),
        });
    }

    info!(pid = pid.as_raw(), namespaces = %spaces, "Started broker child");
    Ok(child)
}

/// Report the child's errno through the error pipe.
///
/// # Safety
/// Must only be called in the cloned child with `fd` referencing the write
/// end of the error pipe.
unsafe fn report_errno(fd: RawFd) {
    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
    let bytes = errno.to_ne_bytes();
    // SAFETY: bytes outlives the call and fd is owned by the child.
    unsafe {
        libc::write(fd, bytes.as_ptr().cast::<c_void>(), bytes.len());
    }
}

/// Map root in the child's new user namespace to root in ours.
fn map_root(pid: Pid) -> Result<()> {
    let pid = pid.as_raw();
    let proc_write = |name: &str, content: &str| {
        fs::write(format!("/proc/{pid}/{name}"), content).map_err(|e| {
            error!(pid, file = name, error = %e, "Cannot set up user namespace mapping");
            Error::Spawn { message: format!("cannot write {name} of broker child: {e}") }
        })
    };
    proc_write("setgroups", "deny")?;
    proc_write("uid_map", "0 0 1\n")?;
    proc_write("gid_map", "0 0 1\n")?;
    Ok(())
}
