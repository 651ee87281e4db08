//! Process bootstrap for broker children
//!
//! A broker started in a new PID namespace is its PID 1, but still sees the
//! parent's procfs. Before any other thread gets started, such a process
//! moves into a private mount namespace and mounts a fresh procfs.

use burrow_namespace::mount::{mount_proc, remount_root_private};
use nix::sched::{CloneFlags, unshare};
use tracing::{debug, warn};

/// Set up a PID-1 broker; does nothing in any other process. Failures are
/// logged only.
pub fn run() {
    if std::process::id() != 1 {
        return;
    }
    debug!("Bootstrapping as PID 1");

    if let Err(e) = unshare(CloneFlags::CLONE_NEWNS) {
        warn!(error = %e, "Cannot create private mount namespace");
        return;
    }
    if let Err(e) = remount_root_private() {
        warn!(error = %e, "Cannot make mount propagation private");
        return;
    }
    if let Err(e) = mount_proc() {
        warn!(error = %e, "Cannot mount procfs for new PID namespace");
    }
}
