//! Mount helpers for freshly created mount namespaces

use burrow_core::{Error, Result};
use nix::mount::{MsFlags, mount};
use std::path::Path;
use tracing::debug;

/// Change the propagation of `/` and everything below it to private, so that
/// mount changes in the current mount namespace don't leak into its parent.
pub fn remount_root_private() -> Result<()> {
    mount(
        Some("none"),
        "/",
        None::<&str>,
        MsFlags::MS_REC | MsFlags::MS_PRIVATE,
        None::<&str>,
    )
    .map_err(|e| Error::namespace(format!("cannot change / mount propagation to private: {e}")))?;
    debug!("Remounted / recursively private");
    Ok(())
}

/// Mount a virtual filesystem of the passed type onto `target`.
pub fn mount_virtual(fstype: &str, target: impl AsRef<Path>) -> Result<()> {
    let target = target.as_ref();
    let flags = MsFlags::MS_NOSUID | MsFlags::MS_NODEV | MsFlags::MS_NOEXEC;
    mount(Some(fstype), target, Some(fstype), flags, None::<&str>).map_err(|e| {
        Error::namespace(format!("cannot mount {fstype} on {}: {e}", target.display()))
    })?;
    debug!(fstype, target = %target.display(), "Mounted virtual filesystem");
    Ok(())
}

/// Mount a fresh procfs on `/proc`, reflecting the current PID namespace.
pub fn mount_proc() -> Result<()> {
    mount_virtual("proc", "/proc")
}
