//! Owned references to Linux kernel namespaces

use nix::sched::{CloneFlags, setns};
use nix::sys::stat::fstat;
use std::fmt;
use std::fs::{self, File};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use crate::{Error, NamespaceType, Result};

nix::ioctl_none!(
    /// `NS_GET_NSTYPE`, see include/uapi/linux/nsfs.h: returns the
    /// `CLONE_NEW*` type of the namespace referenced by a descriptor.
    ns_get_nstype,
    0xb7,
    0x3
);

/// An open file descriptor referencing exactly one namespace.
///
/// The descriptor is closed when the handle is dropped; ownership moves with
/// the handle. An absent namespace is `None`, never a handle.
pub struct NamespaceHandle {
    fd: OwnedFd,
}

impl NamespaceHandle {
    /// Open a namespace referenced by a VFS path, such as `/proc/1/ns/net`.
    ///
    /// # Errors
    /// Returns error if the path cannot be opened or doesn't reference a namespace
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            Error::namespace(format!("cannot open namespace {}: {e}", path.display()))
        })?;
        let handle = Self::from_fd(file.into());
        handle.kind()?;
        Ok(handle)
    }

    /// Open the calling thread's current namespace of the passed type.
    ///
    /// # Errors
    /// Returns error if procfs doesn't provide the namespace reference
    pub fn current(typ: NamespaceType) -> Result<Self> {
        let file = File::open(typ.thread_self_path()).map_err(|e| {
            Error::namespace(format!("cannot determine current {typ} namespace: {e}"))
        })?;
        Ok(Self::from_fd(file.into()))
    }

    /// Open the namespace of the passed type a process is attached to.
    ///
    /// # Errors
    /// Returns error if the process or its namespace reference is inaccessible
    pub fn of_process(pid: i32, typ: NamespaceType) -> Result<Self> {
        let file = File::open(typ.process_path(pid)).map_err(|e| {
            Error::namespace(format!("cannot determine {typ} namespace of process {pid}: {e}"))
        })?;
        Ok(Self::from_fd(file.into()))
    }

    /// Wrap an already open namespace file descriptor without checking it.
    #[must_use]
    pub const fn from_fd(fd: OwnedFd) -> Self {
        Self { fd }
    }

    /// Type of the referenced namespace, as reported by the kernel.
    ///
    /// # Errors
    /// Returns error if the descriptor doesn't reference a namespace
    pub fn kind(&self) -> Result<NamespaceType> {
        kind_of(self.fd.as_fd())
    }

    /// Identification (inode number) of the referenced namespace.
    ///
    /// # Errors
    /// Returns error if the descriptor cannot be stat'ed
    pub fn ino(&self) -> Result<u64> {
        Ok(fstat(&self.fd)?.st_ino)
    }

    /// Attach the calling thread to the referenced namespace.
    ///
    /// # Errors
    /// Returns the kernel's error if setns(2) fails
    pub fn enter(&self) -> nix::Result<()> {
        setns(&self.fd, CloneFlags::empty())
    }

}

/// Type of the namespace referenced by an arbitrary descriptor.
///
/// # Errors
/// Returns error if the descriptor doesn't reference a namespace
pub fn kind_of(fd: BorrowedFd<'_>) -> Result<NamespaceType> {
    // SAFETY: NS_GET_NSTYPE takes no argument and fd is a valid descriptor.
    let typ = unsafe { ns_get_nstype(fd.as_raw_fd()) }
        .map_err(|e| Error::namespace(format!("cannot determine type of namespace: {e}")))?;
    NamespaceType::from_clone_flag(typ)
        .ok_or_else(|| Error::namespace(format!("unknown type of namespace {typ:#x}")))
}

/// Identification (inode number) of the calling thread's namespace of the
/// passed type.
///
/// # Errors
/// Returns error if procfs doesn't provide the namespace reference
pub fn current_ino(typ: NamespaceType) -> Result<u64> {
    let meta = fs::metadata(typ.thread_self_path()).map_err(|e| {
        Error::namespace(format!("cannot stat current {typ} namespace: {e}"))
    })?;
    Ok(meta.ino())
}

impl AsFd for NamespaceHandle {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for NamespaceHandle {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl From<NamespaceHandle> for OwnedFd {
    fn from(handle: NamespaceHandle) -> Self {
        handle.fd
    }
}

impl fmt::Debug for NamespaceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceHandle")
            .field("fd", &self.fd.as_raw_fd())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_reports_its_kind() {
        for typ in [NamespaceType::Net, NamespaceType::Uts, NamespaceType::Mount] {
            let handle = NamespaceHandle::current(typ).unwrap();
            assert_eq!(handle.kind().unwrap(), typ);
        }
    }

    #[test]
    fn test_ino_matches_current() {
        let handle = NamespaceHandle::current(NamespaceType::Net).unwrap();
        assert_eq!(handle.ino().unwrap(), current_ino(NamespaceType::Net).unwrap());
    }

    #[test]
    fn test_process_namespace() {
        #[allow(clippy::cast_possible_wrap)]
        let pid = std::process::id() as i32;
        let handle = NamespaceHandle::of_process(pid, NamespaceType::Ipc).unwrap();
        assert_eq!(handle.kind().unwrap(), NamespaceType::Ipc);
    }

    #[test]
    fn test_open_rejects_non_namespace() {
        assert!(NamespaceHandle::open(".").is_err());
        assert!(NamespaceHandle::open("/nonexistent/ns/net").is_err());
    }

    #[test]
    fn test_kind_of_plain_file_fails() {
        let file = File::open(".").unwrap();
        assert!(kind_of(file.as_fd()).is_err());
    }
}
