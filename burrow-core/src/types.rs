//! Namespace type definitions with strong typing and validation

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::ffi::c_int;
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// One of the eight Linux kernel namespace types
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// Control group namespace
    Cgroup,
    /// System V IPC and POSIX message queue namespace
    Ipc,
    /// Mount namespace
    #[serde(rename = "mnt", alias = "mount")]
    Mount,
    /// Network namespace
    Net,
    /// PID namespace (hierarchical)
    Pid,
    /// Time namespace
    Time,
    /// User namespace (hierarchical)
    User,
    /// UTS (hostname) namespace
    Uts,
}

impl NamespaceType {
    /// All namespace types, in a fixed order
    pub const ALL: [Self; 8] = [
        Self::Cgroup,
        Self::Ipc,
        Self::Mount,
        Self::Net,
        Self::Pid,
        Self::Time,
        Self::User,
        Self::Uts,
    ];

    /// Types that can be created by unsharing from a single kernel thread
    pub const FLAT: [Self; 6] = [
        Self::Cgroup,
        Self::Ipc,
        Self::Mount,
        Self::Net,
        Self::Time,
        Self::Uts,
    ];

    /// Types that can only be created by spawning a new process
    pub const HIERARCHICAL: [Self; 2] = [Self::User, Self::Pid];

    /// The `CLONE_NEW*` flag for this type
    #[must_use]
    pub const fn clone_flag(self) -> c_int {
        match self {
            Self::Cgroup => libc::CLONE_NEWCGROUP,
            Self::Ipc => libc::CLONE_NEWIPC,
            Self::Mount => libc::CLONE_NEWNS,
            Self::Net => libc::CLONE_NEWNET,
            Self::Pid => libc::CLONE_NEWPID,
            Self::Time => libc::CLONE_NEWTIME,
            Self::User => libc::CLONE_NEWUSER,
            Self::Uts => libc::CLONE_NEWUTS,
        }
    }

    /// The `CLONE_NEW*` flag as nix clone flags
    #[must_use]
    pub const fn clone_flags(self) -> CloneFlags {
        CloneFlags::from_bits_retain(self.clone_flag())
    }

    /// Map a kernel-reported `CLONE_NEW*` value back to a type
    #[must_use]
    pub const fn from_clone_flag(flag: c_int) -> Option<Self> {
        match flag {
            libc::CLONE_NEWCGROUP => Some(Self::Cgroup),
            libc::CLONE_NEWIPC => Some(Self::Ipc),
            libc::CLONE_NEWNS => Some(Self::Mount),
            libc::CLONE_NEWNET => Some(Self::Net),
            libc::CLONE_NEWPID => Some(Self::Pid),
            libc::CLONE_NEWTIME => Some(Self::Time),
            libc::CLONE_NEWUSER => Some(Self::User),
            libc::CLONE_NEWUTS => Some(Self::Uts),
            _ => None,
        }
    }

    /// Name of the namespace entry below `/proc/<pid>/ns/`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Mount => "mnt",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Time => "time",
            Self::User => "user",
            Self::Uts => "uts",
        }
    }

    /// Whether the kernel manages this type as a tree (user, PID)
    #[must_use]
    pub const fn is_hierarchical(self) -> bool {
        matches!(self, Self::User | Self::Pid)
    }

    /// Path referencing the calling thread's namespace of this type
    #[must_use]
    pub fn thread_self_path(self) -> String {
        format!("/proc/thread-self/ns/{}", self.name())
    }

    /// Path referencing a process' namespace of this type
    #[must_use]
    pub fn process_path(self, pid: i32) -> String {
        format!("/proc/{pid}/ns/{}", self.name())
    }
}

impl fmt::Display for NamespaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.name())
    }
}

impl FromStr for NamespaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cgroup" => Ok(Self::Cgroup),
            "ipc" => Ok(Self::Ipc),
            "mnt" | "mount" => Ok(Self::Mount),
            "net" => Ok(Self::Net),
            "pid" => Ok(Self::Pid),
            "time" => Ok(Self::Time),
            "user" => Ok(Self::User),
            "uts" => Ok(Self::Uts),
            other => Err(Error::invalid_request(format!(
                "unknown namespace type {other:?}"
            ))),
        }
    }
}

/// A set of namespace types, carried as a bitmask of `CLONE_NEW*` flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct NamespaceSet(u64);

impl NamespaceSet {
    /// The empty set
    pub const EMPTY: Self = Self(0);

    const KNOWN: u64 = (libc::CLONE_NEWCGROUP
        | libc::CLONE_NEWIPC
        | libc::CLONE_NEWNS
        | libc::CLONE_NEWNET
        | libc::CLONE_NEWPID
        | libc::CLONE_NEWTIME
        | libc::CLONE_NEWUSER
        | libc::CLONE_NEWUTS) as u64;

    const HIERARCHICAL_BITS: u64 = (libc::CLONE_NEWUSER | libc::CLONE_NEWPID) as u64;

    /// Create from raw `CLONE_NEW*` bits, keeping unknown bits for validation
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Get raw value
    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// Create a set from the passed types
    pub fn of(types: impl IntoIterator<Item = NamespaceType>) -> Self {
        types.into_iter().collect()
    }

    /// Add a type to this set
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn with(self, typ: NamespaceType) -> Self {
        Self(self.0 | typ.clone_flag() as u64)
    }

    /// Check if a type is in this set
    #[must_use]
    pub const fn contains(self, typ: NamespaceType) -> bool {
        #[allow(clippy::cast_sign_loss)]
        let bit = typ.clone_flag() as u64;
        self.0 & bit == bit
    }

    /// Check if no type at all (and no unknown bit) is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Bits that do not correspond to any namespace type
    #[must_use]
    pub const fn unknown_bits(self) -> u64 {
        self.0 & !Self::KNOWN
    }

    /// Non-empty and consisting of user and/or PID only
    #[must_use]
    pub const fn is_hierarchical(self) -> bool {
        self.0 != 0 && self.0 & !Self::HIERARCHICAL_BITS == 0
    }

    /// Non-empty and consisting of flat types only
    #[must_use]
    pub const fn is_flat(self) -> bool {
        self.0 != 0 && self.unknown_bits() == 0 && self.0 & Self::HIERARCHICAL_BITS == 0
    }

    /// Number of types in this set
    #[must_use]
    pub fn len(self) -> usize {
        self.iter().count()
    }

    /// Iterate over the contained types in fixed order
    pub fn iter(self) -> impl Iterator<Item = NamespaceType> {
        NamespaceType::ALL
            .into_iter()
            .filter(move |typ| self.contains(*typ))
    }

    /// Convert to clone flags for clone(2) and unshare(2)
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn clone_flags(self) -> CloneFlags {
        CloneFlags::from_bits_retain((self.0 & Self::KNOWN) as c_int)
    }
}

impl From<NamespaceType> for NamespaceSet {
    fn from(typ: NamespaceType) -> Self {
        Self::EMPTY.with(typ)
    }
}

impl FromIterator<NamespaceType> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceType>>(iter: I) -> Self {
        iter.into_iter().fold(Self::EMPTY, Self::with)
    }
}

impl std::ops::BitOr for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<NamespaceType> for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: NamespaceType) -> Self {
        self.with(rhs)
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(NamespaceType::name).collect();
        write!(f, "{}", names.join(","))?;
        if self.unknown_bits() != 0 {
            write!(f, "+{:#x}", self.unknown_bits())?;
        }
        Ok(())
    }
}
