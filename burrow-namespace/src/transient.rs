//! Transient flat namespaces
//!
//! Flat namespaces (cgroup, IPC, mount, network, time, UTS) are created by
//! unsharing them from a single kernel thread. Creation happens on disposable
//! workers so that the creating thread never serves anything else afterwards.

use std::fmt;

use burrow_core::handle::current_ino;
use burrow_core::{Error, NamespaceHandle, NamespaceSet, NamespaceType, Result};
use nix::sched::{CloneFlags, unshare};
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

use crate::mount::remount_root_private;
use crate::worker::{self, DisposableWorker};

/// One optional handle per flat namespace type.
#[derive(Debug, Default)]
pub struct Rooms {
    /// Cgroup namespace
    pub cgroup: Option<NamespaceHandle>,
    /// IPC namespace
    pub ipc: Option<NamespaceHandle>,
    /// Mount namespace
    pub mount: Option<NamespaceHandle>,
    /// Network namespace
    pub net: Option<NamespaceHandle>,
    /// Time namespace
    pub time: Option<NamespaceHandle>,
    /// UTS namespace
    pub uts: Option<NamespaceHandle>,
}

impl Rooms {
    /// Slot for the passed type; `None` for hierarchical types.
    pub const fn slot_mut(&mut self, typ: NamespaceType) -> Option<&mut Option<NamespaceHandle>> {
        match typ {
            NamespaceType::Cgroup => Some(&mut self.cgroup),
            NamespaceType::Ipc => Some(&mut self.ipc),
            NamespaceType::Mount => Some(&mut self.mount),
            NamespaceType::Net => Some(&mut self.net),
            NamespaceType::Time => Some(&mut self.time),
            NamespaceType::Uts => Some(&mut self.uts),
            NamespaceType::Pid | NamespaceType::User => None,
        }
    }

    /// Handle of the passed type, if present.
    #[must_use]
    pub const fn get(&self, typ: NamespaceType) -> Option<&NamespaceHandle> {
        match typ {
            NamespaceType::Cgroup => self.cgroup.as_ref(),
            NamespaceType::Ipc => self.ipc.as_ref(),
            NamespaceType::Mount => self.mount.as_ref(),
            NamespaceType::Net => self.net.as_ref(),
            NamespaceType::Time => self.time.as_ref(),
            NamespaceType::Uts => self.uts.as_ref(),
            NamespaceType::Pid | NamespaceType::User => None,
        }
    }

    /// Take the handle of the passed type out, leaving the slot empty.
    pub fn take(&mut self, typ: NamespaceType) -> Option<NamespaceHandle> {
        self.slot_mut(typ).and_then(Option::take)
    }

    /// Store a handle under the passed type. Hierarchical types are rejected
    /// and the handle is handed back.
    pub fn insert(
        &mut self,
        typ: NamespaceType,
        handle: NamespaceHandle,
    ) -> std::result::Result<(), NamespaceHandle> {
        match self.slot_mut(typ) {
            Some(slot) => {
                *slot = Some(handle);
                Ok(())
            }
            None => Err(handle),
        }
    }

    /// Present handles in fixed order (cgroup, ipc, mnt, net, time, uts).
    pub fn iter(&self) -> impl Iterator<Item = (NamespaceType, &NamespaceHandle)> {
        NamespaceType::FLAT
            .into_iter()
            .filter_map(|typ| self.get(typ).map(|handle| (typ, handle)))
    }

    /// Types of the present handles.
    #[must_use]
    pub fn spaces(&self) -> NamespaceSet {
        self.iter().map(|(typ, _)| typ).collect()
    }

    /// Number of present handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether no handle at all is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Path referencing the namespace a thread's `unshare` created: time
/// namespaces only apply to children, so the new one shows up separately.
fn created_path(typ: NamespaceType) -> String {
    match typ {
        NamespaceType::Time => "/proc/thread-self/ns/time_for_children".to_string(),
        _ => typ.thread_self_path(),
    }
}

fn ensure_flat(typ: NamespaceType) -> Result<()> {
    if typ.is_hierarchical() {
        return Err(Error::invalid_request(format!(
            "{typ} namespaces cannot be created transiently"
        )));
    }
    Ok(())
}

/// Create a new namespace of the passed flat type from the calling thread and
/// return it, attempting to switch back afterwards.
///
/// Must only run on a disposable thread: a mount namespace additionally
/// unshares the thread's filesystem attributes, which cannot be undone.
fn create_here(typ: NamespaceType) -> Result<NamespaceHandle> {
    let original = NamespaceHandle::current(typ).inspect_err(|e| {
        error!(namespace = %typ, error = %e, "Cannot determine current namespace");
    })?;

    if typ == NamespaceType::Mount {
        unshare(CloneFlags::CLONE_FS).map_err(|e| {
            error!(namespace = %typ, error = %e, "Cannot unshare filesystem attributes");
            Error::namespace(format!("cannot unshare fs attributes: {e}"))
        })?;
    }
    unshare(typ.clone_flags()).map_err(|e| {
        error!(namespace = %typ, error = %e, "Cannot create new namespace");
        Error::namespace(format!("cannot create new {typ} namespace: {e}"))
    })?;
    if typ == NamespaceType::Mount {
        remount_root_private()?;
    }

    let created = NamespaceHandle::open(created_path(typ)).inspect_err(|e| {
        error!(namespace = %typ, error = %e, "Cannot determine new namespace");
    })?;

    // Switch back, unless unsharing left the thread where it was.
    let stayed = match (current_ino(typ), original.ino()) {
        (Ok(now), Ok(before)) => now == before,
        _ => false,
    };
    if !stayed {
        if let Err(e) = original.enter() {
            warn!(namespace = %typ, error = %e, "Cannot switch worker back into original namespace");
            worker::taint_current_thread();
        }
    }

    debug!(namespace = %typ, "Created transient namespace");
    Ok(created)
}

/// Create a new namespace of the passed flat type without entering it.
///
/// The namespace is created on a disposable worker thread; the calling
/// thread's namespaces stay untouched.
pub fn new_transient(typ: NamespaceType) -> Result<NamespaceHandle> {
    ensure_flat(typ)?;
    worker::run_scoped("burrow-transient", || create_here(typ))?
}

/// Create new namespaces for all flat types in `spaces`, one disposable
/// worker per type, concurrently.
///
/// Either all requested handles are returned, or none: on failure, handles
/// already created are closed and the reasons of all failed types are
/// aggregated as `"<name>:<reason>,<name>:<reason>"`.
pub async fn new_rooms(spaces: NamespaceSet) -> Result<Rooms> {
    if !spaces.is_flat() {
        return Err(Error::invalid_request(format!(
            "not a set of flat namespace types: {spaces}"
        )));
    }

    let mut pending = Vec::with_capacity(spaces.len());
    for typ in spaces.iter() {
        let (tx, rx) = oneshot::channel();
        let worker = DisposableWorker::spawn(format!("burrow-room-{typ}"), move || {
            let _ = tx.send(create_here(typ));
        })?;
        pending.push((typ, worker, rx));
    }

    let mut rooms = Rooms::default();
    let mut reasons = Vec::new();
    for (typ, worker, rx) in pending {
        let outcome = match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::namespace("worker vanished without result")),
        };
        // The worker has already sent its result; joining only reaps it.
        let _ = tokio::task::spawn_blocking(move || worker.join()).await;
        match outcome {
            Ok(handle) => {
                let _ = rooms.insert(typ, handle);
            }
            Err(e) => reasons.push(format!("{typ}:{e}")),
        }
    }

    if !reasons.is_empty() {
        drop(rooms);
        return Err(Error::namespace(reasons.join(",")));
    }
    Ok(rooms)
}

/// Restores the calling thread's original namespace when dropped.
///
/// Returned by [`enter_transient`]. If the original namespace cannot be
/// re-entered the thread is tainted; the drop then panics with
/// [`Error::Restoration`] on a disposable worker and aborts the process on
/// any other thread.
#[must_use = "dropping the guard immediately leaves the transient namespace"]
pub struct TransientGuard {
    typ: NamespaceType,
    original: NamespaceHandle,
}

impl TransientGuard {
    /// Type of the entered namespace.
    #[must_use]
    pub const fn kind(&self) -> NamespaceType {
        self.typ
    }
}

impl fmt::Debug for TransientGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransientGuard")
            .field("typ", &self.typ)
            .field("original", &self.original)
            .finish()
    }
}

impl Drop for TransientGuard {
    fn drop(&mut self) {
        if let Err(source) = self.original.enter() {
            error!(namespace = %self.typ, error = %source, "Cannot restore original namespace");
            worker::restoration_failed(Error::Restoration {
                namespace: self.typ,
                source,
            });
        }
    }
}

/// Create and enter a new namespace of the passed type on the calling thread.
///
/// Only cgroup, IPC, network and UTS namespaces are supported: mount
/// namespaces taint the thread's filesystem attributes, while PID, time and
/// user namespaces cannot be left again.
pub fn enter_transient(typ: NamespaceType) -> Result<TransientGuard> {
    if !matches!(
        typ,
        NamespaceType::Cgroup | NamespaceType::Ipc | NamespaceType::Net | NamespaceType::Uts
    ) {
        return Err(Error::invalid_request(format!(
            "unsupported type {typ} for entering a transient namespace"
        )));
    }
    worker::ensure_untainted()?;

    let original = NamespaceHandle::current(typ)?;
    unshare(typ.clone_flags())
        .map_err(|e| Error::namespace(format!("cannot create new {typ} namespace: {e}")))?;
    debug!(namespace = %typ, "Entered transient namespace");
    Ok(TransientGuard { typ, original })
}
