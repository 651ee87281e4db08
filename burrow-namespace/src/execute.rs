//! Thread-pinned execution inside a set of namespaces
//!
//! [`execute`] runs caller logic while the executing kernel thread is
//! attached to the namespaces referenced by the passed handles. Without a
//! mount namespace the calling thread itself switches in and back out again.
//! Mount namespaces require unsharing the thread's filesystem attributes,
//! which can't be undone, so these run on a disposable worker thread instead.

use burrow_core::handle::current_ino;
use burrow_core::{Error, NamespaceHandle, NamespaceType, Result};
use nix::sched::{CloneFlags, unshare};
use tracing::{debug, error};

use crate::worker;

/// Types a mount-namespace worker takes over from the calling thread unless
/// given explicitly.
const PICKUP: [NamespaceType; 6] = [
    NamespaceType::Cgroup,
    NamespaceType::Ipc,
    NamespaceType::Net,
    NamespaceType::Pid,
    NamespaceType::Time,
    NamespaceType::Uts,
];

/// Run `f` attached to the namespaces referenced by `handles`.
///
/// The handles must be of distinct types and must not reference a user
/// namespace, as running threads can't switch user namespaces.
///
/// When no mount namespace is passed, `f` runs on the calling thread which
/// is switched back afterwards, in reverse order. If switching back fails,
/// the thread is tainted. On a disposable worker this then panics with
/// [`Error::Restoration`], and later calls on the tainted thread fail with
/// [`Error::TaintedThread`]. On any other thread the process aborts.
///
/// When a mount namespace is passed, `f` runs on a new worker thread that
/// ends afterwards. The worker additionally takes over the calling thread's
/// cgroup, IPC, network, PID, time and UTS namespaces where no handle of
/// that type was passed. A panic in `f` continues on the calling thread.
pub fn execute<R, F>(handles: &[&NamespaceHandle], f: F) -> Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let targets = classify(handles)?;
    if targets.iter().any(|(typ, _)| *typ == NamespaceType::Mount) {
        execute_separately(&targets, f)
    } else {
        execute_in_and_out(&targets, f)
    }
}

/// Pair each handle with its kernel-reported type, rejecting user namespaces
/// and duplicates before anything gets switched.
fn classify<'h>(
    handles: &[&'h NamespaceHandle],
) -> Result<Vec<(NamespaceType, &'h NamespaceHandle)>> {
    let mut targets: Vec<(NamespaceType, &NamespaceHandle)> = Vec::with_capacity(handles.len());
    for &handle in handles {
        let typ = handle.kind()?;
        if typ == NamespaceType::User {
            return Err(Error::UserNamespaceSwitch);
        }
        if targets.iter().any(|(seen, _)| *seen == typ) {
            return Err(Error::invalid_request(format!(
                "more than one {typ} namespace passed"
            )));
        }
        targets.push((typ, handle));
    }
    Ok(targets)
}

/// Original namespaces of the calling thread, switched back into in reverse
/// order when dropped.
struct Restorer {
    originals: Vec<(NamespaceType, NamespaceHandle)>,
}

impl Drop for Restorer {
    fn drop(&mut self) {
        let mut failure = None;
        while let Some((typ, original)) = self.originals.pop() {
            if let Err(source) = original.enter() {
                error!(namespace = %typ, error = %source, "Cannot restore original namespace");
                failure.get_or_insert(Error::Restoration {
                    namespace: typ,
                    source,
                });
            }
        }
        if let Some(err) = failure {
            worker::restoration_failed(err);
        }
    }
}

fn execute_in_and_out<R, F>(targets: &[(NamespaceType, &NamespaceHandle)], f: F) -> Result<R>
where
    F: FnOnce() -> R,
{
    worker::ensure_untainted()?;

    let mut restorer = Restorer {
        originals: Vec::with_capacity(targets.len()),
    };
    for (typ, handle) in targets {
        let original = NamespaceHandle::current(*typ)?;
        handle
            .enter()
            .map_err(|e| Error::namespace(format!("cannot switch into {typ} namespace: {e}")))?;
        restorer.originals.push((*typ, original));
        debug!(namespace = %typ, "Switched into namespace");
    }

    let result = f();
    drop(restorer);
    Ok(result)
}

fn execute_separately<R, F>(targets: &[(NamespaceType, &NamespaceHandle)], f: F) -> Result<R>
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    let mut inherited = Vec::new();
    for typ in PICKUP {
        if !targets.iter().any(|(explicit, _)| *explicit == typ) {
            inherited.push((typ, NamespaceHandle::current(typ)?));
        }
    }

    worker::run_scoped("burrow-execute", move || -> Result<R> {
        unshare(CloneFlags::CLONE_FS)
            .map_err(|e| Error::namespace(format!("cannot unshare fs attributes: {e}")))?;

        // Mount first, then everything else.
        let mut order: Vec<(NamespaceType, &NamespaceHandle)> = targets.to_vec();
        order.sort_by_key(|(typ, _)| *typ != NamespaceType::Mount);
        order.extend(inherited.iter().map(|(typ, handle)| (*typ, handle)));

        for (typ, handle) in order {
            if handle.ino()? == current_ino(typ)? {
                continue;
            }
            handle
                .enter()
                .map_err(|e| Error::namespace(format!("cannot switch into {typ} namespace: {e}")))?;
            debug!(namespace = %typ, "Worker switched into namespace");
        }
        Ok(f())
    })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;
    use std::thread;

    #[test]
    fn test_empty_handles_runs_on_caller() {
        let caller = thread::current().id();
        let ran_on = execute(&[], || thread::current().id()).unwrap();
        assert_eq!(ran_on, caller);
    }

    #[test]
    fn test_user_namespace_rejected() {
        let user = NamespaceHandle::current(NamespaceType::User).unwrap();
        let mut called = false;
        let result = execute(&[&user], || called = true);
        assert!(matches!(result, Err(Error::UserNamespaceSwitch)));
        assert!(!called);
    }

    #[test]
    fn test_duplicate_types_rejected() {
        let first = NamespaceHandle::current(NamespaceType::Net).unwrap();
        let second = NamespaceHandle::current(NamespaceType::Net).unwrap();
        let result = execute(&[&first, &second], || ());
        assert!(matches!(result, Err(Error::InvalidRequest { .. })));
    }

    #[test]
    fn test_tainted_thread_refused() {
        let refused = worker::run_scoped("test-tainted", || {
            worker::taint_current_thread();
            matches!(execute(&[], || ()), Err(Error::TaintedThread))
        })
        .unwrap();
        assert!(refused);
    }

    #[test]
    fn test_mount_path_panic_propagates() {
        let mnt = NamespaceHandle::current(NamespaceType::Mount).unwrap();
        let result = panic::catch_unwind(|| {
            let _ = execute(&[&mnt], || panic!("inside"));
        });
        // Unprivileged setups may fail before running f; either way nothing
        // escapes as anything but an error or the original panic.
        if let Err(payload) = result {
            assert_eq!(payload.downcast_ref::<&str>(), Some(&"inside"));
        }
    }

    #[test]
    fn test_mount_path_runs_on_worker() {
        let mnt = NamespaceHandle::current(NamespaceType::Mount).unwrap();
        let caller = thread::current().id();
        let ran_on = execute(&[&mnt], || thread::current().id()).unwrap();
        assert_ne!(ran_on, caller);
    }
}
