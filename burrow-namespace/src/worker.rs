//! Disposable kernel threads
//!
//! Switching namespaces changes the state of the kernel thread doing the
//! switch, so namespace-tainting work runs on threads that end after a single
//! use. These are always plain OS threads: pooled threads (such as tokio's
//! blocking pool) are reused and must never carry foreign namespaces.
//!
//! A thread that fails to switch back into its original namespaces is
//! tainted. Disposable workers then unwind and end; any other thread takes
//! the whole process down, as it may be handed unrelated work afterwards.

use std::cell::Cell;
use std::panic;
use std::process;
use std::thread::{self, JoinHandle};

use burrow_core::{Error, Result};
use tracing::{debug, error};

thread_local! {
    static TAINTED: Cell<bool> = const { Cell::new(false) };
    static DISPOSABLE: Cell<bool> = const { Cell::new(false) };
}

/// Whether the calling thread is a disposable worker ending after its
/// single use.
#[must_use]
pub fn is_disposable() -> bool {
    DISPOSABLE.with(Cell::get)
}

fn mark_disposable() {
    DISPOSABLE.with(|disposable| disposable.set(true));
}

/// Whether the calling thread failed to restore its namespaces earlier.
#[must_use]
pub fn is_tainted() -> bool {
    TAINTED.with(Cell::get)
}

/// Mark the calling thread as no longer attached to its original namespaces.
pub(crate) fn taint_current_thread() {
    TAINTED.with(|tainted| tainted.set(true));
}

/// Deal with the calling thread being stuck outside its original
/// namespaces.
///
/// The thread gets tainted. A disposable worker panics with `err` unless it
/// is unwinding already; any other thread logs `err` and aborts the process.
pub(crate) fn restoration_failed(err: Error) {
    taint_current_thread();
    if !is_disposable() {
        error!(error = %err, "Thread stuck in foreign namespace, aborting");
        process::abort();
    }
    if !thread::panicking() {
        panic::panic_any(err);
    }
}

/// Refuse to work on a tainted thread.
pub fn ensure_untainted() -> Result<()> {
    if is_tainted() {
        return Err(Error::TaintedThread);
    }
    Ok(())
}

/// A kernel thread running exactly one closure and then ending.
#[derive(Debug)]
pub struct DisposableWorker<T> {
    name: String,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> DisposableWorker<T> {
    /// Start a new worker thread running `f`.
    pub fn spawn<F>(name: impl Into<String>, f: F) -> Result<Self>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let name = name.into();
        let handle = thread::Builder::new().name(name.clone()).spawn(move || {
            mark_disposable();
            f()
        })?;
        debug!(worker = %name, "Started disposable worker");
        Ok(Self { name, handle })
    }

    /// Wait for the worker to finish and return its result.
    ///
    /// A panic inside the worker continues on the calling thread.
    pub fn join(self) -> T {
        match self.handle.join() {
            Ok(value) => {
                debug!(worker = %self.name, "Disposable worker finished");
                value
            }
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

/// Run `f` on a fresh disposable thread that may borrow from the caller, and
/// wait for it.
///
/// A panic inside `f` continues on the calling thread.
pub fn run_scoped<F, T>(name: &str, f: F) -> Result<T>
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    thread::scope(|scope| {
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn_scoped(scope, move || {
                mark_disposable();
                f()
            })?;
        match handle.join() {
            Ok(value) => Ok(value),
            Err(payload) => panic::resume_unwind(payload),
        }
    })
}
