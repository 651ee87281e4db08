//! Cancellation signal for service loops

use tokio::sync::watch;

/// Triggers a [`Shutdown`] signal
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Ask all service loops holding the matching signal to terminate.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

/// Signal that a service loop should terminate, polled once per receive cycle
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create a linked trigger and signal
    #[must_use]
    pub fn new() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Self { rx })
    }

    /// A signal that never fires, for loops bound to process lifetime
    #[must_use]
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    /// Whether termination has been requested
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }
}
