use std::ops::Deref;

/// Runs a closure when dropped, unless defused.
pub struct ScopeGuard<F: FnOnce()> {
    dropfn: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    /// Disarms the guard; the closure will not run.
    pub fn defuse(mut self) {
        self.dropfn = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(dropfn) = self.dropfn.take() {
            dropfn();
        }
    }
}

/// Returns a guard that runs `dropfn` when it goes out of scope.
pub fn defer<F: FnOnce()>(dropfn: F) -> ScopeGuard<F> {
    ScopeGuard {
        dropfn: Some(dropfn),
    }
}

/// A broadcast sender whose channel stays open while it is alive.
///
/// An [`async_broadcast::Sender`] alone closes its channel once the last
/// receiver is dropped. Holding an inactive receiver alongside it keeps the
/// channel open so that new receivers can be attached at any time. Dropping
/// this sender closes the channel, ending every receiver's stream.
pub struct BroadcastSender<T> {
    sender: async_broadcast::Sender<T>,
    _keep_alive: async_broadcast::InactiveReceiver<T>,
}

pub type BroadcastReceiver<T> = async_broadcast::Receiver<T>;

impl<T> Deref for BroadcastSender<T> {
    type Target = async_broadcast::Sender<T>;

    fn deref(&self) -> &Self::Target {
        &self.sender
    }
}

/// Creates a broadcast channel that drops the oldest value when full.
pub fn broadcast<T>(capacity: usize) -> BroadcastSender<T> {
    let (mut sender, receiver) = async_broadcast::broadcast(capacity);
    sender.set_overflow(true);
    BroadcastSender {
        sender,
        _keep_alive: receiver.deactivate(),
    }
}

/// Creates a single-slot broadcast channel holding the most recent value.
pub fn watch<T>() -> BroadcastSender<T> {
    broadcast(1)
}
