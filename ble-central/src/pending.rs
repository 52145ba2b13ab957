//! The table of requests awaiting a radio event.

use std::collections::HashMap;

use ble_link::{PeripheralId, Service};
use btuuid::BluetoothUuid;
use futures_channel::oneshot;

use crate::error::{Error, Result};
use crate::peripheral::NotificationStream;

/// The kinds of request that can await a radio event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum RequestKind {
    Connect,
    Disconnect,
    Discover,
    Read,
    Write,
    Subscribe,
    Unsubscribe,
}

impl RequestKind {
    /// Whether the request only makes sense on an established connection.
    pub fn needs_connection(self) -> bool {
        !matches!(self, RequestKind::Connect | RequestKind::Disconnect)
    }
}

/// Identifies the one admissible request of a given kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct RequestKey {
    pub peripheral: PeripheralId,
    pub kind: RequestKind,
    pub characteristic: Option<BluetoothUuid>,
}

impl RequestKey {
    pub fn new(peripheral: PeripheralId, kind: RequestKind) -> Self {
        RequestKey {
            peripheral,
            kind,
            characteristic: None,
        }
    }

    pub fn with_characteristic(
        peripheral: PeripheralId,
        kind: RequestKind,
        characteristic: BluetoothUuid,
    ) -> Self {
        RequestKey {
            peripheral,
            kind,
            characteristic: Some(characteristic),
        }
    }
}

/// A handle to a pending request.
///
/// Tokens are generation-checked: once the request they refer to has been
/// resolved, or its slot reused, the token silently stops matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestToken {
    slot: usize,
    generation: u64,
}

/// The completion channel of a pending request.
pub(crate) enum Waiter {
    Connect(oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<Result<()>>),
    Discover(oneshot::Sender<Result<Vec<Service>>>),
    Read(oneshot::Sender<Result<Vec<u8>>>),
    Write(oneshot::Sender<Result<()>>),
    Subscribe(oneshot::Sender<Result<NotificationStream>>),
    Unsubscribe(oneshot::Sender<Result<()>>),
}

impl Waiter {
    /// Resolves the request with an error.
    pub fn fail(self, error: Error) {
        match self {
            Waiter::Connect(sender)
            | Waiter::Disconnect(sender)
            | Waiter::Write(sender)
            | Waiter::Unsubscribe(sender) => {
                let _ = sender.send(Err(error));
            }
            Waiter::Discover(sender) => {
                let _ = sender.send(Err(error));
            }
            Waiter::Read(sender) => {
                let _ = sender.send(Err(error));
            }
            Waiter::Subscribe(sender) => {
                let _ = sender.send(Err(error));
            }
        }
    }
}

struct Slot {
    generation: u64,
    entry: Option<(RequestKey, Waiter)>,
}

/// The set of requests currently awaiting a radio event.
///
/// At most one request per [`RequestKey`] may be live; admitting a second
/// request for a live key is refused rather than replacing the first. Slots
/// are recycled, with a generation counter guarding against stale tokens.
pub(crate) struct PendingRequests {
    slots: Vec<Slot>,
    free: Vec<usize>,
    index: HashMap<RequestKey, RequestToken>,
}

impl PendingRequests {
    pub fn new() -> Self {
        PendingRequests {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Admits a request, or refuses it if its key is already live.
    pub fn insert(&mut self, key: RequestKey, waiter: Waiter) -> Option<RequestToken> {
        if self.index.contains_key(&key) {
            return None;
        }
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                self.slots.len() - 1
            }
        };
        let entry = &mut self.slots[slot];
        entry.generation += 1;
        entry.entry = Some((key.clone(), waiter));
        let token = RequestToken {
            slot,
            generation: entry.generation,
        };
        self.index.insert(key, token);
        Some(token)
    }

    /// Whether a request for `key` is live.
    pub fn contains(&self, key: &RequestKey) -> bool {
        self.index.contains_key(key)
    }

    /// Removes the live request for `key`, if any.
    pub fn take(&mut self, key: &RequestKey) -> Option<Waiter> {
        let token = self.index.remove(key)?;
        self.release(token.slot).map(|(_, waiter)| waiter)
    }

    /// Removes the request `token` refers to. A token whose request has
    /// already resolved matches nothing.
    pub fn cancel(&mut self, token: RequestToken) -> Option<Waiter> {
        let slot = self.slots.get(token.slot)?;
        if slot.generation != token.generation || slot.entry.is_none() {
            return None;
        }
        let (key, waiter) = self.release(token.slot)?;
        self.index.remove(&key);
        Some(waiter)
    }

    /// Removes every live request matching `pred`.
    pub fn take_matching(&mut self, mut pred: impl FnMut(&RequestKey) -> bool) -> Vec<Waiter> {
        let keys: Vec<RequestKey> = self.index.keys().filter(|key| pred(key)).cloned().collect();
        keys.iter().filter_map(|key| self.take(key)).collect()
    }

    /// Removes every live request.
    pub fn drain(&mut self) -> Vec<Waiter> {
        self.take_matching(|_| true)
    }

    fn release(&mut self, slot: usize) -> Option<(RequestKey, Waiter)> {
        let entry = self.slots[slot].entry.take()?;
        self.free.push(slot);
        Some(entry)
    }
}

#[cfg(test)]
mod tests {
    use btuuid::BluetoothUuid16;

    use super::*;
    use crate::error::ErrorKind;

    fn id(n: u128) -> PeripheralId {
        PeripheralId::from_u128(n)
    }

    fn waiter() -> (Waiter, oneshot::Receiver<Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        (Waiter::Write(sender), receiver)
    }

    #[test]
    fn duplicate_keys_are_refused() {
        let mut pending = PendingRequests::new();
        let key = RequestKey::new(id(1), RequestKind::Connect);
        let (first, mut first_rx) = waiter();
        let (second, _second_rx) = waiter();
        assert!(pending.insert(key.clone(), first).is_some());
        assert!(pending.insert(key.clone(), second).is_none());

        // The first request is still resolvable.
        if let Some(waiter) = pending.take(&key) {
            waiter.fail(ErrorKind::Canceled.into());
        }
        let resolved = first_rx.try_recv().unwrap().unwrap();
        assert_eq!(resolved.unwrap_err().kind(), ErrorKind::Canceled);
    }

    #[test]
    fn distinct_characteristics_are_admitted_independently() {
        let mut pending = PendingRequests::new();
        let a = RequestKey::with_characteristic(id(1), RequestKind::Read, BluetoothUuid::Uuid16(BluetoothUuid16::new(1)));
        let b = RequestKey::with_characteristic(id(1), RequestKind::Read, BluetoothUuid::Uuid16(BluetoothUuid16::new(2)));
        assert!(pending.insert(a, waiter().0).is_some());
        assert!(pending.insert(b, waiter().0).is_some());
    }

    #[test]
    fn stale_tokens_match_nothing() {
        let mut pending = PendingRequests::new();
        let key = RequestKey::new(id(1), RequestKind::Connect);
        let token = pending.insert(key.clone(), waiter().0).unwrap();
        assert!(pending.take(&key).is_some());
        assert!(pending.cancel(token).is_none());
    }

    #[test]
    fn reused_slots_invalidate_old_tokens() {
        let mut pending = PendingRequests::new();
        let key = RequestKey::new(id(1), RequestKind::Connect);
        let old = pending.insert(key.clone(), waiter().0).unwrap();
        pending.take(&key);
        let new = pending.insert(key.clone(), waiter().0).unwrap();
        assert!(pending.cancel(old).is_none());
        assert!(pending.contains(&key));
        assert!(pending.cancel(new).is_some());
        assert!(!pending.contains(&key));
    }

    #[test]
    fn take_matching_leaves_other_peripherals() {
        let mut pending = PendingRequests::new();
        pending.insert(RequestKey::new(id(1), RequestKind::Discover), waiter().0);
        pending.insert(
            RequestKey::with_characteristic(id(1), RequestKind::Read, BluetoothUuid::Uuid16(BluetoothUuid16::new(1))),
            waiter().0,
        );
        pending.insert(RequestKey::new(id(2), RequestKind::Discover), waiter().0);
        let swept = pending.take_matching(|key| key.peripheral == id(1));
        assert_eq!(swept.len(), 2);
        assert!(pending.contains(&RequestKey::new(id(2), RequestKind::Discover)));
    }

    #[test]
    fn dropped_waiters_cancel_their_receivers() {
        let mut pending = PendingRequests::new();
        let key = RequestKey::new(id(1), RequestKind::Connect);
        let (waiter, mut receiver) = waiter();
        pending.insert(key.clone(), waiter);
        drop(pending.take(&key));
        assert!(receiver.try_recv().is_err());
    }
}
