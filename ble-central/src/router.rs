//! Routes radio events to the requests and streams awaiting them.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ble_link::advertisement_data::AdvertisementData;
use ble_link::{
    AttError, ConnectionState, EventSink, LinkError, LinkEvent, PeripheralId, RadioLink,
    RadioState, Service,
};
use btuuid::BluetoothUuid;
use tracing::{debug, warn};

use crate::central_manager::Disconnection;
use crate::error::{Error, ErrorKind};
use crate::pending::{PendingRequests, RequestKey, RequestKind, Waiter};
use crate::peripheral::Peripheral;
use crate::registry::Registry;
use crate::scan::{Discovered, ScanSession};
use crate::util::{BroadcastSender, broadcast, watch};

/// State shared between the manager surface, its peripheral handles, and the
/// event router.
pub(crate) struct Shared {
    pub link: Arc<dyn RadioLink>,
    pub state: Mutex<State>,
    pub state_updates: BroadcastSender<RadioState>,
    pub disconnections: BroadcastSender<Disconnection>,
}

pub(crate) struct State {
    pub radio: RadioState,
    pub registry: Registry,
    pub pending: PendingRequests,
    pub scan: Option<ScanSession>,
    pub scan_counter: u64,
}

/// The manager's [`EventSink`]. Every radio event funnels through here and is
/// dispatched to the one pending request, subscription, or registry update it
/// concerns.
pub(crate) struct Router {
    pub shared: Arc<Shared>,
}

impl EventSink for Router {
    fn on_event(&self, event: LinkEvent) {
        match event {
            LinkEvent::StateChanged(state) => self.shared.on_state_changed(state),
            LinkEvent::Discovered {
                id,
                advertisement,
                rssi,
            } => self.shared.on_discovered(id, advertisement, rssi),
            LinkEvent::Connected { id } => self.shared.on_connected(id),
            LinkEvent::ConnectFailed { id, error } => self.shared.on_connect_failed(id, error),
            LinkEvent::Disconnected { id, error } => self.shared.on_disconnected(id, error),
            LinkEvent::ServicesDiscovered { id, result } => {
                self.shared.on_services_discovered(id, result)
            }
            LinkEvent::CharacteristicRead {
                id,
                characteristic,
                result,
            } => self.shared.on_characteristic_read(id, characteristic, result),
            LinkEvent::WriteConfirmed {
                id,
                characteristic,
                result,
            } => self.shared.on_write_confirmed(id, characteristic, result),
            LinkEvent::NotifyStateChanged {
                id,
                characteristic,
                enabled,
                result,
            } => self
                .shared
                .on_notify_state_changed(id, characteristic, enabled, result),
            LinkEvent::Notification {
                id,
                characteristic,
                value,
            } => self.shared.on_notification(id, characteristic, value),
        }
    }
}

impl Shared {
    pub fn new(link: Arc<dyn RadioLink>) -> Arc<Self> {
        Arc::new(Shared {
            link,
            state: Mutex::new(State {
                radio: RadioState::Unknown,
                registry: Registry::new(),
                pending: PendingRequests::new(),
                scan: None,
                scan_counter: 0,
            }),
            state_updates: watch(),
            disconnections: broadcast(16),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handle(self: &Arc<Self>, id: PeripheralId) -> Peripheral {
        Peripheral::new(id, self.clone())
    }

    /// Stops the scan if `session` is still the active one.
    pub fn end_scan(&self, session: u64) {
        let mut st = self.lock();
        if st.scan.as_ref().is_some_and(|s| s.id == session) {
            st.scan = None;
            drop(st);
            self.link.stop_scan();
        }
    }

    /// A radio that stops being available takes every pending request, every
    /// connection, and the scan session down with it.
    fn on_state_changed(self: &Arc<Self>, radio: RadioState) {
        let (failed, lost) = {
            let mut st = self.lock();
            let previous = st.radio;
            st.radio = radio;
            if radio.is_available() || previous == radio {
                (Vec::new(), Vec::new())
            } else {
                let failed = st.pending.drain();
                let mut lost = Vec::new();
                for (id, record) in st.registry.iter_mut() {
                    if record.connection != ConnectionState::Disconnected {
                        record.connection = ConnectionState::Disconnected;
                        record.clear_session();
                        lost.push(*id);
                    }
                }
                st.scan = None;
                (failed, lost)
            }
        };
        if !failed.is_empty() || !lost.is_empty() {
            warn!(
                "radio became {radio:?}, failing {} requests and {} connections",
                failed.len(),
                lost.len()
            );
        }
        for waiter in failed {
            waiter.fail(ErrorKind::RadioUnavailable.into());
        }
        for id in lost {
            let _ = self.disconnections.try_broadcast(Disconnection {
                peripheral: self.handle(id),
                error: Some(ErrorKind::RadioUnavailable.into()),
                requested: false,
            });
        }
        let _ = self.state_updates.try_broadcast(radio);
    }

    fn on_discovered(self: &Arc<Self>, id: PeripheralId, advertisement: AdvertisementData, rssi: i16) {
        let mut st = self.lock();
        let sender = {
            let Some(session) = st.scan.as_mut() else {
                debug!("dropping advertisement from {id}: no scan session");
                return;
            };
            if !session.filter.matches(id, &advertisement) {
                return;
            }
            if !session.allow_duplicates && !session.seen.insert(id) {
                return;
            }
            session.sender.clone()
        };
        st.registry.observed(id, &advertisement, rssi);
        let discovered = Discovered {
            peripheral: self.handle(id),
            advertisement,
            rssi,
        };
        if sender.unbounded_send(discovered).is_err() {
            st.scan = None;
            drop(st);
            self.link.stop_scan();
        }
    }

    fn on_connected(&self, id: PeripheralId) {
        let waiter = {
            let mut st = self.lock();
            let waiter = st.pending.take(&RequestKey::new(id, RequestKind::Connect));
            if waiter.is_some() {
                if let Some(record) = st.registry.get_mut(id) {
                    record.connection = ConnectionState::Connected;
                }
            }
            waiter
        };
        match waiter {
            Some(Waiter::Connect(sender)) => {
                let _ = sender.send(Ok(()));
            }
            Some(_) => {}
            None => {
                // Nobody is waiting for this connection, so nobody may use it.
                debug!("connection to {id} completed with no pending attempt, disconnecting");
                self.link.disconnect(id);
            }
        }
    }

    fn on_connect_failed(&self, id: PeripheralId, error: LinkError) {
        let waiter = {
            let mut st = self.lock();
            let waiter = st.pending.take(&RequestKey::new(id, RequestKind::Connect));
            if let Some(record) = st.registry.get_mut(id) {
                record.connection = ConnectionState::Disconnected;
            }
            waiter
        };
        match waiter {
            Some(Waiter::Connect(sender)) => {
                let _ = sender.send(Err(error.into()));
            }
            Some(_) => {}
            None => debug!("connection to {id} failed with no pending attempt: {error}"),
        }
    }

    fn on_disconnected(self: &Arc<Self>, id: PeripheralId, error: Option<LinkError>) {
        let (requested, swept, announce) = {
            let mut st = self.lock();
            let requested = st.pending.take(&RequestKey::new(id, RequestKind::Disconnect));
            let swept = st
                .pending
                .take_matching(|key| key.peripheral == id && key.kind.needs_connection());
            let announce = match st.registry.get_mut(id) {
                Some(record) => {
                    let was = record.connection;
                    record.connection = ConnectionState::Disconnected;
                    record.clear_session();
                    was != ConnectionState::Disconnected
                }
                None => false,
            };
            (requested, swept, announce)
        };
        let was_requested = requested.is_some();
        if let Some(Waiter::Disconnect(sender)) = requested {
            let _ = sender.send(Ok(()));
        }
        for waiter in swept {
            waiter.fail(ErrorKind::NotConnected.into());
        }
        if announce {
            let _ = self.disconnections.try_broadcast(Disconnection {
                peripheral: self.handle(id),
                error: error.map(Error::from),
                requested: was_requested,
            });
        } else if !was_requested {
            debug!("disconnect event for {id} without a live connection");
        }
    }

    fn on_services_discovered(&self, id: PeripheralId, result: Result<Vec<Service>, LinkError>) {
        let waiter = {
            let mut st = self.lock();
            let waiter = st.pending.take(&RequestKey::new(id, RequestKind::Discover));
            if waiter.is_some() {
                if let (Some(record), Ok(services)) = (st.registry.get_mut(id), &result) {
                    record.services = Some(services.clone());
                }
            }
            waiter
        };
        match waiter {
            Some(Waiter::Discover(sender)) => {
                let _ = sender.send(result.map_err(Error::from));
            }
            Some(_) => {}
            None => debug!("service discovery result for {id} matches no pending request"),
        }
    }

    fn on_characteristic_read(
        &self,
        id: PeripheralId,
        characteristic: BluetoothUuid,
        result: Result<Vec<u8>, AttError>,
    ) {
        let key = RequestKey::with_characteristic(id, RequestKind::Read, characteristic.clone());
        let waiter = self.lock().pending.take(&key);
        match waiter {
            Some(Waiter::Read(sender)) => {
                let _ = sender.send(result.map_err(Error::from));
            }
            Some(_) => {}
            None => debug!("read result for {characteristic:?} on {id} matches no pending request"),
        }
    }

    fn on_write_confirmed(
        &self,
        id: PeripheralId,
        characteristic: BluetoothUuid,
        result: Result<(), AttError>,
    ) {
        let key = RequestKey::with_characteristic(id, RequestKind::Write, characteristic.clone());
        let waiter = self.lock().pending.take(&key);
        match waiter {
            Some(Waiter::Write(sender)) => {
                let _ = sender.send(result.map_err(Error::from));
            }
            Some(_) => {}
            None => {
                debug!("write confirmation for {characteristic:?} on {id} matches no pending request")
            }
        }
    }

    fn on_notify_state_changed(
        &self,
        id: PeripheralId,
        characteristic: BluetoothUuid,
        enabled: bool,
        result: Result<(), AttError>,
    ) {
        let kind = if enabled {
            RequestKind::Subscribe
        } else {
            RequestKind::Unsubscribe
        };
        let (waiter, stream) = {
            let mut st = self.lock();
            let waiter = st
                .pending
                .take(&RequestKey::with_characteristic(id, kind, characteristic.clone()));
            let stream = match (&waiter, &result) {
                (Some(Waiter::Subscribe(_)), Ok(())) => st
                    .registry
                    .get_mut(id)
                    .map(|record| record.subscribe(characteristic.clone())),
                (Some(Waiter::Unsubscribe(_)), Ok(())) => {
                    if let Some(record) = st.registry.get_mut(id) {
                        record.subscriptions.remove(&characteristic);
                    }
                    None
                }
                _ => None,
            };
            (waiter, stream)
        };
        match waiter {
            Some(Waiter::Subscribe(sender)) => {
                let reply = match (result, stream) {
                    (Ok(()), Some(stream)) => Ok(stream),
                    (Ok(()), None) => Err(ErrorKind::NotConnected.into()),
                    (Err(error), _) => Err(error.into()),
                };
                let _ = sender.send(reply);
            }
            Some(Waiter::Unsubscribe(sender)) => {
                let _ = sender.send(result.map_err(Error::from));
            }
            Some(_) => {}
            None => {
                debug!("notify state change for {characteristic:?} on {id} matches no pending request")
            }
        }
    }

    fn on_notification(&self, id: PeripheralId, characteristic: BluetoothUuid, value: Vec<u8>) {
        let mut st = self.lock();
        let Some(record) = st.registry.get_mut(id) else {
            debug!("notification from unknown peripheral {id}");
            return;
        };
        let Some(sender) = record.subscriptions.get(&characteristic) else {
            debug!("dropping notification for {characteristic:?} from {id}: no subscription");
            return;
        };
        if sender.receiver_count() == 0 {
            record.subscriptions.remove(&characteristic);
        } else {
            let _ = sender.try_broadcast(value);
        }
    }
}
