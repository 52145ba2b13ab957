use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ble_link::advertisement_data::AdvertisementData;
use ble_link::{Characteristic, ConnectionState, PeripheralId, Service, WriteMode};
use btuuid::BluetoothUuid;
use futures_channel::oneshot;

use crate::error::{ErrorKind, Result};
use crate::pending::{RequestKey, RequestKind, Waiter};
use crate::router::{Shared, State};
use crate::util::BroadcastReceiver;

/// A stream of values notified or indicated by a peripheral.
///
/// The stream ends when the subscription is removed, when the peripheral
/// disconnects, or when the radio becomes unavailable.
pub type NotificationStream = BroadcastReceiver<Vec<u8>>;

/// A handle to a peripheral known to a
/// [`CentralManager`][crate::CentralManager].
///
/// GATT operations require an established connection and a completed service
/// discovery. Operations address characteristics by UUID; when several
/// discovered services carry the same characteristic UUID, the first in
/// discovery order is used.
#[derive(Clone)]
pub struct Peripheral {
    id: PeripheralId,
    shared: Arc<Shared>,
}

impl fmt::Debug for Peripheral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peripheral").field("id", &self.id).finish()
    }
}

impl PartialEq for Peripheral {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Peripheral {}

impl Hash for Peripheral {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Peripheral {
    pub(crate) fn new(id: PeripheralId, shared: Arc<Shared>) -> Self {
        Peripheral { id, shared }
    }

    /// The peripheral's stable identifier.
    pub fn id(&self) -> PeripheralId {
        self.id
    }

    /// The peripheral's name, from its most recent advertisement.
    pub fn name(&self) -> Option<String> {
        let st = self.shared.lock();
        st.registry.get(self.id).and_then(|record| record.name.clone())
    }

    /// The most recently received advertisement.
    pub fn advertisement(&self) -> Option<AdvertisementData> {
        let st = self.shared.lock();
        st.registry
            .get(self.id)
            .and_then(|record| record.advertisement.clone())
    }

    /// The signal strength, in dBm, of the most recent advertisement.
    pub fn rssi(&self) -> Option<i16> {
        let st = self.shared.lock();
        st.registry.get(self.id).and_then(|record| record.rssi)
    }

    pub fn connection_state(&self) -> ConnectionState {
        let st = self.shared.lock();
        st.registry
            .get(self.id)
            .map(|record| record.connection)
            .unwrap_or_default()
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// The service inventory from the most recent discovery, if any.
    pub fn services(&self) -> Option<Vec<Service>> {
        let st = self.shared.lock();
        st.registry
            .get(self.id)
            .and_then(|record| record.services.clone())
    }

    /// Looks up a discovered service by UUID.
    pub fn service(&self, uuid: &BluetoothUuid) -> Result<Service> {
        let st = self.shared.lock();
        st.registry
            .get(self.id)
            .and_then(|record| record.service(uuid).cloned())
            .ok_or_else(|| ErrorKind::InvalidService.into())
    }

    /// Looks up a discovered characteristic by UUID.
    pub fn characteristic(&self, uuid: &BluetoothUuid) -> Result<Characteristic> {
        let st = self.shared.lock();
        st.registry
            .get(self.id)
            .and_then(|record| record.characteristic(uuid).cloned())
            .ok_or_else(|| ErrorKind::InvalidCharacteristic.into())
    }

    /// Discovers the peripheral's services and their characteristics,
    /// replacing any previously discovered inventory.
    ///
    /// A non-empty `services` list limits discovery to those UUIDs, and fails
    /// with [`ErrorKind::InvalidService`] if none of them is present.
    pub async fn discover_services(&self, services: &[BluetoothUuid]) -> Result<Vec<Service>> {
        let receiver = {
            let mut st = self.shared.lock();
            self.ensure_connected(&st)?;
            let (sender, receiver) = oneshot::channel();
            if st
                .pending
                .insert(
                    RequestKey::new(self.id, RequestKind::Discover),
                    Waiter::Discover(sender),
                )
                .is_none()
            {
                return Err(ErrorKind::Busy.into());
            }
            receiver
        };
        self.shared.link.discover_services(self.id, services);
        let discovered = receiver.await??;
        if !services.is_empty() && discovered.is_empty() {
            return Err(ErrorKind::InvalidService.into());
        }
        Ok(discovered)
    }

    /// Reads the value of a characteristic.
    pub async fn read(&self, characteristic: &BluetoothUuid) -> Result<Vec<u8>> {
        let receiver = {
            let mut st = self.shared.lock();
            self.ensure_characteristic(&st, characteristic)?;
            let (sender, receiver) = oneshot::channel();
            if st
                .pending
                .insert(
                    RequestKey::with_characteristic(
                        self.id,
                        RequestKind::Read,
                        characteristic.clone(),
                    ),
                    Waiter::Read(sender),
                )
                .is_none()
            {
                return Err(ErrorKind::Busy.into());
            }
            receiver
        };
        self.shared.link.read(self.id, characteristic);
        receiver.await?
    }

    /// Writes a value to a characteristic.
    ///
    /// A [`WriteMode::WithResponse`] write completes when the peripheral
    /// acknowledges it; a [`WriteMode::WithoutResponse`] write completes as
    /// soon as it has been submitted to the radio.
    pub async fn write(
        &self,
        characteristic: &BluetoothUuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        match mode {
            WriteMode::WithoutResponse => {
                {
                    let st = self.shared.lock();
                    self.ensure_characteristic(&st, characteristic)?;
                }
                self.shared.link.write(self.id, characteristic, value, mode);
                Ok(())
            }
            WriteMode::WithResponse => {
                let receiver = {
                    let mut st = self.shared.lock();
                    self.ensure_characteristic(&st, characteristic)?;
                    let (sender, receiver) = oneshot::channel();
                    if st
                        .pending
                        .insert(
                            RequestKey::with_characteristic(
                                self.id,
                                RequestKind::Write,
                                characteristic.clone(),
                            ),
                            Waiter::Write(sender),
                        )
                        .is_none()
                    {
                        return Err(ErrorKind::Busy.into());
                    }
                    receiver
                };
                self.shared.link.write(self.id, characteristic, value, mode);
                receiver.await?
            }
        }
    }

    /// Subscribes to notifications or indications from a characteristic.
    ///
    /// Subscribing again to an already subscribed characteristic returns a
    /// new stream over the existing subscription without touching the radio.
    pub async fn subscribe(&self, characteristic: &BluetoothUuid) -> Result<NotificationStream> {
        let receiver = {
            let mut st = self.shared.lock();
            self.ensure_characteristic(&st, characteristic)?;
            if let Some(record) = st.registry.get_mut(self.id) {
                if record.subscriptions.contains_key(characteristic) {
                    return Ok(record.subscribe(characteristic.clone()));
                }
            }
            let (sender, receiver) = oneshot::channel();
            if st
                .pending
                .insert(
                    RequestKey::with_characteristic(
                        self.id,
                        RequestKind::Subscribe,
                        characteristic.clone(),
                    ),
                    Waiter::Subscribe(sender),
                )
                .is_none()
            {
                return Err(ErrorKind::Busy.into());
            }
            receiver
        };
        self.shared.link.set_notify(self.id, characteristic, true);
        receiver.await?
    }

    /// Removes the subscription for a characteristic, ending its streams.
    ///
    /// A no-op if there is no subscription. Notifications still in flight
    /// when the subscription ends are dropped, not delivered.
    pub async fn unsubscribe(&self, characteristic: &BluetoothUuid) -> Result<()> {
        let receiver = {
            let mut st = self.shared.lock();
            let subscribed = st
                .registry
                .get(self.id)
                .is_some_and(|record| record.subscriptions.contains_key(characteristic));
            if !subscribed {
                return Ok(());
            }
            let (sender, receiver) = oneshot::channel();
            if st
                .pending
                .insert(
                    RequestKey::with_characteristic(
                        self.id,
                        RequestKind::Unsubscribe,
                        characteristic.clone(),
                    ),
                    Waiter::Unsubscribe(sender),
                )
                .is_none()
            {
                return Err(ErrorKind::Busy.into());
            }
            receiver
        };
        self.shared.link.set_notify(self.id, characteristic, false);
        receiver.await?
    }

    fn ensure_connected(&self, st: &State) -> Result<()> {
        if !st.radio.is_available() {
            return Err(ErrorKind::RadioUnavailable.into());
        }
        let connected = st
            .registry
            .get(self.id)
            .is_some_and(|record| record.connection.is_connected());
        if !connected {
            return Err(ErrorKind::NotConnected.into());
        }
        Ok(())
    }

    fn ensure_characteristic(&self, st: &State, characteristic: &BluetoothUuid) -> Result<()> {
        self.ensure_connected(st)?;
        let known = st
            .registry
            .get(self.id)
            .is_some_and(|record| record.characteristic(characteristic).is_some());
        if !known {
            return Err(ErrorKind::InvalidCharacteristic.into());
        }
        Ok(())
    }
}
