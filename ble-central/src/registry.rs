//! The manager's record of every peripheral it has seen.

use std::collections::HashMap;
use std::collections::hash_map::Entry;

use ble_link::advertisement_data::AdvertisementData;
use ble_link::{Characteristic, ConnectionState, PeripheralId, Service};
use btuuid::BluetoothUuid;

use crate::peripheral::NotificationStream;
use crate::util::{BroadcastSender, broadcast};

const NOTIFICATION_BUFFER: usize = 16;

/// What the manager knows about one peripheral.
pub(crate) struct Record {
    pub name: Option<String>,
    pub advertisement: Option<AdvertisementData>,
    pub rssi: Option<i16>,
    pub connection: ConnectionState,
    /// The inventory from the most recent service discovery.
    pub services: Option<Vec<Service>>,
    /// One broadcast channel per subscribed characteristic.
    pub subscriptions: HashMap<BluetoothUuid, BroadcastSender<Vec<u8>>>,
}

impl Record {
    fn new() -> Self {
        Record {
            name: None,
            advertisement: None,
            rssi: None,
            connection: ConnectionState::Disconnected,
            services: None,
            subscriptions: HashMap::new(),
        }
    }

    pub fn service(&self, uuid: &BluetoothUuid) -> Option<&Service> {
        self.services.as_ref()?.iter().find(|s| &s.uuid == uuid)
    }

    /// Looks up a discovered characteristic by UUID. When several services
    /// carry the same characteristic UUID, the first in discovery order wins.
    pub fn characteristic(&self, uuid: &BluetoothUuid) -> Option<&Characteristic> {
        self.services
            .as_ref()?
            .iter()
            .find_map(|s| s.characteristic(uuid))
    }

    /// Attaches a new stream to the characteristic's subscription, creating
    /// the subscription channel on first use.
    pub fn subscribe(&mut self, characteristic: BluetoothUuid) -> NotificationStream {
        match self.subscriptions.entry(characteristic) {
            Entry::Occupied(entry) => entry.get().new_receiver(),
            Entry::Vacant(entry) => entry.insert(broadcast(NOTIFICATION_BUFFER)).new_receiver(),
        }
    }

    /// Forgets everything tied to the current connection. Dropping the
    /// subscription channels ends their notification streams.
    pub fn clear_session(&mut self) {
        self.services = None;
        self.subscriptions.clear();
    }
}

/// The set of peripherals known to a manager.
///
/// Records enter on discovery or on a connect to a previously unseen
/// identifier, and leave when the peripheral is forgotten or when a new scan
/// starts while they are disconnected.
pub(crate) struct Registry {
    records: HashMap<PeripheralId, Record>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            records: HashMap::new(),
        }
    }

    pub fn get(&self, id: PeripheralId) -> Option<&Record> {
        self.records.get(&id)
    }

    pub fn get_mut(&mut self, id: PeripheralId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    /// The record for `id`, created empty if absent.
    pub fn entry(&mut self, id: PeripheralId) -> &mut Record {
        self.records.entry(id).or_insert_with(Record::new)
    }

    pub fn remove(&mut self, id: PeripheralId) -> Option<Record> {
        self.records.remove(&id)
    }

    pub fn ids(&self) -> Vec<PeripheralId> {
        self.records.keys().copied().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PeripheralId, &mut Record)> {
        self.records.iter_mut()
    }

    /// Updates a record from a received advertisement.
    pub fn observed(&mut self, id: PeripheralId, advertisement: &AdvertisementData, rssi: i16) {
        let record = self.entry(id);
        if let Some(name) = &advertisement.local_name {
            record.name = Some(name.clone());
        }
        record.advertisement = Some(advertisement.clone());
        record.rssi = Some(rssi);
    }

    /// Drops every record not part of an active or pending connection.
    pub fn evict_disconnected(&mut self) {
        self.records
            .retain(|_, record| record.connection != ConnectionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use btuuid::BluetoothUuid16;

    use super::*;

    fn id(n: u128) -> PeripheralId {
        PeripheralId::from_u128(n)
    }

    #[test]
    fn observation_updates_name_and_rssi() {
        let mut registry = Registry::new();
        let adv = AdvertisementData {
            local_name: Some("Pulse".to_string()),
            ..Default::default()
        };
        registry.observed(id(1), &adv, -42);
        let record = registry.get(id(1)).unwrap();
        assert_eq!(record.name.as_deref(), Some("Pulse"));
        assert_eq!(record.rssi, Some(-42));

        // A nameless advertisement keeps the last known name.
        registry.observed(id(1), &AdvertisementData::default(), -50);
        let record = registry.get(id(1)).unwrap();
        assert_eq!(record.name.as_deref(), Some("Pulse"));
        assert_eq!(record.rssi, Some(-50));
    }

    #[test]
    fn eviction_spares_live_connections() {
        let mut registry = Registry::new();
        registry.entry(id(1)).connection = ConnectionState::Connected;
        registry.entry(id(2)).connection = ConnectionState::Connecting;
        registry.entry(id(3));
        registry.evict_disconnected();
        assert!(registry.get(id(1)).is_some());
        assert!(registry.get(id(2)).is_some());
        assert!(registry.get(id(3)).is_none());
    }

    #[test]
    fn characteristic_lookup_takes_first_match() {
        use ble_link::CharacteristicProperties;

        let mut registry = Registry::new();
        let shared = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x2a00));
        let record = registry.entry(id(1));
        record.services = Some(vec![
            Service {
                uuid: BluetoothUuid::Uuid16(BluetoothUuid16::new(0x1800)),
                is_primary: true,
                characteristics: vec![Characteristic {
                    uuid: shared.clone(),
                    properties: CharacteristicProperties::READ,
                }],
            },
            Service {
                uuid: BluetoothUuid::Uuid16(BluetoothUuid16::new(0x1801)),
                is_primary: true,
                characteristics: vec![Characteristic {
                    uuid: shared.clone(),
                    properties: CharacteristicProperties::WRITE,
                }],
            },
        ]);
        let found = record.characteristic(&shared).unwrap();
        assert!(found.properties.can_read());
    }
}
