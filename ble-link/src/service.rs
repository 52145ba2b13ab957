use btuuid::BluetoothUuid;

use crate::characteristic::Characteristic;

/// A service of a remote peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    pub uuid: BluetoothUuid,
    pub is_primary: bool,
    pub characteristics: Vec<Characteristic>,
}

impl Service {
    /// Looks up a characteristic of this service by UUID.
    pub fn characteristic(&self, uuid: &BluetoothUuid) -> Option<&Characteristic> {
        self.characteristics.iter().find(|c| &c.uuid == uuid)
    }
}
