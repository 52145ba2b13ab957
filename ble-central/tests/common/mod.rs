use std::sync::Arc;

use ble_central::{CentralManager, Characteristic, CharacteristicProperties, Service};
use ble_link_sim::{SimPeripheral, SimRadio};
use btuuid::{BluetoothUuid, BluetoothUuid16};

pub const BATTERY: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f));
pub const BATTERY_LEVEL: BluetoothUuid = BluetoothUuid::Uuid16(BluetoothUuid16::new(0x2a19));

pub fn battery_service() -> Service {
    Service {
        uuid: BATTERY,
        is_primary: true,
        characteristics: vec![Characteristic {
            uuid: BATTERY_LEVEL,
            properties: CharacteristicProperties::READ
                | CharacteristicProperties::WRITE
                | CharacteristicProperties::NOTIFY,
        }],
    }
}

pub fn manager_with(peripherals: Vec<SimPeripheral>) -> (CentralManager, SimRadio) {
    let sim = SimRadio::new();
    for peripheral in peripherals {
        sim.add_peripheral(peripheral);
    }
    let central = CentralManager::new(Arc::new(sim.clone()));
    (central, sim)
}
