//! Data types for Bluetooth LE advertising payloads.
//!
//! Section references ("CSS §") are to the Bluetooth Core Specification
//! Supplement, Part A.

use std::collections::HashMap;

use btuuid::BluetoothUuid;

/// Manufacturer-specific advertising data (CSS §A.1.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManufacturerData {
    /// The Bluetooth SIG assigned company identifier.
    pub company_id: u16,
    pub data: Vec<u8>,
}

/// The decoded payload of an advertising packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdvertisementData {
    /// The (possibly shortened) local name of the device (CSS §A.1.2).
    pub local_name: Option<String>,
    /// Manufacturer-specific data (CSS §A.1.4).
    pub manufacturer_data: Option<ManufacturerData>,
    /// Service-associated data (CSS §A.1.11), keyed by service UUID.
    pub service_data: HashMap<BluetoothUuid, Vec<u8>>,
    /// Advertised service UUIDs (CSS §A.1.1).
    pub service_uuids: Vec<BluetoothUuid>,
    /// The transmit power level in dBm (CSS §A.1.5).
    pub tx_power_level: Option<i16>,
    /// Whether the peripheral accepts connections. This is reported by the
    /// radio from the advertising PDU type, not carried in the payload.
    pub is_connectable: bool,
}

impl Default for AdvertisementData {
    fn default() -> Self {
        AdvertisementData {
            local_name: None,
            manufacturer_data: None,
            service_data: HashMap::new(),
            service_uuids: Vec::new(),
            tx_power_level: None,
            is_connectable: true,
        }
    }
}

impl AdvertisementData {
    /// Decodes an advertising payload from its over-the-air representation,
    /// a sequence of length-prefixed AD structures (CSS §A.1).
    ///
    /// A structure that would run past the end of the payload terminates
    /// parsing; everything decoded up to that point is kept. Unrecognized AD
    /// types are skipped.
    pub fn parse(data: &[u8]) -> Self {
        let mut adv = AdvertisementData::default();
        let mut i = 0;
        while i < data.len() {
            let len = data[i] as usize;
            if len == 0 || i + 1 + len > data.len() {
                break;
            }
            let ad_type = data[i + 1];
            let value = &data[i + 2..i + 1 + len];
            match ad_type {
                // Incomplete and complete lists of 16-bit service UUIDs.
                0x02 | 0x03 => {
                    for chunk in value.chunks_exact(2) {
                        adv.service_uuids
                            .push(BluetoothUuid::Uuid16(
                                u16::from_le_bytes([chunk[0], chunk[1]]).into(),
                            ));
                    }
                }
                // Incomplete and complete lists of 32-bit service UUIDs.
                0x04 | 0x05 => {
                    for chunk in value.chunks_exact(4) {
                        adv.service_uuids.push(BluetoothUuid::Uuid32(
                            u32::from_le_bytes(chunk.try_into().unwrap()).into(),
                        ));
                    }
                }
                // Incomplete and complete lists of 128-bit service UUIDs.
                0x06 | 0x07 => {
                    for chunk in value.chunks_exact(16) {
                        adv.service_uuids.push(BluetoothUuid::Uuid128(
                            u128::from_le_bytes(chunk.try_into().unwrap()).into(),
                        ));
                    }
                }
                // Shortened local name; never overrides a complete one.
                0x08 => {
                    if adv.local_name.is_none() {
                        adv.local_name = Some(String::from_utf8_lossy(value).into_owned());
                    }
                }
                // Complete local name.
                0x09 => {
                    adv.local_name = Some(String::from_utf8_lossy(value).into_owned());
                }
                // Tx power level.
                0x0a => {
                    if let [level] = value {
                        adv.tx_power_level = Some(*level as i8 as i16);
                    }
                }
                // Service data, 16-bit UUID.
                0x16 => {
                    if value.len() >= 2 {
                        let uuid = BluetoothUuid::Uuid16(
                            u16::from_le_bytes([value[0], value[1]]).into(),
                        );
                        adv.service_data.insert(uuid, value[2..].to_vec());
                    }
                }
                // Service data, 32-bit UUID.
                0x20 => {
                    if value.len() >= 4 {
                        let uuid = BluetoothUuid::Uuid32(
                            u32::from_le_bytes(value[0..4].try_into().unwrap()).into(),
                        );
                        adv.service_data.insert(uuid, value[4..].to_vec());
                    }
                }
                // Service data, 128-bit UUID.
                0x21 => {
                    if value.len() >= 16 {
                        let uuid = BluetoothUuid::Uuid128(
                            u128::from_le_bytes(value[0..16].try_into().unwrap()).into(),
                        );
                        adv.service_data.insert(uuid, value[16..].to_vec());
                    }
                }
                // Manufacturer-specific data.
                0xff => {
                    if value.len() >= 2 {
                        adv.manufacturer_data = Some(ManufacturerData {
                            company_id: u16::from_le_bytes([value[0], value[1]]),
                            data: value[2..].to_vec(),
                        });
                    }
                }
                _ => {}
            }
            i += 1 + len;
        }
        adv
    }

    /// Encodes the payload back into AD structures.
    ///
    /// The connectable flag is not part of the payload and is not encoded.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(name) = &self.local_name {
            push_structure(&mut out, 0x09, name.as_bytes());
        }
        let mut uuid16 = Vec::new();
        let mut uuid32 = Vec::new();
        let mut uuid128 = Vec::new();
        for uuid in &self.service_uuids {
            match uuid {
                BluetoothUuid::Uuid16(x) => uuid16.extend_from_slice(&x.to_le_bytes()),
                BluetoothUuid::Uuid32(x) => uuid32.extend_from_slice(&x.to_le_bytes()),
                BluetoothUuid::Uuid128(x) => uuid128.extend_from_slice(&x.to_le_bytes()),
            }
        }
        if !uuid16.is_empty() {
            push_structure(&mut out, 0x03, &uuid16);
        }
        if !uuid32.is_empty() {
            push_structure(&mut out, 0x05, &uuid32);
        }
        if !uuid128.is_empty() {
            push_structure(&mut out, 0x07, &uuid128);
        }
        if let Some(level) = self.tx_power_level {
            push_structure(&mut out, 0x0a, &[level as i8 as u8]);
        }
        for (uuid, data) in &self.service_data {
            let mut value = Vec::with_capacity(16 + data.len());
            let ad_type = match uuid {
                BluetoothUuid::Uuid16(x) => {
                    value.extend_from_slice(&x.to_le_bytes());
                    0x16
                }
                BluetoothUuid::Uuid32(x) => {
                    value.extend_from_slice(&x.to_le_bytes());
                    0x20
                }
                BluetoothUuid::Uuid128(x) => {
                    value.extend_from_slice(&x.to_le_bytes());
                    0x21
                }
            };
            value.extend_from_slice(data);
            push_structure(&mut out, ad_type, &value);
        }
        if let Some(manufacturer) = &self.manufacturer_data {
            let mut value = Vec::with_capacity(2 + manufacturer.data.len());
            value.extend_from_slice(&manufacturer.company_id.to_le_bytes());
            value.extend_from_slice(&manufacturer.data);
            push_structure(&mut out, 0xff, &value);
        }
        out
    }
}

fn push_structure(out: &mut Vec<u8>, ad_type: u8, value: &[u8]) {
    out.push(value.len() as u8 + 1);
    out.push(ad_type);
    out.extend_from_slice(value);
}

#[cfg(test)]
mod tests {
    use btuuid::{BluetoothUuid16, BluetoothUuid128};

    use super::*;

    #[test]
    fn parses_a_typical_payload() {
        // Flags, a complete 16-bit UUID list, and a complete local name.
        let data = [
            0x02, 0x01, 0x06, 0x03, 0x03, 0x0f, 0x18, 0x06, 0x09, b'P', b'u', b'l', b's', b'e',
        ];
        let adv = AdvertisementData::parse(&data);
        assert_eq!(adv.local_name.as_deref(), Some("Pulse"));
        assert_eq!(
            adv.service_uuids,
            vec![BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f))]
        );
        assert!(adv.service_data.is_empty());
        assert!(adv.manufacturer_data.is_none());
    }

    #[test]
    fn complete_name_wins_over_shortened() {
        let data = [
            0x03, 0x08, b'P', b'u', 0x06, 0x09, b'P', b'u', b'l', b's', b'e',
        ];
        let adv = AdvertisementData::parse(&data);
        assert_eq!(adv.local_name.as_deref(), Some("Pulse"));
    }

    #[test]
    fn parses_manufacturer_and_service_data() {
        let data = [
            0x05, 0xff, 0x4c, 0x00, 0xaa, 0xbb, // company 0x004c, data aa bb
            0x05, 0x16, 0x0f, 0x18, 0x64, 0x01, // service data for 0x180f
        ];
        let adv = AdvertisementData::parse(&data);
        let manufacturer = adv.manufacturer_data.unwrap();
        assert_eq!(manufacturer.company_id, 0x004c);
        assert_eq!(manufacturer.data, vec![0xaa, 0xbb]);
        assert_eq!(
            adv.service_data
                .get(&BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f))),
            Some(&vec![0x64, 0x01])
        );
    }

    #[test]
    fn parses_tx_power_as_signed() {
        let data = [0x02, 0x0a, 0xf4];
        let adv = AdvertisementData::parse(&data);
        assert_eq!(adv.tx_power_level, Some(-12));
    }

    #[test]
    fn truncated_structure_ends_parsing() {
        // The second structure claims 9 bytes but only 2 remain.
        let data = [0x02, 0x0a, 0x04, 0x09, b'P', b'u'];
        let adv = AdvertisementData::parse(&data);
        assert_eq!(adv.tx_power_level, Some(4));
        assert!(adv.local_name.is_none());
    }

    #[test]
    fn zero_length_terminates() {
        let data = [0x00, 0x02, 0x0a, 0x04];
        let adv = AdvertisementData::parse(&data);
        assert_eq!(adv, AdvertisementData::default());
    }

    #[test]
    fn empty_payload_parses_to_default() {
        assert_eq!(AdvertisementData::parse(&[]), AdvertisementData::default());
    }

    #[test]
    fn encoded_payload_parses_back() {
        let adv = AdvertisementData {
            local_name: Some("Pulse".to_string()),
            manufacturer_data: Some(ManufacturerData {
                company_id: 0x004c,
                data: vec![1, 2, 3],
            }),
            service_data: HashMap::from([(
                BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f)),
                vec![0x64],
            )]),
            service_uuids: vec![
                BluetoothUuid::Uuid16(BluetoothUuid16::new(0x180f)),
                BluetoothUuid::Uuid128(BluetoothUuid128::new(
                    0x1234_5678_9abc_def0_1234_5678_9abc_def0,
                )),
            ],
            tx_power_level: Some(-8),
            is_connectable: true,
        };
        assert_eq!(AdvertisementData::parse(&adv.to_bytes()), adv);
    }
}
