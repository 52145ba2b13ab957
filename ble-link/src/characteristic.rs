use std::ops::{BitOr, BitOrAssign};

use btuuid::BluetoothUuid;

/// A characteristic of a remote peripheral's service.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Characteristic {
    pub uuid: BluetoothUuid,
    pub properties: CharacteristicProperties,
}

/// The set of operations a characteristic supports.
///
/// See the Bluetooth Core Specification Vol 3, Part G §3.3.1.1.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CharacteristicProperties(u8);

impl CharacteristicProperties {
    pub const BROADCAST: Self = Self(0x01);
    pub const READ: Self = Self(0x02);
    pub const WRITE_WITHOUT_RESPONSE: Self = Self(0x04);
    pub const WRITE: Self = Self(0x08);
    pub const NOTIFY: Self = Self(0x10);
    pub const INDICATE: Self = Self(0x20);
    pub const AUTHENTICATED_SIGNED_WRITES: Self = Self(0x40);
    pub const EXTENDED_PROPERTIES: Self = Self(0x80);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn can_read(self) -> bool {
        self.contains(Self::READ)
    }

    pub const fn can_write(self) -> bool {
        self.contains(Self::WRITE)
    }

    pub const fn can_write_without_response(self) -> bool {
        self.contains(Self::WRITE_WITHOUT_RESPONSE)
    }

    /// Whether the characteristic supports notifications or indications.
    pub const fn can_notify(self) -> bool {
        self.0 & (Self::NOTIFY.0 | Self::INDICATE.0) != 0
    }
}

impl BitOr for CharacteristicProperties {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for CharacteristicProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Whether a write requests an acknowledgement from the peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WriteMode {
    /// The peripheral acknowledges the write, and the operation completes on
    /// that acknowledgement.
    #[default]
    WithResponse,
    /// The write completes as soon as it has been submitted to the radio.
    WithoutResponse,
}
