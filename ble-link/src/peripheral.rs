use std::fmt::Display;
use std::str::FromStr;

use uuid::Uuid;

/// A stable, opaque identifier for a peripheral.
///
/// Identifiers are assigned by the radio and remain stable for as long as the
/// radio is running. They are not guaranteed to be stable across hosts or
/// radio restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeripheralId(Uuid);

impl PeripheralId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        PeripheralId(uuid)
    }

    pub const fn from_u128(value: u128) -> Self {
        PeripheralId(Uuid::from_u128(value))
    }

    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Display for PeripheralId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Uuid> for PeripheralId {
    fn from(uuid: Uuid) -> Self {
        PeripheralId(uuid)
    }
}

impl FromStr for PeripheralId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PeripheralId(Uuid::from_str(s)?))
    }
}

/// The connection state of a peripheral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}
