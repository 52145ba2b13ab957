//! The command and event contract between a central manager and the radio.

use std::sync::Arc;

use btuuid::BluetoothUuid;

use crate::advertisement_data::AdvertisementData;
use crate::characteristic::WriteMode;
use crate::error::{AttError, LinkError};
use crate::peripheral::PeripheralId;
use crate::service::Service;

/// The power and authorization state of the radio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RadioState {
    #[default]
    Unknown,
    Resetting,
    Unsupported,
    Unauthorized,
    PoweredOff,
    PoweredOn,
}

impl RadioState {
    /// Whether the radio can currently service commands.
    pub fn is_available(self) -> bool {
        matches!(self, RadioState::PoweredOn)
    }
}

/// An asynchronous event reported by the radio.
///
/// Events concerning the same peripheral are delivered in the order the radio
/// observed them.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// The radio's state changed.
    StateChanged(RadioState),
    /// An advertisement was received while scanning.
    Discovered {
        id: PeripheralId,
        advertisement: AdvertisementData,
        rssi: i16,
    },
    /// A connection attempt completed successfully.
    Connected { id: PeripheralId },
    /// A connection attempt failed.
    ConnectFailed { id: PeripheralId, error: LinkError },
    /// An established connection (or a cancelled attempt) ended. `error` is
    /// `None` when the disconnection was requested by the host.
    Disconnected {
        id: PeripheralId,
        error: Option<LinkError>,
    },
    /// Service discovery completed.
    ServicesDiscovered {
        id: PeripheralId,
        result: Result<Vec<Service>, LinkError>,
    },
    /// A characteristic read completed.
    CharacteristicRead {
        id: PeripheralId,
        characteristic: BluetoothUuid,
        result: Result<Vec<u8>, AttError>,
    },
    /// The peripheral acknowledged (or rejected) a write.
    WriteConfirmed {
        id: PeripheralId,
        characteristic: BluetoothUuid,
        result: Result<(), AttError>,
    },
    /// A request to enable (`enabled`) or disable notifications completed.
    NotifyStateChanged {
        id: PeripheralId,
        characteristic: BluetoothUuid,
        enabled: bool,
        result: Result<(), AttError>,
    },
    /// The peripheral pushed a notified or indicated value.
    Notification {
        id: PeripheralId,
        characteristic: BluetoothUuid,
        value: Vec<u8>,
    },
}

impl LinkEvent {
    /// The peripheral this event concerns, if any.
    pub fn peripheral(&self) -> Option<PeripheralId> {
        match self {
            LinkEvent::StateChanged(_) => None,
            LinkEvent::Discovered { id, .. }
            | LinkEvent::Connected { id }
            | LinkEvent::ConnectFailed { id, .. }
            | LinkEvent::Disconnected { id, .. }
            | LinkEvent::ServicesDiscovered { id, .. }
            | LinkEvent::CharacteristicRead { id, .. }
            | LinkEvent::WriteConfirmed { id, .. }
            | LinkEvent::NotifyStateChanged { id, .. }
            | LinkEvent::Notification { id, .. } => Some(*id),
        }
    }
}

/// The receiver for [`LinkEvent`]s.
///
/// The link delivers events from one context at a time; an implementation
/// must tolerate reentrant delivery from within its own command calls, but
/// never concurrent delivery.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: LinkEvent);
}

/// The command surface of a Bluetooth LE radio operating in the central role.
///
/// Commands are fire-and-forget: every outcome, including failure, is
/// reported through the bound [`EventSink`]. An implementation may deliver
/// events from within a command call.
pub trait RadioLink: Send + Sync + 'static {
    /// Binds the sink that receives all subsequent events.
    fn bind(&self, sink: Arc<dyn EventSink>);

    /// The radio's current state.
    fn state(&self) -> RadioState;

    /// Starts scanning for advertisements, replacing any scan already in
    /// progress. An empty `services` slice matches every advertiser.
    fn start_scan(&self, services: &[BluetoothUuid]);

    /// Stops an active scan. A no-op when no scan is running.
    fn stop_scan(&self);

    /// Initiates a connection. The outcome is reported by
    /// [`LinkEvent::Connected`] or [`LinkEvent::ConnectFailed`].
    fn connect(&self, id: PeripheralId);

    /// Abandons a connection attempt started with [`connect`][Self::connect].
    fn cancel_connect(&self, id: PeripheralId);

    /// Tears down an established connection.
    fn disconnect(&self, id: PeripheralId);

    /// Discovers the peripheral's services and their characteristics. An
    /// empty `services` slice discovers everything.
    fn discover_services(&self, id: PeripheralId, services: &[BluetoothUuid]);

    /// Reads the value of a characteristic.
    fn read(&self, id: PeripheralId, characteristic: &BluetoothUuid);

    /// Writes a value to a characteristic. [`WriteMode::WithoutResponse`]
    /// writes produce no event.
    fn write(&self, id: PeripheralId, characteristic: &BluetoothUuid, value: &[u8], mode: WriteMode);

    /// Enables or disables notifications for a characteristic.
    fn set_notify(&self, id: PeripheralId, characteristic: &BluetoothUuid, enabled: bool);
}
