//! A simulated [`RadioLink`] for exercising central-role logic without
//! hardware.
//!
//! [`SimRadio`] answers every command with the events a well-behaved radio
//! would produce, against a roster of scripted peripherals. The interesting
//! paths are driven explicitly from tests: holding connection attempts open,
//! deferring acknowledgements, dropping established connections, flipping
//! radio power, and injecting raw events.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use ble_link::advertisement_data::AdvertisementData;
use ble_link::{
    AttError, Characteristic, EventSink, LinkError, LinkEvent, PeripheralId, RadioLink,
    RadioState, Service, WriteMode,
};
use btuuid::BluetoothUuid;

/// How a simulated peripheral answers connection attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Attempts succeed immediately.
    #[default]
    Accept,
    /// Attempts fail immediately with the given reason.
    Refuse(LinkError),
    /// Attempts stay pending until [`SimRadio::complete_connect`] or a
    /// cancellation.
    Hold,
}

/// A command received by the simulated radio, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimCommand {
    StartScan(Vec<BluetoothUuid>),
    StopScan,
    Connect(PeripheralId),
    CancelConnect(PeripheralId),
    Disconnect(PeripheralId),
    DiscoverServices(PeripheralId, Vec<BluetoothUuid>),
    Read(PeripheralId, BluetoothUuid),
    Write(PeripheralId, BluetoothUuid, Vec<u8>, WriteMode),
    SetNotify(PeripheralId, BluetoothUuid, bool),
}

/// A scripted peripheral.
///
/// Built with chained `with_` methods and handed to
/// [`SimRadio::add_peripheral`].
#[derive(Debug, Clone)]
pub struct SimPeripheral {
    id: PeripheralId,
    advertisement: AdvertisementData,
    rssi: i16,
    services: Vec<Service>,
    values: HashMap<BluetoothUuid, Vec<u8>>,
    connect: ConnectBehavior,
    manual_reads: bool,
    manual_writes: bool,
}

impl SimPeripheral {
    pub fn new(id: PeripheralId) -> Self {
        SimPeripheral {
            id,
            advertisement: AdvertisementData::default(),
            rssi: -60,
            services: Vec::new(),
            values: HashMap::new(),
            connect: ConnectBehavior::Accept,
            manual_reads: false,
            manual_writes: false,
        }
    }

    /// Sets the advertised local name.
    pub fn with_name(mut self, name: &str) -> Self {
        self.advertisement.local_name = Some(name.to_string());
        self
    }

    /// Replaces the advertising payload.
    pub fn with_advertisement(mut self, advertisement: AdvertisementData) -> Self {
        self.advertisement = advertisement;
        self
    }

    pub fn with_rssi(mut self, rssi: i16) -> Self {
        self.rssi = rssi;
        self
    }

    /// Adds a service. Its UUID is also advertised.
    pub fn with_service(mut self, service: Service) -> Self {
        self.advertisement.service_uuids.push(service.uuid.clone());
        self.services.push(service);
        self
    }

    /// Sets the stored value of a characteristic.
    pub fn with_value(mut self, characteristic: BluetoothUuid, value: &[u8]) -> Self {
        self.values.insert(characteristic, value.to_vec());
        self
    }

    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }

    /// Makes reads stay pending until [`SimRadio::complete_read`].
    pub fn with_manual_reads(mut self) -> Self {
        self.manual_reads = true;
        self
    }

    /// Makes acknowledged writes stay pending until
    /// [`SimRadio::confirm_write`].
    pub fn with_manual_writes(mut self) -> Self {
        self.manual_writes = true;
        self
    }
}

enum Deferred {
    Read(BluetoothUuid),
    Write(BluetoothUuid, Vec<u8>),
}

struct Peer {
    config: SimPeripheral,
    connected: bool,
    connect_pending: bool,
    notifying: HashSet<BluetoothUuid>,
    deferred: Vec<Deferred>,
}

impl Peer {
    fn characteristic(&self, uuid: &BluetoothUuid) -> Option<&Characteristic> {
        self.config.services.iter().find_map(|s| s.characteristic(uuid))
    }

    fn reset(&mut self) {
        self.connected = false;
        self.connect_pending = false;
        self.notifying.clear();
        self.deferred.clear();
    }
}

struct SimState {
    radio: RadioState,
    sink: Option<Arc<dyn EventSink>>,
    peers: HashMap<PeripheralId, Peer>,
    scanning: bool,
    commands: Vec<SimCommand>,
}

/// An in-memory radio link.
///
/// Events are always emitted with the simulator's internal lock released, so
/// a sink is free to call back into the link from its event handler. Clones
/// address the same radio.
#[derive(Clone)]
pub struct SimRadio {
    state: Arc<Mutex<SimState>>,
}

impl SimRadio {
    /// A powered-on radio with no peripherals.
    pub fn new() -> Self {
        Self::with_state(RadioState::PoweredOn)
    }

    /// A radio starting in the given state.
    pub fn with_state(radio: RadioState) -> Self {
        SimRadio {
            state: Arc::new(Mutex::new(SimState {
                radio,
                sink: None,
                peers: HashMap::new(),
                scanning: false,
                commands: Vec::new(),
            })),
        }
    }

    pub fn add_peripheral(&self, peripheral: SimPeripheral) {
        let mut st = self.lock();
        st.peers.insert(
            peripheral.id,
            Peer {
                config: peripheral,
                connected: false,
                connect_pending: false,
                notifying: HashSet::new(),
                deferred: Vec::new(),
            },
        );
    }

    /// Changes the radio state. Leaving [`RadioState::PoweredOn`] silently
    /// drops every connection, attempt, and scan, as a real radio would; only
    /// the state change itself is reported.
    pub fn set_state(&self, radio: RadioState) {
        let changed = {
            let mut st = self.lock();
            let changed = st.radio != radio;
            st.radio = radio;
            if !radio.is_available() {
                st.scanning = false;
                for peer in st.peers.values_mut() {
                    peer.reset();
                }
            }
            changed
        };
        if changed {
            self.emit(vec![LinkEvent::StateChanged(radio)]);
        }
    }

    /// Reports the stored advertisement for `id`, if a scan is running.
    pub fn advertise(&self, id: PeripheralId) {
        let event = {
            let st = self.lock();
            if !st.scanning {
                None
            } else {
                st.peers.get(&id).map(|peer| LinkEvent::Discovered {
                    id,
                    advertisement: peer.config.advertisement.clone(),
                    rssi: peer.config.rssi,
                })
            }
        };
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    pub fn set_rssi(&self, id: PeripheralId, rssi: i16) {
        if let Some(peer) = self.lock().peers.get_mut(&id) {
            peer.config.rssi = rssi;
        }
    }

    /// Completes a held connection attempt.
    pub fn complete_connect(&self, id: PeripheralId, result: Result<(), LinkError>) {
        let event = {
            let mut st = self.lock();
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            if !peer.connect_pending {
                return;
            }
            peer.connect_pending = false;
            match result {
                Ok(()) => {
                    peer.connected = true;
                    LinkEvent::Connected { id }
                }
                Err(error) => LinkEvent::ConnectFailed { id, error },
            }
        };
        self.emit(vec![event]);
    }

    /// Tears down an established connection from the peripheral's side.
    pub fn drop_connection(&self, id: PeripheralId, error: Option<LinkError>) {
        let event = {
            let mut st = self.lock();
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            if !peer.connected {
                return;
            }
            peer.reset();
            LinkEvent::Disconnected { id, error }
        };
        self.emit(vec![event]);
    }

    /// Pushes a notification if the characteristic is currently notifying.
    /// Returns whether it was delivered.
    pub fn notify(&self, id: PeripheralId, characteristic: &BluetoothUuid, value: &[u8]) -> bool {
        let event = {
            let st = self.lock();
            match st.peers.get(&id) {
                Some(peer) if peer.connected && peer.notifying.contains(characteristic) => {
                    Some(LinkEvent::Notification {
                        id,
                        characteristic: characteristic.clone(),
                        value: value.to_vec(),
                    })
                }
                _ => None,
            }
        };
        match event {
            Some(event) => {
                self.emit(vec![event]);
                true
            }
            None => false,
        }
    }

    /// Completes a deferred read with the stored value.
    pub fn complete_read(&self, id: PeripheralId, characteristic: &BluetoothUuid) {
        let event = {
            let mut st = self.lock();
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            let Some(position) = peer
                .deferred
                .iter()
                .position(|d| matches!(d, Deferred::Read(c) if c == characteristic))
            else {
                return;
            };
            peer.deferred.remove(position);
            let value = peer.config.values.get(characteristic).cloned().unwrap_or_default();
            LinkEvent::CharacteristicRead {
                id,
                characteristic: characteristic.clone(),
                result: Ok(value),
            }
        };
        self.emit(vec![event]);
    }

    /// Acknowledges a deferred write, storing its value.
    pub fn confirm_write(&self, id: PeripheralId, characteristic: &BluetoothUuid) {
        let event = {
            let mut st = self.lock();
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            let Some(position) = peer
                .deferred
                .iter()
                .position(|d| matches!(d, Deferred::Write(c, _) if c == characteristic))
            else {
                return;
            };
            let Deferred::Write(_, value) = peer.deferred.remove(position) else {
                return;
            };
            peer.config.values.insert(characteristic.clone(), value);
            LinkEvent::WriteConfirmed {
                id,
                characteristic: characteristic.clone(),
                result: Ok(()),
            }
        };
        self.emit(vec![event]);
    }

    /// Injects a raw event, bypassing the simulation.
    pub fn inject(&self, event: LinkEvent) {
        self.emit(vec![event]);
    }

    /// Returns and clears the commands received so far.
    pub fn take_commands(&self) -> Vec<SimCommand> {
        std::mem::take(&mut self.lock().commands)
    }

    /// The stored value of a characteristic.
    pub fn value(&self, id: PeripheralId, characteristic: &BluetoothUuid) -> Option<Vec<u8>> {
        self.lock()
            .peers
            .get(&id)
            .and_then(|peer| peer.config.values.get(characteristic).cloned())
    }

    /// Whether the peripheral is connected at the link level.
    pub fn is_connected(&self, id: PeripheralId) -> bool {
        self.lock().peers.get(&id).is_some_and(|peer| peer.connected)
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, events: Vec<LinkEvent>) {
        let sink = self.lock().sink.clone();
        if let Some(sink) = sink {
            for event in events {
                sink.on_event(event);
            }
        }
    }
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioLink for SimRadio {
    fn bind(&self, sink: Arc<dyn EventSink>) {
        self.lock().sink = Some(sink);
    }

    fn state(&self) -> RadioState {
        self.lock().radio
    }

    fn start_scan(&self, services: &[BluetoothUuid]) {
        let events = {
            let mut st = self.lock();
            st.commands.push(SimCommand::StartScan(services.to_vec()));
            if !st.radio.is_available() {
                return;
            }
            st.scanning = true;
            st.peers
                .values()
                .filter(|peer| {
                    !peer.connected && scan_matches(services, &peer.config.advertisement)
                })
                .map(|peer| LinkEvent::Discovered {
                    id: peer.config.id,
                    advertisement: peer.config.advertisement.clone(),
                    rssi: peer.config.rssi,
                })
                .collect::<Vec<_>>()
        };
        self.emit(events);
    }

    fn stop_scan(&self) {
        let mut st = self.lock();
        st.commands.push(SimCommand::StopScan);
        st.scanning = false;
    }

    fn connect(&self, id: PeripheralId) {
        let event = {
            let mut st = self.lock();
            st.commands.push(SimCommand::Connect(id));
            if !st.radio.is_available() {
                return;
            }
            match st.peers.get_mut(&id) {
                None => Some(LinkEvent::ConnectFailed {
                    id,
                    error: LinkError::UnknownDevice,
                }),
                Some(peer) if peer.connected => Some(LinkEvent::Connected { id }),
                Some(peer) => match peer.config.connect {
                    ConnectBehavior::Accept => {
                        peer.connected = true;
                        Some(LinkEvent::Connected { id })
                    }
                    ConnectBehavior::Refuse(error) => Some(LinkEvent::ConnectFailed { id, error }),
                    ConnectBehavior::Hold => {
                        peer.connect_pending = true;
                        None
                    }
                },
            }
        };
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    fn cancel_connect(&self, id: PeripheralId) {
        let event = {
            let mut st = self.lock();
            st.commands.push(SimCommand::CancelConnect(id));
            match st.peers.get_mut(&id) {
                Some(peer) if peer.connect_pending => {
                    peer.connect_pending = false;
                    Some(LinkEvent::Disconnected { id, error: None })
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    fn disconnect(&self, id: PeripheralId) {
        let event = {
            let mut st = self.lock();
            st.commands.push(SimCommand::Disconnect(id));
            match st.peers.get_mut(&id) {
                Some(peer) if peer.connected => {
                    peer.reset();
                    Some(LinkEvent::Disconnected { id, error: None })
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.emit(vec![event]);
        }
    }

    fn discover_services(&self, id: PeripheralId, services: &[BluetoothUuid]) {
        let event = {
            let mut st = self.lock();
            st.commands
                .push(SimCommand::DiscoverServices(id, services.to_vec()));
            match st.peers.get(&id) {
                Some(peer) if peer.connected => {
                    let discovered = peer
                        .config
                        .services
                        .iter()
                        .filter(|s| services.is_empty() || services.contains(&s.uuid))
                        .cloned()
                        .collect();
                    LinkEvent::ServicesDiscovered {
                        id,
                        result: Ok(discovered),
                    }
                }
                _ => LinkEvent::ServicesDiscovered {
                    id,
                    result: Err(LinkError::NotConnected),
                },
            }
        };
        self.emit(vec![event]);
    }

    fn read(&self, id: PeripheralId, characteristic: &BluetoothUuid) {
        let event = {
            let mut st = self.lock();
            st.commands.push(SimCommand::Read(id, characteristic.clone()));
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            if !peer.connected {
                return;
            }
            let properties = peer.characteristic(characteristic).map(|c| c.properties);
            let result = match properties {
                None => Err(AttError::InvalidHandle),
                Some(p) if !p.can_read() => Err(AttError::ReadNotPermitted),
                Some(_) if peer.config.manual_reads => {
                    peer.deferred.push(Deferred::Read(characteristic.clone()));
                    return;
                }
                Some(_) => Ok(peer
                    .config
                    .values
                    .get(characteristic)
                    .cloned()
                    .unwrap_or_default()),
            };
            LinkEvent::CharacteristicRead {
                id,
                characteristic: characteristic.clone(),
                result,
            }
        };
        self.emit(vec![event]);
    }

    fn write(&self, id: PeripheralId, characteristic: &BluetoothUuid, value: &[u8], mode: WriteMode) {
        let event = {
            let mut st = self.lock();
            st.commands.push(SimCommand::Write(
                id,
                characteristic.clone(),
                value.to_vec(),
                mode,
            ));
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            if !peer.connected {
                return;
            }
            let properties = peer.characteristic(characteristic).map(|c| c.properties);
            match mode {
                WriteMode::WithoutResponse => {
                    if properties.is_some_and(|p| p.can_write_without_response()) {
                        peer.config
                            .values
                            .insert(characteristic.clone(), value.to_vec());
                    }
                    return;
                }
                WriteMode::WithResponse => {
                    let result = match properties {
                        None => Err(AttError::InvalidHandle),
                        Some(p) if !p.can_write() => Err(AttError::WriteNotPermitted),
                        Some(_) if peer.config.manual_writes => {
                            peer.deferred
                                .push(Deferred::Write(characteristic.clone(), value.to_vec()));
                            return;
                        }
                        Some(_) => {
                            peer.config
                                .values
                                .insert(characteristic.clone(), value.to_vec());
                            Ok(())
                        }
                    };
                    LinkEvent::WriteConfirmed {
                        id,
                        characteristic: characteristic.clone(),
                        result,
                    }
                }
            }
        };
        self.emit(vec![event]);
    }

    fn set_notify(&self, id: PeripheralId, characteristic: &BluetoothUuid, enabled: bool) {
        let event = {
            let mut st = self.lock();
            st.commands
                .push(SimCommand::SetNotify(id, characteristic.clone(), enabled));
            let Some(peer) = st.peers.get_mut(&id) else {
                return;
            };
            if !peer.connected {
                return;
            }
            let properties = peer.characteristic(characteristic).map(|c| c.properties);
            let result = match properties {
                None => Err(AttError::InvalidHandle),
                Some(p) if enabled && !p.can_notify() => Err(AttError::RequestNotSupported),
                Some(_) => {
                    if enabled {
                        peer.notifying.insert(characteristic.clone());
                    } else {
                        peer.notifying.remove(characteristic);
                    }
                    Ok(())
                }
            };
            LinkEvent::NotifyStateChanged {
                id,
                characteristic: characteristic.clone(),
                enabled,
                result,
            }
        };
        self.emit(vec![event]);
    }
}

fn scan_matches(services: &[BluetoothUuid], advertisement: &AdvertisementData) -> bool {
    services.is_empty() || services.iter().any(|s| advertisement.service_uuids.contains(s))
}
