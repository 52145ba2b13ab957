//! The central manager, which is the application's interface to Bluetooth LE.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_io::Timer;
use ble_link::{ConnectionState, PeripheralId, RadioLink, RadioState};
use futures_channel::{mpsc, oneshot};
use futures_lite::future;

use crate::error::{Error, ErrorKind, Result};
use crate::pending::{RequestKey, RequestKind, RequestToken, Waiter};
use crate::peripheral::Peripheral;
use crate::router::{Router, Shared};
use crate::scan::{ScanFilter, ScanOptions, ScanSession, ScanStream};
use crate::util::{BroadcastReceiver, defer};

/// Options for connecting to a peripheral.
#[derive(Default, Debug, Clone, Copy, PartialEq)]
pub struct ConnectOptions {
    /// Fail the attempt with [`ErrorKind::TimedOut`] if it has not completed
    /// within this duration. Attempts wait indefinitely by default.
    pub timeout: Option<Duration>,
}

/// A connection that ended.
#[derive(Debug, Clone)]
pub struct Disconnection {
    pub peripheral: Peripheral,
    /// The reason the link reported, or `None` for a clean disconnection.
    pub error: Option<Error>,
    /// Whether the disconnection was requested through this manager.
    pub requested: bool,
}

/// An object that scans for, connects to, and manages peripherals over a
/// [`RadioLink`].
///
/// Each manager owns all of its state; nothing is global. Cloning is cheap,
/// and clones address the same underlying manager.
#[derive(Clone)]
pub struct CentralManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for CentralManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CentralManager").finish_non_exhaustive()
    }
}

impl CentralManager {
    /// Creates a manager driving `link`. The manager consumes the link's
    /// events from the moment of construction.
    pub fn new(link: Arc<dyn RadioLink>) -> Self {
        let shared = Shared::new(link.clone());
        link.bind(Arc::new(Router {
            shared: shared.clone(),
        }));
        shared.lock().radio = link.state();
        CentralManager { shared }
    }

    /// The radio's state as of the most recent update.
    pub fn state(&self) -> RadioState {
        self.shared.lock().radio
    }

    /// Returns a stream of radio state changes.
    pub fn state_updates(&self) -> BroadcastReceiver<RadioState> {
        self.shared.state_updates.new_receiver()
    }

    /// Returns a stream of connection losses and completed disconnects.
    pub fn disconnections(&self) -> BroadcastReceiver<Disconnection> {
        self.shared.disconnections.new_receiver()
    }

    /// The peripheral with the given identifier, if this manager knows it.
    pub fn peripheral(&self, id: PeripheralId) -> Option<Peripheral> {
        let st = self.shared.lock();
        st.registry.get(id).map(|_| self.shared.handle(id))
    }

    /// Every peripheral this manager knows.
    pub fn known_peripherals(&self) -> Vec<Peripheral> {
        let st = self.shared.lock();
        st.registry
            .ids()
            .into_iter()
            .map(|id| self.shared.handle(id))
            .collect()
    }

    /// Whether the peripheral is currently connected.
    pub fn is_connected(&self, id: PeripheralId) -> bool {
        let st = self.shared.lock();
        st.registry
            .get(id)
            .is_some_and(|record| record.connection.is_connected())
    }

    /// Starts scanning for peripherals matching `filter`.
    ///
    /// Starting a scan implicitly stops any scan already in progress, ending
    /// its stream, and drops every known peripheral that is not connected or
    /// connecting.
    pub fn scan(&self, filter: ScanFilter, options: ScanOptions) -> Result<ScanStream> {
        let services = filter.services.clone();
        let (receiver, session) = {
            let mut st = self.shared.lock();
            if !st.radio.is_available() {
                return Err(ErrorKind::RadioUnavailable.into());
            }
            st.registry.evict_disconnected();
            st.scan_counter += 1;
            let id = st.scan_counter;
            let (sender, receiver) = mpsc::unbounded();
            st.scan = Some(ScanSession {
                id,
                filter,
                allow_duplicates: options.allow_duplicates,
                seen: HashSet::new(),
                sender,
            });
            (receiver, id)
        };
        self.shared.link.start_scan(&services);
        Ok(ScanStream {
            receiver,
            deadline: options.duration.map(Timer::after),
            shared: self.shared.clone(),
            session,
        })
    }

    /// Stops the active scan, if any, ending its stream.
    pub fn stop_scan(&self) {
        let mut st = self.shared.lock();
        if st.scan.take().is_some() {
            drop(st);
            self.shared.link.stop_scan();
        }
    }

    /// Connects to a peripheral.
    ///
    /// Returns immediately if the peripheral is already connected. At most
    /// one attempt per peripheral may be in flight; an overlapping attempt
    /// fails with [`ErrorKind::Busy`]. Dropping the returned future before it
    /// resolves abandons the attempt.
    pub async fn connect(&self, id: PeripheralId) -> Result<()> {
        self.connect_with_options(id, Default::default()).await
    }

    /// Connects to a peripheral with the given options.
    pub async fn connect_with_options(
        &self,
        id: PeripheralId,
        options: ConnectOptions,
    ) -> Result<()> {
        let (receiver, token) = {
            let mut st = self.shared.lock();
            if !st.radio.is_available() {
                return Err(ErrorKind::RadioUnavailable.into());
            }
            match st.registry.entry(id).connection {
                ConnectionState::Connected => return Ok(()),
                ConnectionState::Disconnecting => return Err(ErrorKind::Busy.into()),
                ConnectionState::Connecting | ConnectionState::Disconnected => {}
            }
            let (sender, receiver) = oneshot::channel();
            let Some(token) = st
                .pending
                .insert(RequestKey::new(id, RequestKind::Connect), Waiter::Connect(sender))
            else {
                return Err(ErrorKind::Busy.into());
            };
            st.registry.entry(id).connection = ConnectionState::Connecting;
            (receiver, token)
        };

        self.shared.link.connect(id);

        // Ensure the attempt does not leak if this future is dropped or the
        // deadline elapses first.
        let guard = defer(|| self.abort_connect(id, token));

        let output = match options.timeout {
            Some(timeout) => {
                future::or(async { Some(receiver.await) }, async {
                    Timer::after(timeout).await;
                    None
                })
                .await
            }
            None => Some(receiver.await),
        };
        let Some(res) = output else {
            return Err(ErrorKind::TimedOut.into());
        };
        let res = res?;
        guard.defuse();
        res
    }

    fn abort_connect(&self, id: PeripheralId, token: RequestToken) {
        let mut st = self.shared.lock();
        if st.pending.cancel(token).is_some() {
            if let Some(record) = st.registry.get_mut(id) {
                if record.connection == ConnectionState::Connecting {
                    record.connection = ConnectionState::Disconnected;
                }
            }
            drop(st);
            self.shared.link.cancel_connect(id);
        } else {
            // The attempt resolved after the deadline. A connection nobody
            // observed gets torn down.
            let orphaned = st
                .registry
                .get(id)
                .is_some_and(|record| record.connection == ConnectionState::Connected)
                && !st.pending.contains(&RequestKey::new(id, RequestKind::Connect));
            if orphaned {
                if let Some(record) = st.registry.get_mut(id) {
                    record.connection = ConnectionState::Disconnecting;
                }
                drop(st);
                self.shared.link.disconnect(id);
            }
        }
    }

    /// Disconnects from a peripheral. A no-op if it is not connected.
    ///
    /// An attempt still connecting is canceled and resolves with
    /// [`ErrorKind::Canceled`]. Requests outstanding on the connection
    /// resolve with [`ErrorKind::NotConnected`] once the disconnection
    /// completes.
    pub async fn disconnect(&self, id: PeripheralId) -> Result<()> {
        let receiver = {
            let mut st = self.shared.lock();
            let Some(connection) = st.registry.get(id).map(|record| record.connection) else {
                return Ok(());
            };
            match connection {
                ConnectionState::Disconnected => return Ok(()),
                ConnectionState::Connecting => {
                    let waiter = st.pending.take(&RequestKey::new(id, RequestKind::Connect));
                    if let Some(record) = st.registry.get_mut(id) {
                        record.connection = ConnectionState::Disconnected;
                    }
                    drop(st);
                    if let Some(waiter) = waiter {
                        waiter.fail(ErrorKind::Canceled.into());
                    }
                    self.shared.link.cancel_connect(id);
                    return Ok(());
                }
                ConnectionState::Connected | ConnectionState::Disconnecting => {
                    let (sender, receiver) = oneshot::channel();
                    if st
                        .pending
                        .insert(
                            RequestKey::new(id, RequestKind::Disconnect),
                            Waiter::Disconnect(sender),
                        )
                        .is_none()
                    {
                        return Err(ErrorKind::Busy.into());
                    }
                    if let Some(record) = st.registry.get_mut(id) {
                        record.connection = ConnectionState::Disconnecting;
                    }
                    receiver
                }
            }
        };
        self.shared.link.disconnect(id);
        receiver.await?
    }

    /// Disconnects from the peripheral if necessary and forgets it.
    ///
    /// Requests outstanding on the peripheral resolve with
    /// [`ErrorKind::Canceled`], and its notification streams end.
    pub fn forget(&self, id: PeripheralId) {
        let (swept, connection) = {
            let mut st = self.shared.lock();
            let Some(record) = st.registry.remove(id) else {
                return;
            };
            let swept = st.pending.take_matching(|key| key.peripheral == id);
            (swept, record.connection)
        };
        for waiter in swept {
            waiter.fail(ErrorKind::Canceled.into());
        }
        match connection {
            ConnectionState::Connecting => self.shared.link.cancel_connect(id),
            ConnectionState::Connected | ConnectionState::Disconnecting => {
                self.shared.link.disconnect(id)
            }
            ConnectionState::Disconnected => {}
        }
    }
}
