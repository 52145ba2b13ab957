//! Scan sessions and the stream of discovered peripherals.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use async_io::Timer;
use ble_link::PeripheralId;
use ble_link::advertisement_data::AdvertisementData;
use btuuid::BluetoothUuid;
use futures_channel::mpsc;
use futures_lite::Stream;

use crate::peripheral::Peripheral;
use crate::router::Shared;

/// Criteria an advertisement must meet to be delivered from a scan.
///
/// Every populated field must match; an empty filter delivers everything.
#[derive(Debug, Clone, Default)]
pub struct ScanFilter {
    /// Deliver only advertisers carrying at least one of these service UUIDs.
    /// This part of the filter is also pushed down to the radio.
    pub services: Vec<BluetoothUuid>,
    /// Deliver only advertisers whose local name contains this substring.
    pub name: Option<String>,
    /// Deliver only these peripherals.
    pub ids: Vec<PeripheralId>,
}

impl ScanFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A filter that delivers peripherals advertising any of `services`.
    pub fn by_services(services: Vec<BluetoothUuid>) -> Self {
        ScanFilter {
            services,
            ..Default::default()
        }
    }

    pub(crate) fn matches(&self, id: PeripheralId, advertisement: &AdvertisementData) -> bool {
        if !self.ids.is_empty() && !self.ids.contains(&id) {
            return false;
        }
        if let Some(name) = &self.name {
            match &advertisement.local_name {
                Some(local_name) if local_name.contains(name.as_str()) => {}
                _ => return false,
            }
        }
        if !self.services.is_empty()
            && !self
                .services
                .iter()
                .any(|s| advertisement.service_uuids.contains(s))
        {
            return false;
        }
        true
    }
}

/// Options controlling a scan session.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Deliver repeat advertisements from peripherals already seen in this
    /// session. Off by default.
    pub allow_duplicates: bool,
    /// End the scan after this long. Scans run until stopped by default.
    pub duration: Option<Duration>,
}

/// A peripheral seen while scanning.
#[derive(Debug, Clone)]
pub struct Discovered {
    pub peripheral: Peripheral,
    pub advertisement: AdvertisementData,
    pub rssi: i16,
}

pub(crate) struct ScanSession {
    pub id: u64,
    pub filter: ScanFilter,
    pub allow_duplicates: bool,
    pub seen: HashSet<PeripheralId>,
    pub sender: mpsc::UnboundedSender<Discovered>,
}

/// A stream of peripherals discovered by a scan.
///
/// The stream ends when the scan's duration elapses, when the scan is
/// stopped or replaced, or when the radio becomes unavailable. Dropping the
/// stream stops the scan.
pub struct ScanStream {
    pub(crate) receiver: mpsc::UnboundedReceiver<Discovered>,
    pub(crate) deadline: Option<Timer>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) session: u64,
}

impl fmt::Debug for ScanStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanStream").finish_non_exhaustive()
    }
}

impl Stream for ScanStream {
    type Item = Discovered;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(deadline) = this.deadline.as_mut() {
            if Pin::new(deadline).poll(cx).is_ready() {
                this.deadline = None;
                this.shared.end_scan(this.session);
            }
        }
        Pin::new(&mut this.receiver).poll_next(cx)
    }
}

impl Drop for ScanStream {
    fn drop(&mut self) {
        self.shared.end_scan(self.session);
    }
}
