//! An asynchronous Bluetooth LE central-role connection manager.
//!
//! This crate sits on top of a [`RadioLink`] implementation and provides
//! `async` methods and streams for scanning, connection management, and GATT
//! operations. Radio events are correlated back to the single request each
//! one resolves, so concurrent operations on different peripherals and
//! characteristics proceed independently.
//!
//! This crate is runtime agnostic. See the `examples` directory for usage
//! examples.

mod central_manager;
pub mod error;
mod pending;
mod peripheral;
mod registry;
mod router;
mod scan;
mod util;

pub use ble_link::{
    AttError, Characteristic, CharacteristicProperties, ConnectionState, EventSink, LinkError,
    LinkEvent, PeripheralId, RadioLink, RadioState, Service, WriteMode, advertisement_data,
};
pub use central_manager::*;
pub use error::{Error, ErrorKind, Result};
pub use peripheral::*;
pub use scan::*;
