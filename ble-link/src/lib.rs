//! Data model and radio-link contract for Bluetooth LE central-role
//! applications.
//!
//! This crate defines the types shared between a central manager and the
//! platform radio driving it: peripheral identifiers, the GATT data model,
//! advertising payloads, and the [`RadioLink`]/[`EventSink`] pair that
//! carries commands down to the radio and events back up.

pub mod advertisement_data;
mod characteristic;
pub mod error;
mod link;
mod peripheral;
mod service;

pub use characteristic::*;
pub use error::{AttError, LinkError};
pub use link::*;
pub use peripheral::*;
pub use service::*;
