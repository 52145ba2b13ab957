//! Errors reported by the radio link.

use std::fmt::Display;

/// An Attribute Protocol error reported by a peripheral.
///
/// See the Bluetooth Core Specification Vol 3, Part F §3.4.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttError {
    InvalidHandle,
    ReadNotPermitted,
    WriteNotPermitted,
    InvalidPdu,
    InsufficientAuthentication,
    RequestNotSupported,
    InvalidOffset,
    InsufficientAuthorization,
    PrepareQueueFull,
    AttributeNotFound,
    AttributeNotLong,
    InsufficientEncryptionKeySize,
    InvalidAttributeValueLength,
    UnlikelyError,
    InsufficientEncryption,
    UnsupportedGroupType,
    InsufficientResources,
    /// An error code outside the range defined by the Attribute Protocol.
    Unknown(u8),
}

impl AttError {
    pub fn from_code(code: u8) -> Self {
        match code {
            0x01 => AttError::InvalidHandle,
            0x02 => AttError::ReadNotPermitted,
            0x03 => AttError::WriteNotPermitted,
            0x04 => AttError::InvalidPdu,
            0x05 => AttError::InsufficientAuthentication,
            0x06 => AttError::RequestNotSupported,
            0x07 => AttError::InvalidOffset,
            0x08 => AttError::InsufficientAuthorization,
            0x09 => AttError::PrepareQueueFull,
            0x0a => AttError::AttributeNotFound,
            0x0b => AttError::AttributeNotLong,
            0x0c => AttError::InsufficientEncryptionKeySize,
            0x0d => AttError::InvalidAttributeValueLength,
            0x0e => AttError::UnlikelyError,
            0x0f => AttError::InsufficientEncryption,
            0x10 => AttError::UnsupportedGroupType,
            0x11 => AttError::InsufficientResources,
            other => AttError::Unknown(other),
        }
    }

    pub fn code(self) -> u8 {
        match self {
            AttError::InvalidHandle => 0x01,
            AttError::ReadNotPermitted => 0x02,
            AttError::WriteNotPermitted => 0x03,
            AttError::InvalidPdu => 0x04,
            AttError::InsufficientAuthentication => 0x05,
            AttError::RequestNotSupported => 0x06,
            AttError::InvalidOffset => 0x07,
            AttError::InsufficientAuthorization => 0x08,
            AttError::PrepareQueueFull => 0x09,
            AttError::AttributeNotFound => 0x0a,
            AttError::AttributeNotLong => 0x0b,
            AttError::InsufficientEncryptionKeySize => 0x0c,
            AttError::InvalidAttributeValueLength => 0x0d,
            AttError::UnlikelyError => 0x0e,
            AttError::InsufficientEncryption => 0x0f,
            AttError::UnsupportedGroupType => 0x10,
            AttError::InsufficientResources => 0x11,
            AttError::Unknown(code) => code,
        }
    }
}

impl Display for AttError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttError::InvalidHandle => f.write_str("invalid handle"),
            AttError::ReadNotPermitted => f.write_str("read not permitted"),
            AttError::WriteNotPermitted => f.write_str("write not permitted"),
            AttError::InvalidPdu => f.write_str("invalid PDU"),
            AttError::InsufficientAuthentication => f.write_str("insufficient authentication"),
            AttError::RequestNotSupported => f.write_str("request not supported"),
            AttError::InvalidOffset => f.write_str("invalid offset"),
            AttError::InsufficientAuthorization => f.write_str("insufficient authorization"),
            AttError::PrepareQueueFull => f.write_str("prepare queue full"),
            AttError::AttributeNotFound => f.write_str("attribute not found"),
            AttError::AttributeNotLong => f.write_str("attribute not long"),
            AttError::InsufficientEncryptionKeySize => {
                f.write_str("insufficient encryption key size")
            }
            AttError::InvalidAttributeValueLength => f.write_str("invalid attribute value length"),
            AttError::UnlikelyError => f.write_str("unlikely error"),
            AttError::InsufficientEncryption => f.write_str("insufficient encryption"),
            AttError::UnsupportedGroupType => f.write_str("unsupported group type"),
            AttError::InsufficientResources => f.write_str("insufficient resources"),
            AttError::Unknown(code) => write!(f, "unknown ATT error ({code})"),
        }
    }
}

impl std::error::Error for AttError {}

/// A connection-level failure reported by the radio link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkError {
    NotConnected,
    ConnectionFailed,
    ConnectionTimeout,
    ConnectionLimitReached,
    PeripheralDisconnected,
    EncryptionTimedOut,
    UnknownDevice,
    Unknown,
}

impl Display for LinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkError::NotConnected => f.write_str("not connected"),
            LinkError::ConnectionFailed => f.write_str("connection failed"),
            LinkError::ConnectionTimeout => f.write_str("connection timeout"),
            LinkError::ConnectionLimitReached => f.write_str("connection limit reached"),
            LinkError::PeripheralDisconnected => f.write_str("peripheral disconnected"),
            LinkError::EncryptionTimedOut => f.write_str("encryption timed out"),
            LinkError::UnknownDevice => f.write_str("unknown device"),
            LinkError::Unknown => f.write_str("unknown error"),
        }
    }
}

impl std::error::Error for LinkError {}
