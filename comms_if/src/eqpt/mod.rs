//! # Equipment Interface
//!
//! This module defines the datagram formats exchanged with the vision sensor and the docking
//! stations. Everything on the wire is big-endian.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod station;
pub mod vision;

// -----------------------------------------------------------------------------------------------
// ENUMS
// -----------------------------------------------------------------------------------------------

/// A datagram was rejected by one of the decoders.
///
/// Malformed datagrams are always dropped whole, no partial state is ever taken from them.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MalformedPacket {
    #[error("Packet is {len} bytes long, at least {min} are required")]
    TooShort { len: usize, min: usize },

    #[error("Packet is {len} bytes long, expected exactly {expected}")]
    WrongLength { len: usize, expected: usize },

    #[error("Packet magic number at offset {offset} is invalid")]
    BadMagic { offset: usize },

    #[error("Packet version {0:02x?} is not supported")]
    BadVersion([u8; 4]),

    #[error("Packet preamble {0:02x?} is invalid")]
    BadPreamble([u8; 3]),

    #[error("Packet declares an invalid number of tags ({0})")]
    BadTagCount(i32),

    #[error("Packet declares {num_tags} tags but is only {len} bytes long")]
    Truncated { num_tags: usize, len: usize },

    #[error("Tag record {0} contains a non-finite coordinate")]
    NonFinite(usize),

    #[error("Value {value} is not valid for field {field}")]
    UnknownValue { field: &'static str, value: u8 },
}
