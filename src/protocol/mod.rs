//! Protocol module - Defines the tagged-value wire format shared by the engine socket,
//! the peer-to-peer link and FISH binary files
//!
//! Every value is a frame:
//! - 4 byte type tag
//! - fixed-width payload (Int32, Float64, 2 or 3 Float64s), or
//! - 4 byte length followed by a payload padded to a 4 byte boundary (Text, ByteBlob)
//!
//! All integers and doubles are little-endian.

mod array;
mod codec;
mod value;

pub use array::*;
pub use codec::*;
pub use value::*;

/// Magic number that opens every engine connection and every FISH binary file
pub const FISH_MAGIC: i32 = 178_278_912;

/// Identification value sent by a peer-link client right after connecting
pub const PEER_LINK_CODE: i32 = 12_345;

/// First port of the engine socket family (one port per channel index)
pub const BASE_PORT: u16 = 3333;

/// Number of independent engine socket channels (indices 0..=5)
pub const CHANNEL_COUNT: u8 = 6;

/// Default port for the peer-to-peer link
pub const DEFAULT_PEER_PORT: u16 = 5000;
