//! # Datagram
//!
//! ```text
//! 0       2       4                               12  13 (BYTE)
//! +-------+-------+-------------------------------+---+
//! |  id   |  ack  |         previous acks         |knd|
//! +-------+-------+-------------------------------+---+
//! ```
//!
//! - `id`: datagram sequence number, per peer and direction
//! - `ack`: newest datagram id received from the peer
//! - `previous acks`: bit `i` is set if datagram `ack - 1 - i` was received
//! - `knd`: `0` data, `1` keep-alive, `2` disconnection
//!
//! # Data body
//!
//! ```text
//! 0   1       3       5   6                       (BYTE)
//! +---+-------+-------+---+
//! |chn|  id   | size  |typ|
//! +---+-------+-------+---+-----------------------+
//! |                                               |
//! |                  Body (size)                  |
//! |                                               |
//! +-----------------------------------------------+
//! ```
//!
//! - `chn`: index of the registered channel
//! - `id`, `size`, `typ`: packet header (see [`packet`])
//!
//! # Invariants
//!
//! - a datagram never exceeds [`datagram::DATAGRAM_MAX_SIZE`] bytes
//! - a data datagram carries exactly one packet, which fills the rest of it
//! - every integer is big-endian

pub mod datagram;
pub mod packet;

use thiserror::Error;

use crate::utils::Seq16;

pub type DatagramId = Seq16;
pub type PacketId = Seq16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodingError {
    #[error("cannot decode field `{field}`")]
    Decoding { field: &'static str },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("payload does not fit into a packet")]
    NotEnoughSpace,
}
