//! Reliable, ordered messages over UDP.
//!
//! A [`Client`] owns one transport and a table of peers. Each peer gets one
//! multiplexer/demultiplexer pair per registered channel and one ack
//! handler for the datagrams exchanged with it.

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use channel::{ChannelId, ChannelKind};
pub use client::{Client, ClientBuilder};
pub use config::ClientConfig;
pub use connection::ConnectionState;
pub use error::Error;
pub use event::{ConnectionResult, DisconnectionReason, Event, Violation};
