use std::net::SocketAddr;

use crate::channel::ChannelId;

/// What the application learns from [`crate::Client::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// An unknown peer reached out. Accept it with `connect`, refuse it
    /// with `disconnect`.
    IncomingConnection { from: SocketAddr },
    Connection {
        from: SocketAddr,
        result: ConnectionResult,
    },
    Disconnection {
        from: SocketAddr,
        reason: DisconnectionReason,
    },
    Data {
        from: SocketAddr,
        channel: ChannelId,
        data: Vec<u8>,
    },
    /// The peer sent something that makes no sense in its current state.
    /// The offending datagram is discarded.
    ProtocolViolation {
        from: SocketAddr,
        violation: Violation,
    },
}

impl Event {
    #[must_use]
    pub fn emitter(&self) -> SocketAddr {
        match self {
            Event::IncomingConnection { from }
            | Event::Connection { from, .. }
            | Event::Disconnection { from, .. }
            | Event::Data { from, .. }
            | Event::ProtocolViolation { from, .. } => *from,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionResult {
    Success,
    Refused,
    /// The peer never answered.
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectionReason {
    /// Closed locally.
    Explicit,
    /// Closed by the peer.
    Remote,
    Timeout,
    /// The transport failed to send to the peer.
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    MalformedDatagram,
    MalformedPacket,
    UnknownChannel(ChannelId),
    DataBeforeAccept,
}
