//! Per-channel message multiplexing.
//!
//! Every registered channel gets its own multiplexer/demultiplexer pair per
//! peer. [`Channel`] dispatches over the channel kinds with a plain `match`.

pub mod reliable_ordered;
pub mod unreliable_ordered;

use crate::protocol::{DatagramId, DecodingError};

pub type ChannelId = u8;

/// Most channels a client can register, bounded by the one-byte channel
/// index on the wire.
pub const MAX_CHANNELS: usize = ChannelId::MAX as usize + 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Every message arrives, in the order it was sent.
    ReliableOrdered,
    /// Messages may be lost; those that arrive are never older than one
    /// already delivered.
    UnreliableOrdered,
}

pub enum Channel {
    ReliableOrdered {
        mux: reliable_ordered::Multiplexer,
        demux: reliable_ordered::Demultiplexer,
    },
    UnreliableOrdered {
        mux: unreliable_ordered::Multiplexer,
        demux: unreliable_ordered::Demultiplexer,
    },
}

impl Channel {
    #[must_use]
    pub fn new(kind: ChannelKind) -> Self {
        match kind {
            ChannelKind::ReliableOrdered => Channel::ReliableOrdered {
                mux: reliable_ordered::Multiplexer::new(),
                demux: reliable_ordered::Demultiplexer::new(),
            },
            ChannelKind::UnreliableOrdered => Channel::UnreliableOrdered {
                mux: unreliable_ordered::Multiplexer::new(),
                demux: unreliable_ordered::Demultiplexer::new(),
            },
        }
    }

    #[must_use]
    pub fn kind(&self) -> ChannelKind {
        match self {
            Channel::ReliableOrdered { .. } => ChannelKind::ReliableOrdered,
            Channel::UnreliableOrdered { .. } => ChannelKind::UnreliableOrdered,
        }
    }

    pub fn queue(&mut self, message: Vec<u8>) {
        match self {
            Channel::ReliableOrdered { mux, .. } => mux.queue(message),
            Channel::UnreliableOrdered { mux, .. } => mux.queue(message),
        }
    }

    #[must_use]
    pub fn serialize(&mut self, datagram_id: DatagramId) -> Option<Vec<u8>> {
        match self {
            Channel::ReliableOrdered { mux, .. } => mux.serialize(datagram_id),
            Channel::UnreliableOrdered { mux, .. } => mux.serialize(),
        }
    }

    pub fn on_datagram_acked(&mut self, datagram_id: DatagramId) {
        if let Channel::ReliableOrdered { mux, .. } = self {
            mux.on_datagram_acked(datagram_id);
        }
    }

    pub fn on_datagram_lost(&mut self, datagram_id: DatagramId) {
        if let Channel::ReliableOrdered { mux, .. } = self {
            mux.on_datagram_lost(datagram_id);
        }
    }

    pub fn on_data_received(&mut self, bytes: &[u8]) -> Result<(), DecodingError> {
        match self {
            Channel::ReliableOrdered { demux, .. } => demux.on_data_received(bytes),
            Channel::UnreliableOrdered { demux, .. } => demux.on_data_received(bytes),
        }
    }

    #[must_use]
    pub fn process(&mut self) -> Vec<Vec<u8>> {
        match self {
            Channel::ReliableOrdered { demux, .. } => demux.process(),
            Channel::UnreliableOrdered { demux, .. } => demux.process(),
        }
    }

    /// Multiplexer counters of a reliable channel.
    #[must_use]
    pub fn stat(&self) -> Option<reliable_ordered::MultiplexerStat> {
        match self {
            Channel::ReliableOrdered { mux, .. } => Some(mux.stat()),
            Channel::UnreliableOrdered { .. } => None,
        }
    }

    /// Packets queued and not yet acknowledged (reliable) or not yet sent
    /// (unreliable).
    #[must_use]
    pub fn queued_len(&self) -> usize {
        match self {
            Channel::ReliableOrdered { mux, .. } => mux.len(),
            Channel::UnreliableOrdered { mux, .. } => mux.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch() {
        let mut reliable = Channel::new(ChannelKind::ReliableOrdered);
        let mut unreliable = Channel::new(ChannelKind::UnreliableOrdered);
        assert_eq!(reliable.kind(), ChannelKind::ReliableOrdered);
        assert_eq!(unreliable.kind(), ChannelKind::UnreliableOrdered);

        reliable.queue(vec![1]);
        unreliable.queue(vec![1]);
        let id = DatagramId::from_u16(0);
        let r = reliable.serialize(id).unwrap();
        let u = unreliable.serialize(id).unwrap();
        // same framing on both kinds
        assert_eq!(r, u);

        reliable.on_datagram_lost(id);
        unreliable.on_datagram_lost(id);
        assert_eq!(reliable.queued_len(), 1);
        assert_eq!(unreliable.queued_len(), 0);
        assert!(reliable.serialize(id.add_u16(1)).is_some());
        assert!(unreliable.serialize(id.add_u16(1)).is_none());

        reliable.on_datagram_acked(id.add_u16(1));
        assert_eq!(reliable.queued_len(), 0);
        assert_eq!(reliable.stat().unwrap().retransmissions, 1);
        assert!(unreliable.stat().is_none());

        let mut receiver = Channel::new(ChannelKind::ReliableOrdered);
        receiver.on_data_received(&r).unwrap();
        assert_eq!(receiver.process(), vec![vec![1]]);
    }
}
