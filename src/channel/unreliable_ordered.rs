use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::protocol::{
    packet::{self, Packet, PacketType},
    DecodingError, PacketId,
};

/// Sends each packet exactly once; nothing is kept for retransmission.
pub struct Multiplexer {
    queue: VecDeque<Vec<u8>>,
    next_id: PacketId,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    #[must_use]
    pub fn new() -> Self {
        Multiplexer {
            queue: VecDeque::new(),
            next_id: PacketId::from_u16(0),
        }
    }

    pub fn queue(&mut self, message: Vec<u8>) {
        for packet in packet::fragment(&mut self.next_id, &message) {
            self.queue.push_back(packet.to_bytes());
        }
    }

    #[must_use]
    pub fn serialize(&mut self) -> Option<Vec<u8>> {
        self.queue.pop_front()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Delivers complete messages newer than the last one delivered, skipping
/// whatever went missing in between.
pub struct Demultiplexer {
    pending: BTreeMap<PacketId, Packet>,
    last_processed: PacketId,
}

impl Default for Demultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Demultiplexer {
    #[must_use]
    pub fn new() -> Self {
        Demultiplexer {
            pending: BTreeMap::new(),
            last_processed: PacketId::MAX,
        }
    }

    pub fn on_data_received(&mut self, bytes: &[u8]) -> Result<(), DecodingError> {
        let packet = Packet::from_bytes(bytes)?;
        if !(self.last_processed < packet.id()) {
            trace!("dropping outdated packet {}", packet.id());
            return Ok(());
        }
        self.pending.insert(packet.id(), packet);
        Ok(())
    }

    #[must_use]
    pub fn process(&mut self) -> Vec<Vec<u8>> {
        let ids: Vec<PacketId> = self.pending.keys().copied().collect();
        let mut messages = Vec::new();
        let mut i = 0;
        while i < ids.len() {
            let id = ids[i];
            match self.pending.get(&id).map(|packet| packet.kind()) {
                Some(PacketType::Packet) => {
                    if let Some(packet) = self.pending.remove(&id) {
                        messages.push(packet.into_data());
                    }
                    self.last_processed = id;
                    i += 1;
                }
                Some(PacketType::FirstFragment) => {
                    // contiguous keys sit next to each other in `ids`
                    let mut j = i + 1;
                    let mut complete = false;
                    while j < ids.len() && ids[j] == ids[j - 1].add_u16(1) {
                        match self.pending.get(&ids[j]).map(|packet| packet.kind()) {
                            Some(PacketType::Fragment) => j += 1,
                            Some(PacketType::LastFragment) => {
                                complete = true;
                                break;
                            }
                            _ => break,
                        }
                    }
                    if complete {
                        let mut message = Vec::new();
                        for id in &ids[i..=j] {
                            if let Some(packet) = self.pending.remove(id) {
                                message.extend_from_slice(packet.data());
                            }
                        }
                        messages.push(message);
                        self.last_processed = ids[j];
                        i = j + 1;
                    } else {
                        i += 1;
                    }
                }
                _ => i += 1,
            }
        }

        // anything older than the last delivered message can never complete
        let last_processed = self.last_processed;
        self.pending.retain(|&id, _| last_processed < id);
        messages
    }

    #[must_use]
    pub fn last_processed(&self) -> PacketId {
        self.last_processed
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
