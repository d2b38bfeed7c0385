use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, trace, warn};

use crate::protocol::{
    packet::{self, Packet, PacketType},
    DatagramId, DecodingError, PacketId,
};

/// How far past `first_allowed_packet` fragments may be put on the wire.
pub const SEND_WINDOW_LEN: u16 = 1024;

// Queued ids strictly increase from `first_allowed_packet`, so every entry
// that may be in flight sits within the first `SEND_WINDOW_LEN` positions.
const IN_FLIGHT_SPAN: usize = SEND_WINDOW_LEN as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SendState {
    Pending,
    InFlight(DatagramId),
    Lost,
}

struct SendingPacket {
    id: PacketId,
    bytes: Vec<u8>,
    state: SendState,
}

/// Outbound half: fragments messages and keeps every fragment until the
/// datagram carrying it is acknowledged.
pub struct Multiplexer {
    queue: VecDeque<SendingPacket>,
    next_id: PacketId,
    first_allowed_packet: PacketId,
    stat: MultiplexerStat,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer {
    fn check_rep(&self) {
        let expected = match self.queue.front() {
            Some(front) => front.id,
            None => self.next_id,
        };
        debug_assert_eq!(self.first_allowed_packet, expected);
    }

    #[must_use]
    pub fn new() -> Self {
        let this = Multiplexer {
            queue: VecDeque::new(),
            next_id: PacketId::from_u16(0),
            first_allowed_packet: PacketId::from_u16(0),
            stat: MultiplexerStat::default(),
        };
        this.check_rep();
        this
    }

    pub fn queue(&mut self, message: Vec<u8>) {
        let packets = packet::fragment(&mut self.next_id, &message);
        trace!(
            "queued message of {} bytes as {} packet(s)",
            message.len(),
            packets.len()
        );
        for packet in packets {
            self.queue.push_back(SendingPacket {
                id: packet.id(),
                bytes: packet.to_bytes(),
                state: SendState::Pending,
            });
        }
        self.stat.messages += 1;
        self.check_rep();
    }

    /// Hands out the next fragment that is neither in flight nor outside the
    /// send window, and remembers that `datagram_id` carries it.
    #[must_use]
    pub fn serialize(&mut self, datagram_id: DatagramId) -> Option<Vec<u8>> {
        let window_end = self.first_allowed_packet.add_u16(SEND_WINDOW_LEN);
        for sending in self.queue.iter_mut() {
            if !(sending.id < window_end) {
                break;
            }
            match sending.state {
                SendState::InFlight(_) => continue,
                SendState::Pending => {
                    self.stat.sent += 1;
                }
                SendState::Lost => {
                    self.stat.sent += 1;
                    self.stat.retransmissions += 1;
                    debug!(
                        "resending packet {} in datagram {}",
                        sending.id, datagram_id
                    );
                }
            }
            sending.state = SendState::InFlight(datagram_id);
            return Some(sending.bytes.clone());
        }
        None
    }

    pub fn on_datagram_acked(&mut self, datagram_id: DatagramId) {
        let position = self
            .queue
            .iter()
            .take(IN_FLIGHT_SPAN)
            .position(|sending| sending.state == SendState::InFlight(datagram_id));
        let Some(position) = position else {
            return;
        };
        let Some(acked) = self.queue.remove(position) else {
            return;
        };
        self.stat.acked += 1;

        if acked.id == self.first_allowed_packet {
            // acked fragments are gone from the queue, so the front is the
            // first id still waiting for an ack
            self.first_allowed_packet = match self.queue.front() {
                Some(front) => front.id,
                None => self.next_id,
            };
        }
        self.check_rep();
    }

    pub fn on_datagram_lost(&mut self, datagram_id: DatagramId) {
        if let Some(sending) = self
            .queue
            .iter_mut()
            .take(IN_FLIGHT_SPAN)
            .find(|sending| sending.state == SendState::InFlight(datagram_id))
        {
            sending.state = SendState::Lost;
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[must_use]
    pub fn next_id(&self) -> PacketId {
        self.next_id
    }

    #[must_use]
    pub fn first_allowed_packet(&self) -> PacketId {
        self.first_allowed_packet
    }

    #[must_use]
    pub fn stat(&self) -> MultiplexerStat {
        self.stat
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerStat {
    pub messages: u64,
    pub sent: u64,
    pub retransmissions: u64,
    pub acked: u64,
}

enum Run {
    Complete(PacketId),
    Incomplete,
    Broken(PacketId),
}

/// Inbound half: buffers packets by id and releases whole messages in
/// strict id order.
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
            trace!("dropping already processed packet {}", packet.id());
            return Ok(());
        }
        self.pending.insert(packet.id(), packet);
        Ok(())
    }

    #[must_use]
    pub fn process(&mut self) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        loop {
            let next = self.last_processed.add_u16(1);
            let Some(kind) = self.pending.get(&next).map(|packet| packet.kind()) else {
                break;
            };
            match kind {
                PacketType::Packet => {
                    if let Some(packet) = self.pending.remove(&next) {
                        messages.push(packet.into_data());
                    }
                    self.last_processed = next;
                }
                PacketType::FirstFragment => match self.fragment_run(next) {
                    Run::Complete(last) => {
                        messages.push(self.take_run(next, last));
                        self.last_processed = last;
                    }
                    Run::Incomplete => break,
                    Run::Broken(interrupt) => {
                        warn!("dropping fragment run {}..{} cut short", next, interrupt);
                        let _ = self.take_run(next, interrupt.sub_u16(1));
                        self.last_processed = interrupt.sub_u16(1);
                    }
                },
                PacketType::Fragment | PacketType::LastFragment => {
                    warn!("dropping fragment {} without a first fragment", next);
                    self.pending.remove(&next);
                    self.last_processed = next;
                }
            }
        }
        messages
    }

    fn fragment_run(&self, first: PacketId) -> Run {
        let mut id = first.add_u16(1);
        loop {
            match self.pending.get(&id).map(|packet| packet.kind()) {
                None => return Run::Incomplete,
                Some(PacketType::Fragment) => id.increment(),
                Some(PacketType::LastFragment) => return Run::Complete(id),
                Some(PacketType::Packet | PacketType::FirstFragment) => return Run::Broken(id),
            }
        }
    }

    fn take_run(&mut self, first: PacketId, last: PacketId) -> Vec<u8> {
        let mut message = Vec::new();
        let mut id = first;
        loop {
            if let Some(packet) = self.pending.remove(&id) {
                message.extend_from_slice(packet.data());
            }
            if id == last {
                break;
            }
            id.increment();
        }
        message
    }

    #[must_use]
    pub fn last_processed(&self) -> PacketId {
        self.last_processed
    }

    /// Packets received but not yet released.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
