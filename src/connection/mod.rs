//! Per-peer connection state.

pub mod ack_handler;

use std::{
    collections::VecDeque,
    net::SocketAddr,
    time::{Duration, Instant},
};

use tracing::{debug, info, trace, warn};

use crate::{
    channel::{reliable_ordered::MultiplexerStat, Channel, ChannelId, ChannelKind},
    config::ClientConfig,
    error::Error,
    event::{ConnectionResult, DisconnectionReason, Event, Violation},
    protocol::{
        datagram::{encode_datagram, DatagramHeaderBuilder, DatagramKind, DatagramRef},
        DatagramId,
    },
};

use self::ack_handler::{AckHandler, AckHandlerBuilder, AckOutcome, ReceivedAcks, SentDatagram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The peer reached out and waits for the application to accept it.
    Incoming,
    /// Handshake keep-alives are going out.
    Connecting,
    Connected,
    Disconnected,
}

/// Local record of one remote peer.
pub struct DistantClient {
    addr: SocketAddr,
    state: ConnectionState,
    next_datagram_id: DatagramId,
    received_acks: ReceivedAcks,
    ack_handler: AckHandler,
    channels: Vec<Channel>,
    last_receipt: Instant,
    last_send: Option<Instant>,
    ack_pending: bool,

    // const
    timeout: Duration,
    keepalive_interval: Duration,
    max_message_size: usize,

    stat: LocalStat,
}

impl DistantClient {
    #[must_use]
    pub fn new(
        addr: SocketAddr,
        state: ConnectionState,
        channels: &[ChannelKind],
        config: &ClientConfig,
        now: Instant,
    ) -> Self {
        let ack_handler = AckHandlerBuilder {
            initial_rto: config.initial_rto,
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            ratio_rto_to_one_rtt: config.ratio_rto_to_one_rtt,
        }
        .build();
        DistantClient {
            addr,
            state,
            next_datagram_id: DatagramId::from_u16(0),
            received_acks: ReceivedAcks::new(),
            ack_handler,
            channels: channels.iter().map(|&kind| Channel::new(kind)).collect(),
            last_receipt: now,
            last_send: None,
            ack_pending: false,
            timeout: config.timeout,
            keepalive_interval: config.keepalive_interval,
            max_message_size: config.max_message_size,
            stat: LocalStat::default(),
        }
    }

    #[must_use]
    #[inline]
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    #[must_use]
    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Accepts an incoming peer. Does nothing in any other state.
    pub fn accept(&mut self) {
        if self.state == ConnectionState::Incoming {
            info!("accepting connection from {}", self.addr);
            self.state = ConnectionState::Connecting;
        }
    }

    pub fn queue(&mut self, channel: ChannelId, message: Vec<u8>) -> Result<(), Error> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => (),
            ConnectionState::Incoming | ConnectionState::Disconnected => {
                return Err(Error::NotConnected(self.addr))
            }
        }
        if message.len() > self.max_message_size {
            return Err(Error::MessageTooLarge {
                len: message.len(),
                max: self.max_message_size,
            });
        }
        let Some(channel) = self.channels.get_mut(usize::from(channel)) else {
            return Err(Error::UnknownChannel(channel));
        };
        channel.queue(message);
        Ok(())
    }

    /// Applies one decoded datagram of this peer. Events are appended in the
    /// order the application should see them.
    pub fn on_datagram_received(
        &mut self,
        datagram: &DatagramRef<'_>,
        now: Instant,
        events: &mut VecDeque<Event>,
    ) {
        let hdr = datagram.hdr();
        self.last_receipt = now;
        if self.state == ConnectionState::Incoming && hdr.kind() == DatagramKind::Data {
            // left unrecorded so the peer resends it once accepted
            warn!("data from {} before its connection was accepted", self.addr);
            events.push_back(Event::ProtocolViolation {
                from: self.addr,
                violation: Violation::DataBeforeAccept,
            });
            return;
        }
        if !self.received_acks.record(hdr.id()) {
            trace!("duplicate datagram {} from {}", hdr.id(), self.addr);
            self.stat.duplicates += 1;
            return;
        }
        trace!(
            "datagram {} ({:?}) from {}, ack {}",
            hdr.id(),
            hdr.kind(),
            self.addr,
            hdr.ack()
        );
        self.stat.received += 1;

        let outcome = self
            .ack_handler
            .on_acks_received(hdr.ack(), hdr.previous_acks(), now);
        self.apply_ack_outcome(outcome);

        if hdr.kind() == DatagramKind::Disconnection {
            let event = match self.state {
                ConnectionState::Connecting => {
                    info!("connection to {} refused", self.addr);
                    Event::Connection {
                        from: self.addr,
                        result: ConnectionResult::Refused,
                    }
                }
                _ => {
                    info!("{} disconnected", self.addr);
                    Event::Disconnection {
                        from: self.addr,
                        reason: DisconnectionReason::Remote,
                    }
                }
            };
            self.state = ConnectionState::Disconnected;
            events.push_back(event);
            return;
        }

        if self.state == ConnectionState::Connecting {
            info!("connected to {}", self.addr);
            self.state = ConnectionState::Connected;
            // answer at once so the peer completes its side too
            self.ack_pending = true;
            events.push_back(Event::Connection {
                from: self.addr,
                result: ConnectionResult::Success,
            });
        }

        if hdr.kind() == DatagramKind::Data {
            self.ack_pending = true;
            self.on_data(datagram, events);
        }
    }

    fn on_data(&mut self, datagram: &DatagramRef<'_>, events: &mut VecDeque<Event>) {
        let Some(channel_id) = datagram.channel() else {
            return;
        };
        let Some(channel) = self.channels.get_mut(usize::from(channel_id)) else {
            warn!("{} sent data on unknown channel {}", self.addr, channel_id);
            events.push_back(Event::ProtocolViolation {
                from: self.addr,
                violation: Violation::UnknownChannel(channel_id),
            });
            return;
        };
        if let Err(e) = channel.on_data_received(datagram.packet()) {
            warn!("malformed packet from {}: {}", self.addr, e);
            events.push_back(Event::ProtocolViolation {
                from: self.addr,
                violation: Violation::MalformedPacket,
            });
            return;
        }
        for data in channel.process() {
            events.push_back(Event::Data {
                from: self.addr,
                channel: channel_id,
                data,
            });
        }
    }

    fn apply_ack_outcome(&mut self, outcome: AckOutcome) {
        for SentDatagram { id, channel } in outcome.acked {
            if let Some(channel) = channel.and_then(|c| self.channels.get_mut(usize::from(c))) {
                channel.on_datagram_acked(id);
            }
        }
        self.on_datagrams_lost(outcome.lost);
    }

    fn on_datagrams_lost(&mut self, lost: Vec<SentDatagram>) {
        for SentDatagram { id, channel } in lost {
            if let Some(channel) = channel.and_then(|c| self.channels.get_mut(usize::from(c))) {
                debug!("datagram {} to {} lost", id, self.addr);
                channel.on_datagram_lost(id);
            }
        }
    }

    /// Marks the peer disconnected when it has been silent for too long.
    /// Returns whether it just timed out. A connect attempt that times out
    /// is reported as a failed connection.
    pub fn check_timeout(&mut self, now: Instant, events: &mut VecDeque<Event>) -> bool {
        if self.state == ConnectionState::Disconnected {
            return false;
        }
        if now.saturating_duration_since(self.last_receipt) < self.timeout {
            return false;
        }
        warn!("{} timed out in state {:?}", self.addr, self.state);
        let event = match self.state {
            ConnectionState::Connecting => Event::Connection {
                from: self.addr,
                result: ConnectionResult::TimedOut,
            },
            _ => Event::Disconnection {
                from: self.addr,
                reason: DisconnectionReason::Timeout,
            },
        };
        self.state = ConnectionState::Disconnected;
        events.push_back(event);
        true
    }

    /// Produces every datagram due to this peer at `now`.
    #[must_use]
    pub fn process_send(&mut self, now: Instant) -> Vec<Vec<u8>> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => (),
            ConnectionState::Incoming | ConnectionState::Disconnected => return Vec::new(),
        }
        let lost = self.ack_handler.expire(now);
        self.on_datagrams_lost(lost);

        let mut datagrams = Vec::new();
        if self.state == ConnectionState::Connected {
            'channels: for index in 0..self.channels.len() {
                loop {
                    let id = self.next_datagram_id;
                    if !self.ack_handler.is_reportable(id) {
                        trace!(
                            "{} datagrams in flight to {}, holding data back",
                            self.ack_handler.in_flight_len(),
                            self.addr
                        );
                        break 'channels;
                    }
                    let Some(packet) = self.channels[index].serialize(id) else {
                        break;
                    };
                    let data = Some((index as ChannelId, &packet[..]));
                    datagrams.push(self.frame(DatagramKind::Data, data, now));
                }
            }
        }

        if datagrams.is_empty() {
            let keepalive_due = match self.last_send {
                Some(last_send) => {
                    now.saturating_duration_since(last_send) >= self.keepalive_interval
                }
                None => true,
            };
            if self.ack_pending || keepalive_due {
                datagrams.push(self.frame(DatagramKind::KeepAlive, None, now));
            }
        }
        datagrams
    }

    /// Ends the connection locally and returns the datagram telling the peer.
    #[must_use]
    pub fn disconnect(&mut self, now: Instant) -> Vec<u8> {
        info!("disconnecting from {}", self.addr);
        let datagram = self.frame(DatagramKind::Disconnection, None, now);
        self.state = ConnectionState::Disconnected;
        datagram
    }

    fn frame(
        &mut self,
        kind: DatagramKind,
        data: Option<(ChannelId, &[u8])>,
        now: Instant,
    ) -> Vec<u8> {
        let hdr = DatagramHeaderBuilder {
            id: self.next_datagram_id,
            ack: self.received_acks.last_ack(),
            previous_acks: self.received_acks.previous_acks(),
            kind,
        }
        .build();
        self.ack_handler
            .on_datagram_sent(hdr.id(), data.map(|(channel, _)| channel), now);
        self.next_datagram_id.increment();
        self.last_send = Some(now);
        self.ack_pending = false;
        encode_datagram(&hdr, data)
    }

    #[must_use]
    pub fn stat(&self) -> Stat {
        Stat {
            state: self.state,
            ack: self.ack_handler.stat(),
            received: self.stat.received,
            duplicates: self.stat.duplicates,
            channels: self.channels.iter().map(Channel::stat).collect(),
        }
    }
}

#[derive(Default)]
struct LocalStat {
    received: u64,
    duplicates: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stat {
    pub state: ConnectionState,
    pub ack: ack_handler::Stat,
    pub received: u64,
    pub duplicates: u64,
    /// Multiplexer counters per channel, `None` for unreliable ones.
    pub channels: Vec<Option<MultiplexerStat>>,
}
