use std::{
    collections::{hash_map::Entry, VecDeque},
    io,
    net::SocketAddr,
    time::Instant,
};

use rustc_hash::FxHashMap;
use tracing::{debug, info, trace, warn};

use crate::{
    channel::{ChannelId, ChannelKind, MAX_CHANNELS},
    config::ClientConfig,
    connection::{ConnectionState, DistantClient, Stat},
    error::Error,
    event::{DisconnectionReason, Event, Violation},
    protocol::datagram::{DatagramKind, DatagramRef, DATAGRAM_MAX_SIZE},
    transport::{SendStatus, Transport, UdpTransport},
};

pub struct ClientBuilder {
    pub config: ClientConfig,
    /// Channels every peer gets, indexed on the wire by their position.
    pub channels: Vec<ChannelKind>,
}

impl ClientBuilder {
    pub fn build<T: Transport>(self, transport: T) -> Result<Client<T>, Error> {
        self.config.validate()?;
        if self.channels.is_empty() {
            return Err(Error::NoChannel);
        }
        if self.channels.len() > MAX_CHANNELS {
            return Err(Error::TooManyChannels(self.channels.len()));
        }
        Ok(Client {
            transport,
            config: self.config,
            channels: self.channels,
            peers: FxHashMap::default(),
            events: VecDeque::new(),
        })
    }

    pub fn bind(self, addr: SocketAddr) -> Result<Client<UdpTransport>, Error> {
        let transport = UdpTransport::bind(addr)?;
        self.build(transport)
    }
}

/// One endpoint talking to any number of peers over a single transport.
///
/// Drive it from one thread by calling [`Client::receive`],
/// [`Client::poll`] and [`Client::process_send`] in a loop.
pub struct Client<T> {
    transport: T,
    config: ClientConfig,
    channels: Vec<ChannelKind>,
    peers: FxHashMap<SocketAddr, DistantClient>,
    events: VecDeque<Event>,
}

impl<T: Transport> Client<T> {
    /// Opens a connection to `addr`, or accepts it if `addr` is an incoming
    /// peer.
    pub fn connect(&mut self, addr: SocketAddr, now: Instant) {
        match self.peers.get_mut(&addr) {
            Some(peer) => peer.accept(),
            None => {
                info!("connecting to {}", addr);
                let peer = DistantClient::new(
                    addr,
                    ConnectionState::Connecting,
                    &self.channels,
                    &self.config,
                    now,
                );
                self.peers.insert(addr, peer);
            }
        }
    }

    /// Drops the peer and tells it so, best effort. Refuses an incoming
    /// peer.
    pub fn disconnect(&mut self, addr: SocketAddr, now: Instant) -> Result<(), Error> {
        let Some(mut peer) = self.peers.remove(&addr) else {
            return Err(Error::UnknownPeer(addr));
        };
        let datagram = peer.disconnect(now);
        if let Err(e) = self.transport.send_to(&datagram, addr) {
            warn!("cannot notify {} of the disconnection: {}", addr, e);
        }
        self.events.push_back(Event::Disconnection {
            from: addr,
            reason: DisconnectionReason::Explicit,
        });
        Ok(())
    }

    /// Disconnects every peer.
    pub fn release(&mut self, now: Instant) {
        let addrs: Vec<SocketAddr> = self.peers.keys().copied().collect();
        for addr in addrs {
            let _ = self.disconnect(addr, now);
        }
    }

    pub fn send_to(
        &mut self,
        addr: SocketAddr,
        channel: ChannelId,
        data: Vec<u8>,
    ) -> Result<(), Error> {
        let Some(peer) = self.peers.get_mut(&addr) else {
            return Err(Error::UnknownPeer(addr));
        };
        peer.queue(channel, data)
    }

    /// Drains the transport, then drops peers that went silent.
    pub fn receive(&mut self, now: Instant) -> Result<(), Error> {
        // one spare byte tells oversized datagrams apart
        let mut buf = [0; DATAGRAM_MAX_SIZE + 1];
        while let Some((len, from)) = self.transport.recv_from(&mut buf)? {
            self.on_datagram(&buf[..len], from, now);
        }
        self.check_timeouts(now);
        Ok(())
    }

    fn on_datagram(&mut self, bytes: &[u8], from: SocketAddr, now: Instant) {
        let datagram = match DatagramRef::from_bytes(bytes) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("malformed datagram from {}: {}", from, e);
                self.events.push_back(Event::ProtocolViolation {
                    from,
                    violation: Violation::MalformedDatagram,
                });
                return;
            }
        };

        let peer = match self.peers.entry(from) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if datagram.hdr().kind() == DatagramKind::Disconnection {
                    debug!("ignoring disconnection from unknown {}", from);
                    return;
                }
                info!("incoming connection from {}", from);
                self.events.push_back(Event::IncomingConnection { from });
                entry.insert(DistantClient::new(
                    from,
                    ConnectionState::Incoming,
                    &self.channels,
                    &self.config,
                    now,
                ))
            }
        };
        peer.on_datagram_received(&datagram, now, &mut self.events);
        if peer.state() == ConnectionState::Disconnected {
            self.peers.remove(&from);
        }
    }

    fn check_timeouts(&mut self, now: Instant) {
        let events = &mut self.events;
        self.peers.retain(|_, peer| !peer.check_timeout(now, events));
    }

    /// Next pending event, oldest first.
    pub fn poll(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Sends everything due at `now`: new and lost fragments, acks and
    /// keep-alives. A peer the transport fails to reach is disconnected.
    pub fn process_send(&mut self, now: Instant) {
        self.check_timeouts(now);

        let mut failed: Vec<(SocketAddr, io::Error)> = Vec::new();
        for (&addr, peer) in self.peers.iter_mut() {
            for datagram in peer.process_send(now) {
                match self.transport.send_to(&datagram, addr) {
                    Ok(SendStatus::Sent) => (),
                    Ok(SendStatus::WouldBlock) => {
                        trace!("transport busy, {} bytes to {} left out", datagram.len(), addr);
                    }
                    Err(e) => {
                        failed.push((addr, e));
                        break;
                    }
                }
            }
        }
        for (addr, e) in failed {
            warn!("cannot send to {}: {}", addr, e);
            self.peers.remove(&addr);
            self.events.push_back(Event::Disconnection {
                from: addr,
                reason: DisconnectionReason::Error,
            });
        }
    }

    #[must_use]
    pub fn peer_state(&self, addr: SocketAddr) -> Option<ConnectionState> {
        self.peers.get(&addr).map(DistantClient::state)
    }

    #[must_use]
    pub fn peer_stat(&self, addr: SocketAddr) -> Option<Stat> {
        self.peers.get(&addr).map(DistantClient::stat)
    }

    pub fn peers(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.peers.keys().copied()
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }
}
