//! In-process network for driving clients deterministically.

use std::{
    cell::RefCell,
    collections::VecDeque,
    io,
    net::SocketAddr,
    rc::Rc,
};

use rustc_hash::FxHashMap;
use tracing::trace;

use super::{SendStatus, Transport};

/// Decides whether the datagram `(from, to, bytes)` is dropped.
pub type DropFilter = Box<dyn FnMut(SocketAddr, SocketAddr, &[u8]) -> bool>;

#[derive(Default)]
struct Network {
    inboxes: FxHashMap<SocketAddr, VecDeque<(SocketAddr, Vec<u8>)>>,
    drop_filter: Option<DropFilter>,
    dropped: u64,
}

/// Lossless, in-order network shared by every [`MemoryTransport`] bound on
/// it, unless a drop filter says otherwise. Datagrams to unbound addresses
/// vanish, as with UDP.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    inner: Rc<RefCell<Network>>,
}

impl MemoryNetwork {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemoryTransport> {
        let mut network = self.inner.borrow_mut();
        if network.inboxes.contains_key(&addr) {
            return Err(io::Error::from(io::ErrorKind::AddrInUse));
        }
        network.inboxes.insert(addr, VecDeque::new());
        Ok(MemoryTransport {
            addr,
            network: self.clone(),
        })
    }

    pub fn set_drop_filter(&self, filter: DropFilter) {
        self.inner.borrow_mut().drop_filter = Some(filter);
    }

    pub fn clear_drop_filter(&self) {
        self.inner.borrow_mut().drop_filter = None;
    }

    /// Datagrams discarded by the drop filter so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.borrow().dropped
    }
}

pub struct MemoryTransport {
    addr: SocketAddr,
    network: MemoryNetwork,
}

impl Transport for MemoryTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<SendStatus> {
        let mut network = self.network.inner.borrow_mut();
        let network = &mut *network;
        if let Some(filter) = network.drop_filter.as_mut() {
            if filter(self.addr, addr, buf) {
                trace!("dropping {} bytes from {} to {}", buf.len(), self.addr, addr);
                network.dropped += 1;
                return Ok(SendStatus::Sent);
            }
        }
        if let Some(inbox) = network.inboxes.get_mut(&addr) {
            inbox.push_back((self.addr, buf.to_vec()));
        }
        Ok(SendStatus::Sent)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        let mut network = self.network.inner.borrow_mut();
        let Some((from, bytes)) = network
            .inboxes
            .get_mut(&self.addr)
            .and_then(VecDeque::pop_front)
        else {
            return Ok(None);
        };
        // truncated like a UDP read into a short buffer
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Some((len, from)))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(self.addr)
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.inner.borrow_mut().inboxes.remove(&self.addr);
    }
}
