//! Datagram I/O the client is driven over.

pub mod memory;

use std::{
    io,
    net::{SocketAddr, UdpSocket},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    /// The datagram was not sent and is left to the retransmission path.
    WouldBlock,
}

/// Non-blocking datagram socket.
pub trait Transport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<SendStatus>;

    /// Returns `None` when nothing is waiting.
    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}

pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        Ok(UdpTransport { socket })
    }
}

impl Transport for UdpTransport {
    fn send_to(&mut self, buf: &[u8], addr: SocketAddr) -> io::Result<SendStatus> {
        match self.socket.send_to(buf, addr) {
            Ok(_) => Ok(SendStatus::Sent),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(SendStatus::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buf) {
            Ok(received) => Ok(Some(received)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udp_loopback() {
        let mut a = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut buf = [0; 16];
        assert_eq!(b.recv_from(&mut buf).unwrap(), None);

        let b_addr = b.local_addr().unwrap();
        assert_eq!(a.send_to(b"hey", b_addr).unwrap(), SendStatus::Sent);
        let received = loop {
            if let Some(received) = b.recv_from(&mut buf).unwrap() {
                break received;
            }
            std::thread::yield_now();
        };
        assert_eq!(received, (3, a.local_addr().unwrap()));
        assert_eq!(&buf[..3], b"hey");
    }
}
