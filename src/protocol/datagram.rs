use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{DatagramId, DecodingError};

/// Upper bound of a whole datagram, kept under common path MTUs.
pub const DATAGRAM_MAX_SIZE: usize = 1400;
pub const DATAGRAM_HDR_LEN: usize = 13;
pub const DATAGRAM_DATA_MAX_SIZE: usize = DATAGRAM_MAX_SIZE - DATAGRAM_HDR_LEN;
pub const CHANNEL_HDR_LEN: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum DatagramKind {
    Data = 0,
    KeepAlive = 1,
    Disconnection = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatagramHeader {
    id: DatagramId,
    ack: DatagramId,
    previous_acks: u64,
    kind: DatagramKind,
}

pub struct DatagramHeaderBuilder {
    pub id: DatagramId,
    pub ack: DatagramId,
    pub previous_acks: u64,
    pub kind: DatagramKind,
}

impl DatagramHeaderBuilder {
    #[must_use]
    pub fn build(self) -> DatagramHeader {
        DatagramHeader {
            id: self.id,
            ack: self.ack,
            previous_acks: self.previous_acks,
            kind: self.kind,
        }
    }
}

impl DatagramHeader {
    pub fn from_bytes(rdr: &mut Cursor<&[u8]>) -> Result<Self, DecodingError> {
        let id = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "id" })?;
        let ack = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "ack" })?;
        let previous_acks = rdr
            .read_u64::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding {
                field: "previous_acks",
            })?;
        let kind = rdr
            .read_u8()
            .map_err(|_e| DecodingError::Decoding { field: "kind" })?;
        let kind =
            DatagramKind::try_from(kind).map_err(|_e| DecodingError::Decoding { field: "kind" })?;

        Ok(DatagramHeader {
            id: DatagramId::from_u16(id),
            ack: DatagramId::from_u16(ack),
            previous_acks,
            kind,
        })
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) {
        let start = buf.len();
        // writing into a `Vec` cannot fail
        let _ = buf.write_u16::<BigEndian>(self.id.to_u16());
        let _ = buf.write_u16::<BigEndian>(self.ack.to_u16());
        let _ = buf.write_u64::<BigEndian>(self.previous_acks);
        let _ = buf.write_u8(self.kind.into());
        debug_assert_eq!(buf.len() - start, DATAGRAM_HDR_LEN);
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> DatagramId {
        self.id
    }

    #[must_use]
    #[inline]
    pub fn ack(&self) -> DatagramId {
        self.ack
    }

    #[must_use]
    #[inline]
    pub fn previous_acks(&self) -> u64 {
        self.previous_acks
    }

    #[must_use]
    #[inline]
    pub fn kind(&self) -> DatagramKind {
        self.kind
    }
}

/// A decoded view over received datagram bytes.
#[derive(Debug, Clone, Copy)]
pub struct DatagramRef<'a> {
    hdr: DatagramHeader,
    channel: Option<u8>,
    packet: &'a [u8],
}

impl<'a> DatagramRef<'a> {
    pub fn from_bytes(bytes: &'a [u8]) -> Result<Self, DecodingError> {
        if bytes.len() > DATAGRAM_MAX_SIZE {
            return Err(DecodingError::Decoding { field: "len" });
        }
        let mut rdr = Cursor::new(bytes);
        let hdr = DatagramHeader::from_bytes(&mut rdr)?;
        let read_len = rdr.position() as usize;
        let body = &bytes[read_len..];

        let (channel, packet) = match hdr.kind() {
            DatagramKind::Data => {
                let (&channel, packet) = body
                    .split_first()
                    .ok_or(DecodingError::Decoding { field: "channel" })?;
                (Some(channel), packet)
            }
            DatagramKind::KeepAlive | DatagramKind::Disconnection => {
                if !body.is_empty() {
                    return Err(DecodingError::Decoding { field: "body" });
                }
                (None, body)
            }
        };
        Ok(DatagramRef {
            hdr,
            channel,
            packet,
        })
    }

    #[must_use]
    #[inline]
    pub fn hdr(&self) -> &DatagramHeader {
        &self.hdr
    }

    /// Channel index, for data datagrams only.
    #[must_use]
    #[inline]
    pub fn channel(&self) -> Option<u8> {
        self.channel
    }

    #[must_use]
    #[inline]
    pub fn packet(&self) -> &'a [u8] {
        self.packet
    }
}

/// Frames a datagram. `data` is the channel index and the encoded packet of
/// a data datagram.
#[must_use]
pub fn encode_datagram(hdr: &DatagramHeader, data: Option<(u8, &[u8])>) -> Vec<u8> {
    let body_len = data.map_or(0, |(_, packet)| CHANNEL_HDR_LEN + packet.len());
    let mut buf = Vec::with_capacity(DATAGRAM_HDR_LEN + body_len);
    hdr.append_to(&mut buf);
    if let Some((channel, packet)) = data {
        buf.push(channel);
        buf.extend_from_slice(packet);
    }
    debug_assert!(buf.len() <= DATAGRAM_MAX_SIZE);
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(kind: DatagramKind) -> DatagramHeader {
        DatagramHeaderBuilder {
            id: DatagramId::from_u16(0x0102),
            ack: DatagramId::from_u16(0x0304),
            previous_acks: 0x8000_0000_0000_0001,
            kind,
        }
        .build()
    }

    #[test]
    fn test_layout() {
        let bytes = encode_datagram(&hdr(DatagramKind::Data), Some((7, &[9, 9][..])));
        assert_eq!(
            bytes,
            vec![
                1, 2, // id
                3, 4, // ack
                0x80, 0, 0, 0, 0, 0, 0, 1, // previous acks
                0, // kind (Data)
                7, // channel
                9, 9 // packet
            ]
        );

        let datagram = DatagramRef::from_bytes(&bytes).unwrap();
        assert_eq!(*datagram.hdr(), hdr(DatagramKind::Data));
        assert_eq!(datagram.channel(), Some(7));
        assert_eq!(datagram.packet(), &[9, 9]);
    }

    #[test]
    fn test_keep_alive() {
        let bytes = encode_datagram(&hdr(DatagramKind::KeepAlive), None);
        assert_eq!(bytes.len(), DATAGRAM_HDR_LEN);
        let datagram = DatagramRef::from_bytes(&bytes).unwrap();
        assert_eq!(datagram.hdr().kind(), DatagramKind::KeepAlive);
        assert_eq!(datagram.channel(), None);
        assert!(datagram.packet().is_empty());
    }

    #[test]
    fn test_malformed() {
        let bytes = encode_datagram(&hdr(DatagramKind::Data), None);
        assert_eq!(
            DatagramRef::from_bytes(&bytes).unwrap_err(),
            DecodingError::Decoding { field: "channel" }
        );

        let mut bytes = encode_datagram(&hdr(DatagramKind::KeepAlive), None);
        bytes[12] = 42;
        assert_eq!(
            DatagramRef::from_bytes(&bytes).unwrap_err(),
            DecodingError::Decoding { field: "kind" }
        );

        assert!(DatagramRef::from_bytes(&bytes[..5]).is_err());
        assert!(DatagramRef::from_bytes(&vec![0; DATAGRAM_MAX_SIZE + 1]).is_err());
    }
}
