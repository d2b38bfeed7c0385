use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::{
    datagram::{CHANNEL_HDR_LEN, DATAGRAM_DATA_MAX_SIZE},
    DecodingError, EncodingError, PacketId,
};

pub const PACKET_MAX_SIZE: usize = DATAGRAM_DATA_MAX_SIZE - CHANNEL_HDR_LEN;
pub const PACKET_HDR_LEN: usize = 5;
pub const DATA_MAX_SIZE: usize = PACKET_MAX_SIZE - PACKET_HDR_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum PacketType {
    Packet = 0,
    FirstFragment = 1,
    Fragment = 2,
    LastFragment = 3,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: PacketId,
    kind: PacketType,
    data: Vec<u8>,
}

pub struct PacketBuilder {
    pub id: PacketId,
    pub kind: PacketType,
    pub data: Vec<u8>,
}

impl PacketBuilder {
    pub fn build(self) -> Result<Packet, EncodingError> {
        if self.data.len() > DATA_MAX_SIZE {
            return Err(EncodingError::NotEnoughSpace);
        }
        let this = Packet {
            id: self.id,
            kind: self.kind,
            data: self.data,
        };
        this.check_rep();
        Ok(this)
    }
}

impl Packet {
    #[inline]
    fn check_rep(&self) {
        debug_assert!(self.data.len() <= DATA_MAX_SIZE);
    }

    /// Decodes a packet that spans all of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodingError> {
        let mut rdr = Cursor::new(bytes);
        let id = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "id" })?;
        let size = rdr
            .read_u16::<BigEndian>()
            .map_err(|_e| DecodingError::Decoding { field: "size" })? as usize;
        let kind = rdr
            .read_u8()
            .map_err(|_e| DecodingError::Decoding { field: "type" })?;
        let kind =
            PacketType::try_from(kind).map_err(|_e| DecodingError::Decoding { field: "type" })?;

        let body = &bytes[rdr.position() as usize..];
        if size > DATA_MAX_SIZE || body.len() != size {
            return Err(DecodingError::Decoding { field: "size" });
        }

        let this = Packet {
            id: PacketId::from_u16(id),
            kind,
            data: body.to_vec(),
        };
        this.check_rep();
        Ok(this)
    }

    pub fn append_to(&self, buf: &mut Vec<u8>) {
        // writing into a `Vec` cannot fail
        let _ = buf.write_u16::<BigEndian>(self.id.to_u16());
        let _ = buf.write_u16::<BigEndian>(self.data.len() as u16);
        let _ = buf.write_u8(self.kind.into());
        buf.extend_from_slice(&self.data);
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size());
        self.append_to(&mut buf);
        buf
    }

    #[must_use]
    #[inline]
    pub fn id(&self) -> PacketId {
        self.id
    }

    #[must_use]
    #[inline]
    pub fn kind(&self) -> PacketType {
        self.kind
    }

    #[must_use]
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    #[must_use]
    #[inline]
    pub fn datasize(&self) -> usize {
        self.data.len()
    }

    /// Encoded size, header included.
    #[must_use]
    #[inline]
    pub fn size(&self) -> usize {
        PACKET_HDR_LEN + self.data.len()
    }
}

/// Splits `message` into packets with contiguous ids taken from `next_id`.
///
/// A message that fits into [`DATA_MAX_SIZE`] becomes a single
/// [`PacketType::Packet`], an empty one included. Longer messages become
/// `FirstFragment, Fragment.., LastFragment`.
#[must_use]
pub fn fragment(next_id: &mut PacketId, message: &[u8]) -> Vec<Packet> {
    if message.len() <= DATA_MAX_SIZE {
        let packet = Packet {
            id: *next_id,
            kind: PacketType::Packet,
            data: message.to_vec(),
        };
        next_id.increment();
        return vec![packet];
    }

    let count = message.len().div_ceil(DATA_MAX_SIZE);
    let mut packets = Vec::with_capacity(count);
    for (i, chunk) in message.chunks(DATA_MAX_SIZE).enumerate() {
        let kind = match i {
            0 => PacketType::FirstFragment,
            i if i + 1 == count => PacketType::LastFragment,
            _ => PacketType::Fragment,
        };
        packets.push(Packet {
            id: *next_id,
            kind,
            data: chunk.to_vec(),
        });
        next_id.increment();
    }
    packets
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case::empty(0, 1)]
    #[case::small(5, 1)]
    #[case::exact(DATA_MAX_SIZE, 1)]
    #[case::one_over(DATA_MAX_SIZE + 1, 2)]
    #[case::three(DATA_MAX_SIZE * 3, 3)]
    #[case::three_and_a_bit(DATA_MAX_SIZE * 3 + 7, 4)]
    fn test_fragment(#[case] len: usize, #[case] expected_count: usize) {
        let message: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
        let mut next_id = PacketId::from_u16(u16::MAX - 1);
        let packets = fragment(&mut next_id, &message);

        assert_eq!(packets.len(), expected_count);
        assert_eq!(
            next_id,
            PacketId::from_u16(u16::MAX - 1).add_u16(expected_count as u16)
        );
        for (i, packet) in packets.iter().enumerate() {
            assert_eq!(
                packet.id(),
                PacketId::from_u16(u16::MAX - 1).add_u16(i as u16)
            );
            let expected_kind = match (expected_count, i) {
                (1, _) => PacketType::Packet,
                (_, 0) => PacketType::FirstFragment,
                (n, i) if i + 1 == n => PacketType::LastFragment,
                _ => PacketType::Fragment,
            };
            assert_eq!(packet.kind(), expected_kind);
        }
        let joined: Vec<u8> = packets.iter().flat_map(|p| p.data().to_vec()).collect();
        assert_eq!(joined, message);
    }

    #[test]
    fn test_layout() {
        let packet = PacketBuilder {
            id: PacketId::from_u16(258),
            kind: PacketType::LastFragment,
            data: vec![b'T', b'o', b't', b'o', 0],
        }
        .build()
        .unwrap();
        let bytes = packet.to_bytes();
        assert_eq!(
            bytes,
            vec![
                1, 2, // id
                0, 5, // size
                3, // type (LastFragment)
                b'T', b'o', b't', b'o', 0 // data
            ]
        );
        assert_eq!(packet.size(), bytes.len());
        assert_eq!(Packet::from_bytes(&bytes).unwrap(), packet);
    }

    #[test]
    fn test_sizes() {
        assert_eq!(PACKET_MAX_SIZE, 1386);
        assert_eq!(DATA_MAX_SIZE, 1381);

        let too_large = PacketBuilder {
            id: PacketId::from_u16(0),
            kind: PacketType::Packet,
            data: vec![0; DATA_MAX_SIZE + 1],
        }
        .build();
        assert_eq!(too_large.unwrap_err(), EncodingError::NotEnoughSpace);
    }

    #[test]
    fn test_size_mismatch() {
        let mut bytes = PacketBuilder {
            id: PacketId::from_u16(0),
            kind: PacketType::Packet,
            data: vec![1, 2, 3],
        }
        .build()
        .unwrap()
        .to_bytes();
        bytes.push(4);
        assert_eq!(
            Packet::from_bytes(&bytes).unwrap_err(),
            DecodingError::Decoding { field: "size" }
        );
        assert_eq!(
            Packet::from_bytes(&bytes[..6]).unwrap_err(),
            DecodingError::Decoding { field: "size" }
        );

        bytes[4] = 9;
        assert_eq!(
            Packet::from_bytes(&bytes).unwrap_err(),
            DecodingError::Decoding { field: "type" }
        );
    }
}
