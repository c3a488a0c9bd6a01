use std::io::Cursor;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::FormatError;

pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Direction {
    #[default]
    Query,
    Response,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpCode {
    #[default]
    Query,
    InverseQuery,
    Status,
    Notify,
    Update,
    Other(u8),
}

impl From<u8> for OpCode {
    fn from(value: u8) -> Self {
        match value & 0x0f {
            0 => OpCode::Query,
            1 => OpCode::InverseQuery,
            2 => OpCode::Status,
            4 => OpCode::Notify,
            5 => OpCode::Update,
            v => OpCode::Other(v),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(value: OpCode) -> Self {
        match value {
            OpCode::Query => 0,
            OpCode::InverseQuery => 1,
            OpCode::Status => 2,
            OpCode::Notify => 4,
            OpCode::Update => 5,
            OpCode::Other(v) => v & 0x0f,
        }
    }
}

/// Fixed 12 byte message header.
///
/// Byte 2 holds `QR|OPCODE(4)|AA|TC|RD`, byte 3 holds `RA|Z|AD|CD|RCODE(4)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Header {
    pub id: u16,
    pub direction: Direction,
    pub opcode: OpCode,
    pub authoritative: bool,
    pub truncated: bool,
    pub recursion_desired: bool,
    pub recursion_available: bool,
    /// reserved bit, kept only so that arbitrary headers round-trip
    pub zero: bool,
    pub authenticated_data: bool,
    pub checking_disabled: bool,
    pub rcode: u8,
    pub qd_count: u16,
    pub an_count: u16,
    pub ns_count: u16,
    pub ar_count: u16,
}

impl Header {
    const QR: u8 = 0x80;
    const AA: u8 = 0x04;
    const TC: u8 = 0x02;
    const RD: u8 = 0x01;
    const RA: u8 = 0x80;
    const Z: u8 = 0x40;
    const AD: u8 = 0x20;
    const CD: u8 = 0x10;

    /// Header of an unsolicited authoritative mDNS response.
    pub fn response() -> Self {
        Self {
            direction: Direction::Response,
            authoritative: true,
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.direction == Direction::Response
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        let mut b2 = (u8::from(self.opcode) & 0x0f) << 3;
        if self.direction == Direction::Response {
            b2 |= Self::QR;
        }
        if self.authoritative {
            b2 |= Self::AA;
        }
        if self.truncated {
            b2 |= Self::TC;
        }
        if self.recursion_desired {
            b2 |= Self::RD;
        }
        let mut b3 = self.rcode & 0x0f;
        if self.recursion_available {
            b3 |= Self::RA;
        }
        if self.zero {
            b3 |= Self::Z;
        }
        if self.authenticated_data {
            b3 |= Self::AD;
        }
        if self.checking_disabled {
            b3 |= Self::CD;
        }
        out.write_u16::<BigEndian>(self.id)?;
        out.write_u8(b2)?;
        out.write_u8(b3)?;
        out.write_u16::<BigEndian>(self.qd_count)?;
        out.write_u16::<BigEndian>(self.an_count)?;
        out.write_u16::<BigEndian>(self.ns_count)?;
        out.write_u16::<BigEndian>(self.ar_count)?;
        Ok(())
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let mut out = Vec::with_capacity(HEADER_LEN);
        self.encode(&mut out)?;
        Ok(out)
    }

    /// Decode a header from exactly 12 bytes.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        if data.len() != HEADER_LEN {
            return Err(FormatError::HeaderLength(data.len()));
        }
        let mut cursor = Cursor::new(data);
        let id = cursor.read_u16::<BigEndian>()?;
        let b2 = cursor.read_u8()?;
        let b3 = cursor.read_u8()?;
        Ok(Self {
            id,
            direction: if b2 & Self::QR != 0 {
                Direction::Response
            } else {
                Direction::Query
            },
            opcode: OpCode::from((b2 >> 3) & 0x0f),
            authoritative: b2 & Self::AA != 0,
            truncated: b2 & Self::TC != 0,
            recursion_desired: b2 & Self::RD != 0,
            recursion_available: b3 & Self::RA != 0,
            zero: b3 & Self::Z != 0,
            authenticated_data: b3 & Self::AD != 0,
            checking_disabled: b3 & Self::CD != 0,
            rcode: b3 & 0x0f,
            qd_count: cursor.read_u16::<BigEndian>()?,
            an_count: cursor.read_u16::<BigEndian>()?,
            ns_count: cursor.read_u16::<BigEndian>()?,
            ar_count: cursor.read_u16::<BigEndian>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_standard_query() {
        let data = hex::decode("123401000001000000000000").unwrap();
        let h = Header::decode(&data).unwrap();
        assert_eq!(h.id, 0x1234);
        assert_eq!(h.direction, Direction::Query);
        assert_eq!(h.opcode, OpCode::Query);
        assert!(!h.authoritative);
        assert!(!h.truncated);
        assert!(h.recursion_desired);
        assert!(!h.recursion_available);
        assert!(!h.authenticated_data);
        assert!(!h.checking_disabled);
        assert_eq!(h.rcode, 0);
        assert_eq!(h.qd_count, 1);
        assert_eq!(h.an_count, 0);
        assert_eq!(h.ns_count, 0);
        assert_eq!(h.ar_count, 0);
        assert_eq!(h.to_bytes().unwrap(), data);
    }

    #[test]
    fn flag_bit_positions() {
        let h = Header {
            direction: Direction::Response,
            opcode: OpCode::Update,
            authoritative: true,
            truncated: true,
            recursion_desired: true,
            recursion_available: true,
            authenticated_data: true,
            checking_disabled: true,
            rcode: 3,
            ..Default::default()
        };
        let bytes = h.to_bytes().unwrap();
        assert_eq!(bytes[2], 0x80 | (5 << 3) | 0x04 | 0x02 | 0x01);
        assert_eq!(bytes[3], 0x80 | 0x20 | 0x10 | 3);
        assert_eq!(Header::decode(&bytes).unwrap(), h);
    }

    #[test]
    fn arbitrary_headers_round_trip() {
        for seed in 0u32..512 {
            let mut bytes = Vec::with_capacity(HEADER_LEN);
            for i in 0..HEADER_LEN as u32 {
                bytes.push((seed.wrapping_mul(2654435761).rotate_left(i * 3) >> 7) as u8);
            }
            let h = Header::decode(&bytes).unwrap();
            assert_eq!(h.to_bytes().unwrap(), bytes);
        }
    }

    #[test]
    fn reject_wrong_length() {
        assert!(matches!(
            Header::decode(&[0; 11]),
            Err(FormatError::HeaderLength(11))
        ));
        assert!(matches!(
            Header::decode(&[0; 13]),
            Err(FormatError::HeaderLength(13))
        ));
    }

    #[test]
    fn response_defaults() {
        let bytes = Header::response().to_bytes().unwrap();
        assert_eq!(bytes, hex::decode("000084000000000000000000").unwrap());
    }
}
