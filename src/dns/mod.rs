//! DNS wire format: header, names, questions, resource records and whole messages.
//!
//! Encoders never emit compression pointers; decoders follow them (bounded by
//! [MAX_POINTER_HOPS](name::MAX_POINTER_HOPS)).

mod advertisement;
mod header;
mod name;
mod record;

pub use advertisement::Advertisement;
pub use header::{Direction, Header, OpCode, HEADER_LEN};
pub use name::{decode_name, encode_name, name_to_bytes, MAX_LABEL_LEN, MAX_NAME_LEN, MAX_POINTER_HOPS};
pub use record::{DnsClass, DnsType, Question, RData, ResourceRecord};

use std::io::Cursor;
use std::ops::Range;

use crate::error::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Question,
    Answer,
    Authority,
    Additional,
    /// bytes after the last declared section
    Trailing,
}

/// Question or record which could not be decoded. Decoding stopped at it.
#[derive(Debug)]
pub struct SkippedRecord {
    pub section: Section,
    pub index: usize,
    /// bytes from the start of the entry to the end of the message
    pub range: Range<usize>,
    pub error: FormatError,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Packet {
    /// header as declared on the wire; counts are recomputed by [Packet::encode]
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<ResourceRecord>,
    pub authorities: Vec<ResourceRecord>,
    pub additionals: Vec<ResourceRecord>,
}

impl Packet {
    /// One-question query with id 0 and all flags clear.
    pub fn query(name: &str, qtype: DnsType) -> Self {
        Self {
            questions: vec![Question::new(name, qtype)],
            ..Default::default()
        }
    }

    pub fn response(answers: Vec<ResourceRecord>, additionals: Vec<ResourceRecord>) -> Self {
        Self {
            header: Header::response(),
            answers,
            additionals,
            ..Default::default()
        }
    }

    pub fn is_response(&self) -> bool {
        self.header.is_response()
    }

    fn count(len: usize) -> Result<u16, FormatError> {
        u16::try_from(len).map_err(|_| FormatError::DataTooLong(len))
    }

    /// Encode the message. Section counts in the header always match the
    /// sections written.
    pub fn encode(&self) -> Result<Vec<u8>, FormatError> {
        let header = Header {
            qd_count: Self::count(self.questions.len())?,
            an_count: Self::count(self.answers.len())?,
            ns_count: Self::count(self.authorities.len())?,
            ar_count: Self::count(self.additionals.len())?,
            ..self.header
        };
        let mut out = Vec::with_capacity(512);
        header.encode(&mut out)?;
        for q in &self.questions {
            q.encode(&mut out)?;
        }
        for rr in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            rr.encode(&mut out)?;
        }
        Ok(out)
    }

    /// Decode a whole message; any malformed entry fails the decode.
    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        let (packet, skipped) = Self::decode_partial(data)?;
        match skipped {
            Some(s) => Err(s.error),
            None => Ok(packet),
        }
    }

    /// Decode as much of a message as possible.
    ///
    /// A bad header is an error. The first question or record that fails to decode
    /// is returned as [SkippedRecord] together with everything decoded before it;
    /// the rest of the message is abandoned since the cursor position after a
    /// malformed entry is unknown. Bytes left over after the declared sections are
    /// reported as a [Section::Trailing] skip.
    pub fn decode_partial(data: &[u8]) -> Result<(Self, Option<SkippedRecord>), FormatError> {
        if data.len() < HEADER_LEN {
            return Err(FormatError::TooShort(data.len()));
        }
        let header = Header::decode(&data[..HEADER_LEN])?;
        let mut packet = Packet {
            header,
            ..Default::default()
        };
        let mut cursor = Cursor::new(data);
        cursor.set_position(HEADER_LEN as u64);

        for index in 0..header.qd_count as usize {
            let start = cursor.position() as usize;
            match Question::decode(data, &mut cursor) {
                Ok(q) => {
                    log::trace!("question {:?}", q);
                    packet.questions.push(q);
                }
                Err(error) => {
                    let skipped = SkippedRecord {
                        section: Section::Question,
                        index,
                        range: start..data.len(),
                        error,
                    };
                    return Ok((packet, Some(skipped)));
                }
            }
        }

        let sections = [
            (Section::Answer, header.an_count),
            (Section::Authority, header.ns_count),
            (Section::Additional, header.ar_count),
        ];
        for (section, count) in sections {
            for index in 0..count as usize {
                let start = cursor.position() as usize;
                let rr = match ResourceRecord::decode(data, &mut cursor) {
                    Ok(rr) => rr,
                    Err(error) => {
                        let skipped = SkippedRecord {
                            section,
                            index,
                            range: start..data.len(),
                            error,
                        };
                        return Ok((packet, Some(skipped)));
                    }
                };
                log::trace!("{:?} record {:?}", section, rr);
                match section {
                    Section::Answer => packet.answers.push(rr),
                    Section::Authority => packet.authorities.push(rr),
                    _ => packet.additionals.push(rr),
                }
            }
        }
        let consumed = cursor.position() as usize;
        if consumed < data.len() {
            // declared counts must cover the whole message
            let skipped = SkippedRecord {
                section: Section::Trailing,
                index: 0,
                range: consumed..data.len(),
                error: FormatError::TrailingData(data.len() - consumed),
            };
            return Ok((packet, Some(skipped)));
        }
        Ok((packet, None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn query_bytes() {
        let q = Packet::query("test.local", DnsType::PTR).encode().unwrap();
        assert_eq!(
            q,
            hex::decode("0000000000010000000000000474657374056c6f63616c00000c0001").unwrap()
        );
    }

    #[test]
    fn decode_response_with_compression() {
        // header, question _airplay._tcp.local PTR, answer with name pointing to offset 12
        let mut msg = hex::decode("000084000001000100000000").unwrap();
        msg.extend_from_slice(&name_to_bytes("_airplay._tcp.local").unwrap());
        msg.extend_from_slice(&[0x00, 0x0c, 0x00, 0x01]);
        msg.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x0c, 0x80, 0x01, 0, 0, 0x11, 0x94, 0x00, 0x07]);
        msg.extend_from_slice(&[0x04, b'b', b'e', b'd', b'1', 0xc0, 0x0c]);

        let packet = Packet::decode(&msg).unwrap();
        assert!(packet.is_response());
        assert_eq!(packet.questions[0].name, "_airplay._tcp.local");
        let answer = &packet.answers[0];
        assert_eq!(answer.name, "_airplay._tcp.local");
        assert_eq!(answer.rtype, DnsType::PTR);
        assert!(answer.cache_flush);
        assert_eq!(answer.ttl, 4500);
        assert_eq!(
            answer.parse_data(&msg).unwrap(),
            RData::Name("bed1._airplay._tcp.local".to_owned())
        );
    }

    #[test]
    fn second_answer_truncated_keeps_first() {
        let first = ResourceRecord::a("one.local", Ipv4Addr::new(10, 0, 0, 1), 120);
        let second = ResourceRecord::a("two.local", Ipv4Addr::new(10, 0, 0, 2), 120);
        let mut msg = Packet::response(vec![first.clone(), second], vec![])
            .encode()
            .unwrap();
        let second_start = HEADER_LEN + {
            let mut v = Vec::new();
            first.encode(&mut v).unwrap();
            v.len()
        };
        // cut two bytes off the second record's payload
        msg.truncate(msg.len() - 2);

        let (packet, skipped) = Packet::decode_partial(&msg).unwrap();
        assert_eq!(packet.answers, vec![first]);
        let skipped = skipped.unwrap();
        assert_eq!(skipped.section, Section::Answer);
        assert_eq!(skipped.index, 1);
        assert_eq!(skipped.range, second_start..msg.len());
        assert!(matches!(skipped.error, FormatError::Truncated));

        assert!(Packet::decode(&msg).is_err());
    }

    #[test]
    fn declared_counts_beyond_data() {
        let mut msg = Packet::query("a.local", DnsType::A).encode().unwrap();
        msg[5] = 2;
        let (packet, skipped) = Packet::decode_partial(&msg).unwrap();
        assert_eq!(packet.questions.len(), 1);
        assert_eq!(skipped.unwrap().section, Section::Question);
    }

    #[test]
    fn bytes_after_declared_sections_fail_strict_decode() {
        let mut msg = Packet::query("a.local", DnsType::A).encode().unwrap();
        let end = msg.len();
        msg.extend_from_slice(&[0xde, 0xad]);
        let (packet, skipped) = Packet::decode_partial(&msg).unwrap();
        assert_eq!(packet.questions.len(), 1);
        let skipped = skipped.unwrap();
        assert_eq!(skipped.section, Section::Trailing);
        assert_eq!(skipped.range, end..end + 2);
        assert!(matches!(skipped.error, FormatError::TrailingData(2)));
        assert!(matches!(Packet::decode(&msg), Err(FormatError::TrailingData(2))));
    }

    #[test]
    fn too_short_message() {
        assert!(matches!(
            Packet::decode_partial(&[0; 5]),
            Err(FormatError::TooShort(5))
        ));
    }

    #[test]
    fn encode_recomputes_counts() {
        let mut packet = Packet::response(
            vec![ResourceRecord::a("h.local", Ipv4Addr::LOCALHOST, 1)],
            vec![],
        );
        packet.header.an_count = 7;
        packet.header.ar_count = 3;
        let bytes = packet.encode().unwrap();
        assert_eq!(&bytes[4..12], &[0, 0, 0, 1, 0, 0, 0, 0]);
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded.answers, packet.answers);
        assert_eq!(decoded.header.an_count, 1);
    }
}
