use std::fmt;
use std::io::{Cursor, Read};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::name::{decode_name, encode_name};
use crate::error::FormatError;

/// Resource record / question type. Unknown values are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsType {
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
    SRV,
    NAPTR,
    OPT,
    NSEC,
    TLSA,
    SPF,
    AXFR,
    IXFR,
    ANY,
    CAA,
    Unknown(u16),
}

impl From<u16> for DnsType {
    fn from(value: u16) -> Self {
        match value {
            1 => DnsType::A,
            2 => DnsType::NS,
            5 => DnsType::CNAME,
            6 => DnsType::SOA,
            12 => DnsType::PTR,
            15 => DnsType::MX,
            16 => DnsType::TXT,
            28 => DnsType::AAAA,
            33 => DnsType::SRV,
            35 => DnsType::NAPTR,
            41 => DnsType::OPT,
            47 => DnsType::NSEC,
            52 => DnsType::TLSA,
            99 => DnsType::SPF,
            252 => DnsType::AXFR,
            253 => DnsType::IXFR,
            255 => DnsType::ANY,
            257 => DnsType::CAA,
            v => DnsType::Unknown(v),
        }
    }
}

impl From<DnsType> for u16 {
    fn from(value: DnsType) -> Self {
        match value {
            DnsType::A => 1,
            DnsType::NS => 2,
            DnsType::CNAME => 5,
            DnsType::SOA => 6,
            DnsType::PTR => 12,
            DnsType::MX => 15,
            DnsType::TXT => 16,
            DnsType::AAAA => 28,
            DnsType::SRV => 33,
            DnsType::NAPTR => 35,
            DnsType::OPT => 41,
            DnsType::NSEC => 47,
            DnsType::TLSA => 52,
            DnsType::SPF => 99,
            DnsType::AXFR => 252,
            DnsType::IXFR => 253,
            DnsType::ANY => 255,
            DnsType::CAA => 257,
            DnsType::Unknown(v) => v,
        }
    }
}

/// Record class without the mDNS top bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DnsClass {
    #[default]
    IN,
    CS,
    CH,
    HS,
    ANY,
    Other(u16),
}

impl From<u16> for DnsClass {
    fn from(value: u16) -> Self {
        match value {
            0x0001 => DnsClass::IN,
            0x0002 => DnsClass::CS,
            0x0003 => DnsClass::CH,
            0x0004 => DnsClass::HS,
            0x00ff => DnsClass::ANY,
            v => DnsClass::Other(v),
        }
    }
}

impl From<DnsClass> for u16 {
    fn from(value: DnsClass) -> Self {
        match value {
            DnsClass::IN => 0x0001,
            DnsClass::CS => 0x0002,
            DnsClass::CH => 0x0003,
            DnsClass::HS => 0x0004,
            DnsClass::ANY => 0x00ff,
            DnsClass::Other(v) => v,
        }
    }
}

impl fmt::Display for DnsClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsClass::IN => write!(f, "IN"),
            DnsClass::CS => write!(f, "CS"),
            DnsClass::CH => write!(f, "CH"),
            DnsClass::HS => write!(f, "HS"),
            DnsClass::ANY => write!(f, "ANY"),
            DnsClass::Other(v) => write!(f, "CLASS{}", v),
        }
    }
}

impl FromStr for DnsClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "IN" => Ok(DnsClass::IN),
            "CS" => Ok(DnsClass::CS),
            "CH" => Ok(DnsClass::CH),
            "HS" => Ok(DnsClass::HS),
            "ANY" => Ok(DnsClass::ANY),
            other => other
                .strip_prefix("CLASS")
                .and_then(|n| n.parse::<u16>().ok())
                .map(DnsClass::from)
                .ok_or_else(|| format!("unknown dns class {}", s)),
        }
    }
}

/// Top bit of the class field: unicast-response in questions, cache-flush in records.
const CLASS_TOP_BIT: u16 = 0x8000;

fn split_class(raw: u16) -> (DnsClass, bool) {
    (DnsClass::from(raw & !CLASS_TOP_BIT), raw & CLASS_TOP_BIT != 0)
}

fn join_class(class: DnsClass, top_bit: bool) -> u16 {
    let raw = u16::from(class);
    if top_bit {
        raw | CLASS_TOP_BIT
    } else {
        raw
    }
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor
        .get_ref()
        .len()
        .saturating_sub(cursor.position() as usize)
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Question {
    pub name: String,
    pub qtype: DnsType,
    pub qclass: DnsClass,
    pub unicast_response: bool,
}

impl Question {
    pub fn new(name: &str, qtype: DnsType) -> Self {
        Self {
            name: name.to_owned(),
            qtype,
            qclass: DnsClass::IN,
            unicast_response: false,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        encode_name(&self.name, out)?;
        out.write_u16::<BigEndian>(self.qtype.into())?;
        out.write_u16::<BigEndian>(join_class(self.qclass, self.unicast_response))?;
        Ok(())
    }

    pub fn decode<'a>(message: &'a [u8], cursor: &mut Cursor<&'a [u8]>) -> Result<Self, FormatError> {
        // smallest question: root name + type + class
        if remaining(cursor) < 5 {
            return Err(FormatError::Truncated);
        }
        let name = decode_name(message, cursor)?;
        let qtype = DnsType::from(cursor.read_u16::<BigEndian>()?);
        let (qclass, unicast_response) = split_class(cursor.read_u16::<BigEndian>()?);
        Ok(Self {
            name,
            qtype,
            qclass,
            unicast_response,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRecord {
    pub name: String,
    pub rtype: DnsType,
    pub class: DnsClass,
    pub cache_flush: bool,
    /// seconds
    pub ttl: u32,
    pub data: Vec<u8>,
}

impl ResourceRecord {
    pub fn new(name: &str, rtype: DnsType, ttl: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.to_owned(),
            rtype,
            class: DnsClass::IN,
            cache_flush: false,
            ttl,
            data,
        }
    }

    pub fn a(name: &str, address: Ipv4Addr, ttl: u32) -> Self {
        Self::new(name, DnsType::A, ttl, address.octets().to_vec())
    }

    pub fn ptr(name: &str, target: &str, ttl: u32) -> Result<Self, FormatError> {
        let mut data = Vec::new();
        encode_name(target, &mut data)?;
        Ok(Self::new(name, DnsType::PTR, ttl, data))
    }

    pub fn srv(
        name: &str,
        priority: u16,
        weight: u16,
        port: u16,
        target: &str,
        ttl: u32,
    ) -> Result<Self, FormatError> {
        let mut data = Vec::new();
        data.write_u16::<BigEndian>(priority)?;
        data.write_u16::<BigEndian>(weight)?;
        data.write_u16::<BigEndian>(port)?;
        encode_name(target, &mut data)?;
        Ok(Self::new(name, DnsType::SRV, ttl, data))
    }

    /// TXT record with one `key=value` string per attribute.
    pub fn txt(name: &str, attributes: &[(String, String)], ttl: u32) -> Result<Self, FormatError> {
        let mut data = Vec::new();
        for (k, v) in attributes {
            let entry = format!("{}={}", k, v);
            if entry.len() > 255 {
                return Err(FormatError::TxtTooLong(entry.len()));
            }
            data.write_u8(entry.len() as u8)?;
            data.extend_from_slice(entry.as_bytes());
        }
        if data.is_empty() {
            data.push(0);
        }
        Ok(Self::new(name, DnsType::TXT, ttl, data))
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<(), FormatError> {
        let len = u16::try_from(self.data.len()).map_err(|_| FormatError::DataTooLong(self.data.len()))?;
        encode_name(&self.name, out)?;
        out.write_u16::<BigEndian>(self.rtype.into())?;
        out.write_u16::<BigEndian>(join_class(self.class, self.cache_flush))?;
        out.write_u32::<BigEndian>(self.ttl)?;
        out.write_u16::<BigEndian>(len)?;
        out.extend_from_slice(&self.data);
        Ok(())
    }

    pub fn decode<'a>(message: &'a [u8], cursor: &mut Cursor<&'a [u8]>) -> Result<Self, FormatError> {
        let name = decode_name(message, cursor)?;
        let rtype = DnsType::from(cursor.read_u16::<BigEndian>()?);
        let (class, cache_flush) = split_class(cursor.read_u16::<BigEndian>()?);
        let ttl = cursor.read_u32::<BigEndian>()?;
        let dlen = cursor.read_u16::<BigEndian>()? as usize;
        if dlen > remaining(cursor) {
            return Err(FormatError::Truncated);
        }
        let mut data = vec![0; dlen];
        cursor.read_exact(&mut data)?;
        Ok(Self {
            name,
            rtype,
            class,
            cache_flush,
            ttl,
            data,
        })
    }

    /// Interpret the payload. `message` is the datagram the record came from,
    /// needed to resolve compressed names inside PTR and SRV payloads.
    pub fn parse_data(&self, message: &[u8]) -> Result<RData, FormatError> {
        RData::parse(self.rtype, &self.data, message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RData {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    /// PTR, CNAME and NS all carry a single name
    Name(String),
    Srv {
        priority: u16,
        weight: u16,
        port: u16,
        target: String,
    },
    Txt(Vec<String>),
    Other(Vec<u8>),
}

impl RData {
    pub fn parse(rtype: DnsType, data: &[u8], message: &[u8]) -> Result<Self, FormatError> {
        let mut cursor = Cursor::new(data);
        match rtype {
            DnsType::A => {
                let octets: [u8; 4] = data.try_into().map_err(|_| FormatError::Truncated)?;
                Ok(RData::A(Ipv4Addr::from(octets)))
            }
            DnsType::AAAA => {
                let octets: [u8; 16] = data.try_into().map_err(|_| FormatError::Truncated)?;
                Ok(RData::Aaaa(Ipv6Addr::from(octets)))
            }
            DnsType::PTR | DnsType::CNAME | DnsType::NS => {
                Ok(RData::Name(decode_name(message, &mut cursor)?))
            }
            DnsType::SRV => {
                let priority = cursor.read_u16::<BigEndian>()?;
                let weight = cursor.read_u16::<BigEndian>()?;
                let port = cursor.read_u16::<BigEndian>()?;
                let target = decode_name(message, &mut cursor)?;
                Ok(RData::Srv {
                    priority,
                    weight,
                    port,
                    target,
                })
            }
            DnsType::TXT => {
                let mut out = Vec::new();
                while remaining(&cursor) > 0 {
                    let len = cursor.read_u8()? as usize;
                    if len == 0 {
                        continue;
                    }
                    let mut entry = vec![0; len];
                    cursor.read_exact(&mut entry)?;
                    out.push(String::from_utf8(entry)?);
                }
                Ok(RData::Txt(out))
            }
            _ => Ok(RData::Other(data.to_vec())),
        }
    }
}
