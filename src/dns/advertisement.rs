use std::net::Ipv4Addr;

use super::{DnsType, Packet, ResourceRecord};
use crate::error::FormatError;

pub const DEFAULT_TTL: u32 = 120;

/// A locally registered service, broadcast as PTR + SRV (+ TXT) answers with
/// the host A record as additional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// e.g. `_http._tcp.local.`
    pub service_type: String,
    /// instance label, e.g. `My Service`
    pub service_name: String,
    pub host_name: String,
    pub address: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    pub txt_records: Vec<(String, String)>,
}

impl Advertisement {
    pub fn new(
        service_type: &str,
        service_name: &str,
        host_name: &str,
        address: Ipv4Addr,
        port: u16,
    ) -> Self {
        Self {
            service_type: service_type.to_owned(),
            service_name: service_name.to_owned(),
            host_name: host_name.to_owned(),
            address,
            port,
            ttl: DEFAULT_TTL,
            txt_records: Vec::new(),
        }
    }

    /// `instance.service type`, keeping the service type's trailing dot if any
    pub fn instance_name(&self) -> String {
        format!("{}.{}", self.service_name, self.service_type)
    }

    fn records(&self, ttl: u32) -> Result<(Vec<ResourceRecord>, Vec<ResourceRecord>), FormatError> {
        let instance = self.instance_name();
        let mut answers = vec![
            ResourceRecord::ptr(&self.service_type, &instance, ttl)?,
            ResourceRecord::srv(&instance, 0, 0, self.port, &self.host_name, ttl)?,
        ];
        if !self.txt_records.is_empty() {
            answers.push(ResourceRecord::txt(&instance, &self.txt_records, ttl)?);
        }
        let additionals = vec![ResourceRecord::a(&self.host_name, self.address, ttl)];
        Ok((answers, additionals))
    }

    pub fn to_packet(&self) -> Result<Packet, FormatError> {
        let (answers, additionals) = self.records(self.ttl)?;
        Ok(Packet::response(answers, additionals))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, FormatError> {
        self.to_packet()?.encode()
    }

    /// Same records with TTL 0, telling listeners to drop them.
    pub fn goodbye_bytes(&self) -> Result<Vec<u8>, FormatError> {
        let (answers, additionals) = self.records(0)?;
        Packet::response(answers, additionals).encode()
    }

    /// Record types carried in the advertisement packet.
    pub fn record_types(&self) -> Vec<DnsType> {
        let mut types = vec![DnsType::PTR, DnsType::SRV, DnsType::A];
        if !self.txt_records.is_empty() {
            types.push(DnsType::TXT);
        }
        types
    }
}
