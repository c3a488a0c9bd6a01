//! Registered advertisements, the periodic announcement timer and the query responder.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{ServiceInner, ServiceState};
use crate::dns::{Advertisement, DnsType, Packet, Question};
use crate::transport::MulticastTransport;

/// Request to advertise a local service. Unset fields are filled from the
/// service's host name, local address and configured TTL.
#[derive(Debug, Clone)]
pub struct ServiceRegistration {
    pub service_type: String,
    pub instance_name: String,
    pub port: u16,
    pub host_name: Option<String>,
    pub ttl: Option<u32>,
    pub txt_records: Vec<(String, String)>,
}

impl ServiceRegistration {
    pub fn new(service_type: &str, instance_name: &str, port: u16) -> Self {
        Self {
            service_type: service_type.to_owned(),
            instance_name: instance_name.to_owned(),
            port,
            host_name: None,
            ttl: None,
            txt_records: Vec::new(),
        }
    }

    pub fn with_host_name(mut self, host_name: &str) -> Self {
        self.host_name = Some(host_name.to_owned());
        self
    }

    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn with_txt(mut self, key: &str, value: &str) -> Self {
        self.txt_records.push((key.to_owned(), value.to_owned()));
        self
    }
}

fn normalize(name: &str) -> String {
    name.trim_end_matches('.').to_lowercase()
}

/// Ordered list of advertisements. Identical registrations are kept side by side.
#[derive(Debug, Default)]
pub(crate) struct AdvertisementRegistry {
    entries: Vec<Advertisement>,
}

impl AdvertisementRegistry {
    pub fn push(&mut self, ad: Advertisement) {
        self.entries.push(ad);
    }

    /// Remove every entry with the given type and instance name.
    pub fn remove(&mut self, service_type: &str, service_name: &str) -> Vec<Advertisement> {
        let service_type = normalize(service_type);
        let (removed, kept) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|ad| {
                normalize(&ad.service_type) == service_type && ad.service_name == service_name
            });
        self.entries = kept;
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &Advertisement> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Advertisements answering a question by service type, instance or host name.
    pub fn matching<'a>(&'a self, question: &'a Question) -> impl Iterator<Item = &'a Advertisement> {
        let qname = normalize(&question.name);
        self.entries.iter().filter(move |ad| {
            let name_matches = qname == normalize(&ad.service_type)
                || qname == normalize(&ad.instance_name())
                || qname == normalize(&ad.host_name);
            name_matches
                && (question.qtype == DnsType::ANY || ad.record_types().contains(&question.qtype))
        })
    }
}

async fn send_all<'a>(
    transport: &MulticastTransport,
    ads: impl Iterator<Item = &'a Advertisement>,
) -> usize {
    let mut sent = 0;
    for ad in ads {
        let bytes = match ad.to_bytes() {
            Ok(b) => b,
            Err(e) => {
                log::warn!("can't encode advertisement {}: {}", ad.instance_name(), e);
                continue;
            }
        };
        match transport.send(&bytes).await {
            Ok(()) => sent += 1,
            Err(e) => log::warn!("failed to send advertisement {}: {}", ad.instance_name(), e),
        }
    }
    sent
}

/// Send every registered advertisement if the service is running.
/// The lock is held while sending so stop can't close the socket underneath.
pub(crate) async fn announce_all(inner: &Mutex<ServiceInner>) -> usize {
    let inner = inner.lock().await;
    if inner.state != ServiceState::Running {
        return 0;
    }
    let Some(transport) = inner.transport.as_ref() else {
        return 0;
    };
    let sent = send_all(transport, inner.registry.iter()).await;
    log::debug!("announced {} of {} advertisements", sent, inner.registry.len());
    sent
}

/// Multicast the advertisements matching any question of `query`.
pub(crate) async fn answer_query(inner: &Mutex<ServiceInner>, query: &Packet) {
    let inner = inner.lock().await;
    if inner.state != ServiceState::Running {
        return;
    }
    let Some(transport) = inner.transport.as_ref() else {
        return;
    };
    let mut matched: Vec<&Advertisement> = Vec::new();
    for question in &query.questions {
        for ad in inner.registry.matching(question) {
            if !matched.iter().any(|m| std::ptr::eq(*m, ad)) {
                matched.push(ad);
            }
        }
    }
    if matched.is_empty() {
        return;
    }
    log::debug!("answering query with {} advertisements", matched.len());
    send_all(transport, matched.into_iter()).await;
}

/// Periodic re-announcement. First tick after `delay`, then every `interval`,
/// until `cancel` fires.
pub(crate) async fn announce_loop(
    inner: Arc<Mutex<ServiceInner>>,
    delay: std::time::Duration,
    interval: std::time::Duration,
    cancel: CancellationToken,
) {
    let start = tokio::time::Instant::now() + delay;
    let mut ticker = tokio::time::interval_at(start, interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = cancel.cancelled() => break,
        }
        announce_all(&inner).await;
    }
    log::debug!("announcement timer disarmed");
}
