//! Receive loop: decode incoming datagrams and publish them to subscribers.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::{registry, ServiceInner, ServiceState};
use crate::config::MdnsConfig;
use crate::dns::{Direction, Packet, HEADER_LEN};
use crate::error::{Error, Result};
use crate::transport::MulticastTransport;

/// Raw datagram as received.
#[derive(Debug)]
pub struct Datagram {
    pub data: Vec<u8>,
    pub remote: SocketAddr,
}

/// Notifications published for every received datagram.
///
/// For one datagram the order is always `DataReceived`, `PacketReceiving`,
/// then `QueryReceived` or `ResponseReceived`, then `PacketReceived`. Datagrams
/// which fail to decode only produce `DataReceived`.
#[derive(Debug, Clone)]
pub enum MdnsEvent {
    DataReceived(Arc<Datagram>),
    PacketReceiving(Arc<Datagram>, Arc<Packet>),
    QueryReceived(Arc<Datagram>, Arc<Packet>),
    ResponseReceived(Arc<Datagram>, Arc<Packet>),
    PacketReceived(Arc<Datagram>, Arc<Packet>),
}

impl MdnsEvent {
    pub fn datagram(&self) -> &Arc<Datagram> {
        match self {
            MdnsEvent::DataReceived(d)
            | MdnsEvent::PacketReceiving(d, _)
            | MdnsEvent::QueryReceived(d, _)
            | MdnsEvent::ResponseReceived(d, _)
            | MdnsEvent::PacketReceived(d, _) => d,
        }
    }

    pub fn packet(&self) -> Option<&Arc<Packet>> {
        match self {
            MdnsEvent::DataReceived(_) => None,
            MdnsEvent::PacketReceiving(_, p)
            | MdnsEvent::QueryReceived(_, p)
            | MdnsEvent::ResponseReceived(_, p)
            | MdnsEvent::PacketReceived(_, p) => Some(p),
        }
    }
}

/// Fan-out of events to any number of channel subscribers.
#[derive(Clone, Default)]
pub(crate) struct EventBus {
    subscribers: Arc<StdMutex<Vec<UnboundedSender<MdnsEvent>>>>,
}

impl EventBus {
    /// The list stays usable after a panic while it was locked; it only holds senders.
    fn senders(&self) -> MutexGuard<'_, Vec<UnboundedSender<MdnsEvent>>> {
        self.subscribers.lock().unwrap_or_else(|poisoned| {
            log::warn!("event subscriber list was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn subscribe(&self) -> UnboundedReceiver<MdnsEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders().push(tx);
        rx
    }

    pub fn publish(&self, event: MdnsEvent) {
        // closed receivers drop out here
        self.senders().retain(|tx| tx.send(event.clone()).is_ok());
    }
}

/// Decode a datagram, tolerating a malformed trailing part.
pub(crate) fn decode_datagram(datagram: &Datagram) -> Option<Packet> {
    let data = &datagram.data;
    if data.len() < HEADER_LEN {
        log::warn!(
            "discarding {} byte datagram from {}: shorter than a dns header",
            data.len(),
            datagram.remote
        );
        return None;
    }
    match Packet::decode_partial(data) {
        Ok((packet, None)) => Some(packet),
        Ok((packet, Some(skipped))) => {
            log::warn!(
                "skipping malformed {:?} #{} from {} at bytes {}..{}: {} [{}]",
                skipped.section,
                skipped.index,
                datagram.remote,
                skipped.range.start,
                skipped.range.end,
                skipped.error,
                hex::encode(&data[skipped.range.clone()])
            );
            Some(packet)
        }
        Err(e) => {
            log::warn!("discarding datagram from {}: {}", datagram.remote, e);
            None
        }
    }
}

/// Publish the notifications for one datagram and return the decoded packet.
pub(crate) fn dispatch(events: &EventBus, data: Vec<u8>, remote: SocketAddr) -> Option<Arc<Packet>> {
    let datagram = Arc::new(Datagram { data, remote });
    events.publish(MdnsEvent::DataReceived(datagram.clone()));

    let packet = Arc::new(decode_datagram(&datagram)?);
    events.publish(MdnsEvent::PacketReceiving(datagram.clone(), packet.clone()));
    match packet.header.direction {
        Direction::Query => {
            log::debug!("query from {}: {:?}", remote, packet.questions);
            events.publish(MdnsEvent::QueryReceived(datagram.clone(), packet.clone()));
        }
        Direction::Response => {
            log::debug!("response from {} with {} answers", remote, packet.answers.len());
            events.publish(MdnsEvent::ResponseReceived(datagram.clone(), packet.clone()));
        }
    }
    events.publish(MdnsEvent::PacketReceived(datagram, packet.clone()));
    Some(packet)
}

async fn is_running(inner: &Mutex<ServiceInner>) -> bool {
    inner.lock().await.state == ServiceState::Running
}

/// Runs until `cancel` fires or the service leaves the Running state.
/// Any receive failure other than cancellation ends the loop with that error.
pub(crate) async fn receive_loop(
    transport: Arc<MulticastTransport>,
    inner: Arc<Mutex<ServiceInner>>,
    events: EventBus,
    config: MdnsConfig,
    cancel: CancellationToken,
) -> Result<()> {
    log::info!("listening for mdns queries and responses on {:?}", transport.local_addr());
    let mut buf = vec![0u8; config.max_datagram_size];
    while !cancel.is_cancelled() && is_running(&inner).await {
        let (n, remote) = match transport.receive(&mut buf, &cancel).await {
            Ok(v) => v,
            Err(Error::Cancelled) => break,
            Err(e) => {
                log::error!("mdns receive failed: {}", e);
                return Err(e);
            }
        };
        log::debug!("received {} bytes from {}", n, remote);

        let packet = match dispatch(&events, buf[..n].to_vec(), remote) {
            Some(p) => p,
            None => continue,
        };
        if config.respond_to_queries && !packet.is_response() {
            registry::answer_query(&inner, &packet).await;
        }
    }
    log::info!("mdns receive loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Advertisement, DnsType, ResourceRecord};
    use std::net::Ipv4Addr;

    fn remote() -> SocketAddr {
        "192.168.1.50:5353".parse().unwrap()
    }

    fn drain(rx: &mut UnboundedReceiver<MdnsEvent>) -> Vec<MdnsEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    fn kinds(events: &[MdnsEvent]) -> Vec<&'static str> {
        events
            .iter()
            .map(|e| match e {
                MdnsEvent::DataReceived(_) => "data",
                MdnsEvent::PacketReceiving(..) => "receiving",
                MdnsEvent::QueryReceived(..) => "query",
                MdnsEvent::ResponseReceived(..) => "response",
                MdnsEvent::PacketReceived(..) => "received",
            })
            .collect()
    }

    #[test]
    fn query_notification_order() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let query = Packet::query("_http._tcp.local.", DnsType::PTR).encode().unwrap();
        let packet = dispatch(&bus, query, remote()).unwrap();
        assert!(!packet.is_response());
        let events = drain(&mut rx);
        assert_eq!(kinds(&events), vec!["data", "receiving", "query", "received"]);
        assert!(events.iter().all(|e| e.datagram().remote == remote()));
        assert_eq!(events[2].packet().unwrap().questions[0].name, "_http._tcp.local");
    }

    #[test]
    fn response_notification_order() {
        let bus = EventBus::default();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let ad = Advertisement::new("_http._tcp.local.", "x", "h.local", Ipv4Addr::LOCALHOST, 80);
        dispatch(&bus, ad.to_bytes().unwrap(), remote()).unwrap();
        let expected = vec!["data", "receiving", "response", "received"];
        assert_eq!(kinds(&drain(&mut first)), expected);
        assert_eq!(kinds(&drain(&mut second)), expected);
    }

    #[test]
    fn short_datagram_only_raises_data() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        assert!(dispatch(&bus, vec![0; 7], remote()).is_none());
        assert_eq!(kinds(&drain(&mut rx)), vec!["data"]);
    }

    #[test]
    fn malformed_second_answer_is_isolated() {
        let first = ResourceRecord::a("one.local", Ipv4Addr::new(10, 0, 0, 1), 120);
        let second = ResourceRecord::a("two.local", Ipv4Addr::new(10, 0, 0, 2), 120);
        let mut data = Packet::response(vec![first.clone(), second], vec![])
            .encode()
            .unwrap();
        data.truncate(data.len() - 3);

        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let packet = dispatch(&bus, data, remote()).unwrap();
        assert_eq!(packet.answers, vec![first]);
        assert_eq!(packet.header.an_count, 2);
        assert_eq!(
            kinds(&drain(&mut rx)),
            vec!["data", "receiving", "response", "received"]
        );
    }

    #[test]
    fn poisoned_subscriber_list_keeps_working() {
        let bus = EventBus::default();
        let mut before = bus.subscribe();
        let subs = bus.subscribers.clone();
        let _ = std::thread::spawn(move || {
            let _held = subs.lock().unwrap();
            panic!("panic while holding the subscriber list");
        })
        .join();
        assert!(bus.subscribers.is_poisoned());

        let mut after = bus.subscribe();
        dispatch(&bus, vec![0; 3], remote());
        assert_eq!(kinds(&drain(&mut before)), vec!["data"]);
        assert_eq!(kinds(&drain(&mut after)), vec!["data"]);
    }

    #[test]
    fn understated_counts_still_dispatch_with_decoded_records() {
        let ad = Advertisement::new("_http._tcp.local.", "x", "h.local", Ipv4Addr::LOCALHOST, 80);
        let mut data = ad.to_bytes().unwrap();
        data[11] = 0;

        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let packet = dispatch(&bus, data, remote()).unwrap();
        assert_eq!(packet.answers.len(), 2);
        assert!(packet.additionals.is_empty());
        assert_eq!(
            kinds(&drain(&mut rx)),
            vec!["data", "receiving", "response", "received"]
        );
    }

    #[test]
    fn closed_subscribers_are_dropped() {
        let bus = EventBus::default();
        let rx = bus.subscribe();
        drop(rx);
        let mut live = bus.subscribe();
        dispatch(&bus, vec![0; 3], remote());
        assert_eq!(drain(&mut live).len(), 1);
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
    }
}
