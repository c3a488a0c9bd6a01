//! Multicast DNS service library
//!
//! Advertises local services on the link and reports every mDNS query and response
//! seen on the network. Library uses asynchronous Rust and depends on Tokio.
//! Following are main parts of api:
//! - [dns](dns) - DNS wire format. Header, name (with compression pointers), question and
//!                resource record codecs, plus [Advertisement](dns::Advertisement) packet builder.
//! - [MulticastTransport](transport::MulticastTransport) - UDP socket joined to the mDNS group.
//! - [MdnsService](service::MdnsService) - runs the receive loop and periodic announcements,
//!                              answers queries for registered services and publishes
//!                              [MdnsEvent](service::MdnsEvent) notifications to subscribers.
//! - [MdnsConfig](config::MdnsConfig) - settings, loadable from a json file.
//!
//! Demos directory contains an advertiser and a browser.
//!
//! Example how to advertise a service and print queries seen on the network:
//! ```no_run
//! # use anyhow::Result;
//! # use std::sync::Arc;
//! # use lanmdns::{MdnsConfig, MdnsEvent, MdnsService, ServiceRegistration};
//! # use tokio_util::sync::CancellationToken;
//! # #[tokio::main]
//! # async fn main() -> Result<()> {
//! let service = Arc::new(MdnsService::new(MdnsConfig::default()));
//! service.advertise(ServiceRegistration::new("_http._tcp.local.", "My Service", 8080)).await?;
//! let mut events = service.subscribe();
//! let cancel = CancellationToken::new();
//! let runner = service.clone();
//! let c = cancel.clone();
//! tokio::spawn(async move { runner.start(&c).await });
//! while let Some(event) = events.recv().await {
//!     if let MdnsEvent::QueryReceived(datagram, packet) = event {
//!         println!("{} asks {:?}", datagram.remote, packet.questions);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dns;
pub mod error;
pub mod service;
pub mod transport;

pub use config::MdnsConfig;
pub use error::{Error, FormatError, Result};
pub use service::{Datagram, MdnsEvent, MdnsService, ServiceRegistration, ServiceState};
pub use transport::MulticastTransport;
