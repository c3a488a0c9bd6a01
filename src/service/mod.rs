//! mDNS service: owns the transport, runs the receive loop and the announcement
//! timer, and publishes every received datagram to subscribers.
//!
//! ```no_run
//! # async fn run() -> lanmdns::Result<()> {
//! use lanmdns::{MdnsConfig, MdnsService, ServiceRegistration};
//! use tokio_util::sync::CancellationToken;
//!
//! let service = MdnsService::new(MdnsConfig::default());
//! service
//!     .advertise(ServiceRegistration::new("_http._tcp.local.", "My Service", 8080))
//!     .await?;
//! let cancel = CancellationToken::new();
//! service.start(&cancel).await?;
//! # Ok(())
//! # }
//! ```

mod dispatch;
mod registry;

pub use dispatch::{Datagram, MdnsEvent};
pub use registry::ServiceRegistration;

use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::MdnsConfig;
use crate::dns::{Advertisement, DnsType, Packet};
use crate::error::{Error, Result};
use crate::transport::MulticastTransport;
use dispatch::EventBus;
use registry::AdvertisementRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

pub(crate) struct ServiceInner {
    state: ServiceState,
    transport: Option<Arc<MulticastTransport>>,
    registry: AdvertisementRegistry,
    local_address: Ipv4Addr,
    host_name: String,
    timer: Option<CancellationToken>,
    run: Option<CancellationToken>,
    /// incremented on every successful start
    generation: u64,
}

/// Tear down the run identified by `generation` if it is still current.
fn reset_run(inner: &mut ServiceInner, generation: u64) {
    if inner.generation != generation || inner.state == ServiceState::Stopped {
        return;
    }
    if let Some(timer) = inner.timer.take() {
        timer.cancel();
    }
    if let Some(run) = inner.run.take() {
        run.cancel();
    }
    inner.transport = None;
    inner.state = ServiceState::Stopped;
    log::info!("mdns service stopped");
}

/// Resets the service if the future returned by [MdnsService::start] is dropped
/// before the receive loop finished.
struct RunGuard {
    inner: Arc<Mutex<ServiceInner>>,
    generation: u64,
    run: CancellationToken,
    armed: bool,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.run.cancel();
        if !self.armed {
            return;
        }
        let generation = self.generation;
        if let Ok(mut inner) = self.inner.try_lock() {
            reset_run(&mut inner, generation);
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let inner = self.inner.clone();
            handle.spawn(async move {
                reset_run(&mut *inner.lock().await, generation);
            });
        }
    }
}

fn default_host_name() -> String {
    match hostname::get() {
        Ok(name) => {
            let name = name.to_string_lossy();
            match name.split('.').next() {
                Some(label) if !label.is_empty() => format!("{}.local", label),
                _ => "localhost.local".to_owned(),
            }
        }
        Err(e) => {
            log::warn!("can't read system host name: {}", e);
            "localhost.local".to_owned()
        }
    }
}

fn default_local_address() -> Ipv4Addr {
    if let Ok(ifaces) = if_addrs::get_if_addrs() {
        for iface in ifaces {
            if let std::net::IpAddr::V4(ip) = iface.ip() {
                if !ip.is_loopback() {
                    return ip;
                }
            }
        }
    }
    log::warn!("no non-loopback ipv4 address found, advertising 127.0.0.1");
    Ipv4Addr::LOCALHOST
}

pub struct MdnsService {
    config: MdnsConfig,
    inner: Arc<Mutex<ServiceInner>>,
    events: EventBus,
}

impl MdnsService {
    pub fn new(config: MdnsConfig) -> Self {
        let host_name = config.host_name.clone().unwrap_or_else(default_host_name);
        let local_address = config.local_address.unwrap_or_else(default_local_address);
        log::debug!("mdns host {} at {}", host_name, local_address);
        let inner = ServiceInner {
            state: ServiceState::Stopped,
            transport: None,
            registry: AdvertisementRegistry::default(),
            local_address,
            host_name,
            timer: None,
            run: None,
            generation: 0,
        };
        Self {
            config,
            inner: Arc::new(Mutex::new(inner)),
            events: EventBus::default(),
        }
    }

    pub fn config(&self) -> &MdnsConfig {
        &self.config
    }

    /// New receiver for all notifications published from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<MdnsEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ServiceState {
        self.inner.lock().await.state
    }

    /// Bind, arm the timer and run the receive loop until `cancel` fires or
    /// [MdnsService::stop] is called.
    ///
    /// Fails with [Error::Transport] when the socket can't be bound and with
    /// [Error::InvalidState] when the service is already running. A receive
    /// failure ends the run and is returned here.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let (transport, run, generation) = self.bind_and_arm(cancel).await?;
        let mut guard = RunGuard {
            inner: self.inner.clone(),
            generation,
            run: run.clone(),
            armed: true,
        };
        let result = dispatch::receive_loop(
            transport,
            self.inner.clone(),
            self.events.clone(),
            self.config.clone(),
            run,
        )
        .await;
        reset_run(&mut *self.inner.lock().await, generation);
        guard.armed = false;
        result
    }

    async fn bind_and_arm(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(Arc<MulticastTransport>, CancellationToken, u64)> {
        let mut attempt = 0;
        loop {
            {
                let mut inner = self.inner.lock().await;
                let state = inner.state;
                match state {
                    ServiceState::Starting | ServiceState::Running => {
                        return Err(Error::InvalidState("service is already running"));
                    }
                    ServiceState::Stopping if attempt >= self.config.bind_retry_attempts => {
                        return Err(Error::InvalidState("previous run did not stop"));
                    }
                    ServiceState::Stopping => {
                        log::debug!("waiting for the previous run to release the socket");
                    }
                    ServiceState::Stopped => {
                        inner.state = ServiceState::Starting;
                        match MulticastTransport::bind(&self.config) {
                            Ok(transport) => {
                                let transport = Arc::new(transport);
                                let run = cancel.child_token();
                                let timer = run.child_token();
                                inner.generation += 1;
                                inner.state = ServiceState::Running;
                                inner.transport = Some(transport.clone());
                                inner.run = Some(run.clone());
                                inner.timer = Some(timer.clone());
                                tokio::spawn(registry::announce_loop(
                                    self.inner.clone(),
                                    self.config.announce_delay(),
                                    self.config.announce_interval(),
                                    timer,
                                ));
                                log::info!(
                                    "mdns service running, {} advertisements",
                                    inner.registry.len()
                                );
                                return Ok((transport, run, inner.generation));
                            }
                            Err(Error::Transport(e))
                                if e.kind() == ErrorKind::AddrInUse
                                    && attempt < self.config.bind_retry_attempts =>
                            {
                                inner.state = ServiceState::Stopped;
                                log::debug!("mdns port busy ({}), retrying", e);
                            }
                            Err(e) => {
                                inner.state = ServiceState::Stopped;
                                log::error!("can't bind mdns socket: {}", e);
                                return Err(e);
                            }
                        }
                    }
                }
            }
            attempt += 1;
            tokio::time::sleep(self.config.bind_retry_delay(attempt)).await;
        }
    }

    /// Disarm the timer and end the current run. Does nothing when not running.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        let state = inner.state;
        match state {
            ServiceState::Starting | ServiceState::Running => {
                log::info!("stopping mdns service");
                inner.state = ServiceState::Stopping;
                if let Some(timer) = inner.timer.take() {
                    timer.cancel();
                }
                if let Some(run) = inner.run.take() {
                    run.cancel();
                }
                inner.transport = None;
            }
            ServiceState::Stopping | ServiceState::Stopped => {}
        }
    }

    /// Stop and forget every advertisement.
    pub async fn dispose(&self) {
        self.stop().await;
        self.inner.lock().await.registry.clear();
    }

    /// Multicast a PTR query for `name`.
    pub async fn send_query(&self, name: &str) -> Result<()> {
        self.send_query_type(name, DnsType::PTR).await
    }

    /// Multicast a query. Uses the bound socket while running, otherwise a
    /// short lived one.
    pub async fn send_query_type(&self, name: &str, qtype: DnsType) -> Result<()> {
        let bytes = Packet::query(name, qtype).encode()?;
        let transport = self.inner.lock().await.transport.clone();
        match transport {
            Some(transport) => transport.send(&bytes).await?,
            None => MulticastTransport::send_once(&self.config, &bytes).await?,
        }
        log::debug!("sent {:?} query for {}", qtype, name);
        Ok(())
    }

    /// Register a service. It is announced by the periodic timer and answered
    /// when queried. Returns the advertisement with all defaults resolved.
    pub async fn advertise(&self, reg: ServiceRegistration) -> Result<Advertisement> {
        let mut inner = self.inner.lock().await;
        let ad = Advertisement {
            service_type: reg.service_type,
            service_name: reg.instance_name,
            host_name: reg.host_name.unwrap_or_else(|| inner.host_name.clone()),
            address: inner.local_address,
            port: reg.port,
            ttl: reg.ttl.unwrap_or(self.config.default_ttl),
            txt_records: reg.txt_records,
        };
        ad.to_bytes()?;
        log::info!(
            "advertising {} at {}:{}",
            ad.instance_name(),
            ad.host_name,
            ad.port
        );
        inner.registry.push(ad.clone());
        Ok(ad)
    }

    /// Remove advertisements by type and instance name. When running a goodbye
    /// packet is sent for each one removed.
    pub async fn unadvertise(&self, service_type: &str, service_name: &str) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let removed = inner.registry.remove(service_type, service_name);
        if inner.state == ServiceState::Running {
            if let Some(transport) = inner.transport.as_ref() {
                for ad in &removed {
                    let bytes = match ad.goodbye_bytes() {
                        Ok(b) => b,
                        Err(e) => {
                            log::warn!("can't encode goodbye for {}: {}", ad.instance_name(), e);
                            continue;
                        }
                    };
                    if let Err(e) = transport.send(&bytes).await {
                        log::warn!("failed to send goodbye for {}: {}", ad.instance_name(), e);
                    }
                }
            }
        }
        Ok(removed.len())
    }

    /// Send all advertisements now. Returns how many were sent.
    pub async fn announce(&self) -> usize {
        registry::announce_all(&self.inner).await
    }

    pub async fn advertisements(&self) -> Vec<Advertisement> {
        self.inner.lock().await.registry.iter().cloned().collect()
    }

    /// Address used in A records of later advertisements.
    pub async fn set_local_address(&self, address: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.state != ServiceState::Stopped {
            return Err(Error::InvalidState(
                "local address can't change while the service is running",
            ));
        }
        inner.local_address = address
            .trim()
            .parse()
            .map_err(|_| Error::InvalidAddress(address.to_owned()))?;
        Ok(())
    }

    pub async fn local_address(&self) -> Ipv4Addr {
        self.inner.lock().await.local_address
    }

    pub async fn host_name(&self) -> String {
        self.inner.lock().await.host_name.clone()
    }
}
