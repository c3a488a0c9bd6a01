//! UDP endpoint bound for mDNS traffic.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::MdnsConfig;
use crate::error::{Error, Result};

pub struct MulticastTransport {
    socket: UdpSocket,
    destination: SocketAddr,
}

fn create_socket(config: &MdnsConfig, port: u16) -> Result<Socket> {
    let sock = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    if config.reuse_address {
        sock.set_reuse_address(true)?;
        #[cfg(not(target_os = "windows"))]
        sock.set_reuse_port(true)?;
    }
    sock.set_multicast_loop_v4(config.multicast_loopback)?;
    if !config.interface.is_unspecified() {
        sock.set_multicast_if_v4(&config.interface)?;
    }
    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    sock.bind(&SockAddr::from(addr))?;
    if config.group.is_multicast() {
        sock.join_multicast_v4(&config.group, &config.interface)?;
    }
    sock.set_nonblocking(true)?;
    Ok(sock)
}

impl MulticastTransport {
    /// Bind the wildcard address on the configured port and join the group.
    /// Must be called from within a tokio runtime.
    pub fn bind(config: &MdnsConfig) -> Result<Self> {
        let sock = create_socket(config, config.port)?;
        let socket = UdpSocket::from_std(sock.into())?;
        log::debug!(
            "mdns socket bound to {:?}, group {}",
            socket.local_addr(),
            config.destination()
        );
        Ok(Self {
            socket,
            destination: config.destination(),
        })
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn send_to(&self, data: &[u8], target: SocketAddr) -> Result<()> {
        self.socket.send_to(data, target).await?;
        Ok(())
    }

    /// Send to the multicast group.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        self.send_to(data, self.destination).await
    }

    /// Wait for the next datagram. Returns [Error::Cancelled] once `cancel` fires.
    pub async fn receive(
        &self,
        buf: &mut [u8],
        cancel: &CancellationToken,
    ) -> Result<(usize, SocketAddr)> {
        tokio::select! {
            v = self.socket.recv_from(buf) => Ok(v?),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Send one datagram from a short lived socket on an ephemeral port.
    /// Does not touch a socket bound to the mDNS port.
    pub async fn send_once(config: &MdnsConfig, data: &[u8]) -> Result<()> {
        let sock = create_socket(config, 0)?;
        let socket = UdpSocket::from_std(sock.into())?;
        socket.send_to(data, config.destination()).await?;
        Ok(())
    }
}

/// Config sending unicast to 127.0.0.1 on a currently free port.
#[cfg(test)]
pub(crate) fn loopback_config() -> MdnsConfig {
    let port = std::net::UdpSocket::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port();
    MdnsConfig {
        group: Ipv4Addr::LOCALHOST,
        port,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn send_and_receive_on_loopback() {
        let config = loopback_config();
        let transport = MulticastTransport::bind(&config).unwrap();
        assert_eq!(transport.local_addr().unwrap().port(), config.port);

        transport.send(b"hello").await.unwrap();
        let cancel = CancellationToken::new();
        let mut buf = [0u8; 64];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), transport.receive(&mut buf, &cancel))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(&buf[..n], b"hello");

        MulticastTransport::send_once(&config, b"once").await.unwrap();
        let (n, remote) = transport.receive(&mut buf, &cancel).await.unwrap();
        assert_eq!(&buf[..n], b"once");
        assert_ne!(remote.port(), config.port);
    }

    #[tokio::test]
    async fn receive_observes_cancellation() {
        let config = loopback_config();
        let transport = MulticastTransport::bind(&config).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut buf = [0u8; 16];
        assert!(matches!(
            transport.receive(&mut buf, &cancel).await,
            Err(Error::Cancelled)
        ));
    }

    #[tokio::test]
    async fn reuse_allows_second_bind() {
        let config = loopback_config();
        let _first = MulticastTransport::bind(&config).unwrap();
        let _second = MulticastTransport::bind(&config).unwrap();
    }
}
