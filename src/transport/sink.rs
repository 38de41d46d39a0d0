//! Destination for outgoing datagrams.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket},
};

use crate::config::{ConfigError, TransportSettings};

/// Something that accepts complete datagrams.
///
/// Implementations are shared by every worker of a transport and must accept
/// concurrent calls; each call carries one whole, independent datagram.
pub trait DatagramSink: Send + Sync {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize>;
}

impl DatagramSink for UdpSocket {
    fn send_datagram(&self, datagram: &[u8]) -> io::Result<usize> {
        self.send(datagram)
    }
}

/// Resolve the configured address and open a connected UDP socket to it.
pub fn connect_udp(settings: &TransportSettings) -> Result<UdpSocket, ConfigError> {
    let remote = resolve(settings)?;
    let local: SocketAddr = if remote.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };
    let socket = UdpSocket::bind(local).map_err(ConfigError::Connect)?;
    socket.connect(remote).map_err(ConfigError::Connect)?;
    Ok(socket)
}

fn resolve(settings: &TransportSettings) -> Result<SocketAddr, ConfigError> {
    let candidates = settings
        .addr
        .to_socket_addrs()
        .map_err(|source| ConfigError::Resolve {
            addr: settings.addr.clone(),
            source,
        })?;
    candidates
        .into_iter()
        .find(|addr| settings.network.accepts(addr))
        .ok_or_else(|| ConfigError::NoAddressForNetwork {
            addr: settings.addr.clone(),
            network: settings.network,
        })
}
