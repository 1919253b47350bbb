//! Multicast UDP socket setup

use async_trait::async_trait;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use crate::error::NetworkError;
use crate::network::PacketSource;
use crate::protocol::NetworkConfig;

/// Receive buffer requested from the kernel
const SOCKET_RECV_BUFFER: usize = 1 << 20;

fn join_error(address: &str, reason: impl ToString) -> NetworkError {
    NetworkError::MulticastJoin {
        address: address.to_string(),
        reason: reason.to_string(),
    }
}

/// Create a socket bound to the group port and joined to the group.
///
/// The socket is non-blocking, ready to hand to tokio.
pub fn create_multicast_socket(
    group: &str,
    port: u16,
    interface: &str,
) -> Result<(std::net::UdpSocket, IpAddr), NetworkError> {
    let address = format!("{}:{}", group, port);
    let group_ip: IpAddr = group
        .parse()
        .map_err(|_| join_error(&address, "not an IP address"))?;
    if !group_ip.is_multicast() {
        return Err(join_error(&address, "not a multicast address"));
    }

    let domain = match group_ip {
        IpAddr::V4(_) => Domain::IPV4,
        IpAddr::V6(_) => Domain::IPV6,
    };
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| join_error(&address, e))?;

    // Several workers bind the same group port
    socket
        .set_reuse_address(true)
        .map_err(|e| join_error(&address, e))?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket
        .set_reuse_port(true)
        .map_err(|e| join_error(&address, e))?;

    if let Err(e) = socket.set_recv_buffer_size(SOCKET_RECV_BUFFER) {
        tracing::debug!("Could not enlarge receive buffer: {}", e);
    }

    match group_ip {
        IpAddr::V4(group_v4) => {
            let iface: Ipv4Addr = if interface.is_empty() {
                Ipv4Addr::UNSPECIFIED
            } else {
                interface
                    .parse()
                    .map_err(|_| join_error(&address, format!("invalid interface {}", interface)))?
            };
            let bind = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
            socket.bind(&bind.into()).map_err(|e| join_error(&address, e))?;
            socket
                .join_multicast_v4(&group_v4, &iface)
                .map_err(|e| join_error(&address, e))?;
        }
        IpAddr::V6(group_v6) => {
            let bind = SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), port);
            socket.bind(&bind.into()).map_err(|e| join_error(&address, e))?;
            socket
                .join_multicast_v6(&group_v6, 0)
                .map_err(|e| join_error(&address, e))?;
        }
    }

    socket
        .set_nonblocking(true)
        .map_err(|e| join_error(&address, e))?;

    Ok((socket.into(), group_ip))
}

/// Multicast group membership feeding one worker
pub struct MulticastSource {
    socket: Option<tokio::net::UdpSocket>,
    group: IpAddr,
    interface: String,
}

impl MulticastSource {
    /// Join the configured group. Must run inside a tokio runtime.
    pub fn join(config: &NetworkConfig) -> Result<Self, NetworkError> {
        let (socket, group) = create_multicast_socket(
            &config.multicast_address,
            config.multicast_port,
            &config.interface,
        )?;
        let socket = tokio::net::UdpSocket::from_std(socket).map_err(|e| {
            join_error(
                &format!("{}:{}", config.multicast_address, config.multicast_port),
                e,
            )
        })?;

        tracing::debug!(
            "Joined multicast group {}:{}",
            config.multicast_address,
            config.multicast_port
        );

        Ok(Self {
            socket: Some(socket),
            group,
            interface: config.interface.clone(),
        })
    }
}

#[async_trait]
impl PacketSource for MulticastSource {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetworkError> {
        let socket = self.socket.as_ref().ok_or(NetworkError::Closed)?;
        socket
            .recv(buf)
            .await
            .map_err(|e| NetworkError::ReceiveFailed(e.to_string()))
    }

    fn close(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        let left = match self.group {
            IpAddr::V4(group) => {
                let iface = self.interface.parse().unwrap_or(Ipv4Addr::UNSPECIFIED);
                socket.leave_multicast_v4(group, iface)
            }
            IpAddr::V6(group) => socket.leave_multicast_v6(&group, 0),
        };
        if let Err(e) = left {
            tracing::debug!("Leaving multicast group {} failed: {}", self.group, e);
        }
        // Socket is dropped here
    }
}

impl Drop for MulticastSource {
    fn drop(&mut self) {
        self.close();
    }
}
