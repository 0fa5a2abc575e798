//! UDP socket setup and sized frame receipt.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use lanchat_core::wire::{peek_length, LEN_SIZE};
use lanchat_core::{ChatCore, Endpoint, FrameDecodeError};
use tokio::net::UdpSocket;
use tracing::{debug, info, warn};

/// One received datagram: who sent it, and its frame bytes or why they were unusable.
pub type Datagram = (Endpoint, Result<Vec<u8>, FrameDecodeError>);

/// Bind the chat socket on all interfaces. Joins `target` if it is a multicast group,
/// otherwise enables broadcast so solicitations can reach it.
pub fn bind_chat_socket(port: u16, target: Ipv4Addr) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    if target.is_multicast() {
        std_sock.join_multicast_v4(&target, &Ipv4Addr::UNSPECIFIED)?;
        std_sock.set_multicast_ttl_v4(1)?;
        std_sock.set_multicast_loop_v4(true)?;
        debug!(group = %target, "joined multicast group");
    } else {
        std_sock.set_broadcast(true)?;
        debug!(target = %target, "broadcast enabled");
    }
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}

/// Wait for the next datagram and read exactly the frame it declares.
pub async fn recv_datagram(socket: &UdpSocket) -> std::io::Result<Datagram> {
    let mut header = [0u8; LEN_SIZE];
    let (n, _) = socket.peek_from(&mut header).await?;
    read_peeked(socket, &header[..n]).await
}

/// Consume the datagram whose first bytes were already peeked into `header`.
///
/// A datagram with an unusable header is still drained so it does not block the socket.
pub async fn read_peeked(socket: &UdpSocket, header: &[u8]) -> std::io::Result<Datagram> {
    match peek_length(header) {
        Ok(len) => {
            let mut buf = vec![0u8; len];
            let (n, from) = socket.recv_from(&mut buf).await?;
            if n < len {
                return Ok((
                    from.into(),
                    Err(FrameDecodeError::ShortRead {
                        declared: len,
                        available: n,
                    }),
                ));
            }
            Ok((from.into(), Ok(buf)))
        }
        Err(e) => {
            let mut scratch = [0u8; LEN_SIZE];
            let (_, from) = socket.recv_from(&mut scratch).await?;
            Ok((from.into(), Err(e)))
        }
    }
}

/// Local endpoint to filter our own echoes by. None when bound to the wildcard address,
/// since the source address peers see is not known then.
pub fn local_endpoint(socket: &UdpSocket) -> Option<Endpoint> {
    let addr: SocketAddr = socket.local_addr().ok()?;
    if addr.ip().is_unspecified() {
        None
    } else {
        Some(addr.into())
    }
}

/// Source address the kernel picks for traffic to `target`. Connecting a UDP socket
/// sends nothing; it only resolves the route.
pub fn outbound_address(target: SocketAddr) -> std::io::Result<IpAddr> {
    let probe = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    probe.set_broadcast(true)?;
    probe.connect(target)?;
    Ok(probe.local_addr()?.ip())
}

/// Tell the core which addresses are its own, so looped-back solicitations and chat
/// are not taken for a peer. Without `bind_address` the interface is derived from the
/// route to `target`.
pub fn identify_self(
    core: &mut ChatCore,
    socket: &UdpSocket,
    target: SocketAddr,
    bind_address: Option<Ipv4Addr>,
) -> std::io::Result<()> {
    let port = socket.local_addr()?.port();
    let ip = match bind_address {
        Some(ip) => Some(IpAddr::V4(ip)),
        None => match outbound_address(target) {
            Ok(ip) => {
                info!(address = %ip, "using outbound interface address");
                Some(ip)
            }
            Err(e) => {
                warn!(
                    target = %target,
                    error = %e,
                    "cannot determine own address; own solicitations may be admitted"
                );
                None
            }
        },
    };
    match local_endpoint(socket) {
        Some(local) => core.set_local_endpoint(local),
        None => {
            if let Some(ip) = ip {
                core.set_local_endpoint(Endpoint::new(SocketAddr::new(ip, port)));
            }
        }
    }
    if let Some(ip) = ip {
        core.set_bind_address(ip);
    }
    Ok(())
}
