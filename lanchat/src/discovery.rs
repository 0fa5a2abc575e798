//! LAN discovery round: send SOLICIT to the broadcast/multicast target, collect CONFIRMs until the deadline.

use std::io::{Error, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

use lanchat_core::{ChatCore, DiscoveryReport};
use tokio::io::AsyncWrite;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use crate::event_loop::{dispatch_datagram, write_line};
use crate::net;

/// Run one bounded round. Blocks the caller for at most `window`.
///
/// Datagrams that are not confirmations (chat, solicitations from others) are still
/// serviced while collecting. Only a failure of the receive socket itself is an error;
/// the deadline elapsing is the normal end of a round.
pub async fn run_round<W>(
    socket: &UdpSocket,
    core: &mut ChatCore,
    target: SocketAddr,
    window: Duration,
    out: &mut W,
) -> std::io::Result<DiscoveryReport>
where
    W: AsyncWrite + Unpin,
{
    let solicit = core
        .begin_discovery(target.into(), std::time::Instant::now() + window)
        .map_err(|e| Error::new(ErrorKind::Other, e))?;
    info!(target = %target, window_ms = window.as_millis() as u64, "discovery round started");

    match socket.send_to(&solicit, target).await {
        Ok(_) => collect(socket, core, out).await?,
        Err(e) => warn!(target = %target, error = %e, "failed to send solicitation"),
    }

    let report = core
        .finish_discovery()
        .ok_or_else(|| Error::new(ErrorKind::Other, "discovery session vanished"))?;
    announce(&report, out).await?;
    Ok(report)
}

/// Receive until the session's deadline passes.
async fn collect<W>(socket: &UdpSocket, core: &mut ChatCore, out: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let deadline = match core.discovery_deadline() {
        Some(d) => Instant::from_std(d),
        None => return Ok(()),
    };
    loop {
        match timeout_at(deadline, net::recv_datagram(socket)).await {
            Err(_elapsed) => return Ok(()),
            Ok(Ok(datagram)) => dispatch_datagram(socket, core, datagram, out).await?,
            Ok(Err(e)) => {
                core.finish_discovery();
                return Err(e);
            }
        }
    }
}

async fn announce<W>(report: &DiscoveryReport, out: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for (endpoint, e) in &report.rejected {
        warn!(peer = %endpoint, error = %e, "peer not admitted");
        write_line(out, &format!("Not admitting {}: {}", endpoint, e)).await?;
    }
    info!(
        target = %report.target,
        found = report.found(),
        admitted = report.admitted.len(),
        "discovery round finished"
    );
    if report.found() > 0 {
        write_line(out, &format!("Found {} peers", report.found())).await
    } else {
        write_line(out, "No one found").await
    }
}
