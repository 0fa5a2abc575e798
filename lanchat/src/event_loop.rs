//! Chat loop: one task multiplexing the UDP socket, local input lines and the optional
//! re-discovery timer.

use std::net::SocketAddr;
use std::time::Duration;

use lanchat_core::wire::LEN_SIZE;
use lanchat_core::{Action, ChatCore, DatagramError, Endpoint, InputOutcome};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, Lines};
use tokio::net::UdpSocket;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::discovery;
use crate::net::{self, Datagram};

/// Discovery settings the loop needs.
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub target: SocketAddr,
    pub discovery_window: Duration,
    pub discover_on_start: bool,
    pub rediscover_every: Option<Duration>,
}

pub struct EventLoop<R, W> {
    socket: UdpSocket,
    core: ChatCore,
    settings: LoopSettings,
    input: Lines<R>,
    output: W,
}

/// Result of one fan-out pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanoutSummary {
    pub attempted: usize,
    pub failed: usize,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

impl<R, W> EventLoop<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        socket: UdpSocket,
        core: ChatCore,
        settings: LoopSettings,
        input: R,
        output: W,
    ) -> Self {
        Self {
            socket,
            core,
            settings,
            input: input.lines(),
            output,
        }
    }

    pub fn core(&self) -> &ChatCore {
        &self.core
    }

    #[cfg(test)]
    pub fn into_parts(self) -> (ChatCore, W) {
        (self.core, self.output)
    }

    /// Run until `am-end`, end of input, or a receive-socket failure (returned as the error).
    pub async fn run(&mut self) -> std::io::Result<()> {
        if self.settings.discover_on_start {
            self.discover().await?;
        }
        let mut retry = self.settings.rediscover_every.map(|every| {
            let mut i = interval_at(Instant::now() + every, every);
            i.set_missed_tick_behavior(MissedTickBehavior::Delay);
            i
        });

        loop {
            let mut header = [0u8; LEN_SIZE];
            tokio::select! {
                peeked = self.socket.peek_from(&mut header) => {
                    let (n, _) = peeked?;
                    let datagram = net::read_peeked(&self.socket, &header[..n]).await?;
                    dispatch_datagram(&self.socket, &mut self.core, datagram, &mut self.output).await?;
                }
                line = self.input.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => {
                            info!("input closed");
                            break;
                        }
                        Err(e) => {
                            warn!(error = %e, "failed to read input");
                            break;
                        }
                    };
                    if self.on_line(&line).await? == Flow::Quit {
                        break;
                    }
                }
                _ = next_tick(&mut retry) => {
                    self.discover().await?;
                }
            }
        }
        Ok(())
    }

    async fn on_line(&mut self, line: &str) -> std::io::Result<Flow> {
        let outcome = match self.core.on_input_line(line) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "line not sent");
                write_line(&mut self.output, &format!("Not sent: {}", e)).await?;
                return Ok(Flow::Continue);
            }
        };
        match outcome {
            InputOutcome::Quit => return Ok(Flow::Quit),
            InputOutcome::Discover => self.discover().await?,
            InputOutcome::Fanout { frame, targets } => {
                let summary = fan_out(&self.socket, &frame, &targets).await;
                debug!(
                    attempted = summary.attempted,
                    failed = summary.failed,
                    "fan-out done"
                );
            }
        }
        Ok(Flow::Continue)
    }

    async fn discover(&mut self) -> std::io::Result<()> {
        discovery::run_round(
            &self.socket,
            &mut self.core,
            self.settings.target,
            self.settings.discovery_window,
            &mut self.output,
        )
        .await?;
        Ok(())
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(i) => {
            i.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Send one frame to every target. A failed send is logged and does not stop the pass.
pub async fn fan_out(socket: &UdpSocket, frame: &[u8], targets: &[Endpoint]) -> FanoutSummary {
    let mut summary = FanoutSummary {
        attempted: 0,
        failed: 0,
    };
    for to in targets {
        summary.attempted += 1;
        match socket.send_to(frame, to.addr()).await {
            Ok(_) => debug!(peer = %to, bytes = frame.len(), "sent"),
            Err(e) => {
                summary.failed += 1;
                warn!(peer = %to, error = %e, "send failed");
            }
        }
    }
    summary
}

/// Feed one received datagram to the core and carry out what it asks for.
/// Bad frames are logged and dropped; only output failures are returned.
pub async fn dispatch_datagram<W>(
    socket: &UdpSocket,
    core: &mut ChatCore,
    datagram: Datagram,
    out: &mut W,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (from, bytes) = datagram;
    let actions = match bytes
        .map_err(DatagramError::from)
        .and_then(|bytes| core.on_datagram(from, &bytes))
    {
        Ok(actions) => actions,
        Err(e) => {
            warn!(peer = %from, error = %e, "dropping datagram");
            return Ok(());
        }
    };
    perform(socket, actions, out).await
}

async fn perform<W>(socket: &UdpSocket, actions: Vec<Action>, out: &mut W) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for action in actions {
        match action {
            Action::SendTo { to, frame } => {
                if let Err(e) = socket.send_to(&frame, to.addr()).await {
                    warn!(peer = %to, error = %e, "send failed");
                }
            }
            Action::Display(line) => write_line(out, &line).await?,
            Action::PeerAdmitted(peer) => info!(peer = %peer, "peer admitted"),
            Action::PeerRejected { endpoint, error } => {
                warn!(peer = %endpoint, error = %error, "peer not admitted");
                write_line(out, &format!("Not admitting {}: {}", endpoint, error)).await?;
            }
        }
    }
    Ok(())
}

pub async fn write_line<W>(out: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(line.as_bytes()).await?;
    out.write_all(b"\n").await?;
    out.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanchat_core::{decode_frame, encode_frame};
    use tokio::io::{AsyncWriteExt, BufReader};
    use tokio::time::timeout;

    async fn socket() -> UdpSocket {
        UdpSocket::bind("127.0.0.1:0").await.unwrap()
    }

    fn settings(target: SocketAddr) -> LoopSettings {
        LoopSettings {
            target,
            discovery_window: Duration::from_millis(200),
            discover_on_start: false,
            rediscover_every: None,
        }
    }

    async fn recv_payload(s: &UdpSocket) -> Vec<u8> {
        let mut buf = [0u8; 1024];
        let (n, _) = timeout(Duration::from_secs(2), s.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        decode_frame(&buf[..n]).unwrap().0
    }

    #[tokio::test]
    async fn fan_out_attempts_every_peer() {
        let me = socket().await;
        let p1 = socket().await;
        let p2 = socket().await;
        let targets = vec![
            Endpoint::from(p1.local_addr().unwrap()),
            // IPv6 destination from an IPv4 socket always fails.
            Endpoint::from("[::1]:9".parse::<SocketAddr>().unwrap()),
            Endpoint::from(p2.local_addr().unwrap()),
        ];
        let frame = encode_frame(b"alice: hi").unwrap();
        let summary = fan_out(&me, &frame, &targets).await;
        assert_eq!(
            summary,
            FanoutSummary {
                attempted: 3,
                failed: 1
            }
        );
        assert_eq!(recv_payload(&p1).await, b"alice: hi");
        assert_eq!(recv_payload(&p2).await, b"alice: hi");
    }

    #[tokio::test]
    async fn chat_line_goes_to_peers_then_end_stops() {
        let me = socket().await;
        let peer = socket().await;
        let mut core = ChatCore::new("alice");
        core.add_peer(peer.local_addr().unwrap().into()).unwrap();

        let input: &[u8] = b"hello\nam-end\nnever sent\n";
        let mut el = EventLoop::new(me, core, settings(peer.local_addr().unwrap()), input, Vec::new());
        el.run().await.unwrap();

        assert_eq!(recv_payload(&peer).await, b"alice: hello");
        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn end_sends_nothing() {
        let me = socket().await;
        let peer = socket().await;
        let mut core = ChatCore::new("alice");
        core.add_peer(peer.local_addr().unwrap().into()).unwrap();

        let input: &[u8] = b"am-end\n";
        let mut el = EventLoop::new(me, core, settings(peer.local_addr().unwrap()), input, Vec::new());
        el.run().await.unwrap();

        let mut buf = [0u8; 64];
        assert!(timeout(Duration::from_millis(200), peer.recv_from(&mut buf))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn find_returns_within_window() {
        let me = socket().await;
        let silent = socket().await;
        let core = ChatCore::new("alice");
        let input: &[u8] = b"am-find\nam-end\n";
        let mut el = EventLoop::new(me, core, settings(silent.local_addr().unwrap()), input, Vec::new());

        let started = Instant::now();
        el.run().await.unwrap();
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_secs(2));

        let (_, out) = el.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), "No one found\n");
    }

    #[tokio::test]
    async fn incoming_chat_and_solicit_are_serviced() {
        let me = socket().await;
        let me_addr = me.local_addr().unwrap();
        let other = socket().await;
        let (mut keys, input) = tokio::io::duplex(64);
        let el = EventLoop::new(
            me,
            ChatCore::new("alice"),
            settings(other.local_addr().unwrap()),
            BufReader::new(input),
            Vec::new(),
        );
        let handle = tokio::spawn(async move {
            let mut el = el;
            el.run().await.unwrap();
            el
        });

        other
            .send_to(&encode_frame(b"bob: hey alice").unwrap(), me_addr)
            .await
            .unwrap();
        other
            .send_to(&encode_frame(b"auth: CAN").unwrap(), me_addr)
            .await
            .unwrap();
        assert_eq!(recv_payload(&other).await, b"auth: OFC");

        keys.write_all(b"am-end\n").await.unwrap();
        let el = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(el.core().peers().list(), vec![Endpoint::from(other.local_addr().unwrap())]);
        let (_, out) = el.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), "bob: hey alice\n");
    }

    #[tokio::test]
    async fn rediscovery_timer_solicits_without_input() {
        let me = socket().await;
        let watcher = socket().await;
        let (mut keys, input) = tokio::io::duplex(64);
        let mut cfg = settings(watcher.local_addr().unwrap());
        cfg.discovery_window = Duration::from_millis(50);
        cfg.rediscover_every = Some(Duration::from_millis(100));
        let mut el = EventLoop::new(me, ChatCore::new("alice"), cfg, BufReader::new(input), Vec::new());
        let handle = tokio::spawn(async move {
            el.run().await.unwrap();
            el
        });

        assert_eq!(recv_payload(&watcher).await, b"auth: CAN");
        assert_eq!(recv_payload(&watcher).await, b"auth: CAN");

        keys.write_all(b"am-end\n").await.unwrap();
        let el = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(el.core().peers().is_empty());
        let (_, out) = el.into_parts();
        assert!(String::from_utf8(out).unwrap().starts_with("No one found\n"));
    }

    #[tokio::test]
    async fn malformed_datagram_is_not_fatal() {
        let me = socket().await;
        let me_addr = me.local_addr().unwrap();
        let other = socket().await;
        let (mut keys, input) = tokio::io::duplex(64);
        let mut el = EventLoop::new(
            me,
            ChatCore::new("alice"),
            settings(other.local_addr().unwrap()),
            BufReader::new(input),
            Vec::new(),
        );
        let handle = tokio::spawn(async move {
            el.run().await.unwrap();
            el
        });

        other.send_to(b"0002", me_addr).await.unwrap();
        other.send_to(b"zzzzbad", me_addr).await.unwrap();
        other
            .send_to(&encode_frame(b"bob: still here").unwrap(), me_addr)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        keys.write_all(b"am-end\n").await.unwrap();

        let el = timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        let (_, out) = el.into_parts();
        assert_eq!(String::from_utf8(out).unwrap(), "bob: still here\n");
    }
}
