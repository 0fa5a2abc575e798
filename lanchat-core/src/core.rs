//! Host-driven API: ChatCore receives datagrams and input lines from the host, returns actions.

use std::net::IpAddr;
use std::time::Instant;

use crate::discovery::{DiscoveryError, DiscoveryReport, DiscoverySession};
use crate::endpoint::Endpoint;
use crate::peers::{PeerSet, PeerSetError};
use crate::protocol::{format_chat, Command, Message, ProtocolError};
use crate::wire::{self, FrameDecodeError, FrameEncodeError};

/// What the host should do after feeding an event to the core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send an encoded frame to one endpoint.
    SendTo { to: Endpoint, frame: Vec<u8> },
    /// Print a received chat line verbatim.
    Display(String),
    /// A new peer entered the peer set.
    PeerAdmitted(Endpoint),
    /// A peer could not be admitted.
    PeerRejected {
        endpoint: Endpoint,
        error: PeerSetError,
    },
}

/// Result of one line of local input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputOutcome {
    Quit,
    Discover,
    /// Send `frame` to every endpoint in `targets` (peer set snapshot).
    Fanout {
        frame: Vec<u8>,
        targets: Vec<Endpoint>,
    },
}

/// Why an inbound datagram was dropped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DatagramError {
    #[error(transparent)]
    Frame(#[from] FrameDecodeError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

/// Main coordinator. Owns the peer set and at most one discovery session.
pub struct ChatCore {
    name: String,
    local: Option<Endpoint>,
    bind_ip: Option<IpAddr>,
    peers: PeerSet,
    session: Option<DiscoverySession>,
}

impl ChatCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_peer_set(name, PeerSet::new())
    }

    pub fn with_peer_set(name: impl Into<String>, peers: PeerSet) -> Self {
        Self {
            name: name.into(),
            local: None,
            bind_ip: None,
            peers,
            session: None,
        }
    }

    /// Address of the local receive socket. Datagrams from it are our own echoes.
    pub fn set_local_endpoint(&mut self, endpoint: Endpoint) {
        self.local = Some(endpoint);
    }

    /// Interface address this host is known by. Control messages from it are ignored.
    /// Only effective on single-homed hosts.
    pub fn set_bind_address(&mut self, ip: IpAddr) {
        self.bind_ip = Some(ip);
    }

    pub fn peers(&self) -> &PeerSet {
        &self.peers
    }

    /// Admit a peer known ahead of time (static configuration).
    pub fn add_peer(&mut self, endpoint: Endpoint) -> Result<bool, PeerSetError> {
        self.peers.add(endpoint)
    }

    pub fn is_collecting(&self) -> bool {
        self.session.is_some()
    }

    pub fn discovery_deadline(&self) -> Option<Instant> {
        self.session.as_ref().map(DiscoverySession::deadline)
    }

    fn is_local(&self, from: &Endpoint) -> bool {
        self.local.as_ref() == Some(from)
    }

    fn is_self(&self, from: &Endpoint) -> bool {
        self.is_local(from) || self.bind_ip == Some(from.ip())
    }

    /// Start a round. Returns the SOLICIT frame for the host to send to `target`.
    pub fn begin_discovery(
        &mut self,
        target: Endpoint,
        deadline: Instant,
    ) -> Result<Vec<u8>, DiscoveryError> {
        if self.session.is_some() {
            return Err(DiscoveryError::AlreadyCollecting);
        }
        let frame = wire::encode_frame(&Message::Solicit.to_payload())?;
        self.session = Some(DiscoverySession::new(target, deadline));
        Ok(frame)
    }

    /// End the current round and merge its confirmations into the peer set.
    /// Returns None if no round was running.
    pub fn finish_discovery(&mut self) -> Option<DiscoveryReport> {
        let session = self.session.take()?;
        let target = session.target();
        let confirmed = session.into_confirmed();
        let mut admitted = Vec::new();
        let mut rejected = Vec::new();
        for endpoint in &confirmed {
            match self.peers.add(*endpoint) {
                Ok(true) => admitted.push(*endpoint),
                Ok(false) => {}
                Err(e) => rejected.push((*endpoint, e)),
            }
        }
        Some(DiscoveryReport {
            target,
            confirmed,
            admitted,
            rejected,
        })
    }

    /// Handle one inbound datagram.
    pub fn on_datagram(
        &mut self,
        from: Endpoint,
        bytes: &[u8],
    ) -> Result<Vec<Action>, DatagramError> {
        let (payload, _) = wire::decode_frame(bytes)?;
        let msg = Message::parse(&payload)?;
        let mut actions = Vec::new();
        match msg {
            Message::Solicit => {
                if self.is_self(&from) {
                    return Ok(actions);
                }
                let frame = wire::encode_frame(&Message::Confirm.to_payload())?;
                actions.push(Action::SendTo { to: from, frame });
                match self.peers.add(from) {
                    Ok(true) => actions.push(Action::PeerAdmitted(from)),
                    Ok(false) => {}
                    Err(error) => actions.push(Action::PeerRejected {
                        endpoint: from,
                        error,
                    }),
                }
            }
            Message::Confirm => {
                if self.is_self(&from) {
                    return Ok(actions);
                }
                // A late confirm after the window closed is dropped.
                if let Some(session) = self.session.as_mut() {
                    session.record(from);
                }
            }
            Message::Chat(line) => {
                if !self.is_local(&from) {
                    actions.push(Action::Display(line));
                }
            }
        }
        Ok(actions)
    }

    /// Handle one line of local input.
    pub fn on_input_line(&self, line: &str) -> Result<InputOutcome, FrameEncodeError> {
        match Command::parse(line) {
            Command::End => Ok(InputOutcome::Quit),
            Command::Find => Ok(InputOutcome::Discover),
            Command::Say(text) => Ok(InputOutcome::Fanout {
                frame: self.chat_frame(&text)?,
                targets: self.peers.list(),
            }),
        }
    }

    /// Encode `"<name>: <text>"` as a frame.
    pub fn chat_frame(&self, text: &str) -> Result<Vec<u8>, FrameEncodeError> {
        wire::encode_frame(format_chat(&self.name, text).as_bytes())
    }
}
