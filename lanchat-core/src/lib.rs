//! LAN chat protocol reference implementation.
//! Host-driven: no I/O; host passes datagrams and input lines, receives actions.

pub mod discovery;
pub mod endpoint;
pub mod peers;
pub mod protocol;
pub mod wire;

pub mod core;

pub use crate::core::{Action, ChatCore, DatagramError, InputOutcome};
pub use discovery::{
    DiscoveryError, DiscoveryReport, DiscoverySession, DEFAULT_DISCOVERY_TIMEOUT_MS,
};
pub use endpoint::Endpoint;
pub use peers::{PeerSet, PeerSetError, DEFAULT_MAX_PEERS};
pub use protocol::{Command, Message, ProtocolError, MAX_NAME_LEN};
pub use wire::{decode_frame, encode_frame, peek_length, FrameDecodeError, FrameEncodeError};
