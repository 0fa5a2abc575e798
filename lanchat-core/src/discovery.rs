//! Discovery round state: one solicitation and the confirmations it collects.

use std::time::Instant;

use crate::endpoint::Endpoint;
use crate::peers::PeerSetError;
use crate::wire::FrameEncodeError;

/// Default collection window.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 5_000;

/// Live state of one round. Exists only while collecting.
#[derive(Debug, Clone)]
pub struct DiscoverySession {
    target: Endpoint,
    deadline: Instant,
    confirmed: Vec<Endpoint>,
}

impl DiscoverySession {
    pub fn new(target: Endpoint, deadline: Instant) -> Self {
        Self {
            target,
            deadline,
            confirmed: Vec::new(),
        }
    }

    pub fn target(&self) -> Endpoint {
        self.target
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Record a confirming endpoint. Returns false if it already answered this round.
    pub fn record(&mut self, endpoint: Endpoint) -> bool {
        if self.confirmed.contains(&endpoint) {
            return false;
        }
        self.confirmed.push(endpoint);
        true
    }

    pub fn confirmed(&self) -> &[Endpoint] {
        &self.confirmed
    }

    pub(crate) fn into_confirmed(self) -> Vec<Endpoint> {
        self.confirmed
    }
}

/// Outcome of a finished round. An empty `confirmed` list is a normal result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryReport {
    pub target: Endpoint,
    /// Every endpoint that confirmed during the window, in arrival order.
    pub confirmed: Vec<Endpoint>,
    /// Subset of `confirmed` that was new to the peer set.
    pub admitted: Vec<Endpoint>,
    /// Confirmed endpoints left out because the peer set was full.
    pub rejected: Vec<(Endpoint, PeerSetError)>,
}

impl DiscoveryReport {
    pub fn found(&self) -> usize {
        self.confirmed.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DiscoveryError {
    #[error("a discovery round is already collecting")]
    AlreadyCollecting,
    #[error(transparent)]
    Encode(#[from] FrameEncodeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_dedups() {
        let target = Endpoint::new(([239, 255, 11, 1], 11001).into());
        let mut s = DiscoverySession::new(target, Instant::now());
        let a = Endpoint::new(([10, 0, 0, 2], 11001).into());
        assert!(s.record(a));
        assert!(!s.record(a));
        assert_eq!(s.confirmed(), &[a]);
    }
}
