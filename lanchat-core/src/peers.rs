//! Peer set: confirmed endpoints, unique, bounded, in admission order.

use crate::endpoint::Endpoint;

/// Default capacity.
pub const DEFAULT_MAX_PEERS: usize = 255;

#[derive(Debug, Clone)]
pub struct PeerSet {
    peers: Vec<Endpoint>,
    capacity: usize,
}

impl PeerSet {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PEERS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            peers: Vec::new(),
            capacity,
        }
    }

    /// Insert if absent. Returns `Ok(true)` when the endpoint is new, `Ok(false)` when already known.
    pub fn add(&mut self, endpoint: Endpoint) -> Result<bool, PeerSetError> {
        if self.contains(&endpoint) {
            return Ok(false);
        }
        if self.peers.len() >= self.capacity {
            return Err(PeerSetError::Full {
                capacity: self.capacity,
            });
        }
        self.peers.push(endpoint);
        Ok(true)
    }

    pub fn contains(&self, endpoint: &Endpoint) -> bool {
        self.peers.contains(endpoint)
    }

    /// Snapshot in insertion order; safe to iterate while the set keeps changing.
    pub fn list(&self) -> Vec<Endpoint> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PeerSetError {
    #[error("peer set full ({capacity} peers)")]
    Full { capacity: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(last: u8, port: u16) -> Endpoint {
        Endpoint::new(([192, 168, 1, last], port).into())
    }

    #[test]
    fn dedup_and_order() {
        let mut set = PeerSet::new();
        assert_eq!(set.add(ep(3, 11001)), Ok(true));
        assert_eq!(set.add(ep(1, 11001)), Ok(true));
        assert_eq!(set.add(ep(3, 11001)), Ok(false));
        assert_eq!(set.add(ep(3, 11002)), Ok(true));
        assert_eq!(set.list(), vec![ep(3, 11001), ep(1, 11001), ep(3, 11002)]);
    }

    #[test]
    fn capacity_bound() {
        let mut set = PeerSet::with_capacity(2);
        set.add(ep(1, 1)).unwrap();
        set.add(ep(2, 1)).unwrap();
        assert_eq!(set.len(), set.capacity());
        assert_eq!(set.add(ep(3, 1)), Err(PeerSetError::Full { capacity: 2 }));
        // Known endpoints are still a no-op when full.
        assert_eq!(set.add(ep(1, 1)), Ok(false));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn default_capacity() {
        let mut set = PeerSet::default();
        assert_eq!(set.capacity(), DEFAULT_MAX_PEERS);
        for i in 0..DEFAULT_MAX_PEERS {
            set.add(ep(1, i as u16 + 1)).unwrap();
        }
        assert!(set.add(ep(2, 1)).is_err());
    }

    #[test]
    fn snapshot_is_detached() {
        let mut set = PeerSet::new();
        set.add(ep(1, 1)).unwrap();
        let snap = set.list();
        set.add(ep(2, 1)).unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(set.len(), 2);
    }
}
