//! Peer state: identity, neighbor pointers, and the crash flag that
//! together make one running process a ring member.

use crate::keyspace::Key;
use crate::store::ObjectStore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// A `(key, address)` pair identifying one peer. Serializes as a 2-element
/// JSON array, matching the wire format neighbor pairs use throughout the
/// HTTP surface (`[key, address]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRef {
    pub key: Key,
    pub address: String,
}

impl NodeRef {
    pub fn new(address: impl Into<String>) -> Self {
        let address = address.into();
        let key = Key::of(address.as_bytes());
        NodeRef { key, address }
    }
}

impl Serialize for NodeRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (self.key, &self.address).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for NodeRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let (key, address) = <(Key, String)>::deserialize(deserializer)?;
        Ok(NodeRef { key, address })
    }
}

/// The two neighbor pointers a peer maintains. Held behind a single lock so
/// that the read-modify-write sequences join and stabilize perform are
/// atomic with respect to concurrent requests.
#[derive(Debug, Clone)]
pub struct Neighbors {
    pub predecessor: NodeRef,
    pub successor: NodeRef,
}

impl Neighbors {
    /// A freshly-created singleton ring: both neighbors point back at `me`.
    pub(crate) fn singleton(me: &NodeRef) -> Self {
        Neighbors {
            predecessor: me.clone(),
            successor: me.clone(),
        }
    }

    pub fn is_singleton(&self, me: &NodeRef) -> bool {
        self.predecessor.address == me.address && self.successor.address == me.address
    }
}

/// Which of a peer's two neighbor pointers a failure or repair concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborKind {
    Predecessor,
    Successor,
}

/// One running Chord peer: its own identity, its neighbor pointers, its
/// object store, and whether it is currently simulating a crash.
pub struct ChordPeer {
    pub me: NodeRef,
    pub neighbors: RwLock<Neighbors>,
    pub store: RwLock<ObjectStore>,
    crashed: AtomicBool,
    pub http: reqwest::Client,
}

impl ChordPeer {
    pub fn new(address: impl Into<String>) -> Self {
        let me = NodeRef::new(address);
        let neighbors = Neighbors::singleton(&me);
        ChordPeer {
            me,
            neighbors: RwLock::new(neighbors),
            store: RwLock::new(ObjectStore::new()),
            crashed: AtomicBool::new(false),
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(2))
                .build()
                .expect("failed to build HTTP client"),
        }
    }

    pub fn is_crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }

    pub fn crash(&self) {
        self.crashed.store(true, Ordering::SeqCst);
    }

    pub fn recover_flag(&self) {
        self.crashed.store(false, Ordering::SeqCst);
    }

    pub async fn current_neighbors(&self) -> Neighbors {
        self.neighbors.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ref_round_trips_through_json_array() {
        let n = NodeRef::new("127.0.0.1:9001");
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.starts_with('['));
        let back: NodeRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, n);
    }

    #[test]
    fn new_peer_is_its_own_singleton_ring() {
        let peer = ChordPeer::new("127.0.0.1:9001");
        assert_eq!(peer.me.key, Key::of(b"127.0.0.1:9001"));
    }
}
