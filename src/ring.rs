//! Ring protocol: join, update, leave and the stabilize repair handshake.
//! Every mutation of a peer's neighbor pair happens through one of the
//! functions here, each holding the peer's neighbor lock for the whole
//! decision so two concurrent joins against one peer can't both see the
//! same gap and both try to fill it.

use crate::keyspace::Key;
use crate::neighbor_client::{self, NeighborOutcome};
use crate::peer::{ChordPeer, NeighborKind, NodeRef};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Defensive bound on how many hops a single stabilize walk may take before
/// it gives up and reports back, in case a ring ends up with a cycle of
/// neighbor pointers that never resolves to an unreachable hop. The ring is
/// finite in practice, so this should never trigger.
const STABILIZE_HOP_LIMIT: u32 = 64;

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinReply {
    pub successor: NodeRef,
    pub predecessor: NodeRef,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NeighborUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub successor: Option<NodeRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predecessor: Option<NodeRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StabilizeRequest {
    pub node: NodeRef,
    pub direction: u8,
    #[serde(default)]
    pub hops: u32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StabilizeReply {
    pub key: Key,
    pub address: String,
}

#[derive(Debug)]
pub enum JoinError {
    Unreachable,
    BadReply,
    Forwarded(u16),
}

/// Client-facing join: contact `bootstrap_addr` with our own address and
/// adopt the neighbor pair it hands back.
pub async fn join_via(peer: &ChordPeer, bootstrap_addr: &str) -> Result<JoinReply, JoinError> {
    info!("joining ring via {bootstrap_addr}");
    match neighbor_client::put_join(&peer.http, bootstrap_addr, &peer.me.address).await {
        NeighborOutcome::Ok { status, body } if status.is_success() => {
            let reply: JoinReply = serde_json::from_slice(&body).map_err(|_| JoinError::BadReply)?;
            let mut guard = peer.neighbors.write().await;
            guard.predecessor = reply.predecessor.clone();
            guard.successor = reply.successor.clone();
            Ok(reply)
        }
        NeighborOutcome::Ok { status, .. } => Err(JoinError::Forwarded(status.as_u16())),
        NeighborOutcome::Unreachable => Err(JoinError::Unreachable),
    }
}

/// Inter-peer join handshake (PUT `/join` on the receiving peer).
pub async fn handle_join_request(peer: &ChordPeer, joiner: NodeRef) -> Result<JoinReply, JoinError> {
    let mut guard = peer.neighbors.write().await;

    if guard.is_singleton(&peer.me) {
        let reply = JoinReply {
            successor: peer.me.clone(),
            predecessor: peer.me.clone(),
        };
        guard.predecessor = joiner.clone();
        guard.successor = joiner;
        debug!("singleton {} adopted new sole neighbor", peer.me.address);
        return Ok(reply);
    }

    let k = joiner.key;
    let me = peer.me.key;

    if k < me {
        let predecessor_key = guard.predecessor.key;
        if k > predecessor_key || predecessor_key > me {
            let reply = JoinReply {
                successor: peer.me.clone(),
                predecessor: guard.predecessor.clone(),
            };
            let old_predecessor = guard.predecessor.clone();
            guard.predecessor = joiner.clone();
            drop(guard);
            notify_old_neighbor_of_new_successor(peer, old_predecessor, joiner);
            Ok(reply)
        } else {
            let predecessor_addr = guard.predecessor.address.clone();
            drop(guard);
            forward_join(peer, &predecessor_addr, joiner).await
        }
    } else {
        let successor_key = guard.successor.key;
        if k < successor_key || successor_key < me {
            let reply = JoinReply {
                successor: guard.successor.clone(),
                predecessor: peer.me.clone(),
            };
            let old_successor = guard.successor.clone();
            guard.successor = joiner.clone();
            drop(guard);
            notify_old_neighbor_of_new_predecessor(peer, old_successor, joiner);
            Ok(reply)
        } else {
            let successor_addr = guard.successor.address.clone();
            drop(guard);
            forward_join(peer, &successor_addr, joiner).await
        }
    }
}

async fn forward_join(peer: &ChordPeer, next_addr: &str, joiner: NodeRef) -> Result<JoinReply, JoinError> {
    match neighbor_client::put_join(&peer.http, next_addr, &joiner.address).await {
        NeighborOutcome::Ok { status, body } if status.is_success() => {
            serde_json::from_slice(&body).map_err(|_| JoinError::BadReply)
        }
        NeighborOutcome::Ok { status, .. } => Err(JoinError::Forwarded(status.as_u16())),
        NeighborOutcome::Unreachable => Err(JoinError::Unreachable),
    }
}

fn notify_old_neighbor_of_new_successor(peer: &ChordPeer, old_predecessor: NodeRef, joiner: NodeRef) {
    let client = peer.http.clone();
    tokio::spawn(async move {
        let update = NeighborUpdate {
            successor: Some(joiner),
            predecessor: None,
        };
        let _ = neighbor_client::put_update(&client, &old_predecessor.address, &update).await;
    });
}

fn notify_old_neighbor_of_new_predecessor(peer: &ChordPeer, old_successor: NodeRef, joiner: NodeRef) {
    let client = peer.http.clone();
    tokio::spawn(async move {
        let update = NeighborUpdate {
            successor: None,
            predecessor: Some(joiner),
        };
        let _ = neighbor_client::put_update(&client, &old_successor.address, &update).await;
    });
}

/// Apply an unconditional `{successor?, predecessor?}` overwrite.
pub async fn handle_update(peer: &ChordPeer, update: NeighborUpdate) {
    let mut guard = peer.neighbors.write().await;
    if let Some(successor) = update.successor {
        guard.successor = successor;
    }
    if let Some(predecessor) = update.predecessor {
        guard.predecessor = predecessor;
    }
}

/// Graceful leave: hand the ring back to the two remaining neighbors, then
/// revert to a singleton. Values held locally are not migrated (left
/// unimplemented by design).
pub async fn leave(peer: &ChordPeer) {
    let (predecessor, successor, singleton) = {
        let guard = peer.neighbors.read().await;
        (
            guard.predecessor.clone(),
            guard.successor.clone(),
            guard.is_singleton(&peer.me),
        )
    };

    if !singleton {
        let update_predecessor = NeighborUpdate {
            successor: Some(successor.clone()),
            predecessor: None,
        };
        let _ = neighbor_client::put_update(&peer.http, &predecessor.address, &update_predecessor).await;

        let update_successor = NeighborUpdate {
            successor: None,
            predecessor: Some(predecessor.clone()),
        };
        let _ = neighbor_client::put_update(&peer.http, &successor.address, &update_successor).await;
    }

    let mut guard = peer.neighbors.write().await;
    *guard = crate::peer::Neighbors::singleton(&peer.me);
    info!("{} left the ring", peer.me.address);
}

/// Server-side stabilize handshake: relay along the requested direction
/// until a hop discovers its next neighbor is unreachable, at which point
/// it repairs its own pointer and reports itself back up the chain.
pub async fn handle_stabilize(peer: &ChordPeer, request: StabilizeRequest) -> StabilizeReply {
    if request.hops >= STABILIZE_HOP_LIMIT {
        warn!("stabilize hop limit reached relaying for {}", request.node.address);
        return StabilizeReply {
            key: peer.me.key,
            address: peer.me.address.clone(),
        };
    }

    let next_hop = {
        let guard = peer.neighbors.read().await;
        match request.direction {
            1 => guard.predecessor.clone(),
            _ => guard.successor.clone(),
        }
    };

    let forwarded = StabilizeRequest {
        node: request.node.clone(),
        direction: request.direction,
        hops: request.hops + 1,
    };

    match neighbor_client::put_stabilize(&peer.http, &next_hop.address, &forwarded).await {
        NeighborOutcome::Ok { status, body } if status.is_success() => {
            serde_json::from_slice(&body).unwrap_or(StabilizeReply {
                key: peer.me.key,
                address: peer.me.address.clone(),
            })
        }
        _ => {
            // next_hop is unreachable: we are the live node immediately
            // following the gap it left. Adopt the original caller as our
            // own pointer on this side and report ourselves upward.
            let mut guard = peer.neighbors.write().await;
            match request.direction {
                1 => guard.predecessor = request.node.clone(),
                _ => guard.successor = request.node.clone(),
            }
            debug!(
                "{} adopted {} after {} went unreachable during stabilize",
                peer.me.address, request.node.address, next_hop.address
            );
            StabilizeReply {
                key: peer.me.key,
                address: peer.me.address.clone(),
            }
        }
    }
}

/// Caller-side trigger: a direct neighbor request just failed. Ask the
/// other neighbor to walk the ring and hand back a replacement, unless the
/// two-peer special case applies: with only one distinct neighbor and that
/// neighbor being the one that failed, there is nobody left to ask, so we
/// revert to being a singleton directly.
pub async fn trigger_stabilize(
    peer: &ChordPeer,
    failed_kind: NeighborKind,
    failed_neighbor: &NodeRef,
) -> Option<NodeRef> {
    let other = {
        let guard = peer.neighbors.read().await;
        match failed_kind {
            NeighborKind::Successor => guard.predecessor.clone(),
            NeighborKind::Predecessor => guard.successor.clone(),
        }
    };

    if other.address == failed_neighbor.address {
        warn!(
            "{} has no third peer to stabilize through; reverting to singleton",
            peer.me.address
        );
        let mut guard = peer.neighbors.write().await;
        *guard = crate::peer::Neighbors::singleton(&peer.me);
        return Some(peer.me.clone());
    }

    let direction = match failed_kind {
        NeighborKind::Successor => 1,
        NeighborKind::Predecessor => 0,
    };
    let request = StabilizeRequest {
        node: peer.me.clone(),
        direction,
        hops: 0,
    };

    warn!(
        "{} lost its {:?} neighbor {}, stabilizing through {}",
        peer.me.address, failed_kind, failed_neighbor.address, other.address
    );

    match neighbor_client::put_stabilize(&peer.http, &other.address, &request).await {
        NeighborOutcome::Ok { status, body } if status.is_success() => {
            let reply: StabilizeReply = serde_json::from_slice(&body).ok()?;
            let replacement = NodeRef {
                key: reply.key,
                address: reply.address,
            };
            let mut guard = peer.neighbors.write().await;
            match failed_kind {
                NeighborKind::Successor => guard.successor = replacement.clone(),
                NeighborKind::Predecessor => guard.predecessor = replacement.clone(),
            }
            Some(replacement)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::ChordPeer;

    #[tokio::test]
    async fn singleton_join_adopts_sole_neighbor() {
        let peer = ChordPeer::new("127.0.0.1:9001");
        let joiner = NodeRef::new("127.0.0.1:9002");
        let reply = handle_join_request(&peer, joiner.clone()).await.unwrap();
        assert_eq!(reply.successor, peer.me);
        assert_eq!(reply.predecessor, peer.me);
        let neighbors = peer.current_neighbors().await;
        assert_eq!(neighbors.successor, joiner);
        assert_eq!(neighbors.predecessor, joiner);
    }

    #[tokio::test]
    async fn update_overwrites_only_supplied_fields() {
        let peer = ChordPeer::new("127.0.0.1:9001");
        let before = peer.current_neighbors().await;
        let new_successor = NodeRef::new("127.0.0.1:9999");
        handle_update(
            &peer,
            NeighborUpdate {
                successor: Some(new_successor.clone()),
                predecessor: None,
            },
        )
        .await;
        let after = peer.current_neighbors().await;
        assert_eq!(after.successor, new_successor);
        assert_eq!(after.predecessor, before.predecessor);
    }

    #[tokio::test]
    async fn two_peer_stabilize_special_case_reverts_to_singleton() {
        let peer = ChordPeer::new("127.0.0.1:9001");
        let failed = NodeRef::new("127.0.0.1:9002");
        handle_update(
            &peer,
            NeighborUpdate {
                successor: Some(failed.clone()),
                predecessor: Some(failed.clone()),
            },
        )
        .await;
        let replacement = trigger_stabilize(&peer, NeighborKind::Successor, &failed)
            .await
            .unwrap();
        assert_eq!(replacement, peer.me);
        let neighbors = peer.current_neighbors().await;
        assert!(neighbors.is_singleton(&peer.me));
    }
}
