//! Request router: classifies every storage request against ownership
//! and either serves it locally or forwards it to one neighbor, retrying
//! once via the stabilize handshake if that neighbor turns out to be dead.

use crate::keyspace::Key;
use crate::neighbor_client::{self, NeighborOutcome};
use crate::peer::{ChordPeer, NeighborKind, NodeRef};
use crate::ring;
use actix_web::http::StatusCode;
use bytes::Bytes;
use log::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Local,
    Forward(NeighborKind),
}

/// Half-open arc `(predecessor, self]` ownership. `predecessor == me` stands
/// in for the "singleton ring" case (successor == me too, in a healthy
/// ring), since a peer is only ever its own predecessor when it is also its
/// own successor.
pub fn classify(h: Key, me: Key, predecessor: Key) -> Destination {
    if predecessor == me {
        return Destination::Local;
    }
    if h < me {
        if h >= predecessor || predecessor > me {
            Destination::Local
        } else {
            Destination::Forward(NeighborKind::Predecessor)
        }
    } else if predecessor > me && h > predecessor {
        Destination::Local
    } else {
        Destination::Forward(NeighborKind::Successor)
    }
}

async fn neighbor_for(peer: &ChordPeer, kind: NeighborKind) -> NodeRef {
    let guard = peer.neighbors.read().await;
    match kind {
        NeighborKind::Predecessor => guard.predecessor.clone(),
        NeighborKind::Successor => guard.successor.clone(),
    }
}

fn bad_gateway() -> (StatusCode, Bytes) {
    (StatusCode::BAD_GATEWAY, Bytes::from_static(b"neighbor unreachable"))
}

/// `reqwest::StatusCode` and `actix_web::http::StatusCode` are distinct
/// types even though both ultimately wrap an HTTP status line, so every
/// status crossing from a neighbor response into our own response goes
/// through an explicit `from_u16` rather than assuming the two unify.
fn from_outcome(outcome: NeighborOutcome) -> (StatusCode, Bytes) {
    match outcome {
        NeighborOutcome::Ok { status, body } => {
            let status = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
            (status, body)
        }
        NeighborOutcome::Unreachable => bad_gateway(),
    }
}

pub async fn route_get(peer: &ChordPeer, key: &str) -> (StatusCode, Bytes) {
    let h = Key::of(key.as_bytes());
    let (me, predecessor) = {
        let guard = peer.neighbors.read().await;
        (peer.me.key, guard.predecessor.key)
    };

    match classify(h, me, predecessor) {
        Destination::Local => {
            let store = peer.store.read().await;
            match store.get(&h) {
                Some(value) => (StatusCode::OK, Bytes::copy_from_slice(value)),
                None => (StatusCode::NOT_FOUND, Bytes::new()),
            }
        }
        Destination::Forward(kind) => forward_get(peer, kind, key).await,
    }
}

pub async fn route_put(peer: &ChordPeer, key: &str, value: Bytes) -> (StatusCode, Bytes) {
    let h = Key::of(key.as_bytes());
    let (me, predecessor) = {
        let guard = peer.neighbors.read().await;
        (peer.me.key, guard.predecessor.key)
    };

    match classify(h, me, predecessor) {
        Destination::Local => {
            peer.store.write().await.put(h, value.to_vec());
            (StatusCode::OK, Bytes::from_static(b"stored"))
        }
        Destination::Forward(kind) => forward_put(peer, kind, key, value).await,
    }
}

async fn forward_get(peer: &ChordPeer, kind: NeighborKind, key: &str) -> (StatusCode, Bytes) {
    let target = neighbor_for(peer, kind).await;
    let outcome = neighbor_client::get_storage(&peer.http, &target.address, key).await;
    if !outcome.is_server_error() && !outcome.is_unreachable() {
        return from_outcome(outcome);
    }

    warn!("forward GET /storage/{key} to {} failed, stabilizing", target.address);
    match ring::trigger_stabilize(peer, kind, &target).await {
        Some(replacement) => from_outcome(neighbor_client::get_storage(&peer.http, &replacement.address, key).await),
        None => from_outcome(outcome),
    }
}

async fn forward_put(peer: &ChordPeer, kind: NeighborKind, key: &str, value: Bytes) -> (StatusCode, Bytes) {
    let target = neighbor_for(peer, kind).await;
    let outcome = neighbor_client::put_storage(&peer.http, &target.address, key, value.clone()).await;
    if !outcome.is_server_error() && !outcome.is_unreachable() {
        return from_outcome(outcome);
    }

    warn!("forward PUT /storage/{key} to {} failed, stabilizing", target.address);
    match ring::trigger_stabilize(peer, kind, &target).await {
        Some(replacement) => {
            from_outcome(neighbor_client::put_storage(&peer.http, &replacement.address, key, value).await)
        }
        None => from_outcome(outcome),
    }
}
