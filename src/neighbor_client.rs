//! Outbound HTTP calls to neighbor peers, and the sum-type result the rest
//! of the crate matches on. A non-2xx status, a transport error, and a
//! timeout are all folded into `Unreachable` (the router and the stabilize
//! handshake don't need to care which one happened).

use bytes::Bytes;
use reqwest::{Client, Method, StatusCode};
use serde::Serialize;

#[derive(Debug, Clone)]
pub enum NeighborOutcome {
    Ok { status: StatusCode, body: Bytes },
    Unreachable,
}

impl NeighborOutcome {
    pub fn is_server_error(&self) -> bool {
        matches!(self, NeighborOutcome::Ok { status, .. } if status.is_server_error())
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, NeighborOutcome::Unreachable)
    }
}

fn neighbor_url(address: &str, path: &str) -> String {
    format!("http://{address}{path}")
}

async fn send(
    client: &Client,
    method: Method,
    address: &str,
    path: &str,
    body: Option<Bytes>,
) -> NeighborOutcome {
    let url = neighbor_url(address, path);
    let mut req = client.request(method, &url);
    if let Some(body) = body {
        req = req.body(body);
    }
    match req.send().await {
        Ok(resp) => {
            let status = resp.status();
            match resp.bytes().await {
                Ok(body) => NeighborOutcome::Ok { status, body },
                Err(_) => NeighborOutcome::Unreachable,
            }
        }
        Err(_) => NeighborOutcome::Unreachable,
    }
}

pub async fn get_storage(client: &Client, address: &str, key: &str) -> NeighborOutcome {
    send(client, Method::GET, address, &format!("/storage/{key}"), None).await
}

pub async fn put_storage(
    client: &Client,
    address: &str,
    key: &str,
    value: Bytes,
) -> NeighborOutcome {
    send(
        client,
        Method::PUT,
        address,
        &format!("/storage/{key}"),
        Some(value),
    )
    .await
}

pub async fn put_join(client: &Client, address: &str, joiner_address: &str) -> NeighborOutcome {
    send(
        client,
        Method::PUT,
        address,
        "/join",
        Some(Bytes::copy_from_slice(joiner_address.as_bytes())),
    )
    .await
}

/// Fire-and-forget: the join protocol tells the old neighbor about its new
/// neighbor without waiting on the result beyond "did the bytes go out".
pub async fn put_update<T: Serialize>(client: &Client, address: &str, body: &T) -> NeighborOutcome {
    let json = serde_json::to_vec(body).expect("neighbor update body always serializes");
    send(
        client,
        Method::PUT,
        address,
        "/update",
        Some(Bytes::from(json)),
    )
    .await
}

pub async fn put_stabilize<T: Serialize>(
    client: &Client,
    address: &str,
    body: &T,
) -> NeighborOutcome {
    let json = serde_json::to_vec(body).expect("stabilize body always serializes");
    send(
        client,
        Method::PUT,
        address,
        "/stabilize",
        Some(Bytes::from(json)),
    )
    .await
}
