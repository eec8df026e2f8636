//! HTTP transport: binds the peer's HTTP paths to the ring protocol and
//! router underneath.

use crate::peer::{ChordPeer, NodeRef};
use crate::ring::{self, JoinError, NeighborUpdate, StabilizeRequest};
use crate::router;
use actix_web::{get, put, post, web, HttpRequest, HttpResponse, Responder};
use log::{error, info, warn};
use serde::Serialize;
use std::sync::Arc;

/// Every handler but `/sim-crash`, `/sim-recover` and `/node-info` answers
/// this way while the peer is simulating a crash.
fn crashed_guard(peer: &ChordPeer) -> Option<HttpResponse> {
    if peer.is_crashed() {
        Some(HttpResponse::InternalServerError().body("I have sim-crashed"))
    } else {
        None
    }
}

#[put("/storage/{key}")]
async fn put_storage(path: web::Path<String>, body: web::Bytes, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let key = path.into_inner();
    let (status, body) = router::route_put(&peer, &key, body.into()).await;
    HttpResponse::build(status).body(body)
}

#[get("/storage/{key}")]
async fn get_storage(path: web::Path<String>, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let key = path.into_inner();
    let (status, body) = router::route_get(&peer, &key).await;
    HttpResponse::build(status).body(body)
}

#[get("/neighbors")]
async fn neighbors(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let current = peer.current_neighbors().await;
    if current.is_singleton(&peer.me) {
        HttpResponse::Ok().json(Vec::<String>::new())
    } else {
        HttpResponse::Ok().json(vec![current.successor.address, current.predecessor.address])
    }
}

#[derive(Serialize)]
struct NodeInfoResponse {
    node_key: String,
    successor: NodeRef,
    others: Vec<NodeRef>,
    sim_crash: bool,
}

#[get("/node-info")]
async fn node_info(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    let current = peer.current_neighbors().await;
    HttpResponse::Ok().json(NodeInfoResponse {
        node_key: peer.me.key.to_hex(),
        successor: current.successor,
        others: vec![current.predecessor],
        sim_crash: peer.is_crashed(),
    })
}

#[get("/key")]
async fn key(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    HttpResponse::Ok().body(peer.me.key.to_hex())
}

fn is_valid_address(addr: &str) -> bool {
    !addr.is_empty() && addr.chars().all(|c| c.is_alphanumeric() || c == '_' || c == ':' || c == '-' || c == '.')
}

#[post("/join")]
async fn join(req: HttpRequest, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let nprime = req
        .query_string()
        .split('&')
        .find_map(|pair| pair.strip_prefix("nprime="));

    let Some(nprime) = nprime else {
        return HttpResponse::BadRequest().body("missing nprime parameter");
    };
    if !is_valid_address(nprime) {
        return HttpResponse::BadRequest().body("malformed nprime parameter");
    }

    match ring::join_via(&peer, nprime).await {
        Ok(reply) => {
            info!("{} joined via {}", peer.me.address, nprime);
            HttpResponse::Ok().json(reply)
        }
        Err(JoinError::Unreachable) => {
            warn!("join bootstrap {} unreachable", nprime);
            HttpResponse::BadGateway().body("bootstrap peer unreachable")
        }
        Err(JoinError::BadReply) => HttpResponse::BadGateway().body("malformed join reply"),
        Err(JoinError::Forwarded(status)) => {
            HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY))
                .body("join forwarding failed")
        }
    }
}

#[put("/join")]
async fn join_peer(body: web::Bytes, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let joiner_addr = match std::str::from_utf8(&body) {
        Ok(s) => s.to_string(),
        Err(_) => return HttpResponse::BadRequest().body("joiner address must be valid UTF-8"),
    };
    if !is_valid_address(&joiner_addr) {
        return HttpResponse::BadRequest().body("malformed joiner address");
    }

    let joiner = NodeRef::new(joiner_addr);
    match ring::handle_join_request(&peer, joiner).await {
        Ok(reply) => HttpResponse::Ok().json(reply),
        Err(JoinError::Unreachable) => HttpResponse::BadGateway().body("downstream peer unreachable"),
        Err(JoinError::BadReply) => HttpResponse::BadGateway().body("malformed downstream reply"),
        Err(JoinError::Forwarded(status)) => {
            HttpResponse::build(actix_web::http::StatusCode::from_u16(status).unwrap_or(actix_web::http::StatusCode::BAD_GATEWAY))
                .body("join forwarding failed")
        }
    }
}

#[put("/update")]
async fn update(body: web::Json<NeighborUpdate>, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    ring::handle_update(&peer, body.into_inner()).await;
    HttpResponse::Ok().finish()
}

#[put("/stabilize")]
async fn stabilize(body: web::Json<StabilizeRequest>, peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    let reply = ring::handle_stabilize(&peer, body.into_inner()).await;
    HttpResponse::Ok().json(reply)
}

#[post("/leave")]
async fn leave(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    if let Some(resp) = crashed_guard(&peer) {
        return resp;
    }
    ring::leave(&peer).await;
    HttpResponse::Ok().finish()
}

#[post("/sim-crash")]
async fn sim_crash(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    peer.crash();
    warn!("{} is now simulating a crash", peer.me.address);
    HttpResponse::Ok().finish()
}

#[post("/sim-recover")]
async fn sim_recover(peer: web::Data<Arc<ChordPeer>>) -> impl Responder {
    peer.recover_flag();
    let successor_addr = peer.current_neighbors().await.successor.address;
    if successor_addr != peer.me.address {
        let peer = Arc::clone(&peer);
        tokio::spawn(async move {
            if let Err(e) = ring::join_via(&peer, &successor_addr).await {
                error!("{} failed to rejoin on recover: {e:?}", peer.me.address);
            } else {
                info!("{} rejoined the ring on recover", peer.me.address);
            }
        });
    }
    HttpResponse::Ok().finish()
}

async fn not_found() -> impl Responder {
    HttpResponse::NotFound().finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(put_storage)
        .service(get_storage)
        .service(neighbors)
        .service(node_info)
        .service(key)
        .service(join)
        .service(join_peer)
        .service(update)
        .service(stabilize)
        .service(leave)
        .service(sim_crash)
        .service(sim_recover)
        .default_service(web::route().to(not_found));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{test, App};

    #[test]
    fn address_validation_matches_word_colon_dash() {
        assert!(is_valid_address("127.0.0.1:9001"));
        assert!(is_valid_address("host-name:9001"));
        assert!(!is_valid_address("[::1]:9001"));
        assert!(!is_valid_address(""));
    }

    fn app_data(address: &str) -> web::Data<Arc<ChordPeer>> {
        web::Data::new(Arc::new(ChordPeer::new(address)))
    }

    #[actix_web::test]
    async fn singleton_store_then_get_round_trips() {
        let data = app_data("127.0.0.1:9001");
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let put_req = test::TestRequest::put()
            .uri("/storage/alpha")
            .set_payload("hello")
            .to_request();
        let put_resp = test::call_service(&app, put_req).await;
        assert_eq!(put_resp.status(), actix_web::http::StatusCode::OK);

        let get_req = test::TestRequest::get().uri("/storage/alpha").to_request();
        let get_resp = test::call_service(&app, get_req).await;
        assert_eq!(get_resp.status(), actix_web::http::StatusCode::OK);
        let body = test::read_body(get_resp).await;
        assert_eq!(&body[..], b"hello");
    }

    #[actix_web::test]
    async fn get_of_never_stored_key_is_404() {
        let data = app_data("127.0.0.1:9002");
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/storage/beta").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn neighbors_on_singleton_is_empty_array() {
        let data = app_data("127.0.0.1:9003");
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/neighbors").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::OK);
        let body: Vec<String> = test::read_body_json(resp).await;
        assert!(body.is_empty());
    }

    #[actix_web::test]
    async fn key_endpoint_returns_own_hex_key() {
        let data = app_data("127.0.0.1:9004");
        let peer = data.get_ref().clone();
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/key").to_request();
        let resp = test::call_service(&app, req).await;
        let body = test::read_body(resp).await;
        assert_eq!(std::str::from_utf8(&body).unwrap(), peer.me.key.to_hex());
    }

    #[actix_web::test]
    async fn unknown_path_is_404() {
        let data = app_data("127.0.0.1:9005");
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::get().uri("/nonsense").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn crashed_peer_answers_storage_with_500_but_node_info_still_works() {
        let data = app_data("127.0.0.1:9006");
        data.crash();
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let storage_req = test::TestRequest::get().uri("/storage/alpha").to_request();
        let storage_resp = test::call_service(&app, storage_req).await;
        assert_eq!(storage_resp.status(), actix_web::http::StatusCode::INTERNAL_SERVER_ERROR);

        let info_req = test::TestRequest::get().uri("/node-info").to_request();
        let info_resp = test::call_service(&app, info_req).await;
        assert_eq!(info_resp.status(), actix_web::http::StatusCode::OK);
    }

    #[actix_web::test]
    async fn join_without_nprime_is_400() {
        let data = app_data("127.0.0.1:9007");
        let app = test::init_service(App::new().app_data(data.clone()).configure(configure)).await;

        let req = test::TestRequest::post().uri("/join").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
    }
}
