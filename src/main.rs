mod api;
mod cli;
mod keyspace;
mod neighbor_client;
mod peer;
mod ring;
mod router;
mod store;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use cli::Cli;
use log::{info, LevelFilter};
use peer::ChordPeer;
use std::sync::Arc;
use std::time::Duration;

/// Discovers this host's outbound IPv4 address by opening a UDP socket
/// toward a public address without sending anything on it.
fn local_ip() -> std::net::Ipv4Addr {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0").expect("failed to bind UDP socket");
    socket.connect("8.8.8.8:80").expect("failed to connect UDP socket");
    match socket.local_addr() {
        Ok(addr) => match addr.ip() {
            std::net::IpAddr::V4(ipv4) => ipv4,
            std::net::IpAddr::V6(_) => std::net::Ipv4Addr::LOCALHOST,
        },
        Err(_) => std::net::Ipv4Addr::LOCALHOST,
    }
}

fn local_address(port: u16) -> String {
    format!("{}:{port}", local_ip())
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let cli = Cli::parse();
    simple_logger::SimpleLogger::new()
        .with_level(LevelFilter::Info)
        .init()
        .expect("logger can only be initialized once");

    let address = local_address(cli.port);
    let peer = Arc::new(ChordPeer::new(address.clone()));

    if let Some(entry) = &cli.entry {
        match ring::join_via(&peer, entry).await {
            Ok(_) => info!("{address} joined the ring via {entry}"),
            Err(e) => {
                eprintln!("failed to join via {entry}: {e:?}");
                std::process::exit(1);
            }
        }
    } else {
        info!("{address} starting a new ring");
    }

    let bind_addr = ("0.0.0.0", cli.port);
    let data = web::Data::new(Arc::clone(&peer));
    let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(api::configure))
        .bind(bind_addr)?
        .run();

    let handle = server.handle();
    let die_after = Duration::from_secs_f64(cli.die_after_seconds.max(0.0));

    tokio::select! {
        result = server => result,
        _ = tokio::signal::ctrl_c() => {
            info!("{address} received shutdown signal, leaving the ring");
            ring::leave(&peer).await;
            handle.stop(true).await;
            Ok(())
        }
        _ = tokio::time::sleep(die_after) => {
            info!("{address} reached its configured lifetime, leaving the ring");
            ring::leave(&peer).await;
            handle.stop(true).await;
            Ok(())
        }
    }
}
