//! Fake backend shared by the integration tests.

#![allow(dead_code)]

use axum::Router;
use std::{net::SocketAddr, time::Duration};

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Serves `router` on an ephemeral local port.
pub async fn serve(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

pub fn api_url(addr: SocketAddr) -> String {
    format!("http://{addr}/api/v1")
}

/// An address nothing is listening on.
pub async fn closed_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
