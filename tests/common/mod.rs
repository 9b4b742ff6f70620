#![allow(dead_code)]

use std::{collections::HashMap, sync::Arc};

use axum::{body::Body, http::Request, Router};
use shortlink::{config::Config, Services};
use tempfile::TempDir;

pub const BASE_URL: &str = "https://short.ly";

pub fn test_config(dir: &TempDir) -> Config {
    let vars: HashMap<&str, String> = HashMap::from([
        (
            "DATABASE_URL",
            format!("sqlite://{}?mode=rwc", dir.path().join("shortlink.db").display()),
        ),
        ("PUBLIC_BASE_URL", BASE_URL.to_string()),
    ]);

    Config::from_lookup(|key| vars.get(key).cloned()).expect("test config should be valid")
}

pub struct TestRouter {
    pub router: Router,
    _dir: TempDir,
}

pub async fn test_router() -> TestRouter {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = test_config(&dir);
    let services = Arc::new(Services::new(&config).await.expect("failed to build services"));

    TestRouter {
        router: shortlink::router(services, &config),
        _dir: dir,
    }
}

pub struct TestApp {
    pub address: String,
    _dir: TempDir,
}

/// Runs the full server on an ephemeral port for the lifetime of the test.
pub async fn spawn_app() -> TestApp {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = test_config(&dir);
    let services = Arc::new(Services::new(&config).await.expect("failed to build services"));
    let app = shortlink::router(services, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind test listener");
    let address = format!("http://{}", listener.local_addr().unwrap());

    tokio::spawn(shortlink::serve(listener, app, std::future::pending()));

    TestApp { address, _dir: dir }
}

pub fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}
