//! Secure connector: forwarded properties and an HTTPS exchange.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use embedded_container::{BindError, EmbeddedServer, ServerConfig, ServletContext};
use reqwest::StatusCode;

mod common;

fn hello_binder(ctx: &ServletContext) -> Result<(), BindError> {
    ctx.route("/hello", get(|| async { "hello" }));
    Ok(())
}

fn tls_config() -> ServerConfig {
    let mut config = common::test_config();
    config.tls.enabled = true;
    config.tls.keystore_pass = "changeit".into();
    config.tls.truststore_pass = "changeit".into();
    config
}

fn start_tls(config: ServerConfig) -> (tempfile::TempDir, EmbeddedServer) {
    let dir = common::base_dir();
    common::write_self_signed(dir.path());
    let server = EmbeddedServer::new(config, Arc::new(hello_binder));
    server.start(dir.path()).unwrap();
    (dir, server)
}

#[test]
fn keystore_properties_without_client_auth() {
    let mut config = tls_config();
    config.tls.crl_file = "revoked.pem".into();
    let (dir, server) = start_tls(config);

    assert_eq!(server.scheme(), Some("https"));
    let props = server.connector_properties().unwrap();
    assert_eq!(props["scheme"], "https");
    assert_eq!(props["secure"], "true");
    assert!(props["keystore_file"].ends_with("keystore.pem"));
    assert_eq!(props["keystore_pass"], "******");
    assert_eq!(props["client_auth"], "false");
    assert!(props["crl_file"].ends_with("revoked.pem"));
    for key in ["truststore_file", "truststore_pass", "truststore_type", "truststore_provider"] {
        assert!(!props.contains_key(key), "{} should be absent", key);
    }
    assert!(props["keystore_file"].starts_with(&*dir.path().to_string_lossy()));
    server.stop();
}

#[test]
fn truststore_properties_with_client_auth() {
    let mut config = tls_config();
    config.tls.client_auth = true;
    let (_dir, server) = start_tls(config);

    let props = server.connector_properties().unwrap();
    assert_eq!(props["client_auth"], "true");
    assert!(props["truststore_file"].ends_with("truststore.pem"));
    assert_eq!(props["truststore_pass"], "******");
    assert!(props.contains_key("truststore_type"));
    assert!(!props.contains_key("crl_file"));
    server.stop();
}

#[test]
fn https_round_trip() {
    let (_dir, server) = start_tls(tls_config());
    let port = server.local_addr().unwrap().port();

    let client = reqwest::blocking::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    let response = client
        .get(format!("https://127.0.0.1:{}/hello", port))
        .send()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().unwrap(), "hello");
    server.stop();
}
