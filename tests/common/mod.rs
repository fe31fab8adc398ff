//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use embedded_container::{ContextBinder, EmbeddedServer, ServerConfig};
use tempfile::TempDir;

/// Config with an ephemeral port and a small worker pool.
pub fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.general.port = 0;
    config.executor.max_threads = 4;
    config.executor.min_spare_threads = 2;
    config.executor.max_idle_time_ms = 1_000;
    config.context.unload_delay_ms = 200;
    config
}

/// Base directory with empty `conf` and `webapp` directories.
pub fn base_dir() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("conf")).unwrap();
    std::fs::create_dir_all(dir.path().join("webapp")).unwrap();
    dir
}

pub fn write_file(base: &Path, relative: &str, contents: &str) {
    let path = base.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// Write a self-signed `localhost` certificate as `conf/keystore.pem`
/// (certificate then key) and `conf/truststore.pem` (certificate only).
pub fn write_self_signed(base: &Path) {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_pem = cert.pem();
    write_file(base, "conf/keystore.pem", &format!("{}{}", cert_pem, key_pair.serialize_pem()));
    write_file(base, "conf/truststore.pem", &cert_pem);
}

/// Start a server under a fresh base directory.
pub fn start_server(config: ServerConfig, binder: Arc<dyn ContextBinder>) -> (TempDir, EmbeddedServer) {
    let dir = base_dir();
    let server = EmbeddedServer::new(config, binder);
    server.start(dir.path()).unwrap();
    (dir, server)
}

pub fn url(server: &EmbeddedServer, path: &str) -> String {
    let port = server.local_addr().expect("server is running").port();
    format!("http://127.0.0.1:{}{}", port, path)
}

pub fn client() -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()
        .unwrap()
}

/// Minimal HTTP/1.1 exchange on an existing connection.
///
/// Returns the raw head (lowercased) and the body.
pub fn exchange(stream: &mut TcpStream, path: &str) -> (String, Vec<u8>) {
    let request = format!("GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", path);
    stream.write_all(request.as_bytes()).unwrap();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before response head");
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_ascii_lowercase();
    let length = head
        .lines()
        .find_map(|l| l.strip_prefix("content-length:"))
        .map(|v| v.trim().parse::<usize>().unwrap())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed before body");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    (head, body)
}

pub fn connect(server: &EmbeddedServer) -> TcpStream {
    let port = server.local_addr().expect("server is running").port();
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    stream
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
