//! Request handling through a running server.

use std::sync::Arc;

use axum::extract::Extension;
use axum::routing::{get, post};
use embedded_container::container::{NoopBinder, SessionSlot};
use embedded_container::http::RequestEncoding;
use embedded_container::{BindError, EmbeddedServer, ServletContext};
use reqwest::header;
use reqwest::StatusCode;

mod common;

fn app_binder(ctx: &ServletContext) -> Result<(), BindError> {
    ctx.route("/hello", get(|| async { "hello" }));
    ctx.route(
        "/param",
        get(|Extension(sc): Extension<ServletContext>| async move {
            sc.init_parameter("region").unwrap_or_else(|| "none".to_string())
        }),
    );
    ctx.route(
        "/visits",
        get(|Extension(slot): Extension<SessionSlot>| async move {
            let session = slot.get_or_create().unwrap();
            let visits = session.attribute("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
            session.set_attribute("visits", visits).unwrap();
            visits.to_string()
        }),
    );
    ctx.route(
        "/echo",
        post(|Extension(enc): Extension<RequestEncoding>, body: String| async move {
            format!("{}:{}", enc.0, body.len())
        }),
    );
    ctx.route("/big", get(|| async { "x".repeat(8192) }));
    Ok(())
}

#[test]
fn routes_are_served_under_context_path() {
    let mut config = common::test_config();
    config.general.context_path = "/app".into();
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));
    let client = common::client();

    let response = client.get(common::url(&server, "/app/hello")).send().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().unwrap(), "hello");

    let response = client.get(common::url(&server, "/hello")).send().unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    server.stop();
}

#[test]
fn static_resources_and_welcome_files() {
    let dir = common::base_dir();
    common::write_file(dir.path(), "webapp/index.html", "<h1>home</h1>");
    common::write_file(dir.path(), "webapp/css/site.css", "body {}");
    let server = EmbeddedServer::new(common::test_config(), Arc::new(NoopBinder));
    server.start(dir.path()).unwrap();
    let client = common::client();

    let response = client.get(common::url(&server, "/")).send().unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
    assert_eq!(response.text().unwrap(), "<h1>home</h1>");

    let response = client.get(common::url(&server, "/css/site.css")).send().unwrap();
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css");
    assert_eq!(response.text().unwrap(), "body {}");

    let response = client.get(common::url(&server, "/missing.png")).send().unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.delete(common::url(&server, "/index.html")).send().unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    server.stop();
}

#[test]
fn descriptor_parameters_reach_handlers() {
    let dir = common::base_dir();
    common::write_file(
        dir.path(),
        "conf/web.toml",
        "display_name = \"shop\"\n[context_params]\nregion = \"eu\"\n",
    );
    let server = EmbeddedServer::new(common::test_config(), Arc::new(app_binder));
    server.start(dir.path()).unwrap();

    let body = common::client()
        .get(common::url(&server, "/param"))
        .send()
        .unwrap()
        .text()
        .unwrap();
    assert_eq!(body, "eu");
    assert_eq!(server.servlet_context().unwrap().display_name().as_deref(), Some("shop"));
    server.stop();
}

#[test]
fn sessions_are_tracked_by_cookie() {
    let (_dir, server) = common::start_server(common::test_config(), Arc::new(app_binder));
    let client = common::client();

    let first = client.get(common::url(&server, "/visits")).send().unwrap();
    let cookie = first.headers()[header::SET_COOKIE].to_str().unwrap().to_string();
    assert!(cookie.starts_with("SESSIONID="));
    assert!(cookie.contains("HttpOnly"));
    assert_eq!(first.text().unwrap(), "1");

    let id = cookie.split(';').next().unwrap().to_string();
    let second = client
        .get(common::url(&server, "/visits"))
        .header(header::COOKIE, id)
        .send()
        .unwrap();
    assert!(second.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(second.text().unwrap(), "2");

    let sessions = server.servlet_context().unwrap().sessions();
    assert_eq!(sessions.active_count(), 1);
    server.stop();
    assert_eq!(sessions.active_count(), 0);
}

#[test]
fn session_id_from_path_parameter() {
    let mut config = common::test_config();
    config.context.cookies = false;
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));
    let client = common::client();

    let first = client.get(common::url(&server, "/visits")).send().unwrap();
    assert!(first.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(first.text().unwrap(), "1");

    let sessions = server.servlet_context().unwrap().sessions();
    assert_eq!(sessions.active_count(), 1);

    // Find the id through the manager by creating a known session.
    let session = sessions.create().unwrap();
    session.set_attribute("visits", 41).unwrap();
    let path = format!("/visits;sessionid={}", session.id());
    let body = client.get(common::url(&server, &path)).send().unwrap().text().unwrap();
    assert_eq!(body, "42");
    server.stop();
}

#[test]
fn request_encoding_and_body_limit() {
    let mut config = common::test_config();
    config.connector.max_post_size_bytes = 16;
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));
    let client = common::client();

    let response = client
        .post(common::url(&server, "/echo"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body("short")
        .send()
        .unwrap();
    assert_eq!(response.text().unwrap(), "UTF-8:5");

    let response = client
        .post(common::url(&server, "/echo"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body("x".repeat(64))
        .send()
        .unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    server.stop();
}

#[test]
fn body_limit_above_extractor_default_is_honored() {
    let mut config = common::test_config();
    config.connector.max_post_size_bytes = 8 * 1024 * 1024;
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));

    let body = "x".repeat(3 * 1024 * 1024);
    let response = common::client()
        .post(common::url(&server, "/echo"))
        .header(header::CONTENT_TYPE, "text/plain")
        .body(body)
        .send()
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().unwrap(), format!("UTF-8:{}", 3 * 1024 * 1024));
    server.stop();
}

#[test]
fn server_header_is_set() {
    let mut config = common::test_config();
    config.connector.server = "embedded/1.0".into();
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));

    let response = common::client().get(common::url(&server, "/hello")).send().unwrap();
    assert_eq!(response.headers()[header::SERVER], "embedded/1.0");
    server.stop();
}

#[test]
fn compression_honors_user_agent_exclusions() {
    let mut config = common::test_config();
    config.connector.compression = "on".into();
    config.connector.no_compression_user_agents = vec!["legacybot".into()];
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));
    let client = common::client();

    let response = client
        .get(common::url(&server, "/big"))
        .header(header::ACCEPT_ENCODING, "gzip")
        .send()
        .unwrap();
    assert_eq!(response.headers()[header::CONTENT_ENCODING], "gzip");

    let response = client
        .get(common::url(&server, "/big"))
        .header(header::ACCEPT_ENCODING, "gzip")
        .header(header::USER_AGENT, "LegacyBot/2.0")
        .send()
        .unwrap();
    assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
    assert_eq!(response.text().unwrap().len(), 8192);
    server.stop();
}

#[test]
fn keep_alive_limit_closes_connection() {
    let mut config = common::test_config();
    config.connector.max_keep_alive_requests = 2;
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));

    let mut stream = common::connect(&server);
    let (head, body) = common::exchange(&mut stream, "/hello");
    assert!(head.starts_with("http/1.1 200"));
    assert!(!head.contains("connection: close"));
    assert_eq!(body, b"hello");

    let (head, body) = common::exchange(&mut stream, "/hello");
    assert!(head.contains("connection: close"));
    assert_eq!(body, b"hello");
    server.stop();
}

#[test]
fn single_request_connections_when_keep_alive_disabled() {
    let mut config = common::test_config();
    config.connector.max_keep_alive_requests = 1;
    let (_dir, server) = common::start_server(config, Arc::new(app_binder));

    let mut stream = common::connect(&server);
    let (head, _) = common::exchange(&mut stream, "/hello");
    assert!(head.contains("connection: close"));
    server.stop();
}
