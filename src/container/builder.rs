//! Component construction from configuration.
//!
//! Each `build_*` method reads only its own configuration groups and the
//! resolved paths. Wiring the components together is left to the caller.

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderValue;

use crate::config::validation::is_utf8_label;
use crate::config::ServerConfig;
use crate::container::context::ContextSettings;
use crate::container::engine::ENGINE_NAME;
use crate::container::resources::CacheSettings;
use crate::container::{
    Context, ContainerError, ContextConfigListener, EmbeddedResources, Engine, FileResources, Host,
    ResourceProvider, ServletContext, SessionManager,
};
use crate::executor::ThreadExecutor;
use crate::lifecycle::paths::ResolvedPaths;
use crate::net::{
    build_server_config, socket_properties, CompressionMode, CompressionSettings, Connector,
    ConnectorSettings, SocketOptions, TlsProtocol, TlsSettings, TransportProperties,
};

/// Builds the container components for one start.
#[derive(Debug, Clone, Copy)]
pub struct ComponentBuilder<'a> {
    config: &'a ServerConfig,
    paths: &'a ResolvedPaths,
}

impl<'a> ComponentBuilder<'a> {
    pub fn new(config: &'a ServerConfig, paths: &'a ResolvedPaths) -> Self {
        Self { config, paths }
    }

    pub fn build_executor(&self) -> ThreadExecutor {
        ThreadExecutor::new(self.config.executor.clone())
    }

    pub fn build_engine(&self) -> Engine {
        Engine::new(ENGINE_NAME.to_string(), self.paths.base_dir.clone())
    }

    pub fn build_host(&self) -> Host {
        Host::new(
            self.config.host.name.clone(),
            self.config.host.error_report,
            self.paths.work_dir.clone(),
        )
    }

    pub fn build_context(&self) -> Context {
        let ctx = &self.config.context;

        let resources = if self.config.general.use_fs_resources {
            ResourceProvider::Filesystem(FileResources::new(
                self.paths.doc_base_dir.clone(),
                CacheSettings {
                    allowed: ctx.caching_allowed,
                    max_size_bytes: kb_to_bytes(ctx.cache_max_size_kb),
                    object_max_size_bytes: kb_to_bytes(ctx.cache_object_max_size_kb),
                    ttl: Duration::from_secs(ctx.cache_ttl_sec),
                },
            ))
        } else {
            ResourceProvider::Embedded(EmbeddedResources::new())
        };

        let max_inactive =
            (ctx.session_timeout_minutes > 0).then(|| Duration::from_secs(ctx.session_timeout_minutes * 60));
        let sessions = SessionManager::new(max_inactive, ctx.max_active_sessions);

        let servlet_context = ServletContext::new(
            self.config.general.context_path.clone(),
            self.paths.doc_base_dir.clone(),
            self.paths.work_dir.clone(),
            Arc::new(sessions),
            Arc::new(resources),
        );
        servlet_context.add_listener(Arc::new(ContextConfigListener::new(
            self.paths.web_descriptor_file.clone(),
        )));

        Context::new(
            servlet_context,
            ContextSettings {
                cookies: ctx.cookies,
                url_rewriting: !ctx.disable_url_rewriting,
                request_encoding: ctx.post_character_encoding.clone(),
                unload_delay: Duration::from_millis(ctx.unload_delay_ms),
            },
        )
    }

    /// Build the connector. TLS key material is read here.
    pub fn build_connector(&self) -> Result<Connector, ContainerError> {
        let conn = &self.config.connector;

        if !is_utf8_label(&conn.uri_encoding) {
            return Err(ContainerError::Config {
                component: "connector",
                message: format!("unsupported URI encoding {:?}", conn.uri_encoding),
            });
        }

        let mode = CompressionMode::parse(&conn.compression).ok_or_else(|| ContainerError::Config {
            component: "connector",
            message: format!("invalid compression mode {:?}", conn.compression),
        })?;
        let compression = CompressionSettings {
            mode,
            min_size_bytes: conn.compression_min_size_bytes,
            mime_types: Arc::from(conn.compressable_mime_types.clone()),
            excluded_user_agents: Arc::from(conn.no_compression_user_agents.clone()),
        };

        let server_header = if conn.server.is_empty() {
            None
        } else {
            Some(HeaderValue::from_str(&conn.server).map_err(|_| ContainerError::Config {
                component: "connector",
                message: format!("invalid Server header {:?}", conn.server),
            })?)
        };

        let (keep_alive, keep_alive_limit) = match conn.max_keep_alive_requests {
            1 => (false, Some(1)),
            n if n <= 0 => (true, None),
            n => (true, usize::try_from(n).ok()),
        };

        let tls = if self.config.tls.enabled {
            let settings = self.tls_settings()?;
            Some(Arc::new(build_server_config(&settings)?))
        } else {
            None
        };

        let settings = ConnectorSettings {
            name: self.config.executor.name.clone(),
            port: self.config.general.port,
            secure: self.config.tls.enabled,
            max_post_size: usize::try_from(conn.max_post_size_bytes).ok().filter(|n| *n > 0),
            accept_count: conn.accept_count,
            max_header_size: conn.max_http_header_size_bytes,
            keep_alive,
            keep_alive_limit,
            server_header,
            compression,
            poller_threads: self.config.nio.poller_thread_count,
        };

        Ok(Connector::new(
            settings,
            SocketOptions::from_config(&self.config.socket),
            tls,
            self.transport_properties(mode),
        ))
    }

    fn tls_settings(&self) -> Result<TlsSettings, ContainerError> {
        let tls = &self.config.tls;
        let protocol = TlsProtocol::parse(&tls.protocol).ok_or_else(|| ContainerError::Config {
            component: "tls",
            message: format!("unsupported protocol {:?}", tls.protocol),
        })?;

        Ok(TlsSettings {
            keystore_file: self.paths.keystore_file.clone(),
            client_auth: tls.client_auth,
            truststore_file: self.paths.truststore_file.clone(),
            // Revocation is only checked against client certificates.
            crl_file: (tls.client_auth && !tls.crl_file.is_empty()).then(|| self.paths.crl_file.clone()),
            protocol,
            ciphers: tls.ciphers.clone(),
            session_cache_size: tls.session_cache_size,
        })
    }

    /// Every knob forwarded to the transport, including those it only records.
    fn transport_properties(&self, mode: CompressionMode) -> TransportProperties {
        let general = &self.config.general;
        let conn = &self.config.connector;
        let nio = &self.config.nio;
        let tls = &self.config.tls;

        let mut props = TransportProperties::new();
        let mut set = |key: &str, value: String| {
            props.insert(key.to_string(), value);
        };

        set("port", general.port.to_string());
        set("scheme", if tls.enabled { "https" } else { "http" }.to_string());
        set("secure", tls.enabled.to_string());
        set("enable_lookups", conn.enable_lookups.to_string());
        set("max_post_size", conn.max_post_size_bytes.to_string());
        set("uri_encoding", conn.uri_encoding.clone());
        set("accept_count", conn.accept_count.to_string());
        set("compression", mode.as_str());
        set("compression_min_size", conn.compression_min_size_bytes.to_string());
        set("compressable_mime_types", conn.compressable_mime_types.join(","));
        if !conn.no_compression_user_agents.is_empty() {
            set("no_compression_user_agents", conn.no_compression_user_agents.join(","));
        }
        set("disable_upload_timeout", conn.disable_upload_timeout.to_string());
        set("max_http_header_size", conn.max_http_header_size_bytes.to_string());
        set("max_keep_alive_requests", conn.max_keep_alive_requests.to_string());
        if !conn.server.is_empty() {
            set("server", conn.server.clone());
        }
        set("socket_buffer", conn.socket_buffer_bytes.to_string());
        set("executor", self.config.executor.name.clone());

        set("use_sendfile", nio.use_sendfile.to_string());
        set("acceptor_thread_count", nio.acceptor_thread_count.to_string());
        set("acceptor_thread_priority", nio.acceptor_thread_priority.to_string());
        set("poller_thread_count", nio.poller_thread_count.to_string());
        set("poller_thread_priority", nio.poller_thread_priority.to_string());
        set("selector_timeout", nio.selector_timeout_ms.to_string());
        set("oom_parachute", nio.oom_parachute.to_string());
        set("selector_pool.max_selectors", nio.max_selectors.to_string());
        set("selector_pool.max_spare_selectors", nio.max_spare_selectors.to_string());

        if tls.enabled {
            set("ssl_enabled", "true".to_string());
            set("keystore_file", self.paths.keystore_file.display().to_string());
            set("keystore_pass", mask(&tls.keystore_pass));
            set("keystore_type", tls.keystore_type.clone());
            set("keystore_provider", tls.keystore_provider.clone());
            set("key_alias", tls.key_alias.clone());
            set("algorithm", tls.algorithm.clone());
            set("client_auth", tls.client_auth.to_string());
            if tls.client_auth {
                set("truststore_file", self.paths.truststore_file.display().to_string());
                set("truststore_pass", mask(&tls.truststore_pass));
                set("truststore_type", tls.truststore_type.clone());
                set("truststore_provider", tls.truststore_provider.clone());
            }
            if !tls.crl_file.is_empty() {
                set("crl_file", self.paths.crl_file.display().to_string());
            }
            set("ssl_protocol", tls.protocol.clone());
            set("ciphers", tls.ciphers.join(","));
            set("session_cache_size", tls.session_cache_size.to_string());
            set("session_timeout", tls.session_timeout_secs.to_string());
        }

        props.extend(socket_properties(&self.config.socket));
        props
    }
}

fn kb_to_bytes(kb: u64) -> usize {
    usize::try_from(kb.saturating_mul(1024)).unwrap_or(usize::MAX)
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        String::new()
    } else {
        "******".to_string()
    }
}
