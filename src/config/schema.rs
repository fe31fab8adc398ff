//! Configuration schema definitions.
//!
//! This module defines the complete configuration bundle for the embedded
//! container: nine independent groups, each with documented defaults.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the embedded container.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    /// Port, context path and document base.
    pub general: GeneralConfig,

    /// Directory layout under the base directory.
    pub fs: FsConfig,

    /// Virtual host settings.
    pub host: HostConfig,

    /// Application context settings (caching, sessions, encoding).
    pub context: ContextConfig,

    /// HTTP connector settings.
    pub connector: ConnectorConfig,

    /// Acceptor and poller settings.
    pub nio: NioConfig,

    /// Low-level socket tuning.
    pub socket: SocketConfig,

    /// TLS settings.
    pub tls: TlsConfig,

    /// Worker pool settings.
    pub executor: ExecutorConfig,
}

/// General settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// TCP port the connector listens on (0 picks an ephemeral port).
    pub port: u16,

    /// Context path the application is mounted at ("" for root).
    pub context_path: String,

    /// Document base, relative to the base directory.
    pub doc_base_dir: String,

    /// Serve static resources from the document base instead of from
    /// resources registered in memory by the application.
    pub use_fs_resources: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            context_path: String::new(),
            doc_base_dir: "webapp".to_string(),
            use_fs_resources: true,
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FsConfig {
    /// Configuration directory, relative to the base directory.
    pub conf_dir: String,

    /// Scratch directory for the host, relative to the base directory.
    pub work_dir: String,

    /// Web descriptor file name inside the configuration directory.
    pub web_descriptor: String,
}

impl Default for FsConfig {
    fn default() -> Self {
        Self {
            conf_dir: "conf".to_string(),
            work_dir: "work".to_string(),
            web_descriptor: "web.toml".to_string(),
        }
    }
}

/// How error responses generated by the container are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorReportStyle {
    /// Small HTML page with status and reason.
    #[default]
    Html,
    /// Plain text body.
    Plain,
    /// Status line only, empty body.
    None,
}

/// Virtual host settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostConfig {
    /// Host name; also the engine's default host.
    pub name: String,

    /// Error page rendering.
    pub error_report: ErrorReportStyle,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            name: "localhost".to_string(),
            error_report: ErrorReportStyle::Html,
        }
    }
}

/// Application context settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Track sessions with a cookie.
    pub cookies: bool,

    /// Ignore session ids carried in the request path.
    pub disable_url_rewriting: bool,

    /// Total static resource cache size in kilobytes.
    pub cache_max_size_kb: u64,

    /// Largest single cached resource in kilobytes.
    pub cache_object_max_size_kb: u64,

    /// Cache entry time-to-live in seconds.
    pub cache_ttl_sec: u64,

    /// Enable the static resource cache.
    pub caching_allowed: bool,

    /// Time allowed for in-flight requests to finish on stop, in milliseconds.
    pub unload_delay_ms: u64,

    /// Session idle timeout in minutes.
    pub session_timeout_minutes: u64,

    /// Maximum concurrently active sessions (unlimited when absent).
    pub max_active_sessions: Option<usize>,

    /// Character encoding applied to requests that do not declare one.
    /// Empty disables the filter.
    pub post_character_encoding: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            cookies: true,
            disable_url_rewriting: false,
            cache_max_size_kb: 10_240,
            cache_object_max_size_kb: 512,
            cache_ttl_sec: 5,
            caching_allowed: true,
            unload_delay_ms: 2_000,
            session_timeout_minutes: 30,
            max_active_sessions: None,
            post_character_encoding: "UTF-8".to_string(),
        }
    }
}

/// HTTP connector settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Resolve peer host names.
    pub enable_lookups: bool,

    /// Maximum request body in bytes; zero or negative disables the limit.
    pub max_post_size_bytes: i64,

    /// Encoding used to decode request URIs.
    pub uri_encoding: String,

    /// Listen backlog.
    pub accept_count: u32,

    /// Content types eligible for compression.
    pub compressable_mime_types: Vec<String>,

    /// `off`, `on`, `force`, or a minimum size in bytes.
    pub compression: String,

    /// Smallest response compressed when compression is `on`.
    pub compression_min_size_bytes: u64,

    /// User-agent substrings that never receive compressed responses.
    pub no_compression_user_agents: Vec<String>,

    /// Keep the read timeout off while request bodies are uploaded.
    pub disable_upload_timeout: bool,

    /// Largest accepted request head in bytes.
    pub max_http_header_size_bytes: usize,

    /// Requests served per connection; 1 disables keep-alive,
    /// zero or negative is unlimited.
    pub max_keep_alive_requests: i32,

    /// `Server` response header; empty leaves it unset.
    pub server: String,

    /// Socket output buffer in bytes.
    pub socket_buffer_bytes: usize,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            enable_lookups: false,
            max_post_size_bytes: 2 * 1024 * 1024,
            uri_encoding: "UTF-8".to_string(),
            accept_count: 100,
            compressable_mime_types: vec![
                "text/html".to_string(),
                "text/xml".to_string(),
                "text/plain".to_string(),
            ],
            compression: "off".to_string(),
            compression_min_size_bytes: 2048,
            no_compression_user_agents: Vec::new(),
            disable_upload_timeout: true,
            max_http_header_size_bytes: 8192,
            max_keep_alive_requests: 100,
            server: String::new(),
            socket_buffer_bytes: 9000,
        }
    }
}

/// Acceptor and poller settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NioConfig {
    pub use_sendfile: bool,
    pub acceptor_thread_count: usize,
    pub acceptor_thread_priority: i32,
    /// Worker threads of the connector's I/O runtime.
    pub poller_thread_count: usize,
    pub poller_thread_priority: i32,
    pub selector_timeout_ms: u64,
    pub oom_parachute: usize,
    pub max_selectors: usize,
    pub max_spare_selectors: i32,
}

impl Default for NioConfig {
    fn default() -> Self {
        Self {
            use_sendfile: true,
            acceptor_thread_count: 1,
            acceptor_thread_priority: 5,
            poller_thread_count: 1,
            poller_thread_priority: 5,
            selector_timeout_ms: 1000,
            oom_parachute: 1024 * 1024,
            max_selectors: 200,
            max_spare_selectors: -1,
        }
    }
}

// Socket sentinels. A socket option is forwarded to the transport only when
// its configured value differs from the sentinel below.
pub const SOCKET_DIRECT_BUFFER: bool = false;
pub const SOCKET_RX_BUF_SIZE: usize = 25_188;
pub const SOCKET_TX_BUF_SIZE: usize = 43_800;
pub const SOCKET_APP_READ_BUF_SIZE: usize = 8192;
pub const SOCKET_APP_WRITE_BUF_SIZE: usize = 8192;
pub const SOCKET_BUFFER_POOL: usize = 500;
pub const SOCKET_BUFFER_POOL_SIZE: usize = 104_857_600;
pub const SOCKET_PROCESSOR_CACHE: usize = 500;
pub const SOCKET_KEY_CACHE: usize = 500;
pub const SOCKET_EVENT_CACHE: usize = 500;
pub const SOCKET_TCP_NO_DELAY: bool = false;
pub const SOCKET_SO_KEEP_ALIVE: bool = false;
pub const SOCKET_OOB_INLINE: bool = true;
pub const SOCKET_SO_REUSE_ADDRESS: bool = true;
pub const SOCKET_SO_LINGER_ON: bool = true;
pub const SOCKET_SO_LINGER_TIME_SEC: u64 = 25;
pub const SOCKET_SO_TIMEOUT_MS: u64 = 5000;
/// Low delay, high throughput, high reliability.
pub const SOCKET_SO_TRAFFIC_CLASS: u32 = 0x04 | 0x08 | 0x10;
pub const SOCKET_PERFORMANCE_CONNECTION_TIME: i32 = 1;
pub const SOCKET_PERFORMANCE_LATENCY: i32 = 0;
pub const SOCKET_PERFORMANCE_BANDWIDTH: i32 = 1;
pub const SOCKET_UNLOCK_TIMEOUT_MS: u64 = 250;

/// Low-level socket tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SocketConfig {
    pub direct_buffer: bool,
    pub rx_buf_size_bytes: usize,
    pub tx_buf_size_bytes: usize,
    pub app_read_buf_size_bytes: usize,
    pub app_write_buf_size_bytes: usize,
    pub buffer_pool: usize,
    pub buffer_pool_size_bytes: usize,
    pub processor_cache: usize,
    pub key_cache: usize,
    pub event_cache: usize,
    pub tcp_no_delay: bool,
    pub so_keep_alive: bool,
    pub oob_inline: bool,
    pub so_reuse_address: bool,
    pub so_linger_on: bool,
    pub so_linger_time_sec: u64,
    pub so_timeout_ms: u64,
    pub so_traffic_class: u32,
    pub performance_connection_time: i32,
    pub performance_latency: i32,
    pub performance_bandwidth: i32,
    pub unlock_timeout_ms: u64,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            direct_buffer: SOCKET_DIRECT_BUFFER,
            rx_buf_size_bytes: SOCKET_RX_BUF_SIZE,
            tx_buf_size_bytes: SOCKET_TX_BUF_SIZE,
            app_read_buf_size_bytes: SOCKET_APP_READ_BUF_SIZE,
            app_write_buf_size_bytes: SOCKET_APP_WRITE_BUF_SIZE,
            buffer_pool: SOCKET_BUFFER_POOL,
            buffer_pool_size_bytes: SOCKET_BUFFER_POOL_SIZE,
            processor_cache: SOCKET_PROCESSOR_CACHE,
            key_cache: SOCKET_KEY_CACHE,
            event_cache: SOCKET_EVENT_CACHE,
            tcp_no_delay: SOCKET_TCP_NO_DELAY,
            so_keep_alive: SOCKET_SO_KEEP_ALIVE,
            oob_inline: SOCKET_OOB_INLINE,
            so_reuse_address: SOCKET_SO_REUSE_ADDRESS,
            so_linger_on: SOCKET_SO_LINGER_ON,
            so_linger_time_sec: SOCKET_SO_LINGER_TIME_SEC,
            so_timeout_ms: SOCKET_SO_TIMEOUT_MS,
            so_traffic_class: SOCKET_SO_TRAFFIC_CLASS,
            performance_connection_time: SOCKET_PERFORMANCE_CONNECTION_TIME,
            performance_latency: SOCKET_PERFORMANCE_LATENCY,
            performance_bandwidth: SOCKET_PERFORMANCE_BANDWIDTH,
            unlock_timeout_ms: SOCKET_UNLOCK_TIMEOUT_MS,
        }
    }
}

/// TLS configuration for the connector.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Serve HTTPS instead of HTTP.
    pub enabled: bool,

    /// PEM file with the certificate chain and private key, inside the
    /// configuration directory.
    pub keystore_file: String,
    pub keystore_pass: String,
    pub keystore_type: String,
    pub keystore_provider: String,
    pub key_alias: String,
    pub algorithm: String,

    /// Require client certificates.
    pub client_auth: bool,

    /// PEM file with trusted client CA certificates.
    pub truststore_file: String,
    pub truststore_pass: String,
    pub truststore_type: String,
    pub truststore_provider: String,

    /// `TLS` (all supported versions), `TLSv1.2` or `TLSv1.3`.
    pub protocol: String,

    /// Cipher suite names; empty keeps the provider defaults.
    pub ciphers: Vec<String>,

    /// Server session cache entries; 0 keeps the library default.
    pub session_cache_size: usize,
    pub session_timeout_secs: u64,

    /// PEM certificate revocation list; empty disables CRL checks.
    pub crl_file: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            keystore_file: "keystore.pem".to_string(),
            keystore_pass: String::new(),
            keystore_type: "PEM".to_string(),
            keystore_provider: String::new(),
            key_alias: String::new(),
            algorithm: String::new(),
            client_auth: false,
            truststore_file: "truststore.pem".to_string(),
            truststore_pass: String::new(),
            truststore_type: "PEM".to_string(),
            truststore_provider: String::new(),
            protocol: "TLS".to_string(),
            ciphers: Vec::new(),
            session_cache_size: 0,
            session_timeout_secs: 86_400,
            crl_file: String::new(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub name: String,

    /// Prefix of worker thread names.
    pub name_prefix: String,

    /// Upper bound on worker threads.
    pub max_threads: usize,

    /// Threads kept alive while idle.
    pub min_spare_threads: usize,

    /// Idle time after which surplus threads exit, in milliseconds.
    pub max_idle_time_ms: u64,

    /// Stop without waiting for running tasks.
    pub daemon: bool,

    pub thread_priority: i32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            name: "http-executor".to_string(),
            name_prefix: "http-exec-".to_string(),
            max_threads: 200,
            min_spare_threads: 25,
            max_idle_time_ms: 60_000,
            daemon: true,
            thread_priority: 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ServerConfig = toml::from_str(
            r#"
            [general]
            port = 9090

            [executor]
            max_threads = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.general.port, 9090);
        assert_eq!(config.general.doc_base_dir, "webapp");
        assert_eq!(config.executor.max_threads, 8);
        assert_eq!(config.executor.min_spare_threads, 25);
        assert_eq!(config.socket.rx_buf_size_bytes, SOCKET_RX_BUF_SIZE);
        assert!(!config.tls.enabled);
    }

    #[test]
    fn error_report_style_is_lowercase() {
        let config: ServerConfig = toml::from_str(
            r#"
            [host]
            error_report = "plain"
            "#,
        )
        .unwrap();
        assert_eq!(config.host.error_report, ErrorReportStyle::Plain);
    }

    #[test]
    fn traffic_class_sentinel() {
        assert_eq!(SOCKET_SO_TRAFFIC_CLASS, 0x1C);
    }
}
