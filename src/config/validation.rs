//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thread counts, context path shape)
//! - Reject settings the connector cannot honor (URI encoding, store types)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::ServerConfig;
use crate::net::compression::CompressionMode;
use crate::net::tls::TlsProtocol;

/// Largest compression threshold the gzip layer can express.
pub const MAX_COMPRESSION_MIN_SIZE: u64 = u16::MAX as u64;
/// Smallest HTTP/1 read buffer the connector accepts.
pub const MIN_HTTP_HEADER_SIZE: usize = 8192;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field, e.g. `executor.max_threads`.
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Validate a configuration, collecting every problem found.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let path = &config.general.context_path;
    if !path.is_empty() && path != "/" && (!path.starts_with('/') || path.ends_with('/')) {
        errors.push(ValidationError::new(
            "general.context_path",
            format!("'{}' must be empty, '/', or start with '/' and not end with '/'", path),
        ));
    }
    if path.contains(|c| matches!(c, '{' | '}' | '*')) {
        errors.push(ValidationError::new(
            "general.context_path",
            format!("'{}' must not contain '{{', '}}' or '*'", path),
        ));
    }

    if config.host.name.trim().is_empty() {
        errors.push(ValidationError::new("host.name", "must not be empty"));
    }

    if config.executor.max_threads == 0 {
        errors.push(ValidationError::new("executor.max_threads", "must be greater than 0"));
    }
    if config.executor.min_spare_threads > config.executor.max_threads {
        errors.push(ValidationError::new(
            "executor.min_spare_threads",
            format!(
                "{} exceeds max_threads {}",
                config.executor.min_spare_threads, config.executor.max_threads
            ),
        ));
    }

    if config.nio.acceptor_thread_count == 0 {
        errors.push(ValidationError::new("nio.acceptor_thread_count", "must be greater than 0"));
    }
    if config.nio.poller_thread_count == 0 {
        errors.push(ValidationError::new("nio.poller_thread_count", "must be greater than 0"));
    }

    if CompressionMode::parse(&config.connector.compression).is_none() {
        errors.push(ValidationError::new(
            "connector.compression",
            format!("'{}' is not off, on, force or a size", config.connector.compression),
        ));
    }

    let min_size = match CompressionMode::parse(&config.connector.compression) {
        Some(CompressionMode::MinSize(n)) => n,
        _ => config.connector.compression_min_size_bytes,
    };
    if min_size > MAX_COMPRESSION_MIN_SIZE {
        errors.push(ValidationError::new(
            "connector.compression_min_size_bytes",
            format!("{} exceeds {}", min_size, MAX_COMPRESSION_MIN_SIZE),
        ));
    }

    if config.connector.max_http_header_size_bytes < MIN_HTTP_HEADER_SIZE {
        errors.push(ValidationError::new(
            "connector.max_http_header_size_bytes",
            format!(
                "{} is below the minimum of {}",
                config.connector.max_http_header_size_bytes, MIN_HTTP_HEADER_SIZE
            ),
        ));
    }

    if !is_utf8_label(&config.connector.uri_encoding) {
        errors.push(ValidationError::new(
            "connector.uri_encoding",
            format!("'{}' is not supported, only UTF-8", config.connector.uri_encoding),
        ));
    }

    if config.tls.enabled {
        if !config.tls.keystore_type.eq_ignore_ascii_case("PEM") {
            errors.push(ValidationError::new("tls.keystore_type", "only PEM keystores are supported"));
        }
        if config.tls.client_auth && !config.tls.truststore_type.eq_ignore_ascii_case("PEM") {
            errors.push(ValidationError::new("tls.truststore_type", "only PEM truststores are supported"));
        }
        if TlsProtocol::parse(&config.tls.protocol).is_none() {
            errors.push(ValidationError::new(
                "tls.protocol",
                format!("'{}' is not TLS, TLSv1.2 or TLSv1.3", config.tls.protocol),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// True for the spellings of UTF-8 accepted as an encoding label.
pub fn is_utf8_label(label: &str) -> bool {
    label.eq_ignore_ascii_case("UTF-8") || label.eq_ignore_ascii_case("UTF8")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&ServerConfig::default()).is_ok());
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.general.context_path = "app/".into();
        config.executor.max_threads = 0;
        config.connector.compression = "sometimes".into();

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"general.context_path"));
        assert!(fields.contains(&"executor.max_threads"));
        assert!(fields.contains(&"executor.min_spare_threads"));
        assert!(fields.contains(&"connector.compression"));
    }

    #[test]
    fn tls_checks_only_when_enabled() {
        let mut config = ServerConfig::default();
        config.tls.keystore_type = "JKS".into();
        assert!(validate_config(&config).is_ok());

        config.tls.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "tls.keystore_type");
    }

    #[test]
    fn context_path_shapes() {
        let mut config = ServerConfig::default();
        for ok in ["", "/", "/app", "/shop/v1"] {
            config.general.context_path = ok.into();
            assert!(validate_config(&config).is_ok(), "{:?} should be accepted", ok);
        }
        for bad in ["app", "/app/", "/{id}", "/files/*"] {
            config.general.context_path = bad.into();
            let errors = validate_config(&config).unwrap_err();
            assert!(errors.iter().all(|e| e.field == "general.context_path"), "{:?}", bad);
        }
    }

    #[test]
    fn connector_sizes_the_transport_cannot_honor() {
        let mut config = ServerConfig::default();
        config.connector.compression_min_size_bytes = 70_000;
        config.connector.max_http_header_size_bytes = 4096;
        let fields: Vec<_> = validate_config(&config).unwrap_err().iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["connector.compression_min_size_bytes", "connector.max_http_header_size_bytes"]
        );

        let mut config = ServerConfig::default();
        config.connector.compression = "100000".into();
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "connector.compression_min_size_bytes");
    }

    #[test]
    fn utf8_labels() {
        assert!(is_utf8_label("utf-8"));
        assert!(is_utf8_label("UTF8"));
        assert!(!is_utf8_label("ISO-8859-1"));
    }
}
