//! Response compression settings.

use std::sync::Arc;

use axum::body::HttpBody;
use axum::http::{header, Response};
use tower_http::compression::predicate::{And, Predicate, SizeAbove};
use tower_http::compression::CompressionLayer;

/// Compression policy parsed from the connector's `compression` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMode {
    Off,
    /// Compress eligible types above the configured minimum size.
    On,
    /// Compress every response the client accepts compressed.
    Force,
    /// `on` with an explicit minimum size.
    MinSize(u64),
}

impl CompressionMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "off" | "false" | "no" => Some(Self::Off),
            "on" | "true" | "yes" => Some(Self::On),
            "force" => Some(Self::Force),
            other => other.parse().ok().map(Self::MinSize),
        }
    }

    pub fn as_str(&self) -> String {
        match self {
            Self::Off => "off".to_string(),
            Self::On => "on".to_string(),
            Self::Force => "force".to_string(),
            Self::MinSize(n) => n.to_string(),
        }
    }
}

/// Compression settings recorded on the connector.
///
/// Always built from configuration; with [`CompressionMode::Off`] no layer
/// is installed.
#[derive(Debug, Clone)]
pub struct CompressionSettings {
    pub mode: CompressionMode,
    pub min_size_bytes: u64,
    pub mime_types: Arc<[String]>,
    pub excluded_user_agents: Arc<[String]>,
}

impl CompressionSettings {
    /// Smallest compressed response, or `None` when compression is off.
    pub fn threshold(&self) -> Option<u64> {
        match self.mode {
            CompressionMode::Off => None,
            CompressionMode::On => Some(self.min_size_bytes),
            CompressionMode::Force => Some(0),
            CompressionMode::MinSize(n) => Some(n),
        }
    }

    /// gzip layer for the connector, if compression is enabled.
    pub fn layer(&self) -> Option<CompressionLayer<And<SizeAbove, MimeTypes>>> {
        let threshold = self.threshold()?;
        let size = match u16::try_from(threshold) {
            Ok(size) => size,
            Err(_) => {
                tracing::warn!(
                    configured = threshold,
                    applied = u16::MAX,
                    "Clamping compression threshold"
                );
                u16::MAX
            }
        };
        let size = SizeAbove::new(size);
        let types = MimeTypes {
            types: Arc::clone(&self.mime_types),
            any: self.mode == CompressionMode::Force,
        };
        Some(CompressionLayer::new().compress_when(size.and(types)))
    }
}

/// Only compress responses whose content type is in the list.
#[derive(Debug, Clone)]
pub struct MimeTypes {
    types: Arc<[String]>,
    any: bool,
}

impl Predicate for MimeTypes {
    fn should_compress<B>(&self, response: &Response<B>) -> bool
    where
        B: HttpBody,
    {
        if self.any {
            return true;
        }
        let essence = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(|v| v.trim().to_ascii_lowercase());

        match essence {
            Some(essence) => self.types.iter().any(|t| t.eq_ignore_ascii_case(&essence)),
            None => false,
        }
    }
}
