//! TLS configuration and certificate loading.
//!
//! Keystores and truststores are PEM files: the keystore holds the
//! certificate chain followed by the private key, the truststore holds the
//! CA certificates accepted for client authentication.
//!
//! A configured CRL is always reported in the connector properties but is
//! only loaded when client authentication is on, since it applies to the
//! client certificate verifier.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, CertificateRevocationListDer, PrivateKeyDer};
use rustls::server::{ServerSessionMemoryCache, WebPkiClientVerifier};
use rustls::{RootCertStore, ServerConfig, SupportedProtocolVersion};

use crate::container::ContainerError;

/// Accepted values of the `protocol` option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProtocol {
    /// Every version the provider supports.
    Any,
    Tls12,
    Tls13,
}

impl TlsProtocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TLS" => Some(Self::Any),
            "TLSV1.2" => Some(Self::Tls12),
            "TLSV1.3" => Some(Self::Tls13),
            _ => None,
        }
    }

    fn versions(&self) -> &'static [&'static SupportedProtocolVersion] {
        static TLS12: &[&SupportedProtocolVersion] = &[&rustls::version::TLS12];
        static TLS13: &[&SupportedProtocolVersion] = &[&rustls::version::TLS13];
        match self {
            Self::Any => rustls::ALL_VERSIONS,
            Self::Tls12 => TLS12,
            Self::Tls13 => TLS13,
        }
    }
}

/// Resolved TLS settings, ready to be turned into a rustls config.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub keystore_file: PathBuf,
    pub client_auth: bool,
    pub truststore_file: PathBuf,
    /// Loaded into the client verifier; `None` without client auth.
    pub crl_file: Option<PathBuf>,
    pub protocol: TlsProtocol,
    pub ciphers: Vec<String>,
    pub session_cache_size: usize,
}

/// Build the rustls server configuration, reading every referenced file.
pub fn build_server_config(settings: &TlsSettings) -> Result<ServerConfig, ContainerError> {
    let certs = load_certs(&settings.keystore_file)?;
    if certs.is_empty() {
        return Err(ContainerError::Tls(format!(
            "no certificate found in {}",
            settings.keystore_file.display()
        )));
    }
    let key = load_private_key(&settings.keystore_file)?;

    let mut provider = rustls::crypto::aws_lc_rs::default_provider();
    if !settings.ciphers.is_empty() {
        provider.cipher_suites.retain(|suite| {
            let name = format!("{:?}", suite.suite());
            settings.ciphers.iter().any(|c| c.eq_ignore_ascii_case(&name))
        });
        if provider.cipher_suites.is_empty() {
            return Err(ContainerError::Tls(format!(
                "none of the configured ciphers are supported: {}",
                settings.ciphers.join(",")
            )));
        }
    }
    let provider = Arc::new(provider);

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(settings.protocol.versions())
        .map_err(|e| ContainerError::Tls(format!("unsupported protocol selection: {}", e)))?;

    let builder = if settings.client_auth {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(&settings.truststore_file)? {
            roots
                .add(cert)
                .map_err(|e| ContainerError::Tls(format!("bad truststore certificate: {}", e)))?;
        }

        let crls = match &settings.crl_file {
            Some(path) => load_crls(path)?,
            None => Vec::new(),
        };

        let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
            .with_crls(crls)
            .build()
            .map_err(|e| ContainerError::Tls(format!("client verifier: {}", e)))?;
        builder.with_client_cert_verifier(verifier)
    } else {
        builder.with_no_client_auth()
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| ContainerError::Tls(format!("could not load cert/key: {}", e)))?;

    if settings.session_cache_size > 0 {
        config.session_storage = ServerSessionMemoryCache::new(settings.session_cache_size);
    }
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(config)
}

fn open(path: &Path) -> Result<BufReader<File>, ContainerError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ContainerError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ContainerError> {
    let mut reader = open(path)?;
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ContainerError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ContainerError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|source| ContainerError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .ok_or_else(|| ContainerError::Tls(format!("no private key found in {}", path.display())))
}

fn load_crls(path: &Path) -> Result<Vec<CertificateRevocationListDer<'static>>, ContainerError> {
    let mut reader = open(path)?;
    rustls_pemfile::crls(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| ContainerError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(keystore: PathBuf) -> TlsSettings {
        TlsSettings {
            keystore_file: keystore,
            client_auth: false,
            truststore_file: PathBuf::from("/nonexistent/truststore.pem"),
            crl_file: None,
            protocol: TlsProtocol::Any,
            ciphers: Vec::new(),
            session_cache_size: 0,
        }
    }

    #[test]
    fn parses_protocols() {
        assert_eq!(TlsProtocol::parse("TLS"), Some(TlsProtocol::Any));
        assert_eq!(TlsProtocol::parse("TLSv1.2"), Some(TlsProtocol::Tls12));
        assert_eq!(TlsProtocol::parse("tlsv1.3"), Some(TlsProtocol::Tls13));
        assert_eq!(TlsProtocol::parse("SSLv3"), None);
        assert_eq!(TlsProtocol::Tls13.versions().len(), 1);
    }

    #[test]
    fn missing_keystore_is_io_error() {
        let err = build_server_config(&settings(PathBuf::from("/nonexistent/keystore.pem"))).unwrap_err();
        assert!(matches!(err, ContainerError::Io { .. }));
    }

    #[test]
    fn keystore_without_certificate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keystore.pem");
        std::fs::write(&path, "not a pem file\n").unwrap();

        let err = build_server_config(&settings(path)).unwrap_err();
        assert!(matches!(err, ContainerError::Tls(_)));
    }
}
