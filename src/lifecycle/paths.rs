//! Filesystem path resolution.
//!
//! Every path the container touches is derived here from the base directory
//! and the configuration, by plain concatenation. Nothing is checked on disk:
//! a bad path surfaces later, when the component that needs the file opens it.

use std::fmt;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};

use crate::config::ServerConfig;

/// Absolute paths resolved once per start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPaths {
    pub base_dir: PathBuf,
    pub conf_dir: PathBuf,
    pub work_dir: PathBuf,
    pub doc_base_dir: PathBuf,
    pub web_descriptor_file: PathBuf,
    pub keystore_file: PathBuf,
    pub truststore_file: PathBuf,
    pub crl_file: PathBuf,
}

impl ResolvedPaths {
    /// Resolve all paths under `base_dir`.
    pub fn resolve(base_dir: &Path, config: &ServerConfig) -> Self {
        let base = absolute_string(base_dir);
        let conf = join(&base, &config.fs.conf_dir);

        Self {
            work_dir: PathBuf::from(join(&base, &config.fs.work_dir)),
            doc_base_dir: PathBuf::from(join(&base, &config.general.doc_base_dir)),
            web_descriptor_file: PathBuf::from(join(&conf, &config.fs.web_descriptor)),
            keystore_file: PathBuf::from(join(&conf, &config.tls.keystore_file)),
            truststore_file: PathBuf::from(join(&conf, &config.tls.truststore_file)),
            crl_file: PathBuf::from(join(&conf, &config.tls.crl_file)),
            conf_dir: PathBuf::from(conf),
            base_dir: PathBuf::from(base),
        }
    }
}

fn absolute_string(base_dir: &Path) -> String {
    // std::path::absolute only consults the current directory for relative input
    let absolute = std::path::absolute(base_dir).unwrap_or_else(|_| base_dir.to_path_buf());
    let mut s = absolute.to_string_lossy().into_owned();
    while s.len() > 1 && s.ends_with(MAIN_SEPARATOR) {
        s.pop();
    }
    s
}

fn join(parent: &str, child: &str) -> String {
    if parent.ends_with(MAIN_SEPARATOR) {
        format!("{}{}", parent, child)
    } else {
        format!("{}{}{}", parent, MAIN_SEPARATOR, child)
    }
}

impl fmt::Display for ResolvedPaths {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "base_dir={} conf_dir={} work_dir={} doc_base_dir={} web_descriptor={} keystore={} truststore={} crl={}",
            self.base_dir.display(),
            self.conf_dir.display(),
            self.work_dir.display(),
            self.doc_base_dir.display(),
            self.web_descriptor_file.display(),
            self.keystore_file.display(),
            self.truststore_file.display(),
            self.crl_file.display(),
        )
    }
}
