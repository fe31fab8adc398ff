//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ServerConfig (validated, immutable)
//!     → handed once to EmbeddedServer::new
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; a running server never sees changes
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    ConnectorConfig, ContextConfig, ErrorReportStyle, ExecutorConfig, FsConfig, GeneralConfig,
    HostConfig, NioConfig, ServerConfig, SocketConfig, TlsConfig,
};
pub use validation::{validate_config, ValidationError};
