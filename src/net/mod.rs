//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → socket.rs (listener options, per-stream tuning)
//!     → tls.rs (optional TLS handshake)
//!     → connector.rs (per-connection service, keep-alive limit)
//!     → compression.rs (gzip on the way out)
//!     → Hand off to the executor
//! ```
//!
//! # Design Decisions
//! - The connector owns its own I/O runtime, separate from the worker pool
//! - Socket options are forwarded only when they differ from their sentinel
//! - TLS key material is loaded when the connector is built

pub mod compression;
pub mod connector;
pub mod socket;
pub mod tls;

pub use compression::{CompressionMode, CompressionSettings};
pub use connector::{Connector, ConnectorSettings};
pub use socket::{socket_properties, SocketOptions, TransportProperties};
pub use tls::{build_server_config, TlsProtocol, TlsSettings};
