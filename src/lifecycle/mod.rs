//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (server.rs):
//!     Resolve paths (paths.rs) → Build executor → Build engine, host,
//!     context, connector → Wire graph → Bind application
//!     → Start executor → Start container → Running
//!
//! Shutdown (server.rs):
//!     Stop container (drain, context stop events) → Stop executor → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → binary calls EmbeddedServer::stop
//! ```
//!
//! # Design Decisions
//! - Ordered startup: nothing starts until the whole graph is built
//! - A failed start tears down whatever was started, then reports
//! - Shutdown failures are logged, never returned

pub mod paths;
pub mod server;
pub mod signals;

pub use paths::ResolvedPaths;
pub use server::{EmbeddedServer, LifecycleState, ServerError};
pub use signals::shutdown_signal;
