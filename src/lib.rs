//! Embedded HTTP container.
//!
//! Boots an engine/host/context/connector graph on tokio, hyper and axum
//! from a typed [`ServerConfig`], hands the application context to a
//! [`ContextBinder`], and reports worker-pool state.

// Core subsystems
pub mod config;
pub mod container;
pub mod executor;
pub mod http;
pub mod net;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::ServerConfig;
pub use container::{BindError, ContextBinder, ServletContext};
pub use executor::ExecutorState;
pub use lifecycle::{EmbeddedServer, LifecycleState, ServerError};
