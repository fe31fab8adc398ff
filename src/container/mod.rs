//! Container component graph.
//!
//! # Data Flow
//! ```text
//! ComponentBuilder (config + resolved paths)
//!     → Engine ─ owns → Host ─ owns → Context ─ exposes → ServletContext
//!     → Connector (holds a weak ExecutorHandle)
//!     → Container { engine, connector }
//!
//! Container::start
//!     → Context fires BeforeStart (descriptor is loaded here)
//!     → application router assembled, AfterStart fired
//!     → Connector binds and serves the router
//! ```
//!
//! # Design Decisions
//! - Each component is built independently; wiring happens in the controller
//! - The executor is owned by the controller, never by the container
//! - The application only sees the ServletContext handle

pub mod binding;
pub mod builder;
pub mod context;
pub mod descriptor;
pub mod engine;
pub mod resources;
pub mod servlet_context;
pub mod session;

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::net::Connector;

pub use binding::{BindError, ContextBinder, NoopBinder};
pub use builder::ComponentBuilder;
pub use context::{Context, LifecycleEvent, LifecycleListener};
pub use descriptor::{ContextConfigListener, WebDescriptor};
pub use engine::{Engine, Host};
pub use resources::{EmbeddedResources, FileResources, Resource, ResourceCache, ResourceProvider};
pub use servlet_context::ServletContext;
pub use session::{Session, SessionError, SessionManager, SessionSlot};

/// Errors raised while building or running the component graph.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("invalid {component} configuration: {message}")]
    Config {
        component: &'static str,
        message: String,
    },

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed web descriptor {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("failed to build runtime {name}: {source}")]
    Runtime {
        name: String,
        #[source]
        source: io::Error,
    },

    #[error("connector failed while serving: {0}")]
    Serve(#[source] io::Error),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("lifecycle listener failed: {0}")]
    Listener(String),

    #[error(transparent)]
    Binding(#[from] BindError),
}

/// Root of the component graph: one engine and one connector.
#[derive(Debug)]
pub struct Container {
    engine: Engine,
    connector: Connector,
}

impl Container {
    pub fn new(engine: Engine, connector: Connector) -> Self {
        Self { engine, connector }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.connector.local_addr()
    }

    /// Start the engine, then begin serving its default host.
    pub fn start(&mut self) -> Result<(), ContainerError> {
        let router = self.engine.start()?;
        let style = self.engine.error_report();

        if let Err(e) = self.connector.start(router, style) {
            self.engine.stop();
            return Err(e);
        }

        tracing::info!(
            engine = %self.engine.name(),
            default_host = self.engine.default_host().unwrap_or(""),
            scheme = self.connector.scheme(),
            "Container started"
        );
        Ok(())
    }

    /// Stop the connector, draining for the context unload delay, then the
    /// engine. The engine is stopped even if the connector fails.
    pub fn stop(&mut self) -> Result<(), ContainerError> {
        let grace = self.engine.unload_delay();
        let connector = self.connector.stop(grace);
        self.engine.stop();
        tracing::info!(engine = %self.engine.name(), "Container stopped");
        connector
    }
}
