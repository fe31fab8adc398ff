//! Embedded server lifecycle controller.
//!
//! # Responsibilities
//! - Build the component graph in a fixed order
//! - Hand the application context to the host binding layer
//! - Start and stop the graph, tearing down partial starts
//! - Answer runtime introspection queries
//!
//! # State Machine
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!              └──(failure, after teardown)──→ Stopped
//! ```
//!
//! `start` and `stop` are blocking and serialized by one mutex. They must
//! not be called from inside an async task.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::config::{validate_config, ServerConfig};
use crate::container::{ComponentBuilder, Container, ContainerError, ContextBinder, ServletContext};
use crate::executor::{ExecutorState, ThreadExecutor};
use crate::lifecycle::paths::ResolvedPaths;
use crate::net::TransportProperties;
use crate::observability::metrics;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already started")]
    AlreadyStarted,

    #[error("server is not started")]
    NotStarted,

    #[error("server failed to start: {0}")]
    Startup(#[source] ContainerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Inner {
    state: LifecycleState,
    container: Option<Container>,
    executor: Option<Arc<ThreadExecutor>>,
    servlet_context: Option<ServletContext>,
}

/// Embedded HTTP container driven by a [`ServerConfig`].
pub struct EmbeddedServer {
    config: ServerConfig,
    binder: Arc<dyn ContextBinder>,
    inner: Mutex<Inner>,
}

impl EmbeddedServer {
    pub fn new(config: ServerConfig, binder: Arc<dyn ContextBinder>) -> Self {
        Self {
            config,
            binder,
            inner: Mutex::new(Inner {
                state: LifecycleState::Stopped,
                container: None,
                executor: None,
                servlet_context: None,
            }),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build, bind and start the container under `base_dir`.
    ///
    /// The configuration is validated first; an invalid one fails with
    /// [`ServerError::Startup`] before anything is built.
    pub fn start(&self, base_dir: impl AsRef<Path>) -> Result<(), ServerError> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Stopped {
            return Err(ServerError::AlreadyStarted);
        }
        if let Err(errors) = validate_config(&self.config) {
            let message = errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ");
            tracing::error!(%message, "Embedded server rejected its configuration");
            return Err(ServerError::Startup(ContainerError::Config {
                component: "config",
                message,
            }));
        }
        inner.state = LifecycleState::Starting;

        match self.start_graph(&mut inner, base_dir.as_ref()) {
            Ok(()) => {
                inner.state = LifecycleState::Running;
                tracing::info!(
                    address = ?inner.container.as_ref().and_then(Container::local_addr),
                    context_path = %self.config.general.context_path,
                    "Embedded server started"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Embedded server failed to start");
                teardown(&mut inner);
                inner.state = LifecycleState::Stopped;
                Err(ServerError::Startup(e))
            }
        }
    }

    /// Stop the container, then the executor. Does nothing unless running.
    pub fn stop(&self) {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Running {
            tracing::debug!(state = ?inner.state, "Stop requested while not running");
            return;
        }
        inner.state = LifecycleState::Stopping;
        teardown(&mut inner);
        inner.state = LifecycleState::Stopped;
        tracing::info!("Embedded server stopped");
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    /// Address the connector is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().container.as_ref().and_then(Container::local_addr)
    }

    /// Context of the current run, available from bind until stop.
    pub fn servlet_context(&self) -> Option<ServletContext> {
        self.lock().servlet_context.clone()
    }

    pub fn scheme(&self) -> Option<&'static str> {
        self.lock().container.as_ref().map(|c| c.connector().scheme())
    }

    /// Transport properties forwarded by the connector of the current run.
    pub fn connector_properties(&self) -> Option<TransportProperties> {
        self.lock()
            .container
            .as_ref()
            .map(|c| c.connector().properties().clone())
    }

    /// Snapshot of the worker pool.
    pub fn executor_state(&self) -> Result<ExecutorState, ServerError> {
        let inner = self.lock();
        let executor = inner
            .executor
            .as_ref()
            .filter(|e| e.is_running())
            .ok_or(ServerError::NotStarted)?;

        let state = executor.state();
        metrics::record_executor_state(executor.name(), &state);
        Ok(state)
    }

    fn start_graph(&self, inner: &mut Inner, base_dir: &Path) -> Result<(), ContainerError> {
        let paths = ResolvedPaths::resolve(base_dir, &self.config);
        tracing::debug!(paths = %paths, "Resolved container paths");

        let builder = ComponentBuilder::new(&self.config, &paths);

        let executor = Arc::new(builder.build_executor());
        inner.executor = Some(Arc::clone(&executor));

        let mut engine = builder.build_engine();
        let mut host = builder.build_host();
        let context = builder.build_context();
        let mut connector = builder.build_connector()?;

        let servlet_context = context.servlet_context().clone();
        host.add_context(context);
        engine.add_host(host);
        connector.set_executor(executor.handle());

        let container = inner.container.insert(Container::new(engine, connector));
        inner.servlet_context = Some(servlet_context.clone());

        self.binder.bind(&servlet_context)?;
        executor.start()?;
        container.start()?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Stop whatever part of the graph exists. Failures are logged.
fn teardown(inner: &mut Inner) {
    if let Some(mut container) = inner.container.take() {
        if let Err(e) = container.stop() {
            tracing::warn!(error = %e, "Container did not stop cleanly");
        }
    }
    if let Some(executor) = inner.executor.take() {
        executor.stop();
    }
    inner.servlet_context = None;
}

impl Drop for EmbeddedServer {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for EmbeddedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddedServer")
            .field("state", &self.state())
            .field("port", &self.config.general.port)
            .finish()
    }
}
