//! Engine and virtual host.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::Router;

use crate::config::ErrorReportStyle;
use crate::container::{Context, ContainerError};

/// Name given to the engine of every embedded container.
pub const ENGINE_NAME: &str = "embedded";

/// Virtual host owning the application context.
#[derive(Debug)]
pub struct Host {
    name: String,
    error_report: ErrorReportStyle,
    work_dir: PathBuf,
    contexts: Vec<Context>,
}

impl Host {
    pub fn new(name: String, error_report: ErrorReportStyle, work_dir: PathBuf) -> Self {
        Self {
            name,
            error_report,
            work_dir,
            contexts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn error_report(&self) -> ErrorReportStyle {
        self.error_report
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn add_context(&mut self, context: Context) {
        self.contexts.push(context);
    }

    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Longest unload delay among the contexts.
    pub fn unload_delay(&self) -> Duration {
        self.contexts
            .iter()
            .map(Context::unload_delay)
            .max()
            .unwrap_or_default()
    }

    /// Start every context and merge their routers.
    pub fn start(&mut self) -> Result<Router, ContainerError> {
        let mut router = Router::new();
        for index in 0..self.contexts.len() {
            match self.contexts[index].start(self.error_report) {
                Ok(context_router) => router = router.merge(context_router),
                Err(e) => {
                    for started in &mut self.contexts[..index] {
                        started.stop();
                    }
                    return Err(e);
                }
            }
        }
        tracing::debug!(host = %self.name, contexts = self.contexts.len(), "Host started");
        Ok(router)
    }

    pub fn stop(&mut self) {
        for context in self.contexts.iter_mut().rev() {
            context.stop();
        }
    }
}

/// Top-level request processing component.
#[derive(Debug)]
pub struct Engine {
    name: String,
    base_dir: PathBuf,
    default_host: Option<String>,
    hosts: Vec<Host>,
}

impl Engine {
    pub fn new(name: String, base_dir: PathBuf) -> Self {
        Self {
            name,
            base_dir,
            default_host: None,
            hosts: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn default_host(&self) -> Option<&str> {
        self.default_host.as_deref()
    }

    /// Add a host. The first host added becomes the default host.
    pub fn add_host(&mut self, host: Host) {
        if self.default_host.is_none() {
            self.default_host = Some(host.name().to_string());
        }
        self.hosts.push(host);
    }

    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    fn host(&self) -> Option<&Host> {
        let name = self.default_host.as_deref()?;
        self.hosts.iter().find(|h| h.name() == name)
    }

    fn host_mut(&mut self) -> Option<&mut Host> {
        let name = self.default_host.clone()?;
        self.hosts.iter_mut().find(|h| h.name() == name)
    }

    pub fn error_report(&self) -> ErrorReportStyle {
        self.host().map(Host::error_report).unwrap_or_default()
    }

    pub fn unload_delay(&self) -> Duration {
        self.host().map(Host::unload_delay).unwrap_or_default()
    }

    /// Start the default host and return the router it serves.
    pub fn start(&mut self) -> Result<Router, ContainerError> {
        let name = self.name.clone();
        let host = self.host_mut().ok_or_else(|| ContainerError::Config {
            component: "engine",
            message: format!("engine {} has no default host", name),
        })?;
        host.start()
    }

    pub fn stop(&mut self) {
        if let Some(host) = self.host_mut() {
            host.stop();
        }
    }
}
