//! Host application binding surface.

use std::error::Error as StdError;
use std::fmt;

use crate::container::ServletContext;

/// Error returned by a [`ContextBinder`].
#[derive(Debug)]
pub struct BindError {
    message: String,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl BindError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(message: impl Into<String>, source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "application binding failed: {}", self.message)
    }
}

impl StdError for BindError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

/// Attaches the host application to a freshly built context.
///
/// Called once per start, after the component graph is built and before
/// anything is started. Typical binders register routes, listeners and
/// attributes on the context.
pub trait ContextBinder: Send + Sync {
    fn bind(&self, context: &ServletContext) -> Result<(), BindError>;
}

impl<F> ContextBinder for F
where
    F: Fn(&ServletContext) -> Result<(), BindError> + Send + Sync,
{
    fn bind(&self, context: &ServletContext) -> Result<(), BindError> {
        self(context)
    }
}

/// Binder that registers nothing; the context serves static resources only.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBinder;

impl ContextBinder for NoopBinder {
    fn bind(&self, context: &ServletContext) -> Result<(), BindError> {
        tracing::debug!(context_path = %context.context_path(), "No application bound");
        Ok(())
    }
}
