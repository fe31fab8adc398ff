//! Web application descriptor.
//!
//! The descriptor is an optional TOML file in the conf directory:
//!
//! ```toml
//! display_name = "shop"
//! welcome_files = ["index.html", "index.htm"]
//!
//! [context_params]
//! region = "eu"
//!
//! [mime_mappings]
//! webmanifest = "application/manifest+json"
//! ```

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::container::{ContainerError, LifecycleEvent, LifecycleListener, ServletContext};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct WebDescriptor {
    pub display_name: Option<String>,

    /// Context init parameters.
    pub context_params: BTreeMap<String, String>,

    /// Tried in order when a directory is requested.
    pub welcome_files: Vec<String>,

    /// Extension (without the dot) to content type.
    pub mime_mappings: BTreeMap<String, String>,
}

impl Default for WebDescriptor {
    fn default() -> Self {
        Self {
            display_name: None,
            context_params: BTreeMap::new(),
            welcome_files: vec!["index.html".to_string()],
            mime_mappings: BTreeMap::new(),
        }
    }
}

impl WebDescriptor {
    /// Read the descriptor, `Ok(None)` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, ContainerError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ContainerError::Io {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&contents)
            .map(Some)
            .map_err(|source| ContainerError::Descriptor {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Copy the descriptor's settings onto the context.
    pub fn apply(&self, context: &ServletContext) {
        if let Some(name) = &self.display_name {
            context.set_display_name(name.clone());
        }
        for (name, value) in &self.context_params {
            context.set_init_parameter(name.clone(), value.clone());
        }
        context.set_welcome_files(self.welcome_files.clone());
        for (extension, mime) in &self.mime_mappings {
            context.add_mime_mapping(extension.clone(), mime.clone());
        }
    }
}

/// Loads the web descriptor when the context starts.
#[derive(Debug, Clone)]
pub struct ContextConfigListener {
    descriptor_file: PathBuf,
}

impl ContextConfigListener {
    pub fn new(descriptor_file: PathBuf) -> Self {
        Self { descriptor_file }
    }
}

impl LifecycleListener for ContextConfigListener {
    fn lifecycle_event(&self, event: LifecycleEvent, context: &ServletContext) -> Result<(), ContainerError> {
        if event != LifecycleEvent::BeforeStart {
            return Ok(());
        }

        match WebDescriptor::load(&self.descriptor_file)? {
            Some(descriptor) => {
                descriptor.apply(context);
                tracing::debug!(
                    path = %self.descriptor_file.display(),
                    params = descriptor.context_params.len(),
                    "Web descriptor loaded"
                );
            }
            None => {
                WebDescriptor::default().apply(context);
                tracing::info!(
                    path = %self.descriptor_file.display(),
                    "No web descriptor found, using defaults"
                );
            }
        }
        Ok(())
    }
}
