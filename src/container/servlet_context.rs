//! Application-facing view of a context.

use std::any::Any;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use axum::body::Bytes;
use axum::routing::MethodRouter;
use axum::Router;
use dashmap::DashMap;

use crate::container::resources::normalize_path;
use crate::container::{LifecycleListener, ResourceProvider, SessionManager};

struct Inner {
    context_path: String,
    doc_base: PathBuf,
    work_dir: PathBuf,
    display_name: RwLock<Option<String>>,
    init_params: RwLock<BTreeMap<String, String>>,
    attributes: DashMap<String, Arc<dyn Any + Send + Sync>>,
    routes: Mutex<Router>,
    listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
    sessions: Arc<SessionManager>,
    resources: Arc<ResourceProvider>,
    welcome_files: RwLock<Vec<String>>,
    mime_mappings: RwLock<BTreeMap<String, String>>,
}

/// Handle to the running application context. Clones share state.
///
/// Routes registered here are served relative to the context path. A
/// request that matches no route falls through to the static resources.
#[derive(Clone)]
pub struct ServletContext {
    inner: Arc<Inner>,
}

impl ServletContext {
    pub fn new(
        context_path: String,
        doc_base: PathBuf,
        work_dir: PathBuf,
        sessions: Arc<SessionManager>,
        resources: Arc<ResourceProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                context_path: root_or(context_path),
                doc_base,
                work_dir,
                display_name: RwLock::new(None),
                init_params: RwLock::new(BTreeMap::new()),
                attributes: DashMap::new(),
                routes: Mutex::new(Router::new()),
                listeners: RwLock::new(Vec::new()),
                sessions,
                resources,
                welcome_files: RwLock::new(vec!["index.html".to_string()]),
                mime_mappings: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Context path, `""` for the root context. `"/"` is stored as `""`.
    pub fn context_path(&self) -> &str {
        &self.inner.context_path
    }

    pub fn doc_base(&self) -> &Path {
        &self.inner.doc_base
    }

    /// Scratch directory for the application.
    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    /// Filesystem location of a path under the doc base.
    pub fn real_path(&self, path: &str) -> Option<PathBuf> {
        let normalized = normalize_path(path)?;
        if normalized.is_empty() {
            Some(self.inner.doc_base.clone())
        } else {
            Some(self.inner.doc_base.join(normalized))
        }
    }

    pub fn display_name(&self) -> Option<String> {
        self.inner.display_name.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.inner.display_name.write().unwrap_or_else(|e| e.into_inner()) = Some(name.into());
    }

    pub fn init_parameter(&self, name: &str) -> Option<String> {
        self.inner
            .init_params
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    pub fn init_parameters(&self) -> BTreeMap<String, String> {
        self.inner.init_params.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_init_parameter(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner
            .init_params
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into(), value.into());
    }

    pub fn attribute<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = self.inner.attributes.get(name).map(|v| Arc::clone(v.value()))?;
        value.downcast::<T>().ok()
    }

    pub fn set_attribute<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.inner.attributes.insert(name.into(), Arc::new(value));
    }

    pub fn remove_attribute(&self, name: &str) -> bool {
        self.inner.attributes.remove(name).is_some()
    }

    /// Register a handler at `path`, relative to the context path.
    pub fn route(&self, path: &str, method_router: MethodRouter) {
        let mut routes = self.inner.routes.lock().unwrap_or_else(|e| e.into_inner());
        *routes = std::mem::take(&mut *routes).route(path, method_router);
    }

    /// Merge a whole router into the application routes.
    pub fn merge(&self, router: Router) {
        let mut routes = self.inner.routes.lock().unwrap_or_else(|e| e.into_inner());
        *routes = std::mem::take(&mut *routes).merge(router);
    }

    pub(crate) fn take_routes(&self) -> Router {
        std::mem::take(&mut *self.inner.routes.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn add_listener(&self, listener: Arc<dyn LifecycleListener>) {
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(listener);
    }

    pub(crate) fn listeners(&self) -> Vec<Arc<dyn LifecycleListener>> {
        self.inner.listeners.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        Arc::clone(&self.inner.sessions)
    }

    pub fn resources(&self) -> Arc<ResourceProvider> {
        Arc::clone(&self.inner.resources)
    }

    /// Register an in-memory resource. Only embedded providers accept them.
    pub fn register_resource(&self, path: &str, content: impl Into<Bytes>) -> bool {
        match self.inner.resources.as_ref() {
            ResourceProvider::Embedded(embedded) => embedded.register(path, content),
            ResourceProvider::Filesystem(_) => {
                tracing::warn!(path, "Filesystem resources are read from the doc base");
                false
            }
        }
    }

    pub fn welcome_files(&self) -> Vec<String> {
        self.inner.welcome_files.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_welcome_files(&self, files: Vec<String>) {
        *self.inner.welcome_files.write().unwrap_or_else(|e| e.into_inner()) = files;
    }

    pub fn mime_mappings(&self) -> BTreeMap<String, String> {
        self.inner.mime_mappings.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn add_mime_mapping(&self, extension: impl Into<String>, mime: impl Into<String>) {
        self.inner
            .mime_mappings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(extension.into().to_ascii_lowercase(), mime.into());
    }
}

impl std::fmt::Debug for ServletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServletContext")
            .field("context_path", &self.inner.context_path)
            .field("doc_base", &self.inner.doc_base)
            .field("resources", &self.inner.resources.kind())
            .finish()
    }
}

fn root_or(context_path: String) -> String {
    if context_path == "/" {
        String::new()
    } else {
        context_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::EmbeddedResources;

    fn context() -> ServletContext {
        ServletContext::new(
            "/app".to_string(),
            PathBuf::from("/srv/app/webapp"),
            PathBuf::from("/srv/app/work"),
            Arc::new(SessionManager::new(None, None)),
            Arc::new(ResourceProvider::Embedded(EmbeddedResources::new())),
        )
    }

    #[test]
    fn typed_attributes() {
        let ctx = context();
        ctx.set_attribute("counter", 42u32);
        assert_eq!(ctx.attribute::<u32>("counter").as_deref(), Some(&42));
        assert!(ctx.attribute::<String>("counter").is_none());
        assert!(ctx.remove_attribute("counter"));
        assert!(ctx.attribute::<u32>("counter").is_none());
    }

    #[test]
    fn real_path_stays_under_doc_base() {
        let ctx = context();
        assert_eq!(ctx.real_path("/img/logo.png"), Some(PathBuf::from("/srv/app/webapp/img/logo.png")));
        assert_eq!(ctx.real_path("/"), Some(PathBuf::from("/srv/app/webapp")));
        assert_eq!(ctx.real_path("/../etc"), None);
    }

    #[test]
    fn clones_share_state() {
        let ctx = context();
        let other = ctx.clone();
        other.set_init_parameter("region", "eu");
        assert_eq!(ctx.init_parameter("region").as_deref(), Some("eu"));
        assert!(ctx.register_resource("/a.txt", "a"));
    }
}
