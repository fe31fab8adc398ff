//! Static resources of a context.
//!
//! # Responsibilities
//! - Look up resources on disk under the doc base, or in memory
//! - Cache filesystem content within size and age bounds
//! - Serve resources for requests no application route matched
//!
//! # Design Decisions
//! - Request paths are normalized before any lookup; `..` never escapes
//! - Disk reads run on the blocking pool

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use axum::body::{Body, Bytes};
use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::Response;
use dashmap::DashMap;

use crate::config::ErrorReportStyle;
use crate::container::ServletContext;
use crate::http::error_response;
use crate::observability::metrics;

/// One static resource.
#[derive(Debug, Clone)]
pub struct Resource {
    /// Normalized path relative to the context root, no leading slash.
    pub path: String,
    pub content: Bytes,
    pub last_modified: Option<SystemTime>,
}

/// Cache bounds, already converted to bytes and a duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub allowed: bool,
    pub max_size_bytes: usize,
    pub object_max_size_bytes: usize,
    pub ttl: Duration,
}

#[derive(Debug)]
struct CachedEntry {
    resource: Arc<Resource>,
    loaded: Instant,
}

/// Bounded cache of filesystem resources.
#[derive(Debug)]
pub struct ResourceCache {
    settings: CacheSettings,
    entries: DashMap<String, CachedEntry>,
    size: AtomicUsize,
}

impl ResourceCache {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            settings,
            entries: DashMap::new(),
            size: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn get(&self, path: &str) -> Option<Arc<Resource>> {
        if !self.settings.allowed {
            return None;
        }
        let hit = self.entries.get(path).and_then(|e| {
            (e.loaded.elapsed() <= self.settings.ttl).then(|| Arc::clone(&e.resource))
        });
        if hit.is_none() {
            self.remove(path);
        }
        hit
    }

    pub fn insert(&self, resource: Arc<Resource>) {
        let len = resource.content.len();
        if !self.settings.allowed
            || len > self.settings.object_max_size_bytes
            || len > self.settings.max_size_bytes
        {
            return;
        }

        self.remove(&resource.path);
        self.make_room(len);
        self.size.fetch_add(len, Ordering::SeqCst);
        self.entries.insert(
            resource.path.clone(),
            CachedEntry {
                resource,
                loaded: Instant::now(),
            },
        );
        metrics::record_resource_cache(self.size_bytes());
    }

    pub fn size_bytes(&self) -> usize {
        self.size.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.size.store(0, Ordering::SeqCst);
    }

    /// Evict expired entries, then the oldest, until `incoming` fits.
    fn make_room(&self, incoming: usize) {
        let fits = |cache: &Self| cache.size_bytes() + incoming <= cache.settings.max_size_bytes;
        if fits(self) {
            return;
        }

        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.loaded.elapsed() > self.settings.ttl)
            .map(|e| e.key().clone())
            .collect();
        for path in &expired {
            self.remove(path);
        }

        while !fits(self) {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.loaded)
                .map(|e| e.key().clone());
            match oldest {
                Some(path) => {
                    self.remove(&path);
                }
                None => break,
            }
        }
    }

    fn remove(&self, path: &str) {
        if let Some((_, entry)) = self.entries.remove(path) {
            self.size.fetch_sub(entry.resource.content.len(), Ordering::SeqCst);
        }
    }
}

/// Resources read from the doc base directory.
#[derive(Debug)]
pub struct FileResources {
    root: PathBuf,
    cache: ResourceCache,
}

impl FileResources {
    pub fn new(root: PathBuf, cache: CacheSettings) -> Self {
        Self {
            root,
            cache: ResourceCache::new(cache),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    fn get(&self, path: &str) -> io::Result<Option<Arc<Resource>>> {
        if let Some(hit) = self.cache.get(path) {
            return Ok(Some(hit));
        }

        let file = self.root.join(path);
        let metadata = match std::fs::metadata(&file) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let content = std::fs::read(&file)?;

        let resource = Arc::new(Resource {
            path: path.to_string(),
            content: Bytes::from(content),
            last_modified: metadata.modified().ok(),
        });
        self.cache.insert(Arc::clone(&resource));
        Ok(Some(resource))
    }

    fn is_directory(&self, path: &str) -> bool {
        self.root.join(path).is_dir()
    }
}

/// Resources registered in memory by the application.
#[derive(Debug, Default)]
pub struct EmbeddedResources {
    entries: DashMap<String, Arc<Resource>>,
}

impl EmbeddedResources {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `content` under `path`. Returns false for paths that do not
    /// normalize.
    pub fn register(&self, path: &str, content: impl Into<Bytes>) -> bool {
        let Some(path) = normalize_path(path) else {
            return false;
        };
        self.entries.insert(
            path.clone(),
            Arc::new(Resource {
                path,
                content: content.into(),
                last_modified: Some(SystemTime::now()),
            }),
        );
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn get(&self, path: &str) -> Option<Arc<Resource>> {
        self.entries.get(path).map(|e| Arc::clone(e.value()))
    }

    fn is_directory(&self, path: &str) -> bool {
        let prefix = format!("{}/", path);
        path.is_empty() || self.entries.iter().any(|e| e.key().starts_with(&prefix))
    }
}

/// Where a context's static resources come from.
#[derive(Debug)]
pub enum ResourceProvider {
    Filesystem(FileResources),
    Embedded(EmbeddedResources),
}

impl ResourceProvider {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Filesystem(_) => "filesystem",
            Self::Embedded(_) => "embedded",
        }
    }

    /// Look up a normalized path.
    pub fn get(&self, path: &str) -> io::Result<Option<Arc<Resource>>> {
        match self {
            Self::Filesystem(files) => files.get(path),
            Self::Embedded(embedded) => Ok(embedded.get(path)),
        }
    }

    pub fn is_directory(&self, path: &str) -> bool {
        match self {
            Self::Filesystem(files) => files.is_directory(path),
            Self::Embedded(embedded) => embedded.is_directory(path),
        }
    }

    /// Resolve a request path, trying welcome files for directories.
    pub fn resolve(&self, request_path: &str, welcome_files: &[String]) -> io::Result<Option<Arc<Resource>>> {
        let Some(path) = normalize_path(request_path) else {
            return Ok(None);
        };

        if !path.is_empty() && !request_path.ends_with('/') && !self.is_directory(&path) {
            return self.get(&path);
        }

        for welcome in welcome_files {
            let candidate = if path.is_empty() {
                welcome.clone()
            } else {
                format!("{}/{}", path, welcome)
            };
            if let Some(resource) = self.get(&candidate)? {
                return Ok(Some(resource));
            }
        }
        Ok(None)
    }

    pub fn clear_cache(&self) {
        if let Self::Filesystem(files) = self {
            files.cache.clear();
        }
    }
}

/// Decode and normalize a request path. `None` if it would escape the root.
pub fn normalize_path(path: &str) -> Option<String> {
    let decoded = percent_decode(path)?;
    if decoded.contains('\0') || decoded.contains('\\') {
        return None;
    }

    let mut segments = Vec::new();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            s => segments.push(s),
        }
    }
    Some(segments.join("/"))
}

fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// Content type by extension: context mappings first, then the built-ins.
pub fn mime_type(path: &str, mappings: &BTreeMap<String, String>) -> String {
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    if let Some(mime) = mappings.get(&extension) {
        return mime.clone();
    }

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "text/javascript",
        "json" => "application/json",
        "txt" => "text/plain",
        "xml" => "text/xml",
        "csv" => "text/csv",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "ico" => "image/x-icon",
        "webp" => "image/webp",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        _ => "application/octet-stream",
    }
    .to_string()
}

/// Fallback handler serving the context's static resources.
#[derive(Clone)]
pub struct StaticFiles {
    context: ServletContext,
    error_report: ErrorReportStyle,
}

impl StaticFiles {
    pub fn new(context: ServletContext, error_report: ErrorReportStyle) -> Self {
        Self { context, error_report }
    }

    pub async fn serve(self, request: Request) -> Response {
        let method = request.method().clone();
        if method != Method::GET && method != Method::HEAD {
            let mut response = error_response(self.error_report, StatusCode::METHOD_NOT_ALLOWED, None);
            response
                .headers_mut()
                .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
            return response;
        }

        let path = request.uri().path().to_string();
        let resources = self.context.resources();
        let welcome = self.context.welcome_files();
        let lookup = tokio::task::spawn_blocking(move || resources.resolve(&path, &welcome)).await;

        let resource = match lookup {
            Ok(Ok(Some(resource))) => resource,
            Ok(Ok(None)) => {
                return error_response(self.error_report, StatusCode::NOT_FOUND, Some(request.uri().path()))
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %request.uri().path(), error = %e, "Resource read failed");
                return error_response(self.error_report, StatusCode::INTERNAL_SERVER_ERROR, None);
            }
            Err(e) => {
                tracing::error!(error = %e, "Resource lookup task failed");
                return error_response(self.error_report, StatusCode::INTERNAL_SERVER_ERROR, None);
            }
        };

        let content_type = mime_type(&resource.path, &self.context.mime_mappings());
        let body = if method == Method::HEAD {
            Body::empty()
        } else {
            Body::from(resource.content.clone())
        };

        let mut response = Response::new(body);
        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&content_type) {
            headers.insert(header::CONTENT_TYPE, value);
        }
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(resource.content.len()));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache(max: usize, object_max: usize) -> CacheSettings {
        CacheSettings {
            allowed: true,
            max_size_bytes: max,
            object_max_size_bytes: object_max,
            ttl: Duration::from_secs(60),
        }
    }

    fn resource(path: &str, len: usize) -> Arc<Resource> {
        Arc::new(Resource {
            path: path.to_string(),
            content: Bytes::from(vec![b'x'; len]),
            last_modified: None,
        })
    }

    #[test]
    fn normalizes_paths() {
        assert_eq!(normalize_path("/a/./b//c.txt").as_deref(), Some("a/b/c.txt"));
        assert_eq!(normalize_path("/").as_deref(), Some(""));
        assert_eq!(normalize_path("/a%20b.txt").as_deref(), Some("a b.txt"));
        assert_eq!(normalize_path("/../etc/passwd"), None);
        assert_eq!(normalize_path("/%2e%2e/secret"), None);
        assert_eq!(normalize_path("/bad%zz"), None);
    }

    #[test]
    fn cache_respects_object_limit() {
        let cache = ResourceCache::new(cache(100, 10));
        cache.insert(resource("big", 11));
        cache.insert(resource("small", 10));
        assert!(cache.get("big").is_none());
        assert!(cache.get("small").is_some());
        assert_eq!(cache.size_bytes(), 10);
    }

    #[test]
    fn cache_evicts_oldest_when_full() {
        let cache = ResourceCache::new(cache(20, 20));
        cache.insert(resource("a", 10));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(resource("b", 10));
        std::thread::sleep(Duration::from_millis(2));
        cache.insert(resource("c", 10));

        assert!(cache.get("a").is_none());
        assert!(cache.get("b").is_some());
        assert!(cache.get("c").is_some());
        assert_eq!(cache.size_bytes(), 20);
    }

    #[test]
    fn cache_entries_expire() {
        let cache = ResourceCache::new(CacheSettings {
            ttl: Duration::from_millis(10),
            ..cache(100, 100)
        });
        cache.insert(resource("a", 5));
        std::thread::sleep(Duration::from_millis(30));
        assert!(cache.get("a").is_none());
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn disabled_cache_stores_nothing() {
        let cache = ResourceCache::new(CacheSettings {
            allowed: false,
            ..cache(100, 100)
        });
        cache.insert(resource("a", 5));
        assert!(cache.is_empty());
    }

    #[test]
    fn filesystem_resolves_welcome_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("docs")).unwrap();
        std::fs::write(dir.path().join("index.html"), "root").unwrap();
        std::fs::write(dir.path().join("docs/index.html"), "docs").unwrap();

        let provider = ResourceProvider::Filesystem(FileResources::new(dir.path().to_path_buf(), cache(1024, 1024)));
        let welcome = vec!["index.html".to_string()];

        let root = provider.resolve("/", &welcome).unwrap().unwrap();
        assert_eq!(&root.content[..], b"root");
        let docs = provider.resolve("/docs", &welcome).unwrap().unwrap();
        assert_eq!(&docs.content[..], b"docs");
        assert!(provider.resolve("/missing.txt", &welcome).unwrap().is_none());
        assert!(provider.resolve("/../index.html", &welcome).unwrap().is_none());
    }

    #[test]
    fn embedded_resources_resolve() {
        let embedded = EmbeddedResources::new();
        assert!(embedded.register("/static/app.js", "console.log(1)"));
        assert!(embedded.register("index.html", "<h1>hi</h1>"));
        assert!(!embedded.register("/../x", "nope"));

        let provider = ResourceProvider::Embedded(embedded);
        let welcome = vec!["index.html".to_string()];
        assert!(provider.is_directory("static"));
        assert_eq!(&provider.resolve("/", &welcome).unwrap().unwrap().content[..], b"<h1>hi</h1>");
        assert!(provider.resolve("/static/app.js", &welcome).unwrap().is_some());
    }

    #[test]
    fn mime_mappings_override_builtins() {
        let mut mappings = BTreeMap::new();
        mappings.insert("txt".to_string(), "text/x-custom".to_string());
        assert_eq!(mime_type("a/readme.TXT", &mappings), "text/x-custom");
        assert_eq!(mime_type("style.css", &mappings), "text/css");
        assert_eq!(mime_type("noext", &mappings), "application/octet-stream");
    }
}
