//! In-memory HTTP sessions.
//!
//! # Responsibilities
//! - Create sessions with random ids and track their last access
//! - Expire idle sessions lazily, on lookup and on create
//! - Enforce the optional active-session limit
//! - Resolve the session of a request from its cookie or path parameter

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::{Request, State};
use axum::http::{header, HeaderValue, Uri};
use axum::middleware::Next;
use axum::response::Response;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::observability::metrics;

/// Cookie carrying the session id.
pub const SESSION_COOKIE: &str = "SESSIONID";
/// Path parameter carrying the session id when cookies are unavailable.
pub const SESSION_PATH_PARAM: &str = ";sessionid=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("too many active sessions (limit {0})")]
    TooManyActive(usize),
}

#[derive(Debug)]
struct SessionData {
    id: String,
    created: Instant,
    last_accessed: Mutex<Instant>,
    attributes: DashMap<String, Value>,
    valid: AtomicBool,
}

/// Handle to one session. Clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionData>,
}

impl Session {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(SessionData {
                id: Uuid::new_v4().simple().to_string(),
                created: now,
                last_accessed: Mutex::new(now),
                attributes: DashMap::new(),
                valid: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn created(&self) -> Instant {
        self.inner.created
    }

    pub fn last_accessed(&self) -> Instant {
        *self.inner.last_accessed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_valid(&self) -> bool {
        self.inner.valid.load(Ordering::SeqCst)
    }

    pub fn attribute(&self, name: &str) -> Option<Value> {
        self.inner.attributes.get(name).map(|v| v.value().clone())
    }

    pub fn set_attribute<T: Serialize>(&self, name: impl Into<String>, value: T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.inner.attributes.insert(name.into(), value);
        Ok(())
    }

    pub fn remove_attribute(&self, name: &str) -> Option<Value> {
        self.inner.attributes.remove(name).map(|(_, v)| v)
    }

    pub fn attribute_names(&self) -> Vec<String> {
        self.inner.attributes.iter().map(|e| e.key().clone()).collect()
    }

    fn touch(&self) {
        *self.inner.last_accessed.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_accessed())
    }

    fn invalidate(&self) {
        self.inner.valid.store(false, Ordering::SeqCst);
        self.inner.attributes.clear();
    }
}

/// Session store for one context.
#[derive(Debug)]
pub struct SessionManager {
    sessions: DashMap<String, Session>,
    max_inactive: Option<Duration>,
    max_active: Option<usize>,
    // Serializes the limit check with the insert.
    creating: Mutex<()>,
}

impl SessionManager {
    /// `max_inactive` of `None` keeps sessions until invalidated.
    pub fn new(max_inactive: Option<Duration>, max_active: Option<usize>) -> Self {
        Self {
            sessions: DashMap::new(),
            max_inactive,
            max_active,
            creating: Mutex::new(()),
        }
    }

    pub fn max_inactive(&self) -> Option<Duration> {
        self.max_inactive
    }

    pub fn max_active(&self) -> Option<usize> {
        self.max_active
    }

    pub fn create(&self) -> Result<Session, SessionError> {
        self.expire_idle();
        let _creating = self.creating.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = self.max_active {
            if self.sessions.len() >= limit {
                tracing::warn!(limit, "Session limit reached");
                return Err(SessionError::TooManyActive(limit));
            }
        }

        let session = Session::new();
        self.sessions.insert(session.id().to_string(), session.clone());
        metrics::record_sessions_active(self.sessions.len());
        tracing::debug!(session = %session.id(), "Session created");
        Ok(session)
    }

    /// Look up a live session and mark it accessed.
    pub fn find(&self, id: &str) -> Option<Session> {
        let session = self.sessions.get(id).map(|s| s.value().clone())?;
        if self.is_expired(&session, Instant::now()) {
            self.remove(id);
            return None;
        }
        session.touch();
        Some(session)
    }

    pub fn invalidate(&self, id: &str) -> bool {
        self.remove(id)
    }

    /// Drop every session idle longer than the inactive interval.
    pub fn expire_idle(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| self.is_expired(e.value(), now))
            .map(|e| e.key().clone())
            .collect();
        for id in &expired {
            self.remove(id);
        }
        expired.len()
    }

    pub fn expire_all(&self) {
        let count = self.sessions.len();
        for entry in self.sessions.iter() {
            entry.value().invalidate();
        }
        self.sessions.clear();
        metrics::record_sessions_active(0);
        if count > 0 {
            tracing::debug!(count, "Sessions expired");
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    fn is_expired(&self, session: &Session, now: Instant) -> bool {
        self.max_inactive
            .is_some_and(|limit| session.idle_for(now) > limit)
    }

    fn remove(&self, id: &str) -> bool {
        match self.sessions.remove(id) {
            Some((_, session)) => {
                session.invalidate();
                metrics::record_sessions_active(self.sessions.len());
                true
            }
            None => false,
        }
    }
}

/// Per-request access to the session, installed by [`session_filter`].
#[derive(Debug, Clone)]
pub struct SessionSlot {
    manager: Arc<SessionManager>,
    current: Arc<Mutex<Option<Session>>>,
    created: Arc<AtomicBool>,
}

impl SessionSlot {
    fn new(manager: Arc<SessionManager>, current: Option<Session>) -> Self {
        Self {
            manager,
            current: Arc::new(Mutex::new(current)),
            created: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Session of this request, if the client presented a live one.
    pub fn current(&self) -> Option<Session> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get_or_create(&self) -> Result<Session, SessionError> {
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(session) = current.as_ref().filter(|s| s.is_valid()) {
            return Ok(session.clone());
        }
        let session = self.manager.create()?;
        self.created.store(true, Ordering::SeqCst);
        *current = Some(session.clone());
        Ok(session)
    }

    pub fn invalidate(&self) {
        if let Some(session) = self.current.lock().unwrap_or_else(|e| e.into_inner()).take() {
            self.manager.invalidate(session.id());
        }
    }

    fn created_session(&self) -> Option<Session> {
        if self.created.load(Ordering::SeqCst) {
            self.current().filter(|s| s.is_valid())
        } else {
            None
        }
    }
}

/// Session tracking options for one context.
#[derive(Debug, Clone)]
pub struct SessionTracking {
    pub manager: Arc<SessionManager>,
    pub cookies: bool,
    pub url_rewriting: bool,
    pub cookie_path: String,
}

/// Resolve the request's session and issue a cookie for new ones.
pub async fn session_filter(
    State(tracking): State<Arc<SessionTracking>>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut id = if tracking.cookies {
        cookie_value(request.headers().get_all(header::COOKIE).iter(), SESSION_COOKIE)
    } else {
        None
    };

    if tracking.url_rewriting && id.is_none() {
        id = request.extensions().get::<PathSessionId>().map(|p| p.0.clone());
    }

    let current = id.and_then(|id| tracking.manager.find(&id));
    let slot = SessionSlot::new(Arc::clone(&tracking.manager), current);
    request.extensions_mut().insert(slot.clone());

    let mut response = next.run(request).await;

    if tracking.cookies {
        if let Some(session) = slot.created_session() {
            let cookie = format!(
                "{}={}; Path={}; HttpOnly",
                SESSION_COOKIE,
                session.id(),
                tracking.cookie_path
            );
            match HeaderValue::from_str(&cookie) {
                Ok(value) => {
                    response.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(e) => tracing::warn!(error = %e, "Invalid session cookie"),
            }
        }
    }
    response
}

/// Session id found in the request path.
#[derive(Debug, Clone)]
struct PathSessionId(String);

/// Strip `;sessionid=` from the path before routing, keeping the id for
/// [`session_filter`]. Must wrap the router, not be layered inside it.
pub async fn session_path_filter(mut request: Request, next: Next) -> Response {
    if let Some((stripped, id)) = strip_path_param(request.uri()) {
        *request.uri_mut() = stripped;
        request.extensions_mut().insert(PathSessionId(id));
    }
    next.run(request).await
}

fn cookie_value<'a>(headers: impl Iterator<Item = &'a HeaderValue>, name: &str) -> Option<String> {
    headers
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| k.trim() == name)
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .filter(|v| !v.is_empty())
}

/// Remove `;sessionid=<id>` from the path, returning the cleaned URI and id.
fn strip_path_param(uri: &Uri) -> Option<(Uri, String)> {
    let path = uri.path();
    let start = path.find(SESSION_PATH_PARAM)?;
    let rest = &path[start + SESSION_PATH_PARAM.len()..];
    let end = rest.find(['/', ';']).unwrap_or(rest.len());
    let id = rest[..end].to_string();
    if id.is_empty() {
        return None;
    }

    let mut cleaned = format!("{}{}", &path[..start], &rest[end..]);
    if cleaned.is_empty() {
        cleaned.push('/');
    }
    if let Some(query) = uri.query() {
        cleaned.push('?');
        cleaned.push_str(query);
    }

    let mut parts = uri.clone().into_parts();
    parts.path_and_query = cleaned.parse().ok();
    let uri = Uri::from_parts(parts).ok()?;
    Some((uri, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_find() {
        let manager = SessionManager::new(Some(Duration::from_secs(60)), None);
        let session = manager.create().unwrap();
        session.set_attribute("user", "alice").unwrap();

        let found = manager.find(session.id()).unwrap();
        assert_eq!(found.attribute("user"), Some(Value::from("alice")));
        assert_eq!(manager.active_count(), 1);
        assert_eq!(session.id().len(), 32);
    }

    #[test]
    fn idle_sessions_expire_on_lookup() {
        let manager = SessionManager::new(Some(Duration::from_millis(20)), None);
        let session = manager.create().unwrap();
        std::thread::sleep(Duration::from_millis(60));

        assert!(manager.find(session.id()).is_none());
        assert!(!session.is_valid());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn zero_timeout_never_expires() {
        let manager = SessionManager::new(None, None);
        let session = manager.create().unwrap();
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(manager.expire_idle(), 0);
        assert!(manager.find(session.id()).is_some());
    }

    #[test]
    fn active_limit_is_enforced() {
        let manager = SessionManager::new(None, Some(2));
        manager.create().unwrap();
        let second = manager.create().unwrap();
        assert_eq!(manager.create().unwrap_err(), SessionError::TooManyActive(2));

        assert!(manager.invalidate(second.id()));
        assert!(manager.create().is_ok());
    }

    #[test]
    fn active_limit_holds_under_concurrent_creates() {
        let manager = SessionManager::new(None, Some(5));
        let created = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    for _ in 0..4 {
                        if manager.create().is_ok() {
                            created.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(created.load(Ordering::SeqCst), 5);
        assert_eq!(manager.active_count(), 5);
    }

    #[test]
    fn expire_all_invalidates() {
        let manager = SessionManager::new(None, None);
        let a = manager.create().unwrap();
        let b = manager.create().unwrap();
        manager.expire_all();
        assert!(!a.is_valid() && !b.is_valid());
        assert_eq!(manager.active_count(), 0);
    }

    #[test]
    fn slot_creates_once() {
        let manager = Arc::new(SessionManager::new(None, None));
        let slot = SessionSlot::new(Arc::clone(&manager), None);
        let first = slot.get_or_create().unwrap();
        let second = slot.get_or_create().unwrap();
        assert_eq!(first.id(), second.id());
        assert_eq!(slot.created_session().map(|s| s.id().to_string()), Some(first.id().to_string()));
        assert_eq!(manager.active_count(), 1);
    }

    #[test]
    fn parses_session_cookie() {
        let headers = [
            HeaderValue::from_static("theme=dark"),
            HeaderValue::from_static("a=1; SESSIONID=abc123; b=2"),
        ];
        assert_eq!(cookie_value(headers.iter(), SESSION_COOKIE).as_deref(), Some("abc123"));
        assert_eq!(cookie_value(headers.iter(), "missing"), None);
    }

    #[test]
    fn strips_path_parameter() {
        let uri: Uri = "/app/cart;sessionid=abc123?item=4".parse().unwrap();
        let (cleaned, id) = strip_path_param(&uri).unwrap();
        assert_eq!(id, "abc123");
        assert_eq!(cleaned.path(), "/app/cart");
        assert_eq!(cleaned.query(), Some("item=4"));

        let uri: Uri = "/plain".parse().unwrap();
        assert!(strip_path_param(&uri).is_none());
    }
}
