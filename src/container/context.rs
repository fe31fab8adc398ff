//! Application context: lifecycle events and router assembly.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::StatusCode;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::{Extension, Router};
use tower::Layer;

use crate::config::ErrorReportStyle;
use crate::container::resources::StaticFiles;
use crate::container::session::{session_filter, session_path_filter, SessionTracking};
use crate::container::{ContainerError, ServletContext};
use crate::http::{character_encoding_filter, error_response};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

/// Observer of context lifecycle events.
///
/// An error from a start event aborts the start. Errors from stop events
/// are logged.
pub trait LifecycleListener: Send + Sync {
    fn lifecycle_event(&self, event: LifecycleEvent, context: &ServletContext) -> Result<(), ContainerError>;
}

/// Context settings resolved by the builder.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub cookies: bool,
    pub url_rewriting: bool,
    /// Empty disables the character encoding filter.
    pub request_encoding: String,
    pub unload_delay: Duration,
}

/// One web application mounted at a context path.
#[derive(Debug)]
pub struct Context {
    servlet_context: ServletContext,
    settings: ContextSettings,
    started: bool,
}

impl Context {
    pub fn new(servlet_context: ServletContext, settings: ContextSettings) -> Self {
        Self {
            servlet_context,
            settings,
            started: false,
        }
    }

    pub fn path(&self) -> &str {
        self.servlet_context.context_path()
    }

    pub fn servlet_context(&self) -> &ServletContext {
        &self.servlet_context
    }

    pub fn settings(&self) -> &ContextSettings {
        &self.settings
    }

    pub fn unload_delay(&self) -> Duration {
        self.settings.unload_delay
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Fire the start events and build the router for this context.
    pub fn start(&mut self, error_report: ErrorReportStyle) -> Result<Router, ContainerError> {
        self.fire(LifecycleEvent::BeforeStart)?;

        let router = self.build_router(error_report);
        self.started = true;

        if let Err(e) = self.fire(LifecycleEvent::AfterStart) {
            self.stop();
            return Err(e);
        }

        tracing::info!(
            context_path = %display_path(self.path()),
            doc_base = %self.servlet_context.doc_base().display(),
            resources = self.servlet_context.resources().kind(),
            "Context started"
        );
        Ok(router)
    }

    /// Fire the stop events and drop all sessions. Safe to call twice.
    pub fn stop(&mut self) {
        if !self.started {
            return;
        }
        self.started = false;

        for event in [LifecycleEvent::BeforeStop, LifecycleEvent::AfterStop] {
            if let Err(e) = self.fire(event) {
                tracing::warn!(event = ?event, error = %e, "Lifecycle listener failed during stop");
            }
        }
        self.servlet_context.sessions().expire_all();
        self.servlet_context.resources().clear_cache();
        tracing::info!(context_path = %display_path(self.path()), "Context stopped");
    }

    fn fire(&self, event: LifecycleEvent) -> Result<(), ContainerError> {
        for listener in self.servlet_context.listeners() {
            listener.lifecycle_event(event, &self.servlet_context)?;
        }
        Ok(())
    }

    fn build_router(&self, error_report: ErrorReportStyle) -> Router {
        let ctx = &self.servlet_context;
        let files = StaticFiles::new(ctx.clone(), error_report);

        let tracking = Arc::new(SessionTracking {
            manager: ctx.sessions(),
            cookies: self.settings.cookies,
            url_rewriting: self.settings.url_rewriting,
            cookie_path: display_path(ctx.context_path()).to_string(),
        });

        let mut app = ctx
            .take_routes()
            .fallback(move |request: Request| files.clone().serve(request))
            .layer(from_fn_with_state(tracking, session_filter));

        if !self.settings.request_encoding.is_empty() {
            app = app.layer(from_fn_with_state(
                Arc::<str>::from(self.settings.request_encoding.as_str()),
                character_encoding_filter,
            ));
        }

        let app = app.layer(Extension(ctx.clone()));

        let routed = if ctx.context_path().is_empty() {
            app
        } else {
            Router::new()
                .nest(ctx.context_path(), app)
                .fallback(move || async move { error_response(error_report, StatusCode::NOT_FOUND, None) })
        };

        if self.settings.url_rewriting {
            Router::new().fallback_service(from_fn(session_path_filter).layer(routed))
        } else {
            routed
        }
    }
}

fn display_path(path: &str) -> &str {
    if path.is_empty() {
        "/"
    } else {
        path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use axum::body::Body;
    use axum::routing::get;
    use tower::ServiceExt;

    use crate::container::{EmbeddedResources, ResourceProvider, SessionManager};

    struct Recorder(Mutex<Vec<LifecycleEvent>>);

    impl LifecycleListener for Recorder {
        fn lifecycle_event(&self, event: LifecycleEvent, _: &ServletContext) -> Result<(), ContainerError> {
            self.0.lock().unwrap().push(event);
            Ok(())
        }
    }

    struct Failing;

    impl LifecycleListener for Failing {
        fn lifecycle_event(&self, event: LifecycleEvent, _: &ServletContext) -> Result<(), ContainerError> {
            match event {
                LifecycleEvent::BeforeStart => Err(ContainerError::Listener("boom".into())),
                _ => Ok(()),
            }
        }
    }

    fn context(path: &str) -> Context {
        let servlet_context = ServletContext::new(
            path.to_string(),
            PathBuf::from("/tmp/webapp"),
            PathBuf::from("/tmp/work"),
            Arc::new(SessionManager::new(None, None)),
            Arc::new(ResourceProvider::Embedded(EmbeddedResources::new())),
        );
        Context::new(
            servlet_context,
            ContextSettings {
                cookies: true,
                url_rewriting: true,
                request_encoding: "UTF-8".to_string(),
                unload_delay: Duration::from_millis(100),
            },
        )
    }

    async fn get_body(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(axum::http::Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), 1 << 16).await.unwrap();
        (status, String::from_utf8_lossy(&body).into_owned())
    }

    #[test]
    fn events_fire_in_order() {
        let mut ctx = context("");
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        ctx.servlet_context().add_listener(recorder.clone());

        ctx.start(ErrorReportStyle::Plain).unwrap();
        ctx.stop();
        ctx.stop();

        assert_eq!(
            *recorder.0.lock().unwrap(),
            vec![
                LifecycleEvent::BeforeStart,
                LifecycleEvent::AfterStart,
                LifecycleEvent::BeforeStop,
                LifecycleEvent::AfterStop,
            ]
        );
    }

    #[test]
    fn failing_listener_aborts_start() {
        let mut ctx = context("");
        ctx.servlet_context().add_listener(Arc::new(Failing));
        assert!(matches!(ctx.start(ErrorReportStyle::Plain), Err(ContainerError::Listener(_))));
        assert!(!ctx.is_started());
    }

    #[tokio::test]
    async fn routes_are_nested_under_context_path() {
        let mut ctx = context("/app");
        ctx.servlet_context().route("/hello", get(|| async { "hello" }));
        ctx.servlet_context().register_resource("/static/site.css", "body {}");
        let router = ctx.start(ErrorReportStyle::Plain).unwrap();

        assert_eq!(get_body(router.clone(), "/app/hello").await, (StatusCode::OK, "hello".to_string()));
        assert_eq!(get_body(router.clone(), "/app/static/site.css").await.1, "body {}");
        assert_eq!(get_body(router.clone(), "/app/missing").await.0, StatusCode::NOT_FOUND);
        assert_eq!(get_body(router, "/other").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn slash_is_the_root_context() {
        let mut ctx = context("/");
        ctx.servlet_context().route("/hello", get(|| async { "hello" }));
        assert_eq!(ctx.path(), "");
        let router = ctx.start(ErrorReportStyle::Plain).unwrap();
        assert_eq!(get_body(router, "/hello").await, (StatusCode::OK, "hello".to_string()));
    }

    #[tokio::test]
    async fn handlers_see_the_servlet_context() {
        let mut ctx = context("");
        ctx.servlet_context().set_init_parameter("greeting", "hi");
        ctx.servlet_context().route(
            "/greet",
            get(|Extension(sc): Extension<ServletContext>| async move {
                sc.init_parameter("greeting").unwrap_or_default()
            }),
        );
        let router = ctx.start(ErrorReportStyle::Plain).unwrap();
        assert_eq!(get_body(router, "/greet").await.1, "hi");
    }
}
