//! HTTP connector.
//!
//! # Responsibilities
//! - Own the I/O ("poller") runtime that accepts and drives connections
//! - Bind the listening socket with the configured backlog and tuning
//! - Serve plain HTTP or HTTPS through axum-server
//! - Dispatch every request onto the executor
//! - Enforce the per-connection keep-alive request limit
//! - Drain in-flight requests on stop
//!
//! # Data Flow
//! ```text
//! TcpSocket (backlog, options) → axum-server accept loop
//!     → SocketTuningAcceptor [→ RustlsAcceptor]
//!     → ConnectionService (per connection)
//!         → executor.spawn(router.oneshot(request))
//! ```

use std::convert::Infallible;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};

use axum::extract::{ConnectInfo, DefaultBodyLimit, Request};
use axum::http::{header, HeaderValue, StatusCode, Version};
use axum::response::Response;
use axum::Router;
use axum_server::tls_rustls::{RustlsAcceptor, RustlsConfig};
use axum_server::Handle;
use hyper::body::Incoming;
use tokio::net::TcpSocket;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tower::{Service, ServiceExt};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::config::validation::MIN_HTTP_HEADER_SIZE;
use crate::config::ErrorReportStyle;
use crate::container::ContainerError;
use crate::executor::ExecutorHandle;
use crate::http::{compression_opt_out_filter, error_response};
use crate::net::compression::CompressionSettings;
use crate::net::socket::{SocketOptions, SocketTuningAcceptor, TransportProperties};
use crate::observability::metrics;

/// Connector settings resolved from configuration, with units converted.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// Used to name the connector's threads.
    pub name: String,
    pub port: u16,
    pub secure: bool,
    /// Request body limit in bytes, `None` for unlimited.
    pub max_post_size: Option<usize>,
    pub accept_count: u32,
    /// HTTP/1 read buffer, bounds the request head size.
    pub max_header_size: usize,
    pub keep_alive: bool,
    /// Requests served per connection before it is closed.
    pub keep_alive_limit: Option<usize>,
    pub server_header: Option<HeaderValue>,
    pub compression: CompressionSettings,
    pub poller_threads: usize,
}

struct Running {
    runtime: Runtime,
    handle: Handle,
    task: JoinHandle<io::Result<()>>,
    local_addr: SocketAddr,
}

/// Accepts connections and feeds requests to the context via the executor.
pub struct Connector {
    settings: ConnectorSettings,
    socket: SocketOptions,
    tls: Option<Arc<rustls::ServerConfig>>,
    properties: TransportProperties,
    executor: Option<ExecutorHandle>,
    running: Option<Running>,
}

impl Connector {
    pub fn new(
        settings: ConnectorSettings,
        socket: SocketOptions,
        tls: Option<Arc<rustls::ServerConfig>>,
        properties: TransportProperties,
    ) -> Self {
        Self {
            settings,
            socket,
            tls,
            properties,
            executor: None,
            running: None,
        }
    }

    /// Attach the worker pool that runs request handlers.
    pub fn set_executor(&mut self, executor: ExecutorHandle) {
        self.executor = Some(executor);
    }

    pub fn executor(&self) -> Option<&ExecutorHandle> {
        self.executor.as_ref()
    }

    pub fn scheme(&self) -> &'static str {
        if self.settings.secure {
            "https"
        } else {
            "http"
        }
    }

    pub fn is_secure(&self) -> bool {
        self.settings.secure
    }

    pub fn port(&self) -> u16 {
        self.settings.port
    }

    pub fn settings(&self) -> &ConnectorSettings {
        &self.settings
    }

    /// Every option forwarded to the transport, keyed by name.
    pub fn properties(&self) -> &TransportProperties {
        &self.properties
    }

    /// Bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Bind and begin serving `app`.
    pub fn start(&mut self, app: Router, error_report: ErrorReportStyle) -> Result<(), ContainerError> {
        if self.running.is_some() {
            return Err(ContainerError::Config {
                component: "connector",
                message: "already started".to_string(),
            });
        }
        let executor = self.executor.clone().ok_or_else(|| ContainerError::Config {
            component: "connector",
            message: "no executor attached".to_string(),
        })?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.settings.poller_threads.max(1))
            .thread_name(format!("{}-poller", self.settings.name))
            .enable_all()
            .build()
            .map_err(|source| ContainerError::Runtime {
                name: format!("{}-poller", self.settings.name),
                source,
            })?;

        let listener = {
            let _guard = runtime.enter();
            self.bind()?
        };
        let local_addr = listener.local_addr().map_err(|source| ContainerError::Bind {
            addr: self.bind_addr(),
            source,
        })?;

        let make_service = ConnectorService {
            router: self.wrap(app),
            executor,
            keep_alive_limit: self.settings.keep_alive_limit,
            error_report,
        };

        if self.settings.max_header_size < MIN_HTTP_HEADER_SIZE {
            tracing::warn!(
                configured = self.settings.max_header_size,
                applied = MIN_HTTP_HEADER_SIZE,
                "Raising max HTTP header size to the transport minimum"
            );
        }

        let handle = Handle::new();
        let mut server = axum_server::from_tcp(listener).handle(handle.clone());
        server
            .http_builder()
            .http1()
            .keep_alive(self.settings.keep_alive)
            .max_buf_size(self.settings.max_header_size.max(MIN_HTTP_HEADER_SIZE));

        let tuning = SocketTuningAcceptor::new(&self.socket);
        let task = match &self.tls {
            Some(tls) => {
                let acceptor = RustlsAcceptor::new(RustlsConfig::from_config(Arc::clone(tls))).acceptor(tuning);
                runtime.spawn(server.acceptor(acceptor).serve(make_service))
            }
            None => runtime.spawn(server.acceptor(tuning).serve(make_service)),
        };

        tracing::info!(
            address = %local_addr,
            scheme = self.scheme(),
            poller_threads = self.settings.poller_threads,
            accept_count = self.settings.accept_count,
            "Connector started"
        );
        tracing::debug!(properties = ?self.properties, "Connector transport properties");

        self.running = Some(Running {
            runtime,
            handle,
            task,
            local_addr,
        });
        Ok(())
    }

    /// Stop accepting, give in-flight requests `grace` to finish, then shut
    /// the I/O runtime down. Must not be called from inside an async task.
    pub fn stop(&mut self, grace: Duration) -> Result<(), ContainerError> {
        let Some(Running {
            runtime,
            handle,
            task,
            local_addr,
        }) = self.running.take()
        else {
            return Ok(());
        };

        handle.graceful_shutdown(Some(grace));
        let outcome = runtime.block_on(async {
            tokio::time::timeout(grace + Duration::from_secs(1), task).await
        });
        runtime.shutdown_timeout(Duration::from_secs(1));
        tracing::info!(address = %local_addr, "Connector stopped");

        match outcome {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(ContainerError::Serve(e)),
            Ok(Err(join)) => Err(ContainerError::Serve(io::Error::other(join))),
            Err(_) => Err(ContainerError::Serve(io::Error::new(
                io::ErrorKind::TimedOut,
                "connections did not drain in time",
            ))),
        }
    }

    fn bind_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.settings.port))
    }

    fn bind(&self) -> Result<std::net::TcpListener, ContainerError> {
        let addr = self.bind_addr();
        let bind_err = |source| ContainerError::Bind { addr, source };

        let socket = TcpSocket::new_v4().map_err(bind_err)?;
        self.socket.apply_to_listener(&socket).map_err(bind_err)?;
        socket.bind(addr).map_err(bind_err)?;
        let listener = socket.listen(self.settings.accept_count).map_err(bind_err)?;
        listener.into_std().map_err(bind_err)
    }

    fn wrap(&self, app: Router) -> Router {
        let mut app = app;

        if let Some(server) = &self.settings.server_header {
            app = app.layer(SetResponseHeaderLayer::overriding(header::SERVER, server.clone()));
        }

        // axum's own 2 MiB extractor limit is replaced by the configured one.
        app = match self.settings.max_post_size {
            Some(limit) => app
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(limit)),
            None => app.layer(DefaultBodyLimit::disable()),
        };

        if let Some(compression) = self.settings.compression.layer() {
            app = app.layer(compression);
            if !self.settings.compression.excluded_user_agents.is_empty() {
                app = app.layer(axum::middleware::from_fn_with_state(
                    Arc::clone(&self.settings.compression.excluded_user_agents),
                    compression_opt_out_filter,
                ));
            }
        }

        app.layer(TraceLayer::new_for_http())
    }
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("port", &self.settings.port)
            .field("scheme", &self.scheme())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Creates one [`ConnectionService`] per accepted connection.
#[derive(Clone)]
struct ConnectorService {
    router: Router,
    executor: ExecutorHandle,
    keep_alive_limit: Option<usize>,
    error_report: ErrorReportStyle,
}

impl Service<SocketAddr> for ConnectorService {
    type Response = ConnectionService;
    type Error = Infallible;
    type Future = std::future::Ready<Result<ConnectionService, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, peer: SocketAddr) -> Self::Future {
        tracing::trace!(peer = %peer, "Connection accepted");
        std::future::ready(Ok(ConnectionService {
            router: self.router.clone(),
            executor: self.executor.clone(),
            keep_alive_limit: self.keep_alive_limit,
            error_report: self.error_report,
            peer,
            served: Arc::new(AtomicUsize::new(0)),
        }))
    }
}

/// Per-connection protocol handler.
#[derive(Clone)]
struct ConnectionService {
    router: Router,
    executor: ExecutorHandle,
    keep_alive_limit: Option<usize>,
    error_report: ErrorReportStyle,
    peer: SocketAddr,
    served: Arc<AtomicUsize>,
}

impl Service<axum::http::Request<Incoming>> for ConnectionService {
    type Response = Response;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: axum::http::Request<Incoming>) -> Self::Future {
        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        let close = request.version() <= Version::HTTP_11
            && self.keep_alive_limit.is_some_and(|limit| served >= limit);

        let mut request: Request = request.map(axum::body::Body::new);
        request.extensions_mut().insert(ConnectInfo(self.peer));

        let method = request.method().clone();
        let start = Instant::now();
        let style = self.error_report;
        let dispatched = self.executor.spawn(self.router.clone().oneshot(request));

        Box::pin(async move {
            let mut response = match dispatched {
                Ok(task) => match task.await {
                    Ok(Ok(response)) => response,
                    Ok(Err(never)) => match never {},
                    Err(e) => {
                        tracing::error!(error = %e, "Request task failed");
                        error_response(style, StatusCode::INTERNAL_SERVER_ERROR, None)
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Request rejected");
                    error_response(style, StatusCode::SERVICE_UNAVAILABLE, None)
                }
            };

            if close {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            }

            metrics::record_request(method.as_str(), response.status().as_u16(), start);
            Ok(response)
        })
    }
}
