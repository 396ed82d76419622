//! Process shell wrapping an HTTP server and a gRPC server behind one
//! coordinated shutdown path. Construction binds both listeners up front so
//! port conflicts fail early; `run` serves both protocols on background tasks
//! and blocks on the signal coordinator; `shutdown` drains HTTP within a
//! bounded budget and force-stops gRPC.

pub mod config;
pub mod error;
pub mod instrumentation;
mod pprof;

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ConnectInfo;
use axum::Router;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::service::RoutesBuilder;
use tonic::transport::Server as TonicServer;
use tower::Service;
use tower_http::timeout::TimeoutLayer;
use tracing::{debug, error, info, warn};

pub use config::{Config, GrpcInterceptor, HttpMiddleware};
pub use error::Error;
pub use instrumentation::register_instrumentation;

/// An HTTP server and a gRPC server sharing one signal-coordinated shutdown
/// path.
///
/// Register application routes on [`http`](Server::http) and gRPC services on
/// [`grpc`](Server::grpc) between construction and [`run`](Server::run).
pub struct Server {
    cfg: Config,
    handler: signals::Handler,

    http_listener: Option<TcpListener>,
    grpc_listener: Option<TcpListener>,
    http_addr: SocketAddr,
    grpc_addr: SocketAddr,

    http_shutdown: CancellationToken,
    grpc_shutdown: CancellationToken,
    http_task: Option<JoinHandle<()>>,
    grpc_task: Option<JoinHandle<()>>,

    /// HTTP routing surface. Replace via `std::mem::take` to add routes.
    pub http: Router,
    /// gRPC service registry, served when [`run`](Server::run) starts.
    pub grpc: RoutesBuilder,
}

impl Server {
    /// Bind both listeners and build the shell.
    ///
    /// Listeners are bound first, HTTP then gRPC, so an occupied port fails
    /// construction before anything else starts; the error names the stage
    /// that failed. A successful HTTP bind is released again (dropped) when
    /// the gRPC bind fails.
    pub async fn new(mut cfg: Config) -> Result<Self, Error> {
        let http_listener = TcpListener::bind(("0.0.0.0", cfg.http_listen_port))
            .await
            .map_err(|source| Error::HttpBind {
                port: cfg.http_listen_port,
                source,
            })?;
        let grpc_listener = TcpListener::bind(("0.0.0.0", cfg.grpc_listen_port))
            .await
            .map_err(|source| Error::GrpcBind {
                port: cfg.grpc_listen_port,
                source,
            })?;

        let http_addr = http_listener
            .local_addr()
            .expect("http listener has no local addr");
        let grpc_addr = grpc_listener
            .local_addr()
            .expect("grpc listener has no local addr");

        let handler = signals::Handler::new(std::mem::take(&mut cfg.signal_receivers));

        let mut http = Router::new();
        if cfg.register_instrumentation {
            http = register_instrumentation(http);
        }

        Ok(Self {
            cfg,
            handler,
            http_listener: Some(http_listener),
            grpc_listener: Some(grpc_listener),
            http_addr,
            grpc_addr,
            http_shutdown: CancellationToken::new(),
            grpc_shutdown: CancellationToken::new(),
            http_task: None,
            grpc_task: None,
            http,
            grpc: RoutesBuilder::default(),
        })
    }

    /// Resolved HTTP listen address; useful when configured with port 0.
    pub fn http_local_addr(&self) -> SocketAddr {
        self.http_addr
    }

    /// Resolved gRPC listen address.
    pub fn grpc_local_addr(&self) -> SocketAddr {
        self.grpc_addr
    }

    /// Unblock a pending [`run`](Server::run) without an OS signal.
    pub fn stop(&self) {
        self.handler.stop();
    }

    /// Cloneable stop handle for use from other tasks while `run` borrows the
    /// server.
    pub fn stopper(&self) -> signals::Stopper {
        self.handler.stopper()
    }

    /// Serve both protocols and block until a termination signal or a
    /// programmatic stop.
    ///
    /// The HTTP and gRPC accept loops run as independent tasks; their serve
    /// errors are logged and never surfaced, since "listener closed" is the
    /// expected way they end during shutdown. Once the signal coordinator
    /// returns, in-flight gRPC calls are drained before `run` itself returns.
    /// Call at most once.
    pub async fn run(&mut self) {
        let http_listener = self
            .http_listener
            .take()
            .expect("Server::run called more than once");
        let grpc_listener = self
            .grpc_listener
            .take()
            .expect("Server::run called more than once");

        // Everything the caller registered is in place now; finish the HTTP
        // stack: per-request deadline, request metrics, then the configured
        // middleware with the first entry outermost.
        let mut app = std::mem::take(&mut self.http);
        if !self.cfg.http_server_write_timeout.is_zero() {
            app = app.layer(TimeoutLayer::new(self.cfg.http_server_write_timeout));
        }
        if self.cfg.register_instrumentation {
            app = app.layer(axum::middleware::from_fn(instrumentation::track_requests));
        }
        for middleware in std::mem::take(&mut self.cfg.http_middleware)
            .into_iter()
            .rev()
        {
            app = middleware(app);
        }

        info!(addr = %self.http_addr, "http server listening");
        self.http_task = Some(tokio::spawn(serve_http(
            http_listener,
            app,
            self.cfg.http_server_read_timeout,
            self.cfg.http_server_idle_timeout,
            self.http_shutdown.clone(),
        )));

        let routes = std::mem::take(&mut self.grpc).routes();
        let interceptors = std::mem::take(&mut self.cfg.grpc_interceptors);
        let intercept = move |mut request: tonic::Request<()>| -> Result<tonic::Request<()>, tonic::Status> {
            for interceptor in &interceptors {
                request = interceptor(request)?;
            }
            Ok(request)
        };
        let grpc_shutdown = self.grpc_shutdown.clone();

        info!(addr = %self.grpc_addr, "grpc server listening");
        self.grpc_task = Some(tokio::spawn(async move {
            let served = TonicServer::builder()
                .layer(tonic::service::interceptor(intercept))
                .add_routes(routes)
                .serve_with_incoming_shutdown(
                    TcpListenerStream::new(grpc_listener),
                    grpc_shutdown.cancelled_owned(),
                )
                .await;
            if let Err(err) = served {
                debug!(error = %err, "grpc server exited with error");
            }
        }));

        self.handler.run().await;

        // Let in-flight RPCs finish before run unwinds; new connections are
        // refused as soon as the shutdown future resolves.
        self.grpc_shutdown.cancel();
        if let Some(task) = self.grpc_task.take() {
            if let Err(err) = task.await {
                debug!(error = %err, "grpc task ended abnormally");
            }
        }
    }

    /// Bounded-time cleanup, independent of whether [`run`](Server::run) was
    /// ever called.
    ///
    /// The HTTP server gets up to the configured graceful-shutdown timeout to
    /// drain in-flight requests, after which remaining connections are closed
    /// forcibly. The gRPC server is force-stopped immediately on this path.
    /// Both are attempted unconditionally.
    pub async fn shutdown(&mut self) {
        self.grpc_shutdown.cancel();
        if let Some(task) = self.grpc_task.take() {
            task.abort();
        }

        self.http_shutdown.cancel();
        if let Some(mut task) = self.http_task.take() {
            let budget = self.cfg.graceful_shutdown_timeout;
            if tokio::time::timeout(budget, &mut task).await.is_err() {
                warn!(
                    timeout_secs = budget.as_secs_f64(),
                    "http drain exceeded graceful shutdown timeout, aborting"
                );
                task.abort();
            }
        }
    }
}

/// Accept loop with connection-level graceful draining. Breaking out of the
/// loop stops accepting; already-accepted connections are given until the
/// watcher is drained (the caller bounds that wait).
async fn serve_http(
    listener: TcpListener,
    app: Router,
    read_timeout: Duration,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut builder = AutoBuilder::new(TokioExecutor::new());
    if !read_timeout.is_zero() {
        builder
            .http1()
            .timer(TokioTimer::new())
            .header_read_timeout(read_timeout);
    }
    if !idle_timeout.is_zero() {
        builder
            .http2()
            .timer(TokioTimer::new())
            .keep_alive_interval(idle_timeout)
            .keep_alive_timeout(idle_timeout);
    }
    let graceful = GracefulShutdown::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, remote_addr) = match accepted {
                    Ok(conn) => conn,
                    Err(err) => {
                        error!(error = %err, "failed to accept connection");
                        continue;
                    }
                };
                if let Err(err) = socket.set_nodelay(true) {
                    warn!(error = %err, "failed to set TCP_NODELAY");
                }

                let app = app.clone();
                let service = hyper::service::service_fn(
                    move |request: hyper::Request<hyper::body::Incoming>| {
                        let mut app = app.clone();
                        let mut request = request.map(axum::body::Body::new);
                        request.extensions_mut().insert(ConnectInfo(remote_addr));
                        async move { app.call(request).await }
                    },
                );

                let connection =
                    builder.serve_connection_with_upgrades(TokioIo::new(socket), service);
                let connection = graceful.watch(connection.into_owned());
                tokio::spawn(async move {
                    if let Err(err) = connection.await {
                        debug!(error = %err, "connection closed");
                    }
                });
            }
            _ = shutdown.cancelled() => break,
        }
    }

    graceful.shutdown().await;
    debug!("http server drained");
}
