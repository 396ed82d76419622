use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use signals::SignalReceiver;

/// A wrapper applied to the HTTP router when the server starts. Entries run
/// outermost-first: the first middleware in the list sees requests before any
/// of the others.
pub type HttpMiddleware = Box<dyn FnOnce(Router) -> Router + Send>;

/// A gRPC request interceptor. The configured interceptors are composed into
/// a single tonic interceptor layer and run in list order; the first to
/// return a `Status` short-circuits the request.
pub type GrpcInterceptor =
    Arc<dyn Fn(tonic::Request<()>) -> Result<tonic::Request<()>, tonic::Status> + Send + Sync>;

/// Server configuration. Plain values only; validation is the caller's
/// responsibility. `Default` carries the stock deployment values.
pub struct Config {
    pub http_listen_port: u16,
    pub grpc_listen_port: u16,

    /// Auto-register `/metrics` and the `/debug/pprof` routes, and track
    /// per-request HTTP metrics.
    pub register_instrumentation: bool,

    /// Budget for draining in-flight HTTP requests in
    /// [`Server::shutdown`](crate::Server::shutdown). Connections still open
    /// at the deadline are closed forcibly.
    pub graceful_shutdown_timeout: Duration,

    /// HTTP/1 header read timeout. Zero disables it.
    pub http_server_read_timeout: Duration,
    /// Per-request deadline, enforced as a timeout layer. Zero disables it.
    pub http_server_write_timeout: Duration,
    /// HTTP/2 keep-alive probe interval and timeout for idle connections.
    /// Zero disables it.
    pub http_server_idle_timeout: Duration,

    pub http_middleware: Vec<HttpMiddleware>,
    pub grpc_interceptors: Vec<GrpcInterceptor>,

    /// Subsystems handed to the signal coordinator at construction. They are
    /// stopped, in order, when SIGINT or SIGTERM arrives.
    pub signal_receivers: Vec<Arc<dyn SignalReceiver>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_listen_port: 80,
            grpc_listen_port: 9095,
            register_instrumentation: true,
            graceful_shutdown_timeout: Duration::from_secs(5),
            http_server_read_timeout: Duration::from_secs(5),
            http_server_write_timeout: Duration::from_secs(5),
            http_server_idle_timeout: Duration::from_secs(120),
            http_middleware: Vec::new(),
            grpc_interceptors: Vec::new(),
            signal_receivers: Vec::new(),
        }
    }
}
