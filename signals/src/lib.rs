//! Signal-driven lifecycle coordination: traps SIGINT/SIGQUIT/SIGTERM, fans a
//! stop notification out to registered subsystems on termination, and supports
//! a programmatic stop so callers can unblock the wait loop without an OS
//! signal. SIGQUIT is diagnostic only: it logs a stack dump and keeps waiting.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cap on the logged SIGQUIT stack dump. Anything beyond this is truncated;
/// the dump is a best-effort diagnostic, not a correctness feature.
const STACK_DUMP_CAPACITY: usize = 1 << 20;

/// A subsystem that can be told to stop during shutdown.
///
/// The [`Handler`] holds shared references to its receivers and invokes
/// [`stop`](SignalReceiver::stop) on each of them, in registration order, when
/// a termination signal arrives. It does not otherwise manage their lifecycle.
#[async_trait]
pub trait SignalReceiver: Send + Sync {
    async fn stop(&self) -> anyhow::Result<()>;
}

/// Coordinates shutdown for a set of [`SignalReceiver`]s.
///
/// [`run`](Handler::run) blocks until SIGINT or SIGTERM arrives, or until
/// [`stop`](Handler::stop) is called. On SIGQUIT it logs a stack dump and
/// keeps waiting. The receiver list is fixed at construction; once `run`
/// returns the handler is done and must not be reused.
pub struct Handler {
    receivers: Vec<Arc<dyn SignalReceiver>>,
    stop: CancellationToken,
}

impl Handler {
    pub fn new(receivers: Vec<Arc<dyn SignalReceiver>>) -> Self {
        Self {
            receivers,
            stop: CancellationToken::new(),
        }
    }

    /// Unblock a pending [`run`](Handler::run) without stopping any receivers.
    /// Safe to call from any task, any number of times; calls after the first
    /// are no-ops.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// A cheap cloneable handle for triggering [`stop`](Handler::stop) from
    /// other tasks while `run` borrows the handler.
    pub fn stopper(&self) -> Stopper {
        Stopper {
            stop: self.stop.clone(),
        }
    }

    /// Wait for a termination signal or a programmatic stop.
    ///
    /// Exactly one of {stop, SIGINT, SIGTERM} causes this to return. A stop
    /// returns immediately with no fan-out: the caller triggering the stop is
    /// already driving its own shutdown path. SIGINT and SIGTERM stop every
    /// receiver in registration order first; a receiver that fails to stop is
    /// logged and skipped, never aborting the fan-out.
    pub async fn run(&self) {
        // Install all three streams before the first await so a signal
        // delivered in the setup gap is not dropped.
        let mut interrupt =
            signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        let mut terminate =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

        loop {
            tokio::select! {
                _ = self.stop.cancelled() => {
                    info!(reason = "stop", "signal handler stopped programmatically");
                    return;
                }
                _ = interrupt.recv() => {
                    self.stop_receivers("SIGINT").await;
                    return;
                }
                _ = terminate.recv() => {
                    self.stop_receivers("SIGTERM").await;
                    return;
                }
                _ = quit.recv() => dump_stacks(),
            }
        }
    }

    async fn stop_receivers(&self, signal_name: &str) {
        info!(
            signal = signal_name,
            "received termination signal, stopping subsystems"
        );
        for receiver in &self.receivers {
            if let Err(err) = receiver.stop().await {
                warn!(signal = signal_name, error = %err, "subsystem failed to stop");
            }
        }
    }
}

/// Cloneable stop handle for a [`Handler`]. Idempotent, same as
/// [`Handler::stop`].
#[derive(Clone)]
pub struct Stopper {
    stop: CancellationToken,
}

impl Stopper {
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

/// Construct a [`Handler`] for the given receivers and run its wait loop to
/// completion. For callers that never need a programmatic stop.
pub async fn signal_handler_loop(receivers: Vec<Arc<dyn SignalReceiver>>) {
    Handler::new(receivers).run().await;
}

fn dump_stacks() {
    let backtrace = std::backtrace::Backtrace::force_capture().to_string();
    let dump = truncate_to(&backtrace, STACK_DUMP_CAPACITY);
    info!(signal = "SIGQUIT", "=== stack dump start ===");
    info!("{dump}");
    info!("=== stack dump end ===");
}

fn truncate_to(dump: &str, capacity: usize) -> &str {
    if dump.len() <= capacity {
        return dump;
    }
    let mut end = capacity;
    while !dump.is_char_boundary(end) {
        end -= 1;
    }
    &dump[..end]
}
