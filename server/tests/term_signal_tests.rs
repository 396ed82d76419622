//! SIGTERM end-to-end through the shell. Kept in its own binary (process)
//! with a single test so the raised signal cannot reach any other test's
//! coordinator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use server::{Config, Server};
use signals::SignalReceiver;
use tokio::sync::oneshot;

struct FlagReceiver {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl SignalReceiver for FlagReceiver {
    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn sigterm_stops_registered_receivers_and_unblocks_run() {
    let stopped = Arc::new(AtomicBool::new(false));
    let mut cfg = Config {
        http_listen_port: 0,
        grpc_listen_port: 0,
        ..Default::default()
    };
    cfg.signal_receivers.push(Arc::new(FlagReceiver {
        stopped: stopped.clone(),
    }));

    let mut server = Server::new(cfg).await.expect("construction");
    let (done_tx, done_rx) = oneshot::channel();
    tokio::spawn(async move {
        server.run().await;
        server.shutdown().await;
        drop(done_tx.send(()));
    });

    // Let run install its signal streams before raising.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // SAFETY: sending SIGTERM to our own pid.
    unsafe {
        libc::kill(libc::getpid(), libc::SIGTERM);
    }

    tokio::time::timeout(Duration::from_secs(5), done_rx)
        .await
        .expect("run did not return after SIGTERM")
        .expect("server task dropped");
    assert!(
        stopped.load(Ordering::SeqCst),
        "registered receiver was not stopped"
    );
}
