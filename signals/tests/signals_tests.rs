//! Real-signal tests. Everything here raises signals at the whole test
//! process, so this file keeps a single test function: a second concurrently
//! running handler would observe the same deliveries.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use signals::{Handler, SignalReceiver};

struct RecordingReceiver {
    name: &'static str,
    fail: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl SignalReceiver for RecordingReceiver {
    async fn stop(&self) -> anyhow::Result<()> {
        self.log.lock().expect("log poisoned").push(self.name);
        if self.fail {
            anyhow::bail!("{} refused to stop", self.name);
        }
        Ok(())
    }
}

fn raise(signal: libc::c_int) {
    // SAFETY: sending a signal to our own pid; both calls are async-signal
    // unrelated plain syscalls.
    unsafe {
        libc::kill(libc::getpid(), signal);
    }
}

/// SIGQUIT is repeatable and never terminates the loop or touches receivers;
/// SIGTERM stops every receiver in registration order, even when one of them
/// reports an error, and only then does the loop return.
#[tokio::test]
async fn quit_is_diagnostic_and_term_fans_out_in_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let receivers: Vec<Arc<dyn SignalReceiver>> = vec![
        Arc::new(RecordingReceiver {
            name: "s1",
            fail: false,
            log: log.clone(),
        }),
        Arc::new(RecordingReceiver {
            name: "s2",
            fail: true,
            log: log.clone(),
        }),
        Arc::new(RecordingReceiver {
            name: "s3",
            fail: false,
            log: log.clone(),
        }),
    ];
    let handler = Handler::new(receivers);
    let task = tokio::spawn(async move { handler.run().await });

    // Let the loop install its signal streams before raising anything;
    // SIGQUIT's default disposition would kill the process.
    tokio::time::sleep(Duration::from_millis(100)).await;

    raise(libc::SIGQUIT);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!task.is_finished(), "SIGQUIT must not terminate the loop");
    assert!(
        log.lock().expect("log poisoned").is_empty(),
        "SIGQUIT must not stop receivers"
    );

    raise(libc::SIGQUIT);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        !task.is_finished(),
        "repeated SIGQUIT must not terminate the loop"
    );

    raise(libc::SIGTERM);
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop did not return after SIGTERM")
        .expect("loop task panicked");
    assert_eq!(*log.lock().expect("log poisoned"), vec!["s1", "s2", "s3"]);
}
