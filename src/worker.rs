//! Background maintenance threads.
//! Each worker sleeps on a bounded wake-up channel with a fallback poll
//! interval, runs its pass, and exits when its cancellation token fires.
//! A panicking pass is logged and retried on the next wake-up; nothing
//! supervises these threads, so they must never die silently.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel as cb;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::LooperError;
use crate::metrics::MetricsRegistry;

/// Non-blocking wake-up signal. Coalesces bursts: at most one pending wake.
#[derive(Clone)]
pub struct Notifier {
    tx: Option<cb::Sender<()>>,
}

impl Notifier {
    pub fn channel() -> (Notifier, cb::Receiver<()>) {
        let (tx, rx) = cb::bounded(1);
        (Notifier { tx: Some(tx) }, rx)
    }

    /// A notifier with no listener (used when passes are driven by hand).
    pub fn detached() -> Self {
        Notifier { tx: None }
    }

    /// Never blocks; a full channel already holds a pending wake.
    #[inline]
    pub fn notify(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(());
        }
    }
}

/// Handle to a running maintenance thread. Dropping it stops and joins the thread.
pub struct WorkerHandle {
    name: String,
    token: CancellationToken,
    wake: Notifier,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    pub fn shutdown(&mut self) {
        self.token.cancel();
        self.wake.notify();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!(worker = %self.name, "worker thread panicked during shutdown");
            }
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Describes one maintenance loop.
pub struct WorkerSpec {
    pub name: String,
    pub interval: Duration,
    pub metric: &'static str,
}

/// Spawn a maintenance thread running `pass` on every wake-up or `interval`.
/// `pass` returns whether it did any work; only working passes are timed.
pub fn spawn_worker<F>(
    spec: WorkerSpec,
    token: CancellationToken,
    wake: (Notifier, cb::Receiver<()>),
    metrics: Arc<MetricsRegistry>,
    mut pass: F,
) -> Result<WorkerHandle, LooperError>
where
    F: FnMut() -> bool + Send + 'static,
{
    let (notifier, rx) = wake;
    let thread_token = token.clone();
    let WorkerSpec { name, interval, metric } = spec;
    let thread_name = name.clone();

    let thread = std::thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            info!(
                worker = %thread_name,
                interval_ms = interval.as_millis() as u64,
                "worker started"
            );
            loop {
                if thread_token.is_cancelled() {
                    break;
                }
                match rx.recv_timeout(interval) {
                    Ok(()) | Err(cb::RecvTimeoutError::Timeout) => {}
                    Err(cb::RecvTimeoutError::Disconnected) => {
                        info!(worker = %thread_name, "wake channel closed");
                        break;
                    }
                }
                if thread_token.is_cancelled() {
                    break;
                }

                let span = metrics.span(metric);
                match catch_unwind(AssertUnwindSafe(&mut pass)) {
                    Ok(true) => {
                        span.finish();
                    }
                    Ok(false) => {}
                    Err(payload) => {
                        error!(
                            worker = %thread_name,
                            panic = %panic_message(payload.as_ref()),
                            "maintenance pass panicked, retrying"
                        );
                    }
                }
            }
            info!(worker = %thread_name, "worker stopping");
        })?;

    Ok(WorkerHandle {
        name,
        token,
        wake: notifier,
        thread: Some(thread),
    })
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
