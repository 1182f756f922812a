//! Periodic rebalancing on a dedicated OS thread.
//!
//! # Design
//!
//! The daemon owns one thread that blocks on a `crossbeam-channel` receiver with a
//! timeout equal to the optimizer interval. A timeout runs a regular pass; a
//! [`DaemonSignal::Trigger`] runs one immediately (used after membership changes);
//! [`DaemonSignal::Shutdown`] or a disconnected channel ends the loop. No polling.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::core::TaskScheduler;
use crate::util::clock::now_ms;

/// Message to the optimizer thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DaemonSignal {
    Trigger,
    Shutdown,
}

/// Handle to the background optimizer thread. Dropping it stops the thread.
pub struct OptimizerDaemon {
    tx: Sender<DaemonSignal>,
    handle: Mutex<Option<JoinHandle<()>>>,
    interval: Duration,
}

impl OptimizerDaemon {
    /// Start the thread, running a pass on `scheduler` every `interval_ms`.
    ///
    /// # Errors
    ///
    /// Fails if the OS refuses to spawn the thread.
    pub fn spawn(scheduler: Arc<TaskScheduler>, interval_ms: u64) -> std::io::Result<Self> {
        let interval = Duration::from_millis(interval_ms.max(1));
        // One pending trigger is enough; extra triggers coalesce.
        let (tx, rx) = bounded::<DaemonSignal>(1);
        let handle = std::thread::Builder::new()
            .name("graph-scheduler-optimizer".into())
            .spawn(move || run_loop(&scheduler, &rx, interval))?;
        info!(interval_ms = interval.as_millis(), "optimizer daemon started");
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            interval,
        })
    }

    /// Configured period between passes.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Request a pass now. Returns `false` once the daemon has stopped.
    pub fn trigger(&self) -> bool {
        match self.tx.try_send(DaemonSignal::Trigger) {
            Ok(()) | Err(TrySendError::Full(_)) => true,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Stop the thread and wait for the pass in flight, if any.
    pub fn shutdown(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        // A full queue only holds a trigger; block until the shutdown fits.
        let _ = self.tx.send(DaemonSignal::Shutdown);
        if handle.join().is_err() {
            error!("optimizer daemon thread panicked");
        } else {
            info!("optimizer daemon stopped");
        }
    }

    /// Whether the thread is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl Drop for OptimizerDaemon {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for OptimizerDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizerDaemon")
            .field("interval", &self.interval)
            .field("running", &self.is_running())
            .finish()
    }
}

fn run_loop(scheduler: &TaskScheduler, rx: &Receiver<DaemonSignal>, interval: Duration) {
    loop {
        let reason = match rx.recv_timeout(interval) {
            Ok(DaemonSignal::Trigger) => "trigger",
            Err(RecvTimeoutError::Timeout) => "interval",
            Ok(DaemonSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        };
        match scheduler.optimize(now_ms()) {
            Ok(report) if report.discarded => {
                debug!(reason, update_id = report.update_id, "optimizer pass discarded");
            }
            Ok(report) => debug!(
                reason,
                update_id = report.update_id,
                migrations = report.migrations.len(),
                "optimizer pass applied"
            ),
            Err(e) => warn!(reason, error = %e, "optimizer pass failed"),
        }
    }
}
