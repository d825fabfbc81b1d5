use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::sync::engine::{FlushOutcome, ProgressSyncService};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Reports connectivity changes to a running [`SyncWorker`].
///
/// The app layer owns the actual signal (an OS callback, a failed request,
/// a manual toggle); the worker only cares about the resulting boolean.
#[derive(Clone)]
pub struct ConnectivityHandle {
    tx: watch::Sender<bool>,
}

impl ConnectivityHandle {
    pub fn set_online(&self, online: bool) {
        // Send only fails once the worker side is gone, which is harmless.
        let _ = self.tx.send(online);
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Background drainer for queued writes.
///
/// Owns its lifecycle explicitly: nothing runs until `start`, and `stop`
/// (or dropping the worker) tears the task down, so tests can run many
/// workers side by side without leaking shared listeners. While running it
/// drains on two triggers: a connectivity-restored signal (immediate, rate
/// limit ignored) and a periodic tick (rate-limited, skipped while marked
/// offline).
pub struct SyncWorker {
    engine: Arc<ProgressSyncService>,
    poll_interval: Duration,
    connectivity: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SyncWorker {
    /// Creates a stopped worker, assumed online until told otherwise.
    #[must_use]
    pub fn new(engine: Arc<ProgressSyncService>) -> (Self, ConnectivityHandle) {
        let (tx, _rx) = watch::channel(true);
        let handle = ConnectivityHandle { tx: tx.clone() };
        let worker = Self {
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
            connectivity: tx,
            task: Mutex::new(None),
        };
        (worker, handle)
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|task| task.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Spawns the drain loop. Calling it on a running worker is a no-op.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let Ok(mut task) = self.task.lock() else {
            return;
        };
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("sync worker already running");
            return;
        }

        let engine = Arc::clone(&self.engine);
        let mut connectivity = self.connectivity.subscribe();
        let poll = self.poll_interval;
        *task = Some(tokio::spawn(async move {
            // Stagger the first tick so many instances started together do
            // not retry in lockstep.
            let jitter = jitter_within(poll);
            let first_tick = tokio::time::Instant::now() + poll + jitter;
            let mut tick = tokio::time::interval_at(first_tick, poll);
            loop {
                tokio::select! {
                    changed = connectivity.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        if *connectivity.borrow_and_update() {
                            info!("connectivity restored, draining queued writes");
                            drain(&engine, true).await;
                        }
                    }
                    _ = tick.tick() => {
                        if *connectivity.borrow() {
                            drain(&engine, false).await;
                        }
                    }
                }
            }
        }));
    }

    /// Aborts the drain loop. Queued writes stay queued.
    pub fn stop(&self) {
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn drain(engine: &ProgressSyncService, forced: bool) {
    for user in engine.pending_users() {
        let outcome = if forced {
            engine.flush_pending(&user).await
        } else {
            engine.flush_pending_if_due(&user).await
        };
        if outcome == FlushOutcome::Failed {
            // The backend is still down; trying the rest of the queue this
            // cycle would only pile on.
            break;
        }
    }
}

fn jitter_within(poll: Duration) -> Duration {
    let ceiling = u64::try_from(poll.as_millis()).unwrap_or(u64::MAX).max(1);
    Duration::from_millis(rand::rng().random_range(0..ceiling))
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
