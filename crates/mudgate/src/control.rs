//! Process-level control: graceful shutdown countdown and account reload.
//!
//! Both are signalled through `watch` channels; the accept loop observes the
//! shutdown flag and a reload task observes the reload generation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::info;

use crate::registry::Notifier;

/// Seconds-remaining marks at which a countdown notice is broadcast.
const ANNOUNCE_AT: &[u64] = &[60, 30, 10, 5, 4, 3, 2, 1];

/// Longest countdown `schedule_shutdown` accepts.
pub const MAX_COUNTDOWN: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug)]
struct Pending {
    task: JoinHandle<()>,
    fires_at: Instant,
    by: String,
}

pub struct Control {
    notifier: Arc<dyn Notifier>,
    shutdown_tx: watch::Sender<bool>,
    reload_tx: watch::Sender<u64>,
    default_shutdown: Duration,
    pending: Mutex<Option<Pending>>,
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Control")
            .field("default_shutdown", &self.default_shutdown)
            .field("pending", &self.lock().as_ref().map(|p| &p.by))
            .finish()
    }
}

fn countdown_notice(secs: u64) -> String {
    format!("# server shutting down in {secs}s\r\n")
}

impl Control {
    pub fn new(notifier: Arc<dyn Notifier>, default_shutdown: Duration) -> Self {
        Self {
            notifier,
            shutdown_tx: watch::channel(false).0,
            reload_tx: watch::channel(0).0,
            default_shutdown,
            pending: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn default_shutdown(&self) -> Duration {
        self.default_shutdown
    }

    /// Flips to `true` once a shutdown countdown reaches zero.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Bumped on every reload request.
    pub fn reload_signal(&self) -> watch::Receiver<u64> {
        self.reload_tx.subscribe()
    }

    pub fn shutdown_fired(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Time left on the pending shutdown, if one is scheduled.
    pub fn shutdown_pending(&self) -> Option<Duration> {
        self.lock()
            .as_ref()
            .filter(|p| !p.task.is_finished())
            .map(|p| p.fires_at.saturating_duration_since(Instant::now()))
    }

    /// Start (or restart) the countdown. Must be called from within the runtime.
    /// Returns false, leaving any pending countdown alone, if `after` exceeds
    /// `MAX_COUNTDOWN`.
    pub fn schedule_shutdown(&self, after: Duration, by: &str) -> bool {
        if after > MAX_COUNTDOWN {
            return false;
        }
        let Some(fires_at) = Instant::now().checked_add(after) else {
            return false;
        };
        let task = tokio::spawn(countdown(
            self.notifier.clone(),
            self.shutdown_tx.clone(),
            fires_at,
        ));
        let prev = self.lock().replace(Pending {
            task,
            fires_at,
            by: by.to_string(),
        });
        if let Some(p) = prev {
            p.task.abort();
            info!(by = %p.by, "previous shutdown countdown replaced");
        }

        info!(by = %by, seconds = after.as_secs(), "shutdown scheduled");
        self.notifier.broadcast(&countdown_notice(after.as_secs()));
        true
    }

    /// Abort a pending countdown. Returns false if there was nothing to cancel.
    pub fn cancel_shutdown(&self, by: &str) -> bool {
        let Some(p) = self.lock().take() else {
            return false;
        };
        p.task.abort();
        if self.shutdown_fired() {
            return false;
        }
        info!(by = %by, scheduled_by = %p.by, "shutdown cancelled");
        self.notifier.broadcast("# shutdown cancelled\r\n");
        true
    }

    /// Ask the reload task to re-read accounts. Returns the new generation.
    pub fn request_reload(&self, by: &str) -> u64 {
        let mut generation = 0;
        self.reload_tx.send_modify(|g| {
            *g += 1;
            generation = *g;
        });
        info!(by = %by, generation, "reload requested");
        generation
    }
}

async fn countdown(notifier: Arc<dyn Notifier>, shutdown_tx: watch::Sender<bool>, at: Instant) {
    let total = at.saturating_duration_since(Instant::now());
    for &mark in ANNOUNCE_AT {
        let left = Duration::from_secs(mark);
        if left >= total {
            continue;
        }
        sleep_until(at - left).await;
        notifier.broadcast(&countdown_notice(mark));
    }
    sleep_until(at).await;
    info!("shutdown countdown reached zero");
    shutdown_tx.send_replace(true);
}
