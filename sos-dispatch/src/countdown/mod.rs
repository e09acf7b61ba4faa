//! Pre-activation countdowns.
//!
//! A PENDING emergency stays cancellable for its countdown; when the
//! countdown elapses its id is sent to the owner of the receiver, which
//! decides whether to activate it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const ELAPSED_CHANNEL_CAPACITY: usize = 256;

struct Countdown {
    token: CancellationToken,
    generation: u64,
}

/// Countdown timers keyed by emergency id.
pub struct CountdownService {
    timers: Arc<DashMap<String, Countdown>>,
    next_generation: AtomicU64,
    elapsed_tx: mpsc::Sender<String>,
}

impl CountdownService {
    /// Create the service and the receiver of elapsed emergency ids.
    pub fn new() -> (Self, mpsc::Receiver<String>) {
        let (elapsed_tx, elapsed_rx) = mpsc::channel(ELAPSED_CHANNEL_CAPACITY);
        let service = Self {
            timers: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
            elapsed_tx,
        };
        (service, elapsed_rx)
    }

    /// Start a countdown. Returns false if one is already running for `emergency_id`.
    pub fn start_countdown(&self, emergency_id: &str, seconds: u64) -> bool {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let token = CancellationToken::new();

        match self.timers.entry(emergency_id.to_string()) {
            Entry::Occupied(_) => {
                warn!(emergency_id, "Countdown already running");
                return false;
            }
            Entry::Vacant(slot) => {
                slot.insert(Countdown {
                    token: token.clone(),
                    generation,
                });
            }
        }

        info!(emergency_id, seconds, "Countdown started");

        let timers = self.timers.clone();
        let elapsed_tx = self.elapsed_tx.clone();
        let emergency_id = emergency_id.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
            }

            if timers
                .remove_if(&emergency_id, |_, c| c.generation == generation)
                .is_none()
            {
                return;
            }

            debug!(emergency_id = %emergency_id, "Countdown elapsed");
            if elapsed_tx.send(emergency_id.clone()).await.is_err() {
                warn!(emergency_id = %emergency_id, "Countdown listener gone, elapsed countdown dropped");
            }
        });

        true
    }

    /// Cancel a countdown. Cancelling a missing countdown is a no-op.
    pub fn cancel_countdown(&self, emergency_id: &str) -> bool {
        match self.timers.remove(emergency_id) {
            Some((_, countdown)) => {
                countdown.token.cancel();
                info!(emergency_id, "Countdown cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_timer_active(&self, emergency_id: &str) -> bool {
        self.timers.contains_key(emergency_id)
    }

    pub fn active_timers(&self) -> usize {
        self.timers.len()
    }

    /// Cancel every countdown.
    pub fn cleanup(&self) -> usize {
        let ids: Vec<String> = self.timers.iter().map(|e| e.key().clone()).collect();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, countdown)) = self.timers.remove(&id) {
                countdown.token.cancel();
                cancelled += 1;
            }
        }
        cancelled
    }
}
