//! Escalation timer registry.
//!
//! Owns the emergency id → timer map. Every read-modify-write sequence
//! (exists? → insert, exists? → cancel + remove) runs under one lock, so a
//! double start or a start-after-stop cannot interleave.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

struct TimerEntry {
    token: CancellationToken,
    /// Distinguishes this timer from a later one for the same emergency.
    generation: u64,
    deadline: DateTime<Utc>,
}

#[derive(Default)]
struct RegistryInner {
    timers: HashMap<String, TimerEntry>,
    next_generation: u64,
}

/// Handle returned for a newly registered timer.
#[derive(Debug, Clone)]
pub struct TimerHandle {
    pub token: CancellationToken,
    pub generation: u64,
}

#[derive(Default)]
pub struct TimerRegistry {
    inner: Mutex<RegistryInner>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a timer unless one already exists for `emergency_id`.
    pub fn try_register(&self, emergency_id: &str, deadline: DateTime<Utc>) -> Option<TimerHandle> {
        let mut inner = self.inner.lock();
        if inner.timers.contains_key(emergency_id) {
            return None;
        }
        inner.next_generation += 1;
        let handle = TimerHandle {
            token: CancellationToken::new(),
            generation: inner.next_generation,
        };
        inner.timers.insert(
            emergency_id.to_string(),
            TimerEntry {
                token: handle.token.clone(),
                generation: handle.generation,
                deadline,
            },
        );
        Some(handle)
    }

    /// Cancel and remove the timer of `emergency_id`. False if there was none.
    pub fn cancel(&self, emergency_id: &str) -> bool {
        match self.inner.lock().timers.remove(emergency_id) {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Remove the entry of a firing timer. False if it was cancelled or
    /// replaced in the meantime.
    pub fn remove_fired(&self, emergency_id: &str, generation: u64) -> bool {
        let mut inner = self.inner.lock();
        match inner.timers.get(emergency_id) {
            Some(entry) if entry.generation == generation => {
                inner.timers.remove(emergency_id);
                true
            }
            _ => false,
        }
    }

    /// Cancel and remove every timer, returning how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<TimerEntry> = {
            let mut inner = self.inner.lock();
            inner.timers.drain().map(|(_, entry)| entry).collect()
        };
        for entry in &drained {
            entry.token.cancel();
        }
        drained.len()
    }

    pub fn contains(&self, emergency_id: &str) -> bool {
        self.inner.lock().timers.contains_key(emergency_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn deadline(&self, emergency_id: &str) -> Option<DateTime<Utc>> {
        self.inner
            .lock()
            .timers
            .get(emergency_id)
            .map(|entry| entry.deadline)
    }

    pub fn emergency_ids(&self) -> Vec<String> {
        self.inner.lock().timers.keys().cloned().collect()
    }
}
