//! Process-lifetime state shared between the controller and outcome trackers.

use crate::queue::Fingerprint;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};

/// Cooldown counter, ban set, and processing flag of one agent instance.
///
/// The ban set lock is never held across an await point.
#[derive(Debug, Default)]
pub struct AgentState {
    cooldown: AtomicI64,
    banned: Mutex<HashSet<Fingerprint>>,
    processing: AtomicBool,
}

impl AgentState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the processing flag. Returns `None` while another block is
    /// being handled.
    pub fn try_begin_processing(self: &Arc<Self>) -> Option<ProcessingGuard> {
        if self.processing.swap(true, Ordering::SeqCst) {
            return None;
        }
        Some(ProcessingGuard {
            state: Arc::clone(self),
        })
    }

    pub fn is_processing(&self) -> bool {
        self.processing.load(Ordering::SeqCst)
    }

    pub fn cooldown(&self) -> i64 {
        self.cooldown.load(Ordering::SeqCst)
    }

    /// Decrements the cooldown by one block and returns the new value.
    pub fn tick_cooldown(&self) -> i64 {
        let previous = self
            .cooldown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                Some(value.saturating_sub(1))
            })
            .unwrap_or_else(|value| value);
        previous.saturating_sub(1)
    }

    pub fn set_cooldown(&self, blocks: i64) {
        self.cooldown.store(blocks, Ordering::SeqCst);
    }

    /// Adds `fingerprint` to the ban set. Returns `false` if it was already banned.
    pub fn ban(&self, fingerprint: Fingerprint) -> bool {
        self.banned
            .lock()
            .expect("ban set mutex poisoned")
            .insert(fingerprint)
    }

    pub fn is_banned(&self, fingerprint: &Fingerprint) -> bool {
        self.banned
            .lock()
            .expect("ban set mutex poisoned")
            .contains(fingerprint)
    }

    pub fn banned_count(&self) -> usize {
        self.banned.lock().expect("ban set mutex poisoned").len()
    }
}

/// Holds the processing flag; clears it when dropped, including on panic.
#[derive(Debug)]
pub struct ProcessingGuard {
    state: Arc<AgentState>,
}

impl Drop for ProcessingGuard {
    fn drop(&mut self) {
        self.state.processing.store(false, Ordering::SeqCst);
    }
}
