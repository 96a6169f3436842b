use crate::processor::state::AgentState;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Default interval used by the metrics reporter task.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(60);

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a basic tracing subscriber (if one is not already active).
///
/// The subscriber honours `RUST_LOG` if it is present, otherwise it falls back to `info`.
/// Calling this function multiple times is harmless.
pub fn init_tracing() {
    if TRACING_INIT.get().is_some() {
        return;
    }

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();

    let _ = TRACING_INIT.set(());
}

/// Monotonic counters describing what the agent did with each block and
/// each submitted batch.
#[derive(Default, Debug)]
pub struct Telemetry {
    blocks_observed: AtomicU64,
    busy_skips: AtomicU64,
    cooldown_skips: AtomicU64,
    service_head_deferrals: AtomicU64,
    batches_submitted: AtomicU64,
    submission_errors: AtomicU64,
    items_completed: AtomicU64,
    items_failed: AtomicU64,
    batch_failures: AtomicU64,
    block_errors: AtomicU64,
    subscription_errors: AtomicU64,
}

impl Telemetry {
    pub fn record_block_observed(&self) {
        self.blocks_observed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_busy_skip(&self) {
        self.busy_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cooldown_skip(&self) {
        self.cooldown_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_service_head_deferral(&self) {
        self.service_head_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_submitted(&self) {
        self.batches_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_error(&self) {
        self.submission_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_completed(&self) {
        self.items_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_item_failed(&self) {
        self.items_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_failure(&self) {
        self.batch_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_block_error(&self) {
        self.block_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// A block notification that could not be turned into a block.
    pub fn record_subscription_error(&self) {
        self.subscription_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            blocks_observed: self.blocks_observed.load(Ordering::Relaxed),
            busy_skips: self.busy_skips.load(Ordering::Relaxed),
            cooldown_skips: self.cooldown_skips.load(Ordering::Relaxed),
            service_head_deferrals: self.service_head_deferrals.load(Ordering::Relaxed),
            batches_submitted: self.batches_submitted.load(Ordering::Relaxed),
            submission_errors: self.submission_errors.load(Ordering::Relaxed),
            items_completed: self.items_completed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            batch_failures: self.batch_failures.load(Ordering::Relaxed),
            block_errors: self.block_errors.load(Ordering::Relaxed),
            subscription_errors: self.subscription_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct TelemetrySnapshot {
    pub blocks_observed: u64,
    pub busy_skips: u64,
    pub cooldown_skips: u64,
    pub service_head_deferrals: u64,
    pub batches_submitted: u64,
    pub submission_errors: u64,
    pub items_completed: u64,
    pub items_failed: u64,
    pub batch_failures: u64,
    pub block_errors: u64,
    pub subscription_errors: u64,
}

/// Spawns a background task that periodically logs block handling counters,
/// batch outcomes, the current cooldown, and the size of the ban set.
pub fn spawn_metrics_reporter(
    telemetry: Arc<Telemetry>,
    state: Arc<AgentState>,
    shutdown: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();

        loop {
            select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(target: "overweight_keeper::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let new_blocks = current
                        .blocks_observed
                        .saturating_sub(last_snapshot.blocks_observed);

                    tracing::info!(
                        target: "overweight_keeper::metrics",
                        new_blocks,
                        blocks = current.blocks_observed,
                        busy_skips = current.busy_skips,
                        cooldown_skips = current.cooldown_skips,
                        service_head_deferrals = current.service_head_deferrals,
                        batches = current.batches_submitted,
                        submission_errors = current.submission_errors,
                        items_completed = current.items_completed,
                        items_failed = current.items_failed,
                        batch_failures = current.batch_failures,
                        block_errors = current.block_errors,
                        subscription_errors = current.subscription_errors,
                        cooldown = state.cooldown(),
                        banned = state.banned_count(),
                        "agent metrics snapshot"
                    );

                    last_snapshot = current;
                }
            }
        }
    })
}
