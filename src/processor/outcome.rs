//! Interprets status updates of a submitted batch and feeds the results back
//! into [`AgentState`].

use crate::gateway::{DispatchEvent, StatusSubscription, TxStatus};
use crate::processor::state::AgentState;
use crate::queue::RecoveryAction;
use crate::runtime::telemetry::Telemetry;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_BATCH_FAILURE_COOLDOWN: i64 = 300;

/// Result of applying one inclusion's events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutcomeSummary {
    pub completed: usize,
    pub failed: usize,
    pub newly_banned: usize,
    /// Item events that had no submitted action at their position.
    pub unmatched: usize,
    pub batch_failed: bool,
}

/// How a tracking task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackOutcome {
    Finalized { block_hash: String },
    StreamEnded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct OutcomeTracker {
    state: Arc<AgentState>,
    telemetry: Arc<Telemetry>,
    batch_failure_cooldown: i64,
}

impl OutcomeTracker {
    pub fn new(
        state: Arc<AgentState>,
        telemetry: Arc<Telemetry>,
        batch_failure_cooldown: i64,
    ) -> Self {
        Self {
            state,
            telemetry,
            batch_failure_cooldown,
        }
    }

    /// Matches item events to `actions` by position. The cursor only moves on
    /// `ItemCompleted` and `ItemFailed`.
    pub fn apply_events(
        &self,
        actions: &[RecoveryAction],
        events: &[DispatchEvent],
    ) -> OutcomeSummary {
        let mut summary = OutcomeSummary::default();
        let mut cursor = 0usize;

        for event in events {
            match event {
                DispatchEvent::ItemCompleted => {
                    match actions.get(cursor) {
                        Some(action) => {
                            tracing::debug!(
                                item = cursor,
                                call = %action.fingerprint(),
                                "recovery item completed"
                            );
                            summary.completed += 1;
                            self.telemetry.record_item_completed();
                        }
                        None => {
                            tracing::warn!(item = cursor, "completion event without a submitted item");
                            summary.unmatched += 1;
                        }
                    }
                    cursor += 1;
                }
                DispatchEvent::ItemFailed { error } => {
                    match actions.get(cursor) {
                        Some(action) => {
                            let target = action.target();
                            tracing::warn!(
                                item = cursor,
                                origin = %target.origin,
                                page = target.page_index,
                                call = %action.fingerprint(),
                                error = %error,
                                "recovery item failed; banning call"
                            );
                            summary.failed += 1;
                            self.telemetry.record_item_failed();
                            if self.state.ban(action.fingerprint().clone()) {
                                summary.newly_banned += 1;
                            }
                        }
                        None => {
                            tracing::warn!(
                                item = cursor,
                                error = %error,
                                "failure event without a submitted item"
                            );
                            summary.unmatched += 1;
                        }
                    }
                    cursor += 1;
                }
                DispatchEvent::ExtrinsicSuccess => {
                    tracing::debug!("batch extrinsic succeeded");
                }
                DispatchEvent::ExtrinsicFailed { error } => {
                    tracing::error!(
                        error = %error,
                        cooldown = self.batch_failure_cooldown,
                        "batch extrinsic failed; entering long cooldown"
                    );
                    self.state.set_cooldown(self.batch_failure_cooldown);
                    self.telemetry.record_batch_failure();
                    summary.batch_failed = true;
                }
                DispatchEvent::Other {
                    pallet,
                    variant,
                    data,
                } => {
                    tracing::info!(pallet = %pallet, variant = %variant, data = %data, "unhandled event");
                }
            }
        }

        summary
    }

    /// Follows `subscription` until the batch is finalized, the stream ends,
    /// or `shutdown` fires. Every exit releases the subscription.
    pub async fn track(
        &self,
        actions: Vec<RecoveryAction>,
        mut subscription: StatusSubscription,
        shutdown: CancellationToken,
    ) -> TrackOutcome {
        loop {
            let next = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("shutdown requested; releasing status subscription");
                    subscription.unsubscribe();
                    return TrackOutcome::Cancelled;
                }
                next = subscription.next() => next,
            };

            let status = match next {
                Some(Ok(status)) => status,
                Some(Err(err)) => {
                    self.mark_unresolved(&err);
                    continue;
                }
                None => {
                    tracing::info!("transaction status stream ended");
                    return TrackOutcome::StreamEnded;
                }
            };

            tracing::info!(status = status.label(), "transaction status");

            match status {
                TxStatus::InBlock { block_hash, events } => {
                    let summary = self.apply_events(&actions, &events);
                    tracing::info!(
                        block = %block_hash,
                        completed = summary.completed,
                        failed = summary.failed,
                        batch_failed = summary.batch_failed,
                        "batch included"
                    );
                }
                TxStatus::Finalized { block_hash } => {
                    tracing::info!(block = %block_hash, "batch finalized");
                    subscription.unsubscribe();
                    return TrackOutcome::Finalized { block_hash };
                }
                _ => {}
            }
        }
    }

    /// A status whose events could not be read may hide item failures or a
    /// failed batch, so it is handled like a failed batch.
    fn mark_unresolved(&self, err: &anyhow::Error) {
        tracing::error!(
            error = %format!("{err:#}"),
            cooldown = self.batch_failure_cooldown,
            "batch outcome unreadable; entering long cooldown"
        );
        self.state.set_cooldown(self.batch_failure_cooldown);
        self.telemetry.record_batch_failure();
    }

    pub fn spawn(
        self,
        actions: Vec<RecoveryAction>,
        subscription: StatusSubscription,
        shutdown: CancellationToken,
    ) -> JoinHandle<TrackOutcome> {
        tokio::spawn(async move { self.track(actions, subscription, shutdown).await })
    }
}
