//! Eligibility filter and batch builder.

use crate::gateway::CallBuilder;
use crate::processor::state::AgentState;
use crate::queue::{QueuePage, RecoveryAction, RecoveryTarget, WeightLimit};
use anyhow::{Context, Result};

pub const DEFAULT_BATCH_LIMIT: usize = 10;

/// Selects pages with pending messages and turns them into a bounded,
/// order-preserving list of recovery actions.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    weight_limit: WeightLimit,
    max_batch_size: usize,
}

impl BatchBuilder {
    pub fn new(weight_limit: WeightLimit, max_batch_size: usize) -> Self {
        Self {
            weight_limit,
            max_batch_size,
        }
    }

    pub fn weight_limit(&self) -> WeightLimit {
        self.weight_limit
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    /// Builds the batch for `pages`. Banned actions are skipped, never
    /// reported as errors; only a call that fails to encode is.
    pub fn build<C>(
        &self,
        calls: &C,
        pages: &[QueuePage],
        state: &AgentState,
    ) -> Result<Vec<RecoveryAction>>
    where
        C: CallBuilder + ?Sized,
    {
        let mut batch = Vec::new();

        for page in pages.iter().filter(|page| page.has_remaining()) {
            tracing::debug!(
                origin = %page.origin,
                page = page.page_index,
                remaining = page.remaining,
                "creating recovery call"
            );

            let target = RecoveryTarget::for_page(page, self.weight_limit);
            let action = calls.build_recovery_call(target).with_context(|| {
                format!(
                    "failed to build recovery call for origin {} page {}",
                    page.origin, page.page_index
                )
            })?;

            if state.is_banned(action.fingerprint()) {
                tracing::info!(
                    origin = %page.origin,
                    page = page.page_index,
                    call = %action.fingerprint(),
                    "recovery call is banned; skipping"
                );
                continue;
            }

            batch.push(action);
        }

        if batch.len() > self.max_batch_size {
            tracing::debug!(
                eligible = batch.len(),
                limit = self.max_batch_size,
                "truncating recovery batch"
            );
            batch.truncate(self.max_batch_size);
        }

        Ok(batch)
    }
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::new(WeightLimit::default(), DEFAULT_BATCH_LIMIT)
    }
}
