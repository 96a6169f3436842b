//! Per-block decision loop: cooldown, service-head check, page scan, batch
//! submission, and hand-off to an outcome tracker.

use crate::gateway::{BlockRef, ChainGateway};
use crate::processor::batch::BatchBuilder;
use crate::processor::outcome::{OutcomeTracker, TrackOutcome, DEFAULT_BATCH_FAILURE_COOLDOWN};
use crate::processor::state::{AgentState, ProcessingGuard};
use crate::queue::{load_pages, MessageOrigin, RecoveryAction};
use crate::runtime::telemetry::Telemetry;
use anyhow::Error as AnyError;
use futures::future::join_all;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_SERVICE_HEAD_COOLDOWN: i64 = 4;
pub const DEFAULT_POST_SUBMISSION_COOLDOWN: i64 = 4;

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub batch: BatchBuilder,
    pub service_head_cooldown: i64,
    pub post_submission_cooldown: i64,
    pub batch_failure_cooldown: i64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            batch: BatchBuilder::default(),
            service_head_cooldown: DEFAULT_SERVICE_HEAD_COOLDOWN,
            post_submission_cooldown: DEFAULT_POST_SUBMISSION_COOLDOWN,
            batch_failure_cooldown: DEFAULT_BATCH_FAILURE_COOLDOWN,
        }
    }
}

/// Stages of block handling that can fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerStage {
    ServiceHead,
    QueryPages,
    DecodePages,
    BuildBatch,
    Submit,
}

/// Failure of a single block. Never fatal to the agent.
#[derive(Debug)]
pub struct BlockError {
    stage: ControllerStage,
    source: AnyError,
}

impl BlockError {
    pub fn new(stage: ControllerStage, source: impl Into<AnyError>) -> Self {
        Self {
            stage,
            source: source.into(),
        }
    }

    pub fn stage(&self) -> ControllerStage {
        self.stage
    }

    pub fn into_source(self) -> AnyError {
        self.source
    }
}

impl core::fmt::Display for BlockError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:?} stage failed: {:#}", self.stage, self.source)
    }
}

impl std::error::Error for BlockError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// What the controller did with a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockOutcome {
    /// Another block was still being handled.
    Busy,
    ServiceHeadActive(MessageOrigin),
    CoolingDown { remaining: i64 },
    NoPages,
    EmptyBatch,
    Submitted { items: usize },
    SubmissionFailed,
    Failed(ControllerStage),
}

pub struct Controller<G: ChainGateway> {
    gateway: Arc<G>,
    state: Arc<AgentState>,
    telemetry: Arc<Telemetry>,
    settings: ControllerSettings,
    tracker: OutcomeTracker,
    trackers: Mutex<Vec<JoinHandle<TrackOutcome>>>,
    shutdown: CancellationToken,
}

impl<G: ChainGateway> Controller<G> {
    /// Creates a controller with fresh state. Outcome trackers spawned by it
    /// stop when `shutdown` is cancelled.
    pub fn new(gateway: Arc<G>, settings: ControllerSettings, shutdown: CancellationToken) -> Self {
        Self::with_state(
            gateway,
            settings,
            Arc::new(AgentState::new()),
            Arc::new(Telemetry::default()),
            shutdown,
        )
    }

    pub fn with_state(
        gateway: Arc<G>,
        settings: ControllerSettings,
        state: Arc<AgentState>,
        telemetry: Arc<Telemetry>,
        shutdown: CancellationToken,
    ) -> Self {
        let tracker = OutcomeTracker::new(
            state.clone(),
            telemetry.clone(),
            settings.batch_failure_cooldown,
        );
        Self {
            gateway,
            state,
            telemetry,
            settings,
            tracker,
            trackers: Mutex::new(Vec::new()),
            shutdown,
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn state(&self) -> Arc<AgentState> {
        self.state.clone()
    }

    pub fn telemetry(&self) -> Arc<Telemetry> {
        self.telemetry.clone()
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Number of outcome trackers that have not finished yet.
    pub fn active_trackers(&self) -> usize {
        let mut trackers = self.trackers.lock().expect("tracker list mutex poisoned");
        trackers.retain(|handle| !handle.is_finished());
        trackers.len()
    }

    /// Handles `block` on the current task.
    pub async fn handle_block(&self, block: &BlockRef) -> BlockOutcome {
        self.telemetry.record_block_observed();
        let Some(guard) = self.state.try_begin_processing() else {
            return self.busy(block);
        };
        self.process_block(block, guard).await
    }

    /// Claims the processing flag immediately and handles `block` on a new
    /// task. Returns `None` when the block was dropped because another one
    /// is still in flight.
    pub fn dispatch(self: &Arc<Self>, block: BlockRef) -> Option<JoinHandle<BlockOutcome>> {
        self.telemetry.record_block_observed();
        let Some(guard) = self.state.try_begin_processing() else {
            self.busy(&block);
            return None;
        };

        let controller = Arc::clone(self);
        Some(tokio::spawn(async move {
            controller.process_block(&block, guard).await
        }))
    }

    /// Stops every outcome tracker and waits for them to release their
    /// subscriptions.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let handles: Vec<_> = {
            let mut trackers = self.trackers.lock().expect("tracker list mutex poisoned");
            trackers.drain(..).collect()
        };

        for result in join_all(handles).await {
            match result {
                Ok(outcome) => tracing::debug!(?outcome, "outcome tracker stopped"),
                Err(err) => tracing::warn!(error = %err, "outcome tracker task panicked"),
            }
        }
    }

    fn busy(&self, block: &BlockRef) -> BlockOutcome {
        tracing::info!(
            block = block.number,
            hash = %block.hash,
            "previous block still processing; skipping"
        );
        self.telemetry.record_busy_skip();
        BlockOutcome::Busy
    }

    async fn process_block(&self, block: &BlockRef, _guard: ProcessingGuard) -> BlockOutcome {
        match self.run_stages(block).await {
            Ok(outcome) => {
                tracing::debug!(block = block.number, ?outcome, "block handled");
                outcome
            }
            Err(err) => {
                tracing::error!(
                    block = block.number,
                    stage = ?err.stage(),
                    error = %err,
                    "block handling failed"
                );
                self.telemetry.record_block_error();
                BlockOutcome::Failed(err.stage())
            }
        }
    }

    async fn run_stages(&self, block: &BlockRef) -> Result<BlockOutcome, BlockError> {
        let cooldown = self.state.tick_cooldown();
        tracing::debug!(block = block.number, hash = %block.hash, cooldown, "new block");

        let service_head = self
            .gateway
            .query_service_head()
            .await
            .map_err(|err| BlockError::new(ControllerStage::ServiceHead, err))?;

        if let Some(origin) = service_head {
            tracing::info!(
                block = block.number,
                origin = %origin,
                "queue is being serviced; deferring recovery"
            );
            self.state.set_cooldown(self.settings.service_head_cooldown);
            self.telemetry.record_service_head_deferral();
            return Ok(BlockOutcome::ServiceHeadActive(origin));
        }

        let remaining = self.state.cooldown();
        if remaining > 0 {
            tracing::info!(block = block.number, cooldown = remaining, "cooling down");
            self.telemetry.record_cooldown_skip();
            return Ok(BlockOutcome::CoolingDown { remaining });
        }

        let entries = self
            .gateway
            .query_queue_pages()
            .await
            .map_err(|err| BlockError::new(ControllerStage::QueryPages, err))?;
        let pages =
            load_pages(&entries).map_err(|err| BlockError::new(ControllerStage::DecodePages, err))?;

        if pages.is_empty() {
            tracing::debug!(block = block.number, "no queue pages");
            return Ok(BlockOutcome::NoPages);
        }

        let actions = self
            .settings
            .batch
            .build(self.gateway.as_ref(), &pages, &self.state)
            .map_err(|err| BlockError::new(ControllerStage::BuildBatch, err))?;

        if actions.is_empty() {
            tracing::debug!(
                block = block.number,
                pages = pages.len(),
                "no eligible recovery calls"
            );
            return Ok(BlockOutcome::EmptyBatch);
        }

        Ok(self.submit(block, actions).await)
    }

    async fn submit(&self, block: &BlockRef, actions: Vec<RecoveryAction>) -> BlockOutcome {
        let items = actions.len();

        let submission = match self.gateway.build_batch_call(&actions) {
            Ok(call) => {
                tracing::info!(
                    block = block.number,
                    items,
                    bytes = call.encoded().len(),
                    "submitting recovery batch"
                );
                tracing::debug!(call = %call.to_hex(), "recovery batch call");
                self.gateway.submit_and_track(&call).await
            }
            Err(err) => Err(err),
        };

        self.state.set_cooldown(self.settings.post_submission_cooldown);

        match submission {
            Ok(subscription) => {
                self.telemetry.record_batch_submitted();
                let handle =
                    self.tracker
                        .clone()
                        .spawn(actions, subscription, self.shutdown.child_token());
                self.register_tracker(handle);
                BlockOutcome::Submitted { items }
            }
            Err(err) => {
                tracing::error!(
                    block = block.number,
                    stage = ?ControllerStage::Submit,
                    error = %format!("{err:#}"),
                    "failed to submit recovery batch"
                );
                self.telemetry.record_submission_error();
                BlockOutcome::SubmissionFailed
            }
        }
    }

    fn register_tracker(&self, handle: JoinHandle<TrackOutcome>) {
        let mut trackers = self.trackers.lock().expect("tracker list mutex poisoned");
        trackers.retain(|handle| !handle.is_finished());
        trackers.push(handle);
    }
}
