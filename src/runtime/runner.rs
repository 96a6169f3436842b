use crate::gateway::ChainGateway;
use crate::processor::controller::{BlockOutcome, Controller, ControllerSettings};
use crate::rpc::{RpcChainGateway, RuntimeAdapter};
use crate::runtime::config::AgentConfig;
use crate::runtime::telemetry::{self, DEFAULT_METRICS_INTERVAL};
use anyhow::{anyhow, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Drives a [`Controller`] from the gateway's block subscription and handles
/// OS signals for graceful shutdown.
pub struct Runner<G: ChainGateway> {
    controller: Arc<Controller<G>>,
    shutdown: CancellationToken,
    metrics_interval: Duration,
}

impl Runner<RpcChainGateway> {
    /// Builds the runtime adapter from the configured signer secret, then
    /// connects to the configured node. Adapter and connection failures are
    /// returned to the caller.
    pub async fn connect<F>(config: &AgentConfig, build_adapter: F) -> Result<Self>
    where
        F: FnOnce(&str) -> Result<Arc<dyn RuntimeAdapter>>,
    {
        config.validate()?;
        let adapter =
            build_adapter(config.secret_uri()).context("failed to build runtime adapter")?;
        let gateway = RpcChainGateway::from_config(config, adapter).await?;
        Ok(Self::new(Arc::new(gateway), config.controller_settings())
            .with_metrics_interval(config.metrics_interval()))
    }
}

impl<G: ChainGateway> Runner<G> {
    /// Creates a runner with a root [`CancellationToken`] shared by the
    /// controller, its outcome trackers, and the metrics reporter.
    pub fn new(gateway: Arc<G>, settings: ControllerSettings) -> Self {
        let shutdown = CancellationToken::new();
        let controller = Arc::new(Controller::new(gateway, settings, shutdown.child_token()));
        Self {
            controller,
            shutdown,
            metrics_interval: DEFAULT_METRICS_INTERVAL,
        }
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = interval;
        self
    }

    pub fn controller(&self) -> &Arc<Controller<G>> {
        &self.controller
    }

    /// Returns a clone of the root shutdown token so external callers can integrate
    /// with their own signal handlers or cancellation strategies.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Handles blocks until the token is cancelled or the block stream closes.
    ///
    /// Unreadable notifications are logged and skipped. A closed block stream
    /// is returned as an error after the agent has shut down cleanly.
    pub async fn run(&self) -> Result<()> {
        let gateway = self.controller.gateway().clone();
        let mut blocks = gateway
            .subscribe_new_blocks()
            .await
            .context("failed to subscribe to new blocks")?;

        tracing::info!("agent started; waiting for new blocks");

        let metrics = telemetry::spawn_metrics_reporter(
            self.controller.telemetry(),
            self.controller.state(),
            self.shutdown.child_token(),
            self.metrics_interval,
        );

        let mut in_flight: Option<JoinHandle<BlockOutcome>> = None;
        let result = loop {
            let next = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("shutdown requested; stopping block loop");
                    break Ok(());
                }
                next = blocks.next() => next,
            };

            match next {
                Some(Ok(block)) => {
                    if let Some(handle) = self.controller.dispatch(block) {
                        in_flight = Some(handle);
                    }
                }
                Some(Err(err)) => {
                    tracing::warn!(
                        subscription = blocks.label(),
                        error = %format!("{err:#}"),
                        "skipping unreadable block notification"
                    );
                    self.controller.telemetry().record_subscription_error();
                }
                None => {
                    break Err(anyhow!("block subscription closed by the node"));
                }
            }
        };

        blocks.unsubscribe();
        self.shutdown.cancel();

        if let Some(handle) = in_flight.take() {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "block handler task panicked");
            }
        }
        self.controller.shutdown().await;
        if let Err(err) = metrics.await {
            tracing::warn!(error = %err, "metrics reporter task panicked");
        }
        if let Err(err) = gateway.disconnect().await {
            tracing::warn!(error = %format!("{err:#}"), "failed to disconnect gateway");
        }

        tracing::info!("agent stopped");
        result
    }

    /// Runs until a Ctrl-C (SIGINT) is received, the shutdown token is cancelled elsewhere,
    /// or the block stream closes.
    pub async fn run_until_ctrl_c(&self) -> Result<()> {
        let shutdown = self.shutdown.clone();
        let signals = tokio::spawn(async move {
            tokio::select! {
                result = signal::ctrl_c() => {
                    match result {
                        Ok(()) => tracing::info!("Ctrl-C received; shutting down agent"),
                        Err(err) => tracing::warn!(error = %err, "failed to listen for Ctrl-C"),
                    }
                    shutdown.cancel();
                }
                _ = shutdown.cancelled() => {}
            }
        });

        let result = self.run().await;
        signals.abort();
        result
    }
}
