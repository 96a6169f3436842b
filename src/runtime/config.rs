use crate::processor::batch::{BatchBuilder, DEFAULT_BATCH_LIMIT};
use crate::processor::controller::{
    ControllerSettings, DEFAULT_POST_SUBMISSION_COOLDOWN, DEFAULT_SERVICE_HEAD_COOLDOWN,
};
use crate::processor::outcome::DEFAULT_BATCH_FAILURE_COOLDOWN;
use crate::queue::action::{DEFAULT_PROOF_SIZE, DEFAULT_REF_TIME};
use crate::queue::WeightLimit;
use crate::rpc::calls::CallIndices;
use crate::runtime::telemetry;
use anyhow::{bail, Context, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;

pub const ENV_WS_ENDPOINT: &str = "WS_ENDPOINT";
pub const ENV_MNEMONIC: &str = "MNEMONIC";
pub const ENV_REF_TIME: &str = "REF_TIME";
pub const ENV_PROOF_SIZE: &str = "PROOF_SIZE";
pub const ENV_BATCH_LIMIT: &str = "BATCH_LIMIT";
pub const ENV_SERVICE_HEAD_COOLDOWN: &str = "SERVICE_HEAD_COOLDOWN";
pub const ENV_POST_SUBMISSION_COOLDOWN: &str = "POST_SUBMISSION_COOLDOWN";
pub const ENV_BATCH_FAILURE_COOLDOWN: &str = "BATCH_FAILURE_COOLDOWN";
pub const ENV_RPC_TIMEOUT_SECS: &str = "RPC_TIMEOUT_SECS";
pub const ENV_METRICS_INTERVAL_SECS: &str = "METRICS_INTERVAL_SECS";
pub const ENV_MESSAGE_QUEUE_PALLET_INDEX: &str = "MESSAGE_QUEUE_PALLET_INDEX";
pub const ENV_EXECUTE_OVERWEIGHT_CALL_INDEX: &str = "EXECUTE_OVERWEIGHT_CALL_INDEX";
pub const ENV_UTILITY_PALLET_INDEX: &str = "UTILITY_PALLET_INDEX";
pub const ENV_FORCE_BATCH_CALL_INDEX: &str = "FORCE_BATCH_CALL_INDEX";

/// Runtime configuration of the agent.
///
/// All instances must be constructed via [`AgentConfig::builder`], [`AgentConfig::new`] or
/// [`AgentConfig::from_env`] so invariants are validated before any consumer observes the
/// values.
#[derive(Clone, PartialEq, Eq)]
pub struct AgentConfig {
    endpoint: String,
    secret_uri: String,
    weight_limit: WeightLimit,
    batch_limit: usize,
    service_head_cooldown: i64,
    post_submission_cooldown: i64,
    batch_failure_cooldown: i64,
    rpc_timeout: Duration,
    metrics_interval: Duration,
    call_indices: CallIndices,
}

pub struct AgentConfigParams {
    pub endpoint: String,
    pub secret_uri: String,
    pub weight_limit: WeightLimit,
    pub batch_limit: usize,
    pub service_head_cooldown: i64,
    pub post_submission_cooldown: i64,
    pub batch_failure_cooldown: i64,
    pub rpc_timeout: Duration,
    pub metrics_interval: Duration,
    pub call_indices: CallIndices,
}

impl AgentConfig {
    /// Returns a builder to incrementally construct and validate a configuration.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values.
    pub fn new(params: AgentConfigParams) -> Result<Self> {
        let AgentConfigParams {
            endpoint,
            secret_uri,
            weight_limit,
            batch_limit,
            service_head_cooldown,
            post_submission_cooldown,
            batch_failure_cooldown,
            rpc_timeout,
            metrics_interval,
            call_indices,
        } = params;

        let config = Self {
            endpoint: endpoint.trim().to_owned(),
            secret_uri,
            weight_limit,
            batch_limit,
            service_head_cooldown,
            post_submission_cooldown,
            batch_failure_cooldown,
            rpc_timeout,
            metrics_interval,
            call_indices,
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from process environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads the configuration through `lookup`, which maps a variable name to its value.
    /// Unset variables fall back to their defaults; only the endpoint and secret are required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();

        if let Some(endpoint) = lookup(ENV_WS_ENDPOINT) {
            builder = builder.endpoint(endpoint);
        }
        if let Some(secret) = lookup(ENV_MNEMONIC) {
            builder = builder.secret_uri(secret);
        }

        let ref_time = parse_var(&lookup, ENV_REF_TIME)?.unwrap_or(DEFAULT_REF_TIME);
        let proof_size = parse_var(&lookup, ENV_PROOF_SIZE)?.unwrap_or(DEFAULT_PROOF_SIZE);
        builder = builder.weight_limit(WeightLimit::new(ref_time, proof_size));

        if let Some(limit) = parse_var(&lookup, ENV_BATCH_LIMIT)? {
            builder = builder.batch_limit(limit);
        }
        if let Some(blocks) = parse_var(&lookup, ENV_SERVICE_HEAD_COOLDOWN)? {
            builder = builder.service_head_cooldown(blocks);
        }
        if let Some(blocks) = parse_var(&lookup, ENV_POST_SUBMISSION_COOLDOWN)? {
            builder = builder.post_submission_cooldown(blocks);
        }
        if let Some(blocks) = parse_var(&lookup, ENV_BATCH_FAILURE_COOLDOWN)? {
            builder = builder.batch_failure_cooldown(blocks);
        }
        if let Some(secs) = parse_var(&lookup, ENV_RPC_TIMEOUT_SECS)? {
            builder = builder.rpc_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = parse_var(&lookup, ENV_METRICS_INTERVAL_SECS)? {
            builder = builder.metrics_interval(Duration::from_secs(secs));
        }

        let defaults = CallIndices::default();
        builder = builder.call_indices(CallIndices {
            message_queue_pallet: parse_var(&lookup, ENV_MESSAGE_QUEUE_PALLET_INDEX)?
                .unwrap_or(defaults.message_queue_pallet),
            execute_overweight: parse_var(&lookup, ENV_EXECUTE_OVERWEIGHT_CALL_INDEX)?
                .unwrap_or(defaults.execute_overweight),
            utility_pallet: parse_var(&lookup, ENV_UTILITY_PALLET_INDEX)?
                .unwrap_or(defaults.utility_pallet),
            force_batch: parse_var(&lookup, ENV_FORCE_BATCH_CALL_INDEX)?
                .unwrap_or(defaults.force_batch),
        });

        builder.build()
    }

    /// WebSocket endpoint (`ws://` or `wss://`) of the node.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Signer secret handed to the runtime adapter. Never logged.
    pub fn secret_uri(&self) -> &str {
        &self.secret_uri
    }

    pub fn weight_limit(&self) -> WeightLimit {
        self.weight_limit
    }

    /// Maximum number of recovery calls per batch.
    pub fn batch_limit(&self) -> usize {
        self.batch_limit
    }

    pub fn service_head_cooldown(&self) -> i64 {
        self.service_head_cooldown
    }

    pub fn post_submission_cooldown(&self) -> i64 {
        self.post_submission_cooldown
    }

    pub fn batch_failure_cooldown(&self) -> i64 {
        self.batch_failure_cooldown
    }

    /// Per-request timeout applied by the RPC gateway.
    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    pub fn call_indices(&self) -> CallIndices {
        self.call_indices
    }

    /// Controller settings derived from this configuration.
    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            batch: BatchBuilder::new(self.weight_limit, self.batch_limit),
            service_head_cooldown: self.service_head_cooldown,
            post_submission_cooldown: self.post_submission_cooldown,
            batch_failure_cooldown: self.batch_failure_cooldown,
        }
    }

    /// Performs validation on an existing configuration instance.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint(&self.endpoint)?;

        if self.secret_uri.trim().is_empty() {
            bail!("secret_uri cannot be empty");
        }

        if self.weight_limit.ref_time == 0 {
            bail!("ref_time must be greater than 0");
        }

        if self.weight_limit.proof_size == 0 {
            bail!("proof_size must be greater than 0");
        }

        if self.batch_limit == 0 {
            bail!("batch_limit must be greater than 0");
        }

        if self.service_head_cooldown < 0 {
            bail!("service_head_cooldown cannot be negative");
        }

        if self.post_submission_cooldown < 0 {
            bail!("post_submission_cooldown cannot be negative");
        }

        if self.batch_failure_cooldown < 0 {
            bail!("batch_failure_cooldown cannot be negative");
        }

        if self.rpc_timeout.is_zero() {
            bail!("rpc_timeout must be greater than 0");
        }

        if self.metrics_interval.is_zero() {
            bail!("metrics_interval must be greater than 0");
        }

        Ok(())
    }
}

impl fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfig")
            .field("endpoint", &self.endpoint)
            .field("secret_uri", &"<redacted>")
            .field("weight_limit", &self.weight_limit)
            .field("batch_limit", &self.batch_limit)
            .field("service_head_cooldown", &self.service_head_cooldown)
            .field("post_submission_cooldown", &self.post_submission_cooldown)
            .field("batch_failure_cooldown", &self.batch_failure_cooldown)
            .field("rpc_timeout", &self.rpc_timeout)
            .field("metrics_interval", &self.metrics_interval)
            .field("call_indices", &self.call_indices)
            .finish()
    }
}

#[derive(Default, Clone)]
pub struct AgentConfigBuilder {
    endpoint: Option<String>,
    secret_uri: Option<String>,
    weight_limit: Option<WeightLimit>,
    batch_limit: Option<usize>,
    service_head_cooldown: Option<i64>,
    post_submission_cooldown: Option<i64>,
    batch_failure_cooldown: Option<i64>,
    rpc_timeout: Option<Duration>,
    metrics_interval: Option<Duration>,
    call_indices: Option<CallIndices>,
}

impl AgentConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn secret_uri(mut self, secret: impl Into<String>) -> Self {
        self.secret_uri = Some(secret.into());
        self
    }

    pub fn weight_limit(mut self, weight_limit: WeightLimit) -> Self {
        self.weight_limit = Some(weight_limit);
        self
    }

    pub fn batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = Some(limit);
        self
    }

    pub fn service_head_cooldown(mut self, blocks: i64) -> Self {
        self.service_head_cooldown = Some(blocks);
        self
    }

    pub fn post_submission_cooldown(mut self, blocks: i64) -> Self {
        self.post_submission_cooldown = Some(blocks);
        self
    }

    pub fn batch_failure_cooldown(mut self, blocks: i64) -> Self {
        self.batch_failure_cooldown = Some(blocks);
        self
    }

    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = Some(timeout);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn call_indices(mut self, indices: CallIndices) -> Self {
        self.call_indices = Some(indices);
        self
    }

    pub fn build(self) -> Result<AgentConfig> {
        let params = AgentConfigParams {
            endpoint: self
                .endpoint
                .with_context(|| format!("endpoint is required (set {ENV_WS_ENDPOINT})"))?,
            secret_uri: self
                .secret_uri
                .with_context(|| format!("secret_uri is required (set {ENV_MNEMONIC})"))?,
            weight_limit: self.weight_limit.unwrap_or_default(),
            batch_limit: self.batch_limit.unwrap_or(DEFAULT_BATCH_LIMIT),
            service_head_cooldown: self
                .service_head_cooldown
                .unwrap_or(DEFAULT_SERVICE_HEAD_COOLDOWN),
            post_submission_cooldown: self
                .post_submission_cooldown
                .unwrap_or(DEFAULT_POST_SUBMISSION_COOLDOWN),
            batch_failure_cooldown: self
                .batch_failure_cooldown
                .unwrap_or(DEFAULT_BATCH_FAILURE_COOLDOWN),
            rpc_timeout: self
                .rpc_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_RPC_TIMEOUT_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            call_indices: self.call_indices.unwrap_or_default(),
        };

        AgentConfig::new(params)
    }
}

impl fmt::Debug for AgentConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentConfigBuilder")
            .field("endpoint", &self.endpoint)
            .field("secret_uri", &self.secret_uri.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<T>()
        .map(Some)
        .with_context(|| format!("invalid value {raw:?} for {name}"))
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
        bail!("endpoint must start with ws:// or wss://");
    }
    Ok(())
}
