//! [`ChainGateway`] over a Substrate node's JSON-RPC WebSocket endpoint.
//! Houses `RpcChainGateway`, its error type, and the storage scans and
//! submission tracking it performs.

use crate::gateway::{
    BlockRef, BlockSubscription, CallBuilder, ChainGateway, DispatchEvent, EventSubscription,
    GatewayFuture, StatusSubscription, TxStatus,
};
use crate::queue::storage::{from_hex, pages_prefix, service_head_key, system_events_key, to_hex};
use crate::queue::{BatchCall, MessageOrigin, RawQueueEntry, RecoveryAction, RecoveryTarget};
use crate::rpc::adapter::{RuntimeAdapter, SigningContext};
use crate::rpc::calls::{CallIndices, ScaleCallBuilder};
use crate::rpc::circuit_breaker::RpcCircuitBreaker;
use crate::rpc::metrics::RpcMetricsSnapshot;
use crate::rpc::options::RpcClientOptions;
use crate::rpc::payload::{
    parse_hash, RpcHeader, RpcRuntimeVersion, RpcSignedBlock, RpcStorageChangeSet,
    RpcTransactionStatus,
};
use crate::rpc::retry::{
    RetryContext, RpcGuard, BEST_HASH_RETRY, HEAD_HASH_RETRY, INCLUSION_RETRY, PAGE_KEYS_RETRY,
    PAGE_VALUES_RETRY, RUNTIME_VERSION_RETRY, SERVICE_HEAD_RETRY, SIGNING_CONTEXT_RETRY,
    SUBMIT_RETRY, SUBSCRIBE_HEADS_RETRY,
};
use crate::runtime::config::AgentConfig;
use anyhow::{anyhow, Context, Result};
use futures::stream::StreamExt;
use jsonrpsee::core::client::{
    ClientT, Error as JsonRpcError, Subscription, SubscriptionClientT,
};
use jsonrpsee::core::params::ArrayParams;
use jsonrpsee::rpc_params;
use jsonrpsee::ws_client::{WsClient, WsClientBuilder};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug)]
pub enum RpcError {
    Timeout { method: &'static str },
    CircuitOpen,
    Disconnected,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RpcError::Timeout { method } => write!(f, "rpc method {method} timed out"),
            RpcError::CircuitOpen => write!(f, "rpc circuit breaker is open"),
            RpcError::Disconnected => write!(f, "rpc connection is closed"),
        }
    }
}

impl std::error::Error for RpcError {}

/// JSON-RPC implementation of [`ChainGateway`].
///
/// Cloning is cheap; clones share the connection, breaker and metrics.
#[derive(Clone)]
pub struct RpcChainGateway {
    inner: Arc<GatewayInner>,
}

struct GatewayInner {
    endpoint: String,
    client: RwLock<Option<Arc<WsClient>>>,
    guard: RpcGuard,
    calls: ScaleCallBuilder,
    adapter: Arc<dyn RuntimeAdapter>,
    genesis_hash: OnceLock<[u8; 32]>,
}

impl RpcChainGateway {
    pub async fn connect(
        endpoint: impl Into<String>,
        options: RpcClientOptions,
        indices: CallIndices,
        adapter: Arc<dyn RuntimeAdapter>,
    ) -> Result<Self> {
        Self::connect_with_breaker(
            endpoint,
            options.clone(),
            indices,
            adapter,
            Arc::new(RpcCircuitBreaker::from_options(&options)),
        )
        .await
    }

    pub async fn connect_with_breaker(
        endpoint: impl Into<String>,
        options: RpcClientOptions,
        indices: CallIndices,
        adapter: Arc<dyn RuntimeAdapter>,
        breaker: Arc<RpcCircuitBreaker>,
    ) -> Result<Self> {
        options.validate()?;
        let endpoint = endpoint.into();
        let message_limit = options.max_message_bytes.min(u32::MAX as usize) as u32;

        let client = WsClientBuilder::default()
            .request_timeout(options.request_timeout)
            .max_concurrent_requests(options.max_concurrent_requests)
            .max_request_size(message_limit)
            .max_response_size(message_limit)
            .build(&endpoint)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;

        tracing::info!(endpoint = %endpoint, "connected to node");

        Ok(Self::from_parts(
            endpoint,
            Some(Arc::new(client)),
            RpcGuard::new(options, breaker),
            indices,
            adapter,
        ))
    }

    pub async fn from_config(config: &AgentConfig, adapter: Arc<dyn RuntimeAdapter>) -> Result<Self> {
        config.validate()?;
        let options = RpcClientOptions {
            request_timeout: config.rpc_timeout(),
            ..RpcClientOptions::default()
        };
        Self::connect(config.endpoint(), options, config.call_indices(), adapter).await
    }

    fn from_parts(
        endpoint: String,
        client: Option<Arc<WsClient>>,
        guard: RpcGuard,
        indices: CallIndices,
        adapter: Arc<dyn RuntimeAdapter>,
    ) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                endpoint,
                client: RwLock::new(client),
                guard,
                calls: ScaleCallBuilder::new(indices),
                adapter,
                genesis_hash: OnceLock::new(),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn metrics(&self) -> RpcMetricsSnapshot {
        self.inner.guard.metrics()
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .client
            .read()
            .expect("ws client lock poisoned")
            .as_ref()
            .map(|client| client.is_connected())
            .unwrap_or(false)
    }
}

impl CallBuilder for RpcChainGateway {
    fn build_recovery_call(&self, target: RecoveryTarget) -> Result<RecoveryAction> {
        self.inner.calls.build_recovery_call(target)
    }

    fn build_batch_call(&self, actions: &[RecoveryAction]) -> Result<BatchCall> {
        self.inner.calls.build_batch_call(actions)
    }
}

impl ChainGateway for RpcChainGateway {
    fn subscribe_new_blocks(&self) -> GatewayFuture<'_, BlockSubscription> {
        Box::pin(GatewayInner::subscribe_new_blocks(&self.inner))
    }

    fn query_service_head(&self) -> GatewayFuture<'_, Option<MessageOrigin>> {
        Box::pin(self.inner.query_service_head())
    }

    fn query_queue_pages(&self) -> GatewayFuture<'_, Vec<RawQueueEntry>> {
        Box::pin(self.inner.query_queue_pages())
    }

    fn submit_and_track<'a>(&'a self, call: &'a BatchCall) -> GatewayFuture<'a, StatusSubscription> {
        Box::pin(GatewayInner::submit_and_track(&self.inner, call))
    }

    fn disconnect(&self) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            self.inner.disconnect();
            Ok(())
        })
    }
}

impl GatewayInner {
    fn client(&self) -> Result<Arc<WsClient>> {
        self.client
            .read()
            .expect("ws client lock poisoned")
            .clone()
            .ok_or_else(|| RpcError::Disconnected.into())
    }

    fn disconnect(&self) {
        let client = self.client.write().expect("ws client lock poisoned").take();
        if client.is_some() {
            tracing::info!(endpoint = %self.endpoint, "disconnected from node");
        }
    }

    async fn request<R>(&self, method: &'static str, params: ArrayParams) -> Result<R>
    where
        R: DeserializeOwned,
    {
        let client = self.client()?;
        client
            .request(method, params)
            .await
            .map_err(|err| map_rpc_error(method, err))
    }

    async fn subscribe<N>(
        &self,
        method: &'static str,
        params: ArrayParams,
        unsubscribe: &'static str,
    ) -> Result<Subscription<N>>
    where
        N: DeserializeOwned,
    {
        let client = self.client()?;
        client
            .subscribe(method, params, unsubscribe)
            .await
            .map_err(|err| map_rpc_error(method, err))
    }

    async fn subscribe_new_blocks(this: &Arc<Self>) -> Result<BlockSubscription> {
        let subscription: Subscription<RpcHeader> = this
            .guard
            .call(RetryContext::new(&SUBSCRIBE_HEADS_RETRY), || {
                this.subscribe(
                    "chain_subscribeNewHeads",
                    rpc_params![],
                    "chain_unsubscribeNewHeads",
                )
            })
            .await?;

        let inner = Arc::clone(this);
        let stream = subscription
            .then(move |item| {
                let inner = Arc::clone(&inner);
                async move {
                    let header = item.context("failed to decode new head notification")?;
                    inner.resolve_head(header).await
                }
            })
            .boxed();

        Ok(EventSubscription::new("new_heads", stream))
    }

    /// New-head notifications omit the block's own hash; it is read back by
    /// number from the node's canonical chain.
    async fn resolve_head(&self, header: RpcHeader) -> Result<BlockRef> {
        let number = header.block_number()?;
        let hash: Option<String> = self
            .guard
            .call(RetryContext::new(&HEAD_HASH_RETRY), || {
                self.request("chain_getBlockHash", rpc_params![number])
            })
            .await?;
        let hash = hash.with_context(|| format!("node returned no hash for block {number}"))?;
        header.to_block_ref(hash)
    }

    async fn query_service_head(&self) -> Result<Option<MessageOrigin>> {
        let key = to_hex(&service_head_key());
        let raw: Option<String> = self
            .guard
            .call(RetryContext::new(&SERVICE_HEAD_RETRY), || {
                self.request("state_getStorage", rpc_params![&key])
            })
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let bytes = from_hex(&raw).with_context(|| format!("invalid service head hex {raw}"))?;
        MessageOrigin::from_scale(&bytes)
            .map(Some)
            .map_err(|err| anyhow!("failed to decode service head {raw}: {err}"))
    }

    /// Reads every `MessageQueue::Pages` entry at one pinned block so keys and
    /// values come from the same state.
    async fn query_queue_pages(&self) -> Result<Vec<RawQueueEntry>> {
        let at = self.best_block_hash().await?;
        let keys = self.page_keys(&at).await?;
        let page_size = self.guard.options().keys_page_size as usize;

        let mut entries = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(page_size) {
            let change_sets: Vec<RpcStorageChangeSet> = self
                .guard
                .call(RetryContext::at_block(&PAGE_VALUES_RETRY, &at), || {
                    self.request("state_queryStorageAt", rpc_params![chunk, &at])
                })
                .await?;

            let mut values: HashMap<String, Option<String>> = change_sets
                .into_iter()
                .flat_map(|set| set.changes)
                .map(|(key, value)| (key.to_ascii_lowercase(), value))
                .collect();

            for key in chunk {
                let Some(Some(value)) = values.remove(&key.to_ascii_lowercase()) else {
                    tracing::debug!(key = %key, "queue page vanished before its value was read");
                    continue;
                };
                let key_bytes = from_hex(key).with_context(|| format!("invalid page key hex {key}"))?;
                let value_bytes =
                    from_hex(&value).with_context(|| format!("invalid page value hex at {key}"))?;
                entries.push(RawQueueEntry::new(key_bytes, value_bytes));
            }
        }

        tracing::debug!(at = %at, pages = entries.len(), "loaded queue pages");
        Ok(entries)
    }

    async fn best_block_hash(&self) -> Result<String> {
        let hash: Option<String> = self
            .guard
            .call(RetryContext::new(&BEST_HASH_RETRY), || {
                self.request("chain_getBlockHash", rpc_params![])
            })
            .await?;
        hash.context("node returned no best block hash")
    }

    async fn page_keys(&self, at: &str) -> Result<Vec<String>> {
        let prefix = to_hex(&pages_prefix());
        let page_size = self.guard.options().keys_page_size;
        let mut keys = Vec::new();
        let mut start_key: Option<String> = None;

        loop {
            let page: Vec<String> = self
                .guard
                .call(RetryContext::at_block(&PAGE_KEYS_RETRY, at), || {
                    self.request(
                        "state_getKeysPaged",
                        rpc_params![&prefix, page_size, &start_key, at],
                    )
                })
                .await?;

            let exhausted = page.len() < page_size as usize;
            start_key = page.last().cloned();
            keys.extend(page);

            if exhausted || start_key.is_none() {
                break;
            }
        }

        Ok(keys)
    }

    async fn signing_context(&self) -> Result<SigningContext> {
        let account = self.adapter.account_id();
        let nonce: u64 = self
            .guard
            .call(RetryContext::new(&SIGNING_CONTEXT_RETRY), || {
                self.request("system_accountNextIndex", rpc_params![&account])
            })
            .await?;

        let version: RpcRuntimeVersion = self
            .guard
            .call(RetryContext::new(&RUNTIME_VERSION_RETRY), || {
                self.request("state_getRuntimeVersion", rpc_params![])
            })
            .await?;

        Ok(SigningContext {
            nonce,
            genesis_hash: self.genesis_hash().await?,
            spec_version: version.spec_version,
            transaction_version: version.transaction_version,
        })
    }

    async fn genesis_hash(&self) -> Result<[u8; 32]> {
        if let Some(hash) = self.genesis_hash.get() {
            return Ok(*hash);
        }

        let raw: Option<String> = self
            .guard
            .call(RetryContext::new(&BEST_HASH_RETRY), || {
                self.request("chain_getBlockHash", rpc_params![0u32])
            })
            .await?;
        let raw = raw.context("node returned no genesis hash")?;
        let hash = parse_hash(&raw).context("invalid genesis hash")?;
        Ok(*self.genesis_hash.get_or_init(|| hash))
    }

    async fn submit_and_track(this: &Arc<Self>, call: &BatchCall) -> Result<StatusSubscription> {
        let context = this.signing_context().await?;
        let extrinsic = this
            .adapter
            .sign_extrinsic(call, &context)
            .context("failed to sign recovery batch")?;
        let extrinsic_hex: Arc<str> = Arc::from(to_hex(&extrinsic));

        let subscription: Subscription<RpcTransactionStatus> = this
            .guard
            .call(RetryContext::new(&SUBMIT_RETRY), || {
                this.subscribe(
                    "author_submitAndWatchExtrinsic",
                    rpc_params![&*extrinsic_hex],
                    "author_unwatchExtrinsic",
                )
            })
            .await?;
        this.guard.record_submission();

        tracing::info!(
            nonce = context.nonce,
            items = call.items(),
            spec_version = context.spec_version,
            "recovery batch submitted"
        );

        let inner = Arc::clone(this);
        let stream = subscription
            .then(move |item| {
                let inner = Arc::clone(&inner);
                let extrinsic_hex = Arc::clone(&extrinsic_hex);
                async move {
                    let status = item.context("failed to decode transaction status")?;
                    inner.resolve_status(status, &extrinsic_hex).await
                }
            })
            .boxed();

        Ok(EventSubscription::new("extrinsic_status", stream))
    }

    async fn resolve_status(
        &self,
        status: RpcTransactionStatus,
        extrinsic_hex: &str,
    ) -> Result<TxStatus> {
        match status {
            RpcTransactionStatus::InBlock(block_hash) => {
                let events = self.inclusion_events(&block_hash, extrinsic_hex).await?;
                Ok(TxStatus::InBlock { block_hash, events })
            }
            other => Ok(other.into_status()),
        }
    }

    /// Dispatch events emitted by the submitted extrinsic in `block_hash`.
    async fn inclusion_events(
        &self,
        block_hash: &str,
        extrinsic_hex: &str,
    ) -> Result<Vec<DispatchEvent>> {
        let signed: RpcSignedBlock = self
            .guard
            .call(RetryContext::at_block(&INCLUSION_RETRY, block_hash), || {
                self.request("chain_getBlock", rpc_params![block_hash])
            })
            .await?;

        let index = signed
            .block
            .extrinsic_index(extrinsic_hex)
            .with_context(|| format!("submitted extrinsic not found in block {block_hash}"))?;

        let events_key = to_hex(&system_events_key());
        let raw: Option<String> = self
            .guard
            .call(RetryContext::at_block(&INCLUSION_RETRY, block_hash), || {
                self.request("state_getStorage", rpc_params![&events_key, block_hash])
            })
            .await?;

        let raw_events = match raw {
            Some(raw) => from_hex(&raw).context("invalid System.Events hex")?,
            None => Vec::new(),
        };

        self.adapter
            .decode_dispatch_events(&raw_events, index)
            .with_context(|| format!("failed to decode events of extrinsic {index} in {block_hash}"))
    }
}

fn map_rpc_error(method: &'static str, err: JsonRpcError) -> anyhow::Error {
    match err {
        JsonRpcError::RestartNeeded(_) => RpcError::Disconnected.into(),
        JsonRpcError::RequestTimeout => RpcError::Timeout { method }.into(),
        other => anyhow!("rpc {method} call failed: {other}"),
    }
}
