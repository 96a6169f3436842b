use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Mutex,
};

use anyhow::{anyhow, bail, Result};
use codec::Encode;
use futures::channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures::stream::StreamExt;
use overweight_keeper::queue::storage::page_key;
use overweight_keeper::{
    BatchCall, BlockRef, BlockSubscription, CallBuilder, ChainGateway, DispatchEvent,
    EventSubscription, GatewayFuture, MessageOrigin, RawQueueEntry, RecoveryAction,
    RecoveryTarget, RuntimeAdapter, ScaleCallBuilder, SigningContext, StatusSubscription,
    TxStatus,
};
use tokio::sync::Notify;

pub type BlockSender = UnboundedSender<Result<BlockRef>>;
pub type StatusSender = UnboundedSender<Result<TxStatus>>;

/// In-memory chain whose answers are scripted by the test.
///
/// Blocks are pushed through the sender returned by [`ScriptedGateway::new`];
/// every submission opens a fresh status channel the test can drive through
/// [`ScriptedGateway::take_status_sender`].
pub struct ScriptedGateway {
    calls: ScaleCallBuilder,
    blocks: Mutex<Option<UnboundedReceiver<Result<BlockRef>>>>,
    service_head: Mutex<Option<MessageOrigin>>,
    entries: Mutex<Vec<RawQueueEntry>>,
    submitted: Mutex<Vec<BatchCall>>,
    status_senders: Mutex<VecDeque<StatusSender>>,
    page_gate: Mutex<Option<Arc<Notify>>>,
    page_query_entered: Notify,
    service_head_queries: AtomicUsize,
    page_queries: AtomicUsize,
    fail_subscribe: AtomicBool,
    fail_submit: AtomicBool,
    disconnected: AtomicBool,
}

impl ScriptedGateway {
    pub fn new() -> (Arc<Self>, BlockSender) {
        let (sender, receiver) = unbounded();
        let gateway = Self {
            calls: ScaleCallBuilder::default(),
            blocks: Mutex::new(Some(receiver)),
            service_head: Mutex::new(None),
            entries: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            status_senders: Mutex::new(VecDeque::new()),
            page_gate: Mutex::new(None),
            page_query_entered: Notify::new(),
            service_head_queries: AtomicUsize::new(0),
            page_queries: AtomicUsize::new(0),
            fail_subscribe: AtomicBool::new(false),
            fail_submit: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        };
        (Arc::new(gateway), sender)
    }

    pub fn set_service_head(&self, origin: Option<MessageOrigin>) {
        *self.service_head.lock().expect("service head poisoned") = origin;
    }

    pub fn set_pages(&self, entries: Vec<RawQueueEntry>) {
        *self.entries.lock().expect("entries poisoned") = entries;
    }

    pub fn fail_subscribe(&self) {
        self.fail_subscribe.store(true, Ordering::SeqCst);
    }

    pub fn fail_submit(&self, fail: bool) {
        self.fail_submit.store(fail, Ordering::SeqCst);
    }

    /// Holds every page query until the returned gate is notified.
    pub fn hold_page_queries(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.page_gate.lock().expect("page gate poisoned") = Some(gate.clone());
        gate
    }

    /// Resolves once a page query has reached the gate.
    pub async fn page_query_entered(&self) {
        self.page_query_entered.notified().await;
    }

    pub fn service_head_queries(&self) -> usize {
        self.service_head_queries.load(Ordering::SeqCst)
    }

    pub fn page_queries(&self) -> usize {
        self.page_queries.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<BatchCall> {
        self.submitted.lock().expect("submissions poisoned").clone()
    }

    pub fn take_status_sender(&self) -> Option<StatusSender> {
        self.status_senders
            .lock()
            .expect("status senders poisoned")
            .pop_front()
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

impl CallBuilder for ScriptedGateway {
    fn build_recovery_call(&self, target: RecoveryTarget) -> Result<RecoveryAction> {
        self.calls.build_recovery_call(target)
    }

    fn build_batch_call(&self, actions: &[RecoveryAction]) -> Result<BatchCall> {
        self.calls.build_batch_call(actions)
    }
}

impl ChainGateway for ScriptedGateway {
    fn subscribe_new_blocks(&self) -> GatewayFuture<'_, BlockSubscription> {
        Box::pin(async move {
            if self.fail_subscribe.load(Ordering::SeqCst) {
                bail!("connection refused");
            }
            let receiver = self
                .blocks
                .lock()
                .expect("block receiver poisoned")
                .take()
                .ok_or_else(|| anyhow!("block subscription already taken"))?;
            Ok(EventSubscription::new("scripted_blocks", receiver.boxed()))
        })
    }

    fn query_service_head(&self) -> GatewayFuture<'_, Option<MessageOrigin>> {
        Box::pin(async move {
            self.service_head_queries.fetch_add(1, Ordering::SeqCst);
            Ok(*self.service_head.lock().expect("service head poisoned"))
        })
    }

    fn query_queue_pages(&self) -> GatewayFuture<'_, Vec<RawQueueEntry>> {
        Box::pin(async move {
            self.page_queries.fetch_add(1, Ordering::SeqCst);
            let gate = self.page_gate.lock().expect("page gate poisoned").clone();
            if let Some(gate) = gate {
                self.page_query_entered.notify_one();
                gate.notified().await;
            }
            Ok(self.entries.lock().expect("entries poisoned").clone())
        })
    }

    fn submit_and_track<'a>(&'a self, call: &'a BatchCall) -> GatewayFuture<'a, StatusSubscription> {
        Box::pin(async move {
            self.submitted
                .lock()
                .expect("submissions poisoned")
                .push(call.clone());
            if self.fail_submit.load(Ordering::SeqCst) {
                bail!("transaction pool rejected the extrinsic");
            }
            let (sender, receiver) = unbounded();
            self.status_senders
                .lock()
                .expect("status senders poisoned")
                .push_back(sender);
            Ok(EventSubscription::new("scripted_status", receiver.boxed()))
        })
    }

    fn disconnect(&self) -> GatewayFuture<'_, ()> {
        Box::pin(async move {
            self.disconnected.store(true, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Raw `MessageQueue::Pages` entry for a sibling origin.
pub fn page_entry(para_id: u32, page_index: u32, remaining: u32) -> RawQueueEntry {
    let origin = MessageOrigin::Sibling(para_id);
    let mut value = (remaining, 128u32, 0u32, 0u32, 0u32).encode();
    value.extend(vec![0u8; 8].encode());
    RawQueueEntry::new(page_key(&origin, page_index), value)
}

pub fn block(number: u64) -> BlockRef {
    BlockRef::new(
        number,
        format!("0x{number:064x}"),
        format!("0x{:064x}", number.saturating_sub(1)),
    )
}

/// Adapter that cannot sign; it only remembers the secret it was built with.
pub struct SecretAdapter {
    pub secret: String,
}

impl RuntimeAdapter for SecretAdapter {
    fn account_id(&self) -> String {
        "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY".into()
    }

    fn sign_extrinsic(&self, _call: &BatchCall, _context: &SigningContext) -> Result<Vec<u8>> {
        bail!("test adapter cannot sign")
    }

    fn decode_dispatch_events(
        &self,
        _raw_events: &[u8],
        _extrinsic_index: u32,
    ) -> Result<Vec<DispatchEvent>> {
        Ok(Vec::new())
    }
}
