//! Shared fixtures: contract ABIs, synthetic logs and an in-memory backend.

use alloy::{
    dyn_abi::DynSolValue,
    primitives::{keccak256, Address, Bytes, LogData, TxHash, B256, U256},
    rpc::types::Log,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc, Mutex,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{
    backend::{CallBackend, LogBackend, LogFilter, LogSubscription, TransactBackend},
    contract::Capabilities,
    error::BindingError,
    CallOptions, PendingTx, TransactOptions,
};

pub const MESSAGE_BOX_ABI: &str = r#"[
    {"inputs":[],"name":"author","outputs":[{"internalType":"address","name":"","type":"address"}],"stateMutability":"view","type":"function"},
    {"inputs":[],"name":"message","outputs":[{"internalType":"string","name":"","type":"string"}],"stateMutability":"view","type":"function"},
    {"inputs":[{"internalType":"string","name":"in_message","type":"string"}],"name":"setMessage","outputs":[],"stateMutability":"nonpayable","type":"function"}
]"#;

/// A small contract exercising indexed events and multi-value returns.
pub const RECORDER_ABI: &str = r#"[
    {"type":"event","name":"Created","anonymous":false,"inputs":[
        {"name":"who","type":"address","indexed":true},
        {"name":"id","type":"uint256","indexed":false}]},
    {"type":"function","name":"record","stateMutability":"nonpayable","inputs":[
        {"name":"who","type":"address"},{"name":"id","type":"uint256"}],"outputs":[]},
    {"type":"function","name":"greet","stateMutability":"view","inputs":[],
        "outputs":[{"name":"","type":"string"}]},
    {"type":"function","name":"pair","stateMutability":"view","inputs":[],
        "outputs":[{"name":"count","type":"uint256"},{"name":"ok","type":"bool"}]},
    {"type":"function","name":"unnamed","stateMutability":"view","inputs":[],
        "outputs":[{"name":"","type":"uint256"},{"name":"","type":"bool"}]}
]"#;

/// Return data for a call producing `values`.
pub fn encode_return(values: Vec<DynSolValue>) -> Bytes {
    DynSolValue::Tuple(values).abi_encode_params().into()
}

pub fn raw_log(address: Address, topics: Vec<B256>, block: u64) -> Log {
    raw_log_with_data(address, topics, Bytes::new(), block)
}

pub fn raw_log_with_data(address: Address, topics: Vec<B256>, data: Bytes, block: u64) -> Log {
    Log {
        inner: alloy::primitives::Log {
            address,
            data: LogData::new_unchecked(topics, data),
        },
        block_number: Some(block),
        transaction_hash: Some(keccak256(block.to_be_bytes())),
        log_index: Some(0),
        ..Default::default()
    }
}

/// `Created(address indexed who, uint256 id)`
pub fn created_log(address: Address, who: Address, id: u64, block: u64) -> Log {
    let selector = keccak256("Created(address,uint256)");
    let data = U256::from(id).to_be_bytes::<32>().to_vec();
    raw_log_with_data(address, vec![selector, who.into_word()], data.into(), block)
}

#[derive(Debug, Clone)]
pub struct Submitted {
    pub to: Option<Address>,
    pub opts: TransactOptions,
    pub data: Bytes,
}

#[derive(Debug)]
struct Feed {
    filter: LogFilter,
    logs: mpsc::Sender<Log>,
    error: oneshot::Sender<BindingError>,
    cancel: CancellationToken,
}

/// In-memory backend recording every invocation.
///
/// Calls are answered from a queue of canned responses; stored logs are
/// served through the real [`LogFilter::matches`] semantics.
#[derive(Debug, Default)]
pub struct StubBackend {
    signer: Option<Address>,
    responses: Mutex<VecDeque<Result<Bytes, String>>>,
    calls: Mutex<Vec<(Address, CallOptions, Bytes)>>,
    submits: Mutex<Vec<Submitted>>,
    logs: Mutex<Vec<Log>>,
    query_error: Mutex<Option<String>>,
    queries: AtomicUsize,
    subscriptions: Mutex<Vec<LogFilter>>,
    feeds: Mutex<Vec<Feed>>,
    nonce: AtomicU64,
    head: Mutex<Option<u64>>,
}

impl StubBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signer(mut self, signer: Address) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_nonce(self, nonce: u64) -> Self {
        self.nonce.store(nonce, Ordering::SeqCst);
        self
    }

    pub fn capabilities(self: &Arc<Self>) -> Capabilities {
        Capabilities::full(self.clone())
    }

    pub fn push_response(&self, data: impl Into<Bytes>) {
        self.responses.lock().unwrap().push_back(Ok(data.into()));
    }

    pub fn push_call_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Err(message.to_string()));
    }

    /// Pin the reported chain head. Defaults to the highest stored log block.
    pub fn set_head(&self, block: u64) {
        *self.head.lock().unwrap() = Some(block);
    }

    pub fn push_log(&self, log: Log) {
        self.logs.lock().unwrap().push(log);
    }

    pub fn set_query_error(&self, message: &str) {
        *self.query_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn last_call(&self) -> Option<(Address, CallOptions, Bytes)> {
        self.calls.lock().unwrap().last().cloned()
    }

    pub fn submitted(&self) -> Vec<Submitted> {
        self.submits.lock().unwrap().clone()
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn subscriptions(&self) -> Vec<LogFilter> {
        self.subscriptions.lock().unwrap().clone()
    }

    pub async fn wait_for_subscribers(&self, count: usize) {
        loop {
            let subscribed = self.subscriptions.lock().unwrap().len();
            if subscribed >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Push a log to every open live feed whose filter matches it.
    pub async fn emit(&self, log: Log) {
        let senders: Vec<_> = self
            .feeds
            .lock()
            .unwrap()
            .iter()
            .filter(|feed| !feed.cancel.is_cancelled() && feed.filter.matches(&log))
            .map(|feed| feed.logs.clone())
            .collect();

        for sender in senders {
            let _ = sender.send(log.clone()).await;
        }
    }

    /// Terminate every open live feed with a subscription error.
    pub fn fail_feeds(&self, message: &str) {
        let feeds: Vec<_> = self.feeds.lock().unwrap().drain(..).collect();
        for feed in feeds {
            let _ = feed
                .error
                .send(BindingError::Subscription(message.to_string()));
        }
    }
}

#[async_trait]
impl CallBackend for StubBackend {
    async fn call(&self, to: Address, opts: &CallOptions, data: Bytes) -> Result<Bytes, BindingError> {
        self.calls.lock().unwrap().push((to, opts.clone(), data));
        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(data)) => Ok(data),
            Some(Err(message)) => Err(BindingError::transport(anyhow::anyhow!(message))),
            None => Err(BindingError::transport(anyhow::anyhow!("no response queued"))),
        }
    }
}

#[async_trait]
impl TransactBackend for StubBackend {
    async fn submit(
        &self,
        to: Option<Address>,
        opts: &TransactOptions,
        data: Bytes,
    ) -> Result<PendingTx, BindingError> {
        if self.signer != Some(opts.from) {
            return Err(BindingError::Signing(format!(
                "no signer available for {}",
                opts.from
            )));
        }

        let nonce = match opts.nonce {
            Some(nonce) => nonce,
            None => self.nonce.fetch_add(1, Ordering::SeqCst),
        };

        let mut preimage = data.to_vec();
        preimage.extend_from_slice(&nonce.to_be_bytes());
        let hash: TxHash = keccak256(&preimage);

        self.submits.lock().unwrap().push(Submitted {
            to,
            opts: opts.clone(),
            data,
        });

        Ok(PendingTx {
            hash,
            from: opts.from,
            nonce,
        })
    }
}

#[async_trait]
impl LogBackend for StubBackend {
    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, BindingError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.query_error.lock().unwrap().clone() {
            return Err(BindingError::transport(anyhow::anyhow!(message)));
        }

        Ok(self
            .logs
            .lock()
            .unwrap()
            .iter()
            .filter(|log| filter.matches(log))
            .cloned()
            .collect())
    }

    async fn block_number(&self) -> Result<u64, BindingError> {
        let head = *self.head.lock().unwrap();
        Ok(head.unwrap_or_else(|| {
            self.logs
                .lock()
                .unwrap()
                .iter()
                .filter_map(|log| log.block_number)
                .max()
                .unwrap_or(0)
        }))
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, BindingError> {
        let (feed, subscription) = LogSubscription::channel(64);
        self.feeds.lock().unwrap().push(Feed {
            filter: filter.clone(),
            logs: feed.logs,
            error: feed.error,
            cancel: feed.cancel,
        });
        self.subscriptions.lock().unwrap().push(filter.clone());
        Ok(subscription)
    }
}
