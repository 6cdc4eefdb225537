//! Transport seams the bound contract dispatches through.
//!
//! Each capability is its own trait so a contract can be bound with only the
//! access the caller actually has.

use alloy::{
    primitives::{Address, Bytes, B256},
    rpc::types::Log,
};
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{error::BindingError, CallOptions, PendingTx, TransactOptions};

#[async_trait]
pub trait CallBackend: Send + Sync {
    /// Execute a read-only call against `to` and return the raw return data.
    async fn call(&self, to: Address, opts: &CallOptions, data: Bytes) -> Result<Bytes, BindingError>;
}

#[async_trait]
pub trait TransactBackend: Send + Sync {
    /// Sign and submit a transaction. `to = None` is a contract creation.
    async fn submit(
        &self,
        to: Option<Address>,
        opts: &TransactOptions,
        data: Bytes,
    ) -> Result<PendingTx, BindingError>;
}

#[async_trait]
pub trait LogBackend: Send + Sync {
    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, BindingError>;

    /// Number of the latest block.
    async fn block_number(&self) -> Result<u64, BindingError>;

    /// Start a live feed of logs matching `filter`. Logs arrive in chain order.
    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, BindingError>;
}

/// Address, topic and block-range selection for log queries.
///
/// `topics[i]` holds candidate values for topic position `i`: any one of them
/// may match, and an empty set matches anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topics: [Vec<B256>; 4],
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
}

impl LogFilter {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn with_range(mut self, from_block: Option<u64>, to_block: Option<u64>) -> Self {
        self.from_block = from_block;
        self.to_block = to_block;
        self
    }

    pub fn matches(&self, log: &Log) -> bool {
        if log.address() != self.address {
            return false;
        }

        if let Some(number) = log.block_number {
            if self.from_block.is_some_and(|from| number < from)
                || self.to_block.is_some_and(|to| number > to)
            {
                return false;
            }
        }

        let topics = log.topics();
        self.topics.iter().enumerate().all(|(i, candidates)| {
            candidates.is_empty() || topics.get(i).is_some_and(|t| candidates.contains(t))
        })
    }
}

/// A live log feed: ordered logs plus a single terminal error slot.
///
/// Dropping or unsubscribing stops the producer.
#[derive(Debug)]
pub struct LogSubscription {
    pub logs: mpsc::Receiver<Log>,
    pub error: oneshot::Receiver<BindingError>,
    cancel: CancellationToken,
}

/// Producer half of a [`LogSubscription`].
#[derive(Debug)]
pub struct LogFeed {
    pub logs: mpsc::Sender<Log>,
    pub error: oneshot::Sender<BindingError>,
    pub cancel: CancellationToken,
}

impl LogSubscription {
    pub fn channel(capacity: usize) -> (LogFeed, Self) {
        let (log_tx, log_rx) = mpsc::channel(capacity.max(1));
        let (err_tx, err_rx) = oneshot::channel();
        let cancel = CancellationToken::new();

        let feed = LogFeed {
            logs: log_tx,
            error: err_tx,
            cancel: cancel.clone(),
        };
        let subscription = Self {
            logs: log_rx,
            error: err_rx,
            cancel,
        };
        (feed, subscription)
    }

    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for LogSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl LogFeed {
    /// Forward one log, giving up if the subscriber has gone away.
    /// Returns `false` once the feed should stop.
    pub async fn send(&self, log: Log) -> bool {
        forward(&self.logs, log, &self.cancel).await
    }

    pub fn fail(self, err: BindingError) {
        let _ = self.error.send(err);
    }
}

/// Send on a bounded channel, racing the send against cancellation so a
/// producer blocked on a full channel is released at teardown.
pub(crate) async fn forward<T>(tx: &mpsc::Sender<T>, item: T, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}
