//! Event decoding, topic filters and the iterator/watch plumbing.

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, EventExt, Specifier},
    json_abi::Event,
    primitives::{keccak256, B256},
    rpc::types::Log,
};
use serde_json::{json, Map, Value};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    backend::{forward, LogBackend, LogFilter, LogSubscription},
    codec,
    error::BindingError,
};

#[derive(Debug, Clone, PartialEq)]
pub struct EventField {
    pub name: String,
    pub value: DynSolValue,
    /// Indexed dynamic values (`string`, `bytes`, arrays) only carry their
    /// keccak hash, decoded as `bytes32`.
    pub indexed: bool,
}

/// A decoded log with fields in declaration order.
#[derive(Debug, Clone)]
pub struct DecodedLog {
    pub event: String,
    pub fields: Vec<EventField>,
    pub raw: Log,
}

impl DecodedLog {
    pub fn get(&self, name: &str) -> Option<&DynSolValue> {
        self.fields.iter().find(|f| f.name == name).map(|f| &f.value)
    }

    pub fn to_json(&self) -> Value {
        let fields: Map<String, Value> = self
            .fields
            .iter()
            .enumerate()
            .map(|(i, field)| {
                let name = if field.name.is_empty() {
                    i.to_string()
                } else {
                    field.name.clone()
                };
                (name, codec::value_to_json(&field.value))
            })
            .collect();

        json!({
            "event": self.event,
            "fields": fields,
            "block_number": self.raw.block_number,
            "transaction_hash": self.raw.transaction_hash.map(|h| format!("0x{:x}", h)),
            "log_index": self.raw.log_index,
        })
    }
}

/// Conversion from a raw log into a typed event record.
pub trait FromLog: Sized + Send + 'static {
    fn from_log(event: &Event, log: &Log) -> Result<Self, BindingError>;
}

impl FromLog for DecodedLog {
    fn from_log(event: &Event, log: &Log) -> Result<Self, BindingError> {
        decode_log(event, log)
    }
}

pub fn decode_log(event: &Event, log: &Log) -> Result<DecodedLog, BindingError> {
    let decoded = event.decode_log(log.data(), true).map_err(|e| {
        BindingError::Decoding(format!("Failed to decode '{}' log: {}", event.name, e))
    })?;

    let mut indexed = decoded.indexed.into_iter();
    let mut body = decoded.body.into_iter();

    let fields = event
        .inputs
        .iter()
        .map(|param| {
            let value = if param.indexed {
                indexed.next()
            } else {
                body.next()
            };
            value
                .map(|value| EventField {
                    name: param.name.clone(),
                    value,
                    indexed: param.indexed,
                })
                .ok_or_else(|| {
                    BindingError::Decoding(format!(
                        "'{}' log is missing field '{}'",
                        event.name, param.name
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedLog {
        event: event.name.clone(),
        fields,
        raw: log.clone(),
    })
}

/// Build topic sets for `event`: the event selector (unless anonymous)
/// followed by one candidate set per indexed parameter, in order.
///
/// Trailing indexed parameters without a set are wildcards, as is an
/// empty set.
pub fn topic_filter(
    event: &Event,
    sets: &[Vec<DynSolValue>],
) -> Result<[Vec<B256>; 4], BindingError> {
    let indexed: Vec<_> = event.inputs.iter().filter(|p| p.indexed).collect();
    if sets.len() > indexed.len() {
        return Err(BindingError::Encoding(format!(
            "Event '{}' has {} indexed parameters, got {} topic filters",
            event.name,
            indexed.len(),
            sets.len()
        )));
    }

    let mut topics: [Vec<B256>; 4] = Default::default();
    let offset = if event.anonymous {
        0
    } else {
        topics[0] = vec![event.selector()];
        1
    };

    for (i, (param, set)) in indexed.iter().zip(sets).enumerate() {
        let slot = topics.get_mut(i + offset).ok_or_else(|| {
            BindingError::Encoding(format!("Event '{}' has too many indexed parameters", event.name))
        })?;
        let ty = param
            .resolve()
            .map_err(|e| BindingError::Descriptor(e.to_string()))?;

        for value in set {
            let topic = topic_word(&ty, value).ok_or_else(|| {
                BindingError::Encoding(format!(
                    "Invalid topic value for '{}' of type '{}' in event '{}': got {:?}",
                    param.name, param.ty, event.name, value
                ))
            })?;
            slot.push(topic);
        }
    }

    Ok(topics)
}

fn topic_word(ty: &DynSolType, value: &DynSolValue) -> Option<B256> {
    match (ty, value) {
        // Pre-hashed topic for a dynamic parameter
        (DynSolType::String | DynSolType::Bytes, DynSolValue::FixedBytes(word, 32)) => Some(*word),
        (DynSolType::String, DynSolValue::String(s)) => Some(keccak256(s.as_bytes())),
        (DynSolType::Bytes, DynSolValue::Bytes(b)) => Some(keccak256(b)),
        (DynSolType::Array(_) | DynSolType::FixedArray(..) | DynSolType::Tuple(_), _) => None,
        _ if ty.matches(value) => value.as_word(),
        _ => None,
    }
}

/// Lifecycle of an [`EventIterator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    Historical,
    Live,
    Exhausted,
    Failed,
    Closed,
}

type Completion = oneshot::Receiver<Result<(), BindingError>>;

/// Cursor over matching logs, decoded lazily as it advances.
///
/// Logs arrive from a producer task over a bounded channel. When the
/// producer finishes it reports on a separate single-slot channel, after
/// which the iterator drains what is still buffered and becomes exhausted.
#[derive(Debug)]
pub struct EventIterator<E> {
    event: Event,
    logs: mpsc::Receiver<Log>,
    completion: Option<Completion>,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
    state: IterState,
    current: Option<E>,
    error: Option<BindingError>,
}

impl<E: FromLog> EventIterator<E> {
    /// Advance to the next event. Returns `false` once the iterator is
    /// exhausted, failed or closed; see [`state`](Self::state) and
    /// [`error`](Self::error) for which.
    pub async fn next(&mut self) -> bool {
        self.current = None;

        loop {
            if self.state != IterState::Historical {
                return false;
            }

            let Some(completion) = self.completion.as_mut() else {
                return match self.logs.try_recv() {
                    Ok(log) => self.deliver(log),
                    Err(_) => {
                        self.state = IterState::Exhausted;
                        false
                    }
                };
            };

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.state = IterState::Closed;
                    return false;
                }
                log = self.logs.recv() => match log {
                    Some(log) => return self.deliver(log),
                    // Producer gone; its verdict is still in the completion slot
                    None => {
                        let outcome = completion.await;
                        self.finish(outcome);
                    }
                },
                outcome = &mut *completion => self.finish(outcome),
            }
        }
    }

    fn finish(&mut self, outcome: Result<Result<(), BindingError>, oneshot::error::RecvError>) {
        self.completion = None;
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fail(e),
            Err(_) => {
                if !self.cancel.is_cancelled() {
                    self.fail(BindingError::Subscription(
                        "log producer stopped without reporting".to_string(),
                    ));
                }
            }
        }
    }

    fn deliver(&mut self, log: Log) -> bool {
        match E::from_log(&self.event, &log) {
            Ok(item) => {
                self.current = Some(item);
                true
            }
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn fail(&mut self, err: BindingError) {
        warn!("Event iterator for '{}' failed: {}", self.event.name, err);
        self.state = IterState::Failed;
        self.error = Some(err);
        self.cancel.cancel();
    }

    /// The event the last successful [`next`](Self::next) advanced to.
    pub const fn event(&self) -> Option<&E> {
        self.current.as_ref()
    }

    pub fn take(&mut self) -> Option<E> {
        self.current.take()
    }

    pub const fn error(&self) -> Option<&BindingError> {
        self.error.as_ref()
    }

    pub fn state(&self) -> IterState {
        match self.state {
            IterState::Historical if self.live.load(Ordering::Acquire) => IterState::Live,
            other => other,
        }
    }

    /// Stop the iterator and release the producer. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if self.state == IterState::Historical {
            self.state = IterState::Closed;
        }
    }

    /// A token that closes this iterator from another task.
    pub fn closer(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Drain the iterator, returning every event or the failure that stopped it.
    pub async fn try_collect(mut self) -> Result<Vec<E>, BindingError> {
        let mut events = Vec::new();
        while self.next().await {
            if let Some(item) = self.take() {
                events.push(item);
            }
        }
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(events),
        }
    }
}

impl<E> Drop for EventIterator<E> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start feeding `history` (then, when `follow` is set, the live feed) into
/// a new iterator.
pub(crate) fn spawn_iterator<E: FromLog>(
    backend: Arc<dyn LogBackend>,
    event: Event,
    filter: LogFilter,
    history: Vec<Log>,
    follow: bool,
    capacity: usize,
) -> EventIterator<E> {
    let (log_tx, log_rx) = mpsc::channel(capacity.max(1));
    let (done_tx, done_rx) = oneshot::channel();
    let cancel = CancellationToken::new();
    let live = Arc::new(AtomicBool::new(false));

    let producer = Producer {
        backend,
        filter,
        logs: log_tx,
        cancel: cancel.clone(),
        live: live.clone(),
    };
    let name = event.name.clone();
    tokio::spawn(async move {
        let outcome = producer.run(history, follow).await;
        debug!("Log producer for '{}' finished: {:?}", name, outcome.as_ref().err());
        let _ = done_tx.send(outcome);
    });

    EventIterator {
        event,
        logs: log_rx,
        completion: Some(done_rx),
        cancel,
        live,
        state: IterState::Historical,
        current: None,
        error: None,
    }
}

struct Producer {
    backend: Arc<dyn LogBackend>,
    filter: LogFilter,
    logs: mpsc::Sender<Log>,
    cancel: CancellationToken,
    live: Arc<AtomicBool>,
}

impl Producer {
    async fn run(self, history: Vec<Log>, follow: bool) -> Result<(), BindingError> {
        let mut next_block = self.filter.from_block.unwrap_or(0);

        for log in history {
            if let Some(number) = log.block_number {
                next_block = next_block.max(number.saturating_add(1));
            }
            if !forward(&self.logs, log, &self.cancel).await {
                return Ok(());
            }
        }

        if !follow {
            return Ok(());
        }

        if let Some(end) = self.filter.to_block {
            next_block = next_block.max(end.saturating_add(1));
        }
        let live_filter = self.filter.clone().with_range(Some(next_block), None);

        let mut subscription = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(()),
            subscription = self.backend.subscribe_logs(&live_filter) => subscription?,
        };
        self.live.store(true, Ordering::Release);
        debug!("Following live logs from block {}", next_block);

        let mut error_open = true;
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                log = subscription.logs.recv() => match log {
                    Some(log) => {
                        if !forward(&self.logs, log, &self.cancel).await {
                            return Ok(());
                        }
                    }
                    None => return end_of_feed(&mut subscription),
                },
                err = &mut subscription.error, if error_open => match err {
                    Ok(e) => return Err(e),
                    Err(_) => error_open = false,
                },
            }
        }
    }
}

fn end_of_feed(subscription: &mut LogSubscription) -> Result<(), BindingError> {
    match subscription.error.try_recv() {
        Ok(e) => Err(e),
        Err(_) => Ok(()),
    }
}

/// Handle to a running live subscription delivering into a caller's sink.
#[derive(Debug)]
pub struct EventWatch {
    cancel: CancellationToken,
    task: Option<JoinHandle<Result<(), BindingError>>>,
}

impl EventWatch {
    /// Stop delivery. Safe to call repeatedly.
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }

    pub fn closer(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the watch to end. `Ok` after cancellation or once the sink is
    /// dropped; the terminating error otherwise.
    pub async fn done(&mut self) -> Result<(), BindingError> {
        match self.task.take() {
            Some(task) => task
                .await
                .map_err(|e| BindingError::Subscription(format!("watch task failed: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for EventWatch {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub(crate) fn spawn_watch<E: FromLog>(
    event: Event,
    mut subscription: LogSubscription,
    sink: mpsc::Sender<E>,
) -> EventWatch {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        let mut error_open = true;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                _ = sink.closed() => {
                    debug!("Sink for '{}' dropped, stopping watch", event.name);
                    return Ok(());
                }
                log = subscription.logs.recv() => match log {
                    Some(log) => {
                        let item = E::from_log(&event, &log)?;
                        if !forward(&sink, item, &token).await {
                            return Ok(());
                        }
                    }
                    None => return end_of_feed(&mut subscription),
                },
                err = &mut subscription.error, if error_open => match err {
                    Ok(e) => {
                        warn!("Live feed for '{}' failed: {}", event.name, e);
                        return Err(e);
                    }
                    Err(_) => error_open = false,
                },
            }
        }
    });

    EventWatch {
        cancel,
        task: Some(task),
    }
}
