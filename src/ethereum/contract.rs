use alloy::{
    dyn_abi::DynSolValue,
    primitives::{Address, Bytes},
    rpc::types::Log,
};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    abi::InterfaceDescriptor,
    backend::{CallBackend, LogBackend, LogFilter, TransactBackend},
    error::{BindingError, Capability},
    event::{spawn_iterator, spawn_watch, topic_filter, EventIterator, EventWatch, FromLog},
    utils, CallOptions, CallOutput, FilterOptions, PendingTx, TransactOptions, WatchOptions,
};

pub const DEFAULT_LOG_BUFFER: usize = 128;

/// The backend access a contract is bound with.
#[derive(Clone, Default)]
pub struct Capabilities {
    call: Option<Arc<dyn CallBackend>>,
    transact: Option<Arc<dyn TransactBackend>>,
    logs: Option<Arc<dyn LogBackend>>,
}

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// All three capabilities served by one backend.
    pub fn full<B>(backend: Arc<B>) -> Self
    where
        B: CallBackend + TransactBackend + LogBackend + 'static,
    {
        Self {
            call: Some(backend.clone()),
            transact: Some(backend.clone()),
            logs: Some(backend),
        }
    }

    /// Read-only access: calls and log queries.
    pub fn read_only<B>(backend: Arc<B>) -> Self
    where
        B: CallBackend + LogBackend + 'static,
    {
        Self {
            call: Some(backend.clone()),
            transact: None,
            logs: Some(backend),
        }
    }

    pub fn with_call(mut self, backend: Arc<dyn CallBackend>) -> Self {
        self.call = Some(backend);
        self
    }

    pub fn with_transact(mut self, backend: Arc<dyn TransactBackend>) -> Self {
        self.transact = Some(backend);
        self
    }

    pub fn with_logs(mut self, backend: Arc<dyn LogBackend>) -> Self {
        self.logs = Some(backend);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.call.is_none() && self.transact.is_none() && self.logs.is_none()
    }

    pub fn has(&self, capability: Capability) -> bool {
        match capability {
            Capability::Call => self.call.is_some(),
            Capability::Transact => self.transact.is_some(),
            Capability::Logs => self.logs.is_some(),
        }
    }

    fn call(&self) -> Result<Arc<dyn CallBackend>, BindingError> {
        self.call
            .clone()
            .ok_or(BindingError::MissingCapability(Capability::Call))
    }

    fn transact(&self) -> Result<Arc<dyn TransactBackend>, BindingError> {
        self.transact
            .clone()
            .ok_or(BindingError::MissingCapability(Capability::Transact))
    }

    fn logs(&self) -> Result<Arc<dyn LogBackend>, BindingError> {
        self.logs
            .clone()
            .ok_or(BindingError::MissingCapability(Capability::Logs))
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capabilities")
            .field("call", &self.call.is_some())
            .field("transact", &self.transact.is_some())
            .field("logs", &self.logs.is_some())
            .finish()
    }
}

/// A contract interface bound to a deployed address.
///
/// Dispatches every ABI function and event by name through whichever
/// capabilities it was bound with. Cloning is cheap; clones share the
/// descriptor and backends.
#[derive(Debug, Clone)]
pub struct BoundContract {
    address: Address,
    descriptor: Arc<InterfaceDescriptor>,
    caps: Capabilities,
    log_buffer: usize,
}

impl BoundContract {
    pub fn bind(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        caps: Capabilities,
    ) -> Result<Self, BindingError> {
        if caps.is_empty() {
            return Err(BindingError::NoCapabilities);
        }

        debug!("Binding contract at {} with {:?}", address, caps);
        Ok(Self {
            address,
            descriptor,
            caps,
            log_buffer: DEFAULT_LOG_BUFFER,
        })
    }

    /// Bind to an address given as a hex string.
    pub fn at(
        address: &str,
        descriptor: Arc<InterfaceDescriptor>,
        caps: Capabilities,
    ) -> Result<Self, BindingError> {
        let address = utils::validate_address(address)
            .map_err(|e| BindingError::Encoding(format!("Invalid contract address: {}", e)))?;
        Self::bind(address, descriptor, caps)
    }

    /// Deploy the descriptor's bytecode with `args` for the constructor.
    ///
    /// The returned address is derived from the sender and nonce and is valid
    /// once the transaction is mined; nothing here waits for that.
    pub async fn deploy(
        descriptor: Arc<InterfaceDescriptor>,
        caps: Capabilities,
        opts: &TransactOptions,
        args: &[DynSolValue],
    ) -> Result<(Address, PendingTx, Self), BindingError> {
        let data = descriptor.deploy_data(args)?;
        let backend = caps.transact()?;

        let pending = backend.submit(None, opts, data).await?;
        let address = pending.from.create(pending.nonce);
        info!(
            "Deployment submitted: tx 0x{:x}, contract address {}",
            pending.hash, address
        );

        let contract = Self::bind(address, descriptor, caps)?;
        Ok((address, pending, contract))
    }

    /// Size of the log buffer between an iterator's producer and consumer.
    pub fn with_log_buffer(mut self, capacity: usize) -> Self {
        self.log_buffer = capacity.max(1);
        self
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub fn descriptor(&self) -> &Arc<InterfaceDescriptor> {
        &self.descriptor
    }

    pub const fn log_buffer(&self) -> usize {
        self.log_buffer
    }

    pub const fn capabilities(&self) -> &Capabilities {
        &self.caps
    }

    pub fn caller(&self) -> Result<ContractCaller, BindingError> {
        Ok(ContractCaller::new(
            self.address,
            self.descriptor.clone(),
            self.caps.call()?,
        ))
    }

    pub fn transactor(&self) -> Result<ContractTransactor, BindingError> {
        Ok(ContractTransactor::new(
            self.address,
            self.descriptor.clone(),
            self.caps.transact()?,
        ))
    }

    pub fn filterer(&self) -> Result<ContractFilterer, BindingError> {
        Ok(
            ContractFilterer::new(self.address, self.descriptor.clone(), self.caps.logs()?)
                .with_log_buffer(self.log_buffer),
        )
    }

    pub async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &CallOptions,
    ) -> Result<CallOutput, BindingError> {
        self.caller()?.call(method, args, opts).await
    }

    pub async fn transact(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &TransactOptions,
    ) -> Result<PendingTx, BindingError> {
        self.transactor()?.transact(method, args, opts).await
    }

    pub async fn transact_raw(
        &self,
        opts: &TransactOptions,
        data: Bytes,
    ) -> Result<PendingTx, BindingError> {
        self.transactor()?.transact_raw(opts, data).await
    }

    pub async fn transfer(&self, opts: &TransactOptions) -> Result<PendingTx, BindingError> {
        self.transactor()?.transfer(opts).await
    }

    pub async fn filter<E: FromLog>(
        &self,
        event: &str,
        opts: &FilterOptions,
        topics: &[Vec<DynSolValue>],
    ) -> Result<EventIterator<E>, BindingError> {
        self.filterer()?.filter(event, opts, topics).await
    }

    pub async fn watch<E: FromLog>(
        &self,
        event: &str,
        opts: &WatchOptions,
        topics: &[Vec<DynSolValue>],
        sink: mpsc::Sender<E>,
    ) -> Result<EventWatch, BindingError> {
        self.filterer()?.watch(event, opts, topics, sink).await
    }

    /// Decode a single log. Needs no backend.
    pub fn parse_log<E: FromLog>(&self, event: &str, log: &Log) -> Result<E, BindingError> {
        E::from_log(self.descriptor.event(event)?, log)
    }
}

/// Read-only view of a bound contract.
#[derive(Clone)]
pub struct ContractCaller {
    address: Address,
    descriptor: Arc<InterfaceDescriptor>,
    backend: Arc<dyn CallBackend>,
}

impl ContractCaller {
    pub fn new(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        backend: Arc<dyn CallBackend>,
    ) -> Self {
        Self {
            address,
            descriptor,
            backend,
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub async fn call(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &CallOptions,
    ) -> Result<CallOutput, BindingError> {
        let (function, data) = self.descriptor.encode_call(method, args)?;
        debug!(
            "Calling {} on {} at {:?}",
            function.signature(),
            self.address,
            opts.block_id()
        );

        let output = self.backend.call(self.address, opts, data).await?;
        self.descriptor.decode_output(function, &output)
    }

    /// Call with pre-encoded calldata, returning the raw result.
    pub async fn call_raw(&self, data: Bytes, opts: &CallOptions) -> Result<Bytes, BindingError> {
        self.backend.call(self.address, opts, data).await
    }
}

impl fmt::Debug for ContractCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractCaller")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Write-only view of a bound contract.
#[derive(Clone)]
pub struct ContractTransactor {
    address: Address,
    descriptor: Arc<InterfaceDescriptor>,
    backend: Arc<dyn TransactBackend>,
}

impl ContractTransactor {
    pub fn new(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        backend: Arc<dyn TransactBackend>,
    ) -> Self {
        Self {
            address,
            descriptor,
            backend,
        }
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub async fn transact(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &TransactOptions,
    ) -> Result<PendingTx, BindingError> {
        let (function, data) = self.descriptor.encode_call(method, args)?;
        let pending = self.backend.submit(Some(self.address), opts, data).await?;
        info!(
            "Submitted {} to {}: tx 0x{:x}",
            function.signature(),
            self.address,
            pending.hash
        );
        Ok(pending)
    }

    pub async fn transact_raw(
        &self,
        opts: &TransactOptions,
        data: Bytes,
    ) -> Result<PendingTx, BindingError> {
        self.backend.submit(Some(self.address), opts, data).await
    }

    /// Plain value transfer, hitting the contract's receive or fallback function.
    pub async fn transfer(&self, opts: &TransactOptions) -> Result<PendingTx, BindingError> {
        self.transact_raw(opts, Bytes::new()).await
    }
}

impl fmt::Debug for ContractTransactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractTransactor")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Event view of a bound contract.
#[derive(Clone)]
pub struct ContractFilterer {
    address: Address,
    descriptor: Arc<InterfaceDescriptor>,
    backend: Arc<dyn LogBackend>,
    log_buffer: usize,
}

impl ContractFilterer {
    pub fn new(
        address: Address,
        descriptor: Arc<InterfaceDescriptor>,
        backend: Arc<dyn LogBackend>,
    ) -> Self {
        Self {
            address,
            descriptor,
            backend,
            log_buffer: DEFAULT_LOG_BUFFER,
        }
    }

    pub fn with_log_buffer(mut self, capacity: usize) -> Self {
        self.log_buffer = capacity.max(1);
        self
    }

    pub const fn address(&self) -> Address {
        self.address
    }

    pub const fn log_buffer(&self) -> usize {
        self.log_buffer
    }

    fn log_filter(
        &self,
        event: &alloy::json_abi::Event,
        topics: &[Vec<DynSolValue>],
    ) -> Result<LogFilter, BindingError> {
        Ok(LogFilter {
            address: self.address,
            topics: topic_filter(event, topics)?,
            from_block: None,
            to_block: None,
        })
    }

    /// Query matching historical logs in `opts`' block range.
    ///
    /// `topics` holds one candidate set per indexed parameter, in declaration
    /// order. A transport failure of the historical query is returned here;
    /// everything after surfaces through the iterator.
    pub async fn filter<E: FromLog>(
        &self,
        event: &str,
        opts: &FilterOptions,
        topics: &[Vec<DynSolValue>],
    ) -> Result<EventIterator<E>, BindingError> {
        let event = self.descriptor.event(event)?;
        // A followed open range is pinned to the current head so the live
        // feed resumes right after what the historical query covered.
        let end = match (opts.follow, opts.end) {
            (true, None) => Some(self.backend.block_number().await?),
            (_, end) => end,
        };
        let filter = self
            .log_filter(event, topics)?
            .with_range(Some(opts.start), end);

        let history = self.backend.query_logs(&filter).await?;
        debug!(
            "Found {} historical '{}' logs in blocks {}..{:?}",
            history.len(),
            event.name,
            opts.start,
            end
        );

        Ok(spawn_iterator(
            self.backend.clone(),
            event.clone(),
            filter,
            history,
            opts.follow,
            self.log_buffer,
        ))
    }

    /// Deliver newly matching logs into `sink` until the returned handle is
    /// unsubscribed, the sink is dropped, or the live feed fails.
    pub async fn watch<E: FromLog>(
        &self,
        event: &str,
        opts: &WatchOptions,
        topics: &[Vec<DynSolValue>],
        sink: mpsc::Sender<E>,
    ) -> Result<EventWatch, BindingError> {
        let event = self.descriptor.event(event)?;
        let filter = self.log_filter(event, topics)?.with_range(opts.start, None);

        let subscription = self.backend.subscribe_logs(&filter).await?;
        info!("Watching '{}' events on {}", event.name, self.address);

        Ok(spawn_watch(event.clone(), subscription, sink))
    }

    pub fn parse_log<E: FromLog>(&self, event: &str, log: &Log) -> Result<E, BindingError> {
        E::from_log(self.descriptor.event(event)?, log)
    }
}

impl fmt::Debug for ContractFilterer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContractFilterer")
            .field("address", &self.address)
            .field("log_buffer", &self.log_buffer)
            .finish_non_exhaustive()
    }
}

/// A bound contract with call and transaction options fixed up front.
#[derive(Debug, Clone)]
pub struct ContractSession {
    pub contract: BoundContract,
    pub call_opts: CallOptions,
    pub transact_opts: TransactOptions,
}

impl ContractSession {
    pub fn new(contract: BoundContract, call_opts: CallOptions, transact_opts: TransactOptions) -> Self {
        Self {
            contract,
            call_opts,
            transact_opts,
        }
    }

    pub async fn call(&self, method: &str, args: &[DynSolValue]) -> Result<CallOutput, BindingError> {
        self.contract.call(method, args, &self.call_opts).await
    }

    pub async fn transact(
        &self,
        method: &str,
        args: &[DynSolValue],
    ) -> Result<PendingTx, BindingError> {
        self.contract.transact(method, args, &self.transact_opts).await
    }

    pub async fn transfer(&self) -> Result<PendingTx, BindingError> {
        self.contract.transfer(&self.transact_opts).await
    }
}
