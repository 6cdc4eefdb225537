use crate::config::{Config, EventsConfig, GasConfig, NetworkConfig};
use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    primitives::{Address, Bytes},
    providers::{Provider, ProviderBuilder, RootProvider},
    rpc::types::{Filter, Log, TransactionRequest},
    signers::local::PrivateKeySigner,
    transports::http::{Client, Http},
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{
    backend::{CallBackend, LogBackend, LogFeed, LogFilter, LogSubscription, TransactBackend},
    contract::Capabilities,
    error::BindingError,
    utils, CallOptions, PendingTx, TransactOptions,
};

/// Backend over a JSON-RPC provider.
///
/// Transactions are only accepted from `signer`, the account the provider's
/// wallet signs for. Live log feeds poll the chain head every
/// `poll_interval`.
#[derive(Debug, Clone)]
pub struct RpcBackend<P> {
    provider: P,
    signer: Option<Address>,
    gas: GasConfig,
    poll_interval: Duration,
    log_buffer: usize,
}

impl<P> RpcBackend<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    pub fn new(provider: P, signer: Option<Address>, gas: GasConfig, events: &EventsConfig) -> Self {
        Self {
            provider,
            signer,
            gas,
            poll_interval: Duration::from_millis(events.poll_interval_ms.max(1)),
            log_buffer: events.log_buffer,
        }
    }

    pub const fn signer(&self) -> Option<Address> {
        self.signer
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    async fn gas_limit(&self, tx: &TransactionRequest) -> Result<u64, BindingError> {
        match self.provider.estimate_gas(tx).await {
            Ok(gas) => Ok(gas),
            Err(e) => {
                let message = utils::interpret_rpc_error(&e.to_string());
                warn!(
                    "Gas estimation failed ({}), using default gas limit {}",
                    message, self.gas.default_gas_limit
                );
                Ok(self.gas.default_gas_limit)
            }
        }
    }
}

/// A read-only backend for `rpc_url`.
pub fn connect(
    rpc_url: &str,
    gas: GasConfig,
    events: &EventsConfig,
) -> Result<RpcBackend<RootProvider<Http<Client>>>> {
    let provider = ProviderBuilder::new().on_http(rpc_url.parse()?);
    Ok(RpcBackend::new(provider, None, gas, events))
}

/// A backend that signs transactions with `private_key`.
pub fn connect_with_signer(
    rpc_url: &str,
    private_key: &str,
    gas: GasConfig,
    events: &EventsConfig,
) -> Result<RpcBackend<impl Provider<Http<Client>> + Clone + 'static>> {
    let signer: PrivateKeySigner = private_key
        .trim()
        .trim_start_matches("0x")
        .parse()
        .map_err(|e| anyhow!("Invalid private key: {}", e))?;
    let address = signer.address();

    let provider = ProviderBuilder::new()
        .with_recommended_fillers()
        .wallet(EthereumWallet::from(signer))
        .on_http(rpc_url.parse()?);

    debug!("Connected signing backend for {}", address);
    Ok(RpcBackend::new(provider, Some(address), gas, events))
}

pub(crate) fn to_rpc_filter(filter: &LogFilter) -> Filter {
    let mut rpc_filter = Filter::new().address(filter.address);

    if let Some(from) = filter.from_block {
        rpc_filter = rpc_filter.from_block(from);
    }
    if let Some(to) = filter.to_block {
        rpc_filter = rpc_filter.to_block(to);
    }

    let [sig, topic1, topic2, topic3] = filter.topics.clone();
    if !sig.is_empty() {
        rpc_filter = rpc_filter.event_signature(sig);
    }
    if !topic1.is_empty() {
        rpc_filter = rpc_filter.topic1(topic1);
    }
    if !topic2.is_empty() {
        rpc_filter = rpc_filter.topic2(topic2);
    }
    if !topic3.is_empty() {
        rpc_filter = rpc_filter.topic3(topic3);
    }

    rpc_filter
}

#[async_trait]
impl<P> CallBackend for RpcBackend<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    async fn call(&self, to: Address, opts: &CallOptions, data: Bytes) -> Result<Bytes, BindingError> {
        let mut tx = TransactionRequest::default().with_to(to).with_input(data);
        if let Some(from) = opts.from {
            tx = tx.with_from(from);
        }

        self.provider
            .call(&tx)
            .block(opts.block_id())
            .await
            .map_err(BindingError::transport)
    }
}

#[async_trait]
impl<P> TransactBackend for RpcBackend<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    async fn submit(
        &self,
        to: Option<Address>,
        opts: &TransactOptions,
        data: Bytes,
    ) -> Result<PendingTx, BindingError> {
        if self.signer != Some(opts.from) {
            return Err(BindingError::Signing(format!(
                "No signer available for account {}",
                opts.from
            )));
        }

        let mut tx = TransactionRequest::default().with_from(opts.from);
        tx = match to {
            Some(to) => tx.with_to(to).with_input(data),
            None => tx.with_deploy_code(data),
        };
        if let Some(value) = opts.value {
            tx = tx.with_value(value);
        }

        let nonce = match opts.nonce {
            Some(nonce) => nonce,
            None => self
                .provider
                .get_transaction_count(opts.from)
                .pending()
                .await
                .map_err(BindingError::transport)?,
        };
        tx = tx.with_nonce(nonce);

        match (opts.gas_price, opts.max_fee_per_gas) {
            (Some(price), _) => tx = tx.with_gas_price(price),
            (None, max_fee) => {
                let max_fee = max_fee.or(self.gas.max_gas_price.map(u128::from));
                let tip = opts
                    .max_priority_fee_per_gas
                    .or(self.gas.priority_fee.map(u128::from));
                if let (Some(max_fee), Some(tip)) = (max_fee, tip) {
                    tx = tx
                        .with_max_fee_per_gas(max_fee)
                        .with_max_priority_fee_per_gas(tip);
                }
            }
        }

        let gas_limit = match opts.gas_limit {
            Some(limit) => limit,
            None => self.gas_limit(&tx).await?,
        };
        tx = tx.with_gas_limit(gas_limit);

        let pending = self
            .provider
            .send_transaction(tx)
            .await
            .map_err(BindingError::transport)?;

        Ok(PendingTx {
            hash: *pending.tx_hash(),
            from: opts.from,
            nonce,
        })
    }
}

#[async_trait]
impl<P> LogBackend for RpcBackend<P>
where
    P: Provider<Http<Client>> + Clone + 'static,
{
    async fn query_logs(&self, filter: &LogFilter) -> Result<Vec<Log>, BindingError> {
        self.provider
            .get_logs(&to_rpc_filter(filter))
            .await
            .map_err(BindingError::transport)
    }

    async fn block_number(&self) -> Result<u64, BindingError> {
        self.provider
            .get_block_number()
            .await
            .map_err(BindingError::transport)
    }

    async fn subscribe_logs(&self, filter: &LogFilter) -> Result<LogSubscription, BindingError> {
        let next_block = match filter.from_block {
            Some(block) => block,
            None => self.block_number().await?.saturating_add(1),
        };

        let (feed, subscription) = LogSubscription::channel(self.log_buffer);
        tokio::spawn(poll_logs(
            self.provider.clone(),
            filter.clone(),
            next_block,
            self.poll_interval,
            feed,
        ));
        Ok(subscription)
    }
}

async fn poll_logs<P>(
    provider: P,
    filter: LogFilter,
    mut next_block: u64,
    interval: Duration,
    feed: LogFeed,
) where
    P: Provider<Http<Client>> + Clone + 'static,
{
    let mut ticker = tokio::time::interval(interval);
    debug!("Polling logs for {} from block {}", filter.address, next_block);

    loop {
        tokio::select! {
            biased;
            _ = feed.cancel.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let head = match provider.get_block_number().await {
            Ok(head) => head,
            Err(e) => {
                feed.fail(BindingError::Subscription(format!(
                    "Failed to poll block number: {}",
                    utils::interpret_rpc_error(&e.to_string())
                )));
                return;
            }
        };
        if head < next_block {
            continue;
        }

        let range = filter.clone().with_range(Some(next_block), Some(head));
        match provider.get_logs(&to_rpc_filter(&range)).await {
            Ok(logs) => {
                for log in logs {
                    if !feed.send(log).await {
                        return;
                    }
                }
            }
            Err(e) => {
                feed.fail(BindingError::Subscription(format!(
                    "Failed to fetch logs for blocks {}..={}: {}",
                    next_block,
                    head,
                    utils::interpret_rpc_error(&e.to_string())
                )));
                return;
            }
        }

        next_block = head.saturating_add(1);
    }
}

#[derive(Debug)]
pub struct ProviderManager {
    providers: HashMap<String, RootProvider<Http<Client>>>,
    config: Config,
}

impl ProviderManager {
    pub fn new(config: Config) -> Result<Self> {
        let mut providers = HashMap::new();

        for (network_name, network_config) in &config.networks {
            let provider = Self::create_provider(network_config)?;
            providers.insert(network_name.clone(), provider);
        }

        Ok(Self { providers, config })
    }

    fn create_provider(network_config: &NetworkConfig) -> Result<RootProvider<Http<Client>>> {
        let provider = ProviderBuilder::new().on_http(network_config.rpc_url.parse()?);

        Ok(provider)
    }

    fn network_name<'a>(&'a self, network: Option<&'a str>) -> &'a str {
        network.unwrap_or(&self.config.default_network)
    }

    pub fn get_provider(&self, network: Option<&str>) -> Result<&RootProvider<Http<Client>>> {
        let network_name = self.network_name(network);
        self.providers
            .get(network_name)
            .ok_or_else(|| anyhow!("Network '{}' not found", network_name))
    }

    pub fn get_network_config(&self, network: Option<&str>) -> Result<&NetworkConfig> {
        let network_name = self.network_name(network);
        self.config
            .networks
            .get(network_name)
            .ok_or_else(|| anyhow!("Network '{}' not configured", network_name))
    }

    /// Call and log access for `network`.
    pub fn read_only(&self, network: Option<&str>) -> Result<Capabilities> {
        let provider = self.get_provider(network)?.clone();
        let gas = self.get_network_config(network)?.gas.clone();
        let backend = RpcBackend::new(provider, None, gas, &self.config.events);
        Ok(Capabilities::read_only(Arc::new(backend)))
    }

    /// Full access for `network`, signing with `private_key`. Returns the
    /// signer's address alongside the capabilities.
    pub fn with_signer(
        &self,
        network: Option<&str>,
        private_key: &str,
    ) -> Result<(Address, Capabilities)> {
        let network_config = self.get_network_config(network)?;
        let backend = connect_with_signer(
            &network_config.rpc_url,
            private_key,
            network_config.gas.clone(),
            &self.config.events,
        )?;
        let address = backend
            .signer()
            .ok_or_else(|| anyhow!("Signing backend has no signer"))?;
        Ok((address, Capabilities::full(Arc::new(backend))))
    }

    /// Fail early with a readable message when `network`'s endpoint is
    /// unreachable.
    pub async fn validate_network_connection(&self, network: Option<&str>) -> Result<()> {
        let network_name = self.network_name(network);
        let provider = self
            .get_provider(network)
            .map_err(|e| anyhow!("Network '{}' is not configured: {}", network_name, e))?;

        match provider.get_block_number().await {
            Ok(_) => Ok(()),
            Err(e) => Err(anyhow!(
                "Cannot connect to network '{}': {}. Please check your RPC endpoint configuration and network connectivity.",
                network_name,
                utils::interpret_rpc_error(&e.to_string())
            )),
        }
    }
}
