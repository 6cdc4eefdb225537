use alloy::{
    dyn_abi::DynSolValue,
    json_abi::Event,
    primitives::{Address, Bytes, B256, U256},
    rpc::types::Log,
};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{embedded, EmbeddedDescriptor};
use crate::ethereum::{
    abi::InterfaceDescriptor,
    codec,
    contract::{BoundContract, Capabilities},
    error::BindingError,
    event::{decode_log, EventIterator, EventWatch, FromLog},
    CallOptions, FilterOptions, PendingTx, TransactOptions, WatchOptions,
};

static DESCRIPTOR: EmbeddedDescriptor = EmbeddedDescriptor::new();

pub fn descriptor() -> Result<Arc<InterfaceDescriptor>, BindingError> {
    embedded(&DESCRIPTOR, include_str!("../../../abi/vigil.json"))
}

const SECRET_CREATED: &str = "SecretCreated";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretMetadata {
    pub creator: Address,
    pub name: String,
    /// Seconds the owner may stay inactive before the secret can be revealed.
    pub longevity: U256,
}

impl SecretMetadata {
    fn from_fields(fields: Vec<DynSolValue>) -> Result<Self, BindingError> {
        let [creator, name, longevity]: [DynSolValue; 3] = fields.try_into().map_err(|f: Vec<_>| {
            BindingError::Decoding(format!("SecretMetadata has 3 fields, got {}", f.len()))
        })?;

        Ok(Self {
            creator: codec::into_address(creator)?,
            name: codec::into_string(name)?,
            longevity: codec::into_uint(longevity)?,
        })
    }
}

impl TryFrom<DynSolValue> for SecretMetadata {
    type Error = BindingError;

    fn try_from(value: DynSolValue) -> Result<Self, Self::Error> {
        Self::from_fields(codec::into_tuple(value, 3)?)
    }
}

/// `SecretCreated(address indexed creator, string indexed name, uint256 index)`
#[derive(Debug, Clone)]
pub struct SecretCreated {
    pub creator: Address,
    /// Keccak hash of the secret's name; indexed strings are not recoverable.
    pub name: B256,
    pub index: U256,
    pub raw: Log,
}

impl FromLog for SecretCreated {
    fn from_log(event: &Event, log: &Log) -> Result<Self, BindingError> {
        let decoded = decode_log(event, log)?;
        let field = |name: &str| {
            decoded.get(name).cloned().ok_or_else(|| {
                BindingError::Decoding(format!("{} log is missing '{}'", SECRET_CREATED, name))
            })
        };

        Ok(Self {
            creator: codec::into_address(field("creator")?)?,
            name: codec::into_word(field("name")?)?,
            index: codec::into_uint(field("index")?)?,
            raw: decoded.raw,
        })
    }
}

/// A registry of secrets revealed once their owner stops checking in.
#[derive(Debug, Clone)]
pub struct Vigil {
    contract: BoundContract,
}

impl Vigil {
    pub fn new(address: Address, caps: Capabilities) -> Result<Self, BindingError> {
        Ok(Self {
            contract: BoundContract::bind(address, descriptor()?, caps)?,
        })
    }

    pub async fn deploy(
        caps: Capabilities,
        opts: &TransactOptions,
    ) -> Result<(Address, PendingTx, Self), BindingError> {
        let (address, pending, contract) =
            BoundContract::deploy(descriptor()?, caps, opts, &[]).await?;
        Ok((address, pending, Self { contract }))
    }

    pub const fn contract(&self) -> &BoundContract {
        &self.contract
    }

    pub const fn address(&self) -> Address {
        self.contract.address()
    }

    async fn call_uint(
        &self,
        method: &str,
        args: &[DynSolValue],
        opts: &CallOptions,
    ) -> Result<U256, BindingError> {
        let output = self.contract.call(method, args, opts).await?;
        codec::into_uint(output.into_single()?)
    }

    /// Raw `_lastSeen` mapping lookup.
    pub async fn last_seen(&self, opts: &CallOptions, owner: Address) -> Result<U256, BindingError> {
        self.call_uint("_lastSeen", &[DynSolValue::Address(owner)], opts)
            .await
    }

    /// Raw `_metas` array lookup.
    pub async fn metas(&self, opts: &CallOptions, index: U256) -> Result<SecretMetadata, BindingError> {
        let output = self
            .contract
            .call("_metas", &[DynSolValue::Uint(index, 256)], opts)
            .await?;
        SecretMetadata::from_fields(output.into_values())
    }

    pub async fn get_last_seen(
        &self,
        opts: &CallOptions,
        owner: Address,
    ) -> Result<U256, BindingError> {
        self.call_uint("getLastSeen", &[DynSolValue::Address(owner)], opts)
            .await
    }

    pub async fn get_metas(
        &self,
        opts: &CallOptions,
        offset: U256,
        count: U256,
    ) -> Result<Vec<SecretMetadata>, BindingError> {
        let output = self
            .contract
            .call(
                "getMetas",
                &[DynSolValue::Uint(offset, 256), DynSolValue::Uint(count, 256)],
                opts,
            )
            .await?;

        codec::into_array(output.into_single()?)?
            .into_iter()
            .map(SecretMetadata::try_from)
            .collect()
    }

    pub async fn reveal_secret(&self, opts: &CallOptions, index: U256) -> Result<Bytes, BindingError> {
        let output = self
            .contract
            .call("revealSecret", &[DynSolValue::Uint(index, 256)], opts)
            .await?;
        codec::into_bytes(output.into_single()?)
    }

    pub async fn create_secret(
        &self,
        opts: &TransactOptions,
        name: &str,
        longevity: U256,
        secret: Bytes,
    ) -> Result<PendingTx, BindingError> {
        let args = [
            DynSolValue::String(name.to_string()),
            DynSolValue::Uint(longevity, 256),
            DynSolValue::Bytes(secret.to_vec()),
        ];
        self.contract.transact("createSecret", &args, opts).await
    }

    /// Mark the sender as alive, postponing the reveal of their secrets.
    pub async fn refresh_secrets(&self, opts: &TransactOptions) -> Result<PendingTx, BindingError> {
        self.contract.transact("refreshSecrets", &[], opts).await
    }

    fn secret_created_topics(creators: &[Address], names: &[&str]) -> Vec<Vec<DynSolValue>> {
        vec![
            creators.iter().copied().map(DynSolValue::Address).collect(),
            names
                .iter()
                .map(|name| DynSolValue::String(name.to_string()))
                .collect(),
        ]
    }

    /// Historical `SecretCreated` events, optionally restricted to the given
    /// creators and secret names. Empty slices match anything.
    pub async fn filter_secret_created(
        &self,
        opts: &FilterOptions,
        creators: &[Address],
        names: &[&str],
    ) -> Result<EventIterator<SecretCreated>, BindingError> {
        self.contract
            .filter(
                SECRET_CREATED,
                opts,
                &Self::secret_created_topics(creators, names),
            )
            .await
    }

    pub async fn watch_secret_created(
        &self,
        opts: &WatchOptions,
        creators: &[Address],
        names: &[&str],
        sink: mpsc::Sender<SecretCreated>,
    ) -> Result<EventWatch, BindingError> {
        self.contract
            .watch(
                SECRET_CREATED,
                opts,
                &Self::secret_created_topics(creators, names),
                sink,
            )
            .await
    }

    pub fn parse_secret_created(&self, log: &Log) -> Result<SecretCreated, BindingError> {
        self.contract.parse_log(SECRET_CREATED, log)
    }
}
