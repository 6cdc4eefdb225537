use alloy::{
    dyn_abi::DynSolValue,
    primitives::Address,
};
use std::sync::Arc;

use super::{embedded, EmbeddedDescriptor};
use crate::ethereum::{
    abi::InterfaceDescriptor,
    codec,
    contract::{BoundContract, Capabilities},
    error::BindingError,
    CallOptions, PendingTx, TransactOptions,
};

static DESCRIPTOR: EmbeddedDescriptor = EmbeddedDescriptor::new();

pub fn descriptor() -> Result<Arc<InterfaceDescriptor>, BindingError> {
    embedded(&DESCRIPTOR, include_str!("../../../abi/message_box.json"))
}

/// A single stored message and the account that last set it.
#[derive(Debug, Clone)]
pub struct MessageBox {
    contract: BoundContract,
}

impl MessageBox {
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

    pub async fn author(&self, opts: &CallOptions) -> Result<Address, BindingError> {
        let output = self.contract.call("author", &[], opts).await?;
        codec::into_address(output.into_single()?)
    }

    pub async fn message(&self, opts: &CallOptions) -> Result<String, BindingError> {
        let output = self.contract.call("message", &[], opts).await?;
        codec::into_string(output.into_single()?)
    }

    pub async fn set_message(
        &self,
        opts: &TransactOptions,
        message: &str,
    ) -> Result<PendingTx, BindingError> {
        self.contract
            .transact(
                "setMessage",
                &[DynSolValue::String(message.to_string())],
                opts,
            )
            .await
    }
}
