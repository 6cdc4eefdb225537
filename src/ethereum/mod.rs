pub mod abi;
pub mod backend;
pub mod bindings;
pub mod codec;
pub mod contract;
pub mod error;
pub mod event;
pub mod provider;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

use alloy::{
    dyn_abi::DynSolValue,
    eips::BlockId,
    primitives::{Address, TxHash, U256},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use error::BindingError;

/// Options for a read-only call. Defaults to the latest block.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Account the call is made from (`msg.sender`).
    pub from: Option<Address>,
    /// Explicit block to execute against. Takes precedence over `pending`.
    pub block: Option<BlockId>,
    /// Execute against the pending state instead of the latest block.
    pub pending: bool,
}

impl CallOptions {
    pub fn at_block(block: BlockId) -> Self {
        Self {
            block: Some(block),
            ..Default::default()
        }
    }

    pub fn pending() -> Self {
        Self {
            pending: true,
            ..Default::default()
        }
    }

    /// The block the call resolves to.
    pub fn block_id(&self) -> BlockId {
        match self.block {
            Some(block) => block,
            None if self.pending => BlockId::pending(),
            None => BlockId::latest(),
        }
    }
}

/// Options for a state-changing transaction.
///
/// `from` identifies the signing account; the backend must hold a signer for
/// it. Unset gas and nonce fields are filled in by the backend.
#[derive(Debug, Clone)]
pub struct TransactOptions {
    pub from: Address,
    pub value: Option<U256>,
    pub gas_limit: Option<u64>,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub nonce: Option<u64>,
}

impl TransactOptions {
    pub const fn new(from: Address) -> Self {
        Self {
            from,
            value: None,
            gas_limit: None,
            gas_price: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            nonce: None,
        }
    }

    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub const fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }

    pub const fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = Some(nonce);
        self
    }
}

/// Block range for a historical event query.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterOptions {
    /// First block of the range (inclusive).
    pub start: u64,
    /// Last block of the range (inclusive). `None` means up to the latest block.
    pub end: Option<u64>,
    /// Keep delivering live logs once the historical range has been drained.
    pub follow: bool,
}

impl FilterOptions {
    pub const fn range(start: u64, end: u64) -> Self {
        Self {
            start,
            end: Some(end),
            follow: false,
        }
    }

    pub const fn from_block(start: u64) -> Self {
        Self {
            start,
            end: None,
            follow: false,
        }
    }

    pub const fn follow(mut self) -> Self {
        self.follow = true;
        self
    }
}

/// Options for a live event subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchOptions {
    /// Block to start delivering from. `None` starts at the next new block.
    pub start: Option<u64>,
}

/// A submitted transaction. Confirmation is left to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTx {
    pub hash: TxHash,
    pub from: Address,
    pub nonce: u64,
}

/// Decoded return values of a read-only call, shaped by the function's
/// declared outputs.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutput {
    Empty,
    Single(DynSolValue),
    Tuple(Vec<DynSolValue>),
    Struct(Vec<(String, DynSolValue)>),
}

impl CallOutput {
    /// Shape decoded values according to the declared output names.
    pub fn from_outputs(names: &[String], mut values: Vec<DynSolValue>) -> Self {
        match values.len() {
            0 => Self::Empty,
            1 => Self::Single(values.remove(0)),
            _ if names.len() == values.len() && names.iter().all(|n| !n.is_empty()) => {
                Self::Struct(names.iter().cloned().zip(values).collect())
            }
            _ => Self::Tuple(values),
        }
    }

    /// Flatten back into positional values.
    pub fn into_values(self) -> Vec<DynSolValue> {
        match self {
            Self::Empty => vec![],
            Self::Single(value) => vec![value],
            Self::Tuple(values) => values,
            Self::Struct(fields) => fields.into_iter().map(|(_, v)| v).collect(),
        }
    }

    /// The single return value, or a decoding error for any other shape.
    pub fn into_single(self) -> Result<DynSolValue, BindingError> {
        match self {
            Self::Single(value) => Ok(value),
            other => Err(BindingError::Decoding(format!(
                "expected a single return value, got {}",
                other.arity()
            ))),
        }
    }

    pub fn arity(&self) -> usize {
        match self {
            Self::Empty => 0,
            Self::Single(_) => 1,
            Self::Tuple(values) => values.len(),
            Self::Struct(fields) => fields.len(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Empty => Value::Null,
            Self::Single(value) => codec::value_to_json(value),
            Self::Tuple(values) => Value::Array(values.iter().map(codec::value_to_json).collect()),
            Self::Struct(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), codec::value_to_json(value)))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_options_block_resolution() {
        assert_eq!(CallOptions::default().block_id(), BlockId::latest());
        assert_eq!(CallOptions::pending().block_id(), BlockId::pending());

        let explicit = CallOptions {
            block: Some(BlockId::number(17)),
            pending: true,
            ..Default::default()
        };
        assert_eq!(explicit.block_id(), BlockId::number(17));
    }

    #[test]
    fn test_call_output_shapes() {
        let one = DynSolValue::Bool(true);
        let two = DynSolValue::Uint(U256::from(7), 256);

        assert_eq!(CallOutput::from_outputs(&[], vec![]), CallOutput::Empty);
        assert_eq!(
            CallOutput::from_outputs(&["".to_string()], vec![one.clone()]),
            CallOutput::Single(one.clone())
        );
        assert!(matches!(
            CallOutput::from_outputs(
                &["ok".to_string(), "count".to_string()],
                vec![one.clone(), two.clone()]
            ),
            CallOutput::Struct(ref fields) if fields[1].0 == "count"
        ));
        assert!(matches!(
            CallOutput::from_outputs(&["ok".to_string(), "".to_string()], vec![one, two]),
            CallOutput::Tuple(ref values) if values.len() == 2
        ));
    }

    #[test]
    fn test_into_single_rejects_tuples() {
        let output = CallOutput::Tuple(vec![DynSolValue::Bool(true), DynSolValue::Bool(false)]);
        assert!(matches!(
            output.into_single(),
            Err(BindingError::Decoding(_))
        ));
    }
}
