//! Typed bindings for the contracts shipped with the crate.
//!
//! Each binding wraps a [`BoundContract`](super::contract::BoundContract)
//! over an ABI and bytecode embedded at build time from `abi/`.

pub mod message_box;
pub mod vigil;

pub use message_box::MessageBox;
pub use vigil::{SecretCreated, SecretMetadata, Vigil};

use std::sync::{Arc, OnceLock};

use super::{abi::InterfaceDescriptor, error::BindingError};

type EmbeddedDescriptor = OnceLock<Result<Arc<InterfaceDescriptor>, String>>;

/// Parse an embedded artifact once. A parse failure is remembered and
/// returned to every later caller.
fn embedded(
    cell: &'static EmbeddedDescriptor,
    artifact: &str,
) -> Result<Arc<InterfaceDescriptor>, BindingError> {
    cell.get_or_init(|| {
        InterfaceDescriptor::from_artifact(artifact)
            .map(Arc::new)
            .map_err(|e| e.to_string())
    })
    .clone()
    .map_err(BindingError::Descriptor)
}
