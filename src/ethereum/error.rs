use std::fmt;

use thiserror::Error;

/// A backend capability a contract view depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Call,
    Transact,
    Logs,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Call => f.write_str("call"),
            Self::Transact => f.write_str("transact"),
            Self::Logs => f.write_str("logs"),
        }
    }
}

#[derive(Error, Debug)]
pub enum BindingError {
    /// Malformed or unsupported interface description
    #[error("Invalid contract descriptor: {0}")]
    Descriptor(String),

    /// Arguments do not match the ABI signature
    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Function '{0}' not found in contract ABI")]
    UnknownFunction(String),

    #[error("Event '{0}' not found in contract ABI")]
    UnknownEvent(String),

    /// Connectivity, RPC rejection or node error, passed through as-is
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Returned data or log does not match the declared ABI types
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Live log feed terminated unexpectedly
    #[error("Subscription error: {0}")]
    Subscription(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Contract descriptor has no deployable bytecode")]
    NoDeployCode,

    #[error("Contract was bound without the '{0}' capability")]
    MissingCapability(Capability),

    #[error("At least one backend capability is required to bind a contract")]
    NoCapabilities,
}

impl BindingError {
    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        Self::Transport(err.into())
    }

    /// Raised locally before any network interaction.
    pub const fn is_preflight(&self) -> bool {
        matches!(
            self,
            Self::Descriptor(_)
                | Self::Encoding(_)
                | Self::UnknownFunction(_)
                | Self::UnknownEvent(_)
                | Self::NoDeployCode
                | Self::MissingCapability(_)
                | Self::NoCapabilities
        )
    }
}
