//! Descriptor-driven contract bindings.
//!
//! A [`BoundContract`](ethereum::contract::BoundContract) pairs a parsed ABI
//! with a deployed address and whichever backend capabilities the caller has
//! (read-only calls, transaction submission, log queries). Typed bindings for
//! individual contracts live in [`ethereum::bindings`].

pub mod config;
pub mod ethereum;
