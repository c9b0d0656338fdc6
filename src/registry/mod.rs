//! Public registry probing.
//!
//! Every ecosystem resolver checks its references through the same
//! retry-on-throttle protocol, with ecosystem-specific URL templates.

pub mod client;
pub mod endpoints;
pub mod probe;

#[cfg(test)]
pub(crate) mod stub;

pub use client::{HttpRegistryClient, HttpReply, RegistryClient};
pub use endpoints::RegistryEndpoints;
pub use probe::{BodyCheck, ProbeRequest, Prober, RetryPolicy};
