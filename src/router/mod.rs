//! Router Module
//!
//! Provider registry, key pools, routing policy and the request router.

pub mod key_pool;
pub mod policy;
pub mod registry;
pub mod request;

pub use key_pool::{ApiKey, KeyPool, KeyPoolStats};
pub use policy::{Candidate, Exclusions, RoutingPolicy};
pub use registry::{Registry, RegistryStore};
pub use request::{RequestRouter, RouterSettings};
