//! Contextual multi-armed bandit decisions.
//!
//! CMAB rules are decided by a remote prediction endpoint. [`DefaultCmabService`] keeps decisions
//! sticky with a TTL cache keyed on the rule, the user, and only the attributes the rule declares
//! as relevant. Concurrent lookups of the same key share a single request.
mod cache;
mod client;
mod service;

pub use cache::{CacheEntry, CacheKey, CmabCache};
pub use client::{CmabAttribute, CmabClient, HttpCmabClient};
pub use service::{CmabDecision, CmabService, DefaultCmabService};
