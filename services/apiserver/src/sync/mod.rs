//! Synchronization registry access for the API layer.
//!
//! Sync workers write entries straight to the backend through
//! [`crate::store::SyncRegistryStore`]. The API core reads them through
//! [`SyncRegistryCache`], which tolerates stale answers for up to its TTL.
pub mod cache;
pub mod declaration;

pub use cache::SyncRegistryCache;
pub use declaration::{DeclarationOutcome, apply_declaration};
