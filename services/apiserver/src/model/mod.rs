//! Resource data model.
//!
//! # Purpose
//! Re-exports the record identity, change/watch payloads, patch documents and
//! synchronization bookkeeping types shared by the store, query and API layers.
mod change;
mod gvk;
mod patch;
mod record;
mod sync;

pub use change::{Change, ChangeOp, RELIST_ADVISED_ANNOTATION, WatchEvent, WatchEventType};
pub use gvk::Gvk;
pub use patch::{Patch, PatchType, apply_patch};
pub use record::{KindSelector, ResourceKey, ResourceRecord, declared_version, prepare_object};
pub use sync::{ClusterSyncResources, SyncRegistryEntry, SyncResourceGroup, SyncStatus};
