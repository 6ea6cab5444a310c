//! Aggregated resource API server library crate.
//!
//! # Purpose
//! Serves a Kubernetes-compatible resource API over snapshots collected from
//! many clusters. The crate exposes the storage contract and its backends,
//! query translation, resource versions, watch emulation, the
//! synchronization registry, and the HTTP surface built on top of them.
pub mod api;
pub mod app;
pub mod config;
pub mod factory;
pub mod model;
pub mod observability;
pub mod query;
pub mod retry;
pub mod storage;
pub mod store;
pub mod sync;
pub mod version;
pub mod watch;
