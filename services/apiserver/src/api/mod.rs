//! Resource API HTTP module.
//!
//! # Purpose
//! Exposes route handler modules and the error/envelope types they share.
pub mod error;
pub mod resources;
pub mod sync;
pub mod system;
pub mod types;
