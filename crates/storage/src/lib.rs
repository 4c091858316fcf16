//! State storage for cycler.
//!
//! This crate provides the single-slot `StateStore` abstraction with an
//! in-memory register and a JSON-file backed implementation.

#![warn(missing_docs)]

pub mod trait_;
pub mod memory;
#[cfg(feature = "json")]
pub mod json_storage;

pub use trait_::{StateStore, StoreError, StaleVersionError, Result};
pub use memory::InMemoryStateStore;
#[cfg(feature = "json")]
pub use json_storage::JsonStateStore;
