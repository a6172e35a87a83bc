//! # fuelwatch-core
//!
//! Reactive settings store for the fuel-price dashboard.
//!
//! This crate provides:
//! - The setting model (keys, defaults, typed enumerations, validation)
//! - Backing storage abstraction with in-memory and file implementations
//! - The state store itself (get/set/subscribe with snapshot persistence)
//!
//! This crate is intentionally runtime-agnostic and contains no async code.
//! Async bridging lives in `fuelwatch-app`.

pub mod model;
pub mod storage;
pub mod store;

pub use model::*;
pub use storage::{FileStorage, MemoryStorage, SettingsStorage, StorageError};
pub use store::{
    SettingsStore, StateStore, StoreConfig, StoreHandle, Subscription, SubscriptionId,
};
