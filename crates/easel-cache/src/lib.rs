//! Fingerprint-keyed result cache with single-flight reservations
//!
//! The cache is the engine's only resource with concurrent writers. All
//! mutation for one fingerprint is serialized through the
//! reserve/commit/abort protocol: the first caller to reserve owns the
//! generation, everyone else gets a waiter that resolves with the owner's
//! outcome. No global lock, only per-fingerprint exclusion.

#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod single_flight;
mod store;

pub use single_flight::{FingerprintCache, Reservation, Reserve, Waiter};
pub use store::{FsArtifactStore, MemoryArtifactStore};
