// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Directory-based cache coherence.
//!
//! The [`DramDirectory`](dram_directory::DramDirectory) keeps the global
//! state of every block ([`DirectoryEntry`](directory_entry::DirectoryEntry)),
//! allows at most one transaction per block at a time
//! ([`PendingRequest`](pending_request::PendingRequest)) and talks to the
//! rest of the system through the [`Network`](network::Network) and
//! [`BackingStore`](backing_store::BackingStore) traits.

pub mod backing_store;
pub mod directory_entry;
pub mod dram_directory;
pub mod metrics;
pub mod network;
pub mod pending_request;
pub mod shmem_req;
pub mod test_helpers;
