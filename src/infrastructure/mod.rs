//! Adapters implementing the domain ports: in-memory storage, optional
//! RocksDB persistence, and deterministic stand-ins for the two external
//! collaborators.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;
