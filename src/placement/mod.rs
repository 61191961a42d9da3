//! Placement & Reconciliation Engine
//!
//! Owns the authoritative mapping from files to blocks and from blocks to the
//! nodes that must hold them, and keeps physical reality converging on it.
//!
//! ## Core Concepts
//! - **Ingestion**: a blob is cut into fixed-size, checksummed blocks; each block
//!   is pushed to the least-loaded healthy nodes. A file only becomes visible with
//!   its blocks once all of them are fully replicated.
//! - **Reconciliation**: each heartbeat is diffed against the replica sets.
//!   Blocks a node holds but should not are *dead*; blocks it should hold but does
//!   not are *sync* targets, paired with a healthy source replica.
//! - **Re-placement**: blocks whose replicas died are copied onto newly selected
//!   nodes, which take over the dead nodes' slots.
//! - **Acknowledgement**: a finished sync is confirmed explicitly, the only way a
//!   node joins a replica set outside of placement.

pub mod engine;
pub mod types;
