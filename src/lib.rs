//! WhaleFS Cluster Library
//!
//! Core of a distributed block store: a master that owns placement and membership,
//! and chunk servers that hold block replicas and keep themselves consistent with
//! the master through periodic heartbeats. The binary (`main.rs`) wires these
//! modules into the `master` and `chunk` processes.
//!
//! ## Architecture Modules
//!
//! - **`membership`**: the node registry. Issues node identities, records
//!   heartbeats, selects placement targets and runs the health sweep.
//! - **`placement`**: the authoritative file → blocks → replica-set tables.
//!   Ingestion, per-heartbeat reconciliation and re-placement of blocks lost with
//!   a node.
//! - **`master`**: the coordinator composing registry and engine, its background
//!   loops, and the HTTP surface chunk agents and clients talk to.
//! - **`chunk`**: the chunk server: local block store, agent state machine, sync
//!   workers and block endpoints.
//! - **`transport`**: the traits the core uses to reach other processes, with
//!   their HTTP implementations.
//! - **`config`** / **`error`**: shared settings and error taxonomy.

pub mod chunk;
pub mod config;
pub mod error;
pub mod master;
pub mod membership;
pub mod placement;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;
