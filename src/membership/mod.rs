//! Node Registry
//!
//! Authoritative record of which chunk servers belong to the cluster and how they
//! are doing. It knows nothing about blocks beyond storing what each node last
//! reported.
//!
//! ## Core Mechanisms
//! - **Registration**: the registry, never the client, allocates `NodeId`s from a
//!   monotonic counter.
//! - **Heartbeats**: each accepted report refreshes the node's liveness timestamp,
//!   utilization and observed inventory, and revives an unhealthy node.
//! - **Health Sweep**: nodes silent for longer than `3 × heartbeat interval` are
//!   flipped to `Unhealthy`. Nodes are never removed.
//! - **Selection**: least-loaded healthy nodes are chosen for placement, all or
//!   nothing.

pub mod registry;
pub mod types;
