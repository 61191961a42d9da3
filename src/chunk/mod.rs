//! Chunk Server
//!
//! Everything a storage node runs: the local block store, the agent state machine
//! that keeps the node registered and consistent with the master, and the HTTP
//! endpoints peers use to push and fetch block content.
//!
//! ## Core Concepts
//! - **Inventory**: the set of block ids present in the local store. It is sent
//!   in full with every heartbeat.
//! - **Dead block**: a block the node holds but the master does not expect there.
//!   Deleted as soon as the heartbeat response arrives.
//! - **Sync block**: a block the master expects on this node but which is
//!   missing. Pulled from the designated source by the sync workers.
//!
//! ## Submodules
//! - **`agent`**: register/heartbeat loop and the application of repair orders.
//! - **`sync`**: bounded worker pool executing sync instructions.
//! - **`store`**: the `BlockStore` capability with filesystem and memory backends.
//! - **`handlers`**: `PUT`/`GET /blocks/{id}`.
//! - **`protocol`**: the block payload and its encoding.

pub mod agent;
pub mod handlers;
pub mod protocol;
pub mod store;
pub mod sync;
