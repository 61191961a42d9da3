//! Master Coordination Endpoint
//!
//! The request/response surface chunk agents talk to, plus the ingestion and
//! status entry points used by the upload front-end.
//!
//! ## Submodules
//! - **`coordinator`**: the `Master` object owning registry and engine, the
//!   health sweep and the repair worker pool.
//! - **`handlers`**: axum handlers mapping HTTP requests onto the coordinator.
//! - **`protocol`**: endpoint paths and wire DTOs.

pub mod coordinator;
pub mod handlers;
pub mod protocol;

#[cfg(test)]
mod tests;
