//! Rotate a delegate's forging duty across a pool of candidate nodes.
//!
//! Exactly one node in the pool should forge at any time. Each run of the [controller::Controller]
//! probes the active node, sweeps every other candidate for unexpected forging (double forging),
//! decides whether the active node must be replaced, and performs a two-node handover that is
//! rolled back (toggles and persisted state) if any step of the commit cannot be confirmed.
//!
//! # Components
//!
//! - [prober::Prober]: read-only, timeout-bounded queries that never fail the caller.
//! - [toggle::Toggler]: enables or disables forging and reports the node's confirmed state.
//! - [state::Store]: persists the [state::RotationState] with backup and restore.
//! - [selection::Policy]: picks a random replacement that clears a consensus threshold.
//! - [controller::Controller]: decides whether to rotate and drives the handover.
//!
//! The network is abstracted behind [transport::Transport] so that every component can be
//! exercised against [mocks::Network] without a live node.

pub mod config;
pub mod controller;
mod error;
pub use error::Error;
pub mod mocks;
pub mod node;
pub mod notify;
pub mod prober;
pub mod selection;
pub mod source;
pub mod state;
pub mod toggle;
pub mod transport;

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
