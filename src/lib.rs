//! mongoprobe - MongoDB monitoring probe
//!
//! Runs diagnostic commands against MongoDB targets over cached,
//! TLS-aware connections.
//!
//! ## Layout
//!
//! - **config**: CLI arguments and the probe options file (timeout,
//!   keep-alive, named sessions)
//! - **conn**: connection identity, TLS posture resolution and the
//!   idle-evicting connection cache
//! - **target**: the capability seam handlers talk to, plus its
//!   driver-backed and in-memory implementations
//! - **metrics**: the request key table and parameter evaluation
//! - **handlers**: one stateless handler per metric key
//! - **probe**: the dispatcher gluing the above together

pub mod config;
pub mod conn;
pub mod handlers;
pub mod metrics;
pub mod probe;
pub mod target;
pub mod types;

pub use config::{Args, ProbeOptions};
pub use probe::Probe;
pub use types::{ProbeError, Result};
