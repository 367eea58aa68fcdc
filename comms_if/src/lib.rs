//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the AGV software: the
//! wire formats of the vision sensor and docking stations, the operator
//! telecommands, and the network plumbing used to carry them.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod tc;

/// Wire formats of the equipment the AGV talks to (vision sensor, docking stations)
pub mod eqpt;

/// Network module
pub mod net;
