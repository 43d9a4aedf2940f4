//! Transport abstractions for DTPC.
//!
//! The engine only depends on the bundle-oriented [`adapter::BundleTransport`]
//! trait defined here. In-memory and lossy implementations back the tests and
//! the simulator.

pub mod adapter;
pub mod lossy;
