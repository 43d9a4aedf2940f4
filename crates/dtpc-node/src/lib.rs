//! DTPC engine: aggregation, reliable delivery and in-order reassembly.
//!
//! State transitions are plain functions over [`state::EngineState`]; the
//! [`runtime::DtpcNode`] facade wires them to a transport and wake-up
//! signals, and [`service::Engine`] runs that facade on worker threads.

pub mod ack;
pub mod config;
pub mod delivery;
pub mod error;
pub mod events;
pub mod inbound;
pub mod outbound;
pub mod persistence;
pub mod profile;
pub mod runtime;
pub mod service;
pub mod signal;
pub mod state;
pub mod subscriptions;

#[cfg(test)]
pub(crate) mod testutil;
