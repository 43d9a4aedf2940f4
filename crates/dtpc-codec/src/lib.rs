//! DTPC wire codec primitives.
//!
//! Defines SDNV integers, the aggregated ADU frame, the ACK frame, and the
//! tagged message type decoded once at the transport boundary.

pub mod ack;
pub mod adu;
pub mod error;
pub mod message;
pub mod sdnv;
