//! Core DTPC primitives shared across crates.
//!
//! Includes the wide sequence counter, endpoint ids, identifier types, and
//! base errors.

pub mod eid;
pub mod error;
pub mod seq;
pub mod types;

pub use eid::{Eid, NULL_EID};
pub use error::DtpcError;
pub use seq::{SeqNo, ONE_GIG};
pub use types::{
    AduId, AggregatorId, DtnTime, EventId, ProfileId, TopicId, TransmitRef,
    DEFAULT_RECV_SERVICE, DEFAULT_SEND_SERVICE,
};
