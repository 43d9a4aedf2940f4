//! Two DTPC engines on a virtual clock, joined by a lossy in-memory link.

pub mod scenarios;
