//! Gatekeeper - Request Admission Control
//!
//! This crate decides, for every incoming request, whether a client may
//! proceed. Clients are limited per minute and per day under an anonymous,
//! authenticated, or per-key custom tier, using fixed-window counters that
//! are safe to share across threads.

pub mod config;
pub mod error;
pub mod ratelimit;
pub mod replay;
pub mod simulate;
