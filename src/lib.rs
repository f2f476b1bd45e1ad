//! Sendgate - Send-Admission Throttling
//!
//! This crate decides, for an outbound-messaging fleet composed of many
//! independent sending accounts, whether a given account may attempt
//! another send right now. It enforces a three-tier limit hierarchy
//! (per-account rate, per-account concurrency, fleet-wide rate and
//! concurrency) with race-free, non-blocking admission decisions.

pub mod config;
pub mod error;
pub mod throttle;
