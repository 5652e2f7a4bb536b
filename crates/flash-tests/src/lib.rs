//! Test doubles and integration suites for flash-loan transactions.
//!
//! The mock chain, deterministic compiler and policy checker live here so
//! that none of them ship in the core or wallet crates.

pub mod helpers;
