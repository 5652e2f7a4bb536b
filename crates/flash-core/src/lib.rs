//! # flash-core
//! Foundation types, covenant policies and collaborator traits for Ergo
//! pool and flash-loan transactions.

pub mod address;
pub mod constants;
pub mod covenant;
pub mod crypto;
pub mod error;
pub mod register;
pub mod traits;
pub mod types;
