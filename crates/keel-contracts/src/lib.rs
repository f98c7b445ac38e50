//! # keel-contracts
//!
//! Shared types and contracts for the keel policy engine.
//!
//! All crates in the workspace import from here. No evaluation logic lives in
//! this crate, only data definitions, resource accessors, and error types.

pub mod error;
pub mod generate;
pub mod patch;
pub mod policy;
pub mod resource;
pub mod response;
pub mod violation;
