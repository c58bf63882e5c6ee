//! core
//!
//! Core types and configuration for spindle.
//!
//! # Modules
//!
//! - [`types`] - Strong types: BranchName, Oid, RefName
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at compile time
//! - Config files are strict: unknown keys are rejected

pub mod config;
pub mod types;
