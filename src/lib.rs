//! Spindle - git-native state for stacked branches
//!
//! Spindle records which branches are stacked on which, and what is known
//! about each of them, inside the repository itself. All state lives as JSON
//! documents in a tree committed under `refs/spindle/data`, so it travels
//! with the repository and every change to it is a commit.
//!
//! # Architecture
//!
//! The codebase is layered:
//!
//! - [`cli`] - Command-line interface layer (parses args, calls the store)
//! - [`state`] - Typed state: repository info, the branch graph, transactions
//! - [`storage`] - Key-value storage with atomic multi-key updates
//! - [`git`] - Single interface for all Git object and ref operations
//! - [`forge`] - Code-hosting services that own a branch's change
//! - [`core`] - Strong types and configuration
//!
//! # Correctness Invariants
//!
//! 1. Every tracked branch reaches the trunk by following bases
//! 2. An update either lands completely or not at all
//! 3. Concurrent writers never lose each other's updates

pub mod cli;
pub mod core;
pub mod forge;
pub mod git;
pub mod state;
pub mod storage;
