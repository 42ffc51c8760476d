//! Swapping agent, a replicated round-based swap agent.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod contracts;
pub mod consensus;
pub mod rounds;
pub mod strategy;
pub mod tx;
pub mod behaviours;
pub mod engine;
pub mod storage;
