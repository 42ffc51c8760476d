//! Core engine: scheduling behaviours against the consensus client and
//! timing them.

pub mod benchmark;
pub mod scheduler;

pub use benchmark::{BenchmarkRecord, BenchmarkTool};
pub use scheduler::{BehaviourScheduler, PeriodReport};
