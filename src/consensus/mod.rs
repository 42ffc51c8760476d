//! Agreement primitives: the versioned shared store, the threshold vote
//! collector, and the in-process block delivery replicas vote through.

pub mod collector;
pub mod network;
pub mod store;
