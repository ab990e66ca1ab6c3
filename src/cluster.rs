//! Cluster-facing seams: consumed client interfaces and the host roster.

pub mod client;
pub mod roster;
