//! Public API: the batcher facade, its data types, listeners, and errors.

pub mod batcher;
pub mod error;
pub mod listener;
pub mod types;
