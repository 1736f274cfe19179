//! Durable, lineage-tracked version store for PatternForge algorithms.

pub mod compare;
mod schema;
pub mod sessions;
pub mod store;
pub mod transfer;

pub use compare::*;
pub use store::*;
pub use transfer::*;
