//! Domain layer types and invariants.

pub mod error;
pub mod filter;
pub mod meta;
pub mod posts;
pub mod similarity;
