//! CLI command implementations.

pub mod id;
pub mod records;
pub mod run;
