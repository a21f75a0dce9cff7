//! CLI command implementations.

pub mod provision;
pub mod run;
pub mod status;
