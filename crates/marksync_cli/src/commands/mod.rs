//! CLI command implementations.

pub mod inspect_log;
pub mod simulate;
