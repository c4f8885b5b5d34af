//! CLI command implementations

pub mod fleet;
pub mod host;
pub mod status;
