//! Subcommand implementations

pub mod plan;
pub mod status;
pub mod ups;
pub mod validate;
