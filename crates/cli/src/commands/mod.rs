//! Subcommand implementations

pub mod ai;
pub mod chassis;
pub mod gpus;
pub mod status;
