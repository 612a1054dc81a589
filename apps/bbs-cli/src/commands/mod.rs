//! Subcommand implementations

pub mod hooks;
pub mod replay;
pub mod repos;
pub mod serve;
