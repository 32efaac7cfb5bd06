//! Subcommand implementations.
pub mod add_config;
pub mod build;
pub mod collect;
