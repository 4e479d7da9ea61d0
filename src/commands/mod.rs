//! Command implementations for the CLI
//!
//! - start: run the service
//! - test: validate configuration and print a summary
//! - config: show or validate the effective configuration

pub mod config;
pub mod start;
pub mod test;
