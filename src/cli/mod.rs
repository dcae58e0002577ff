//! Command line interface module
//!
//! Argument parsing, the options derived from it, and the runner that loads
//! mappings and drives one mirror run.

pub mod args;
pub mod config;
pub mod runner;

pub use args::Args;
pub use config::{AuthConfig, MirrorOptions};
pub use runner::Runner;
