//! capstan runner
//!
//! Executes one job instance as an ordered sequence of host shell commands,
//! capturing redacted output for the run report.

pub mod executor;

pub use executor::{RunnerConfig, ShellExecutor};
