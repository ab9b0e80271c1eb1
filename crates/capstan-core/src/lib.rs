//! capstan core
//!
//! Shared vocabulary for the capstan pipeline engine: the pipeline
//! declaration, trigger events, ref patterns, run outcomes, and the ports
//! implemented by the scheduler and runner crates. This crate has minimal
//! dependencies and no I/O of its own.

pub mod context;
pub mod error;
pub mod event;
pub mod ids;
pub mod instance;
pub mod pattern;
pub mod pipeline;
pub mod ports;
pub mod report;
pub mod secrets;

pub use error::{ConfigError, Error, Result};
pub use ids::{InstanceId, RunId};
