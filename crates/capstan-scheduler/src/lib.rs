//! Pipeline scheduling and orchestration for capstan.

pub mod gate;
pub mod graph;
pub mod matrix;
pub mod scheduler;
pub mod triggers;

pub use gate::Gate;
pub use graph::{GraphPolicy, InstanceGraph};
pub use matrix::MatrixExpander;
pub use scheduler::{Scheduler, SchedulerConfig, validate_pipeline};
pub use triggers::TriggerEvaluator;
