//! Concrete job instances produced by matrix expansion.

use crate::ids::InstanceId;
use crate::pipeline::{JobCondition, StepDefinition};
use std::collections::HashMap;

/// One concretization of a job template for one matrix coordinate.
///
/// Created during expansion, immutable afterwards; execution state lives in
/// the scheduler's graph, not here.
#[derive(Debug, Clone)]
pub struct JobInstance {
    pub id: InstanceId,
    /// Templates whose instances must all finish before this one starts.
    pub needs: Vec<String>,
    pub condition: JobCondition,
    /// Job-level variables merged over the pipeline's.
    pub variables: HashMap<String, String>,
    /// Full step sequence inherited from the template. The gate selects the
    /// subset that actually runs at dispatch time.
    pub steps: Vec<StepDefinition>,
}

impl JobInstance {
    /// Matrix coordinates in axis declaration order.
    pub fn coords(&self) -> &[(String, String)] {
        self.id.coords()
    }

    /// Whether the run-condition keeps this instance eligible after a
    /// non-success upstream outcome.
    pub fn runs_always(&self) -> bool {
        self.condition == JobCondition::Always
    }
}
