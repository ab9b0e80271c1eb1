//! Matrix expansion: one job template into its concrete instances.

use capstan_core::ids::InstanceId;
use capstan_core::instance::JobInstance;
use capstan_core::pipeline::JobDefinition;
use std::collections::HashMap;

/// Expands a template's matrix axes into the Cartesian product of job
/// instances. No side effects.
pub struct MatrixExpander;

impl MatrixExpander {
    pub fn new() -> Self {
        Self
    }

    /// Produce one instance per point of the matrix cross-product, in axis
    /// declaration order, so instance identities are deterministic across
    /// runs. A job without axes yields exactly one unparameterized instance.
    pub fn expand(
        &self,
        job: &JobDefinition,
        base_variables: &HashMap<String, String>,
    ) -> Vec<JobInstance> {
        let mut variables = base_variables.clone();
        variables.extend(job.variables.clone());

        self.combinations(job)
            .into_iter()
            .map(|coords| JobInstance {
                id: InstanceId::new(&job.name, coords),
                needs: job.needs.clone(),
                condition: job.condition.clone().unwrap_or_default(),
                variables: variables.clone(),
                steps: job.steps.clone(),
            })
            .collect()
    }

    fn combinations(&self, job: &JobDefinition) -> Vec<Vec<(String, String)>> {
        let mut combos: Vec<Vec<(String, String)>> = vec![Vec::new()];

        for axis in &job.matrix {
            let mut next = Vec::with_capacity(combos.len() * axis.values.len());
            for combo in &combos {
                for value in &axis.values {
                    let mut extended = combo.clone();
                    extended.push((axis.name.clone(), value.clone()));
                    next.push(extended);
                }
            }
            combos = next;
        }

        combos
    }
}

impl Default for MatrixExpander {
    fn default() -> Self {
        Self::new()
    }
}
