//! Conditional gating of jobs and step subsets.

use capstan_core::error::ConfigError;
use capstan_core::event::Event;
use capstan_core::instance::JobInstance;
use capstan_core::pattern::RefPattern;
use capstan_core::pipeline::{JobCondition, StepDefinition};

/// Evaluates run-conditions against the trigger event.
///
/// Both decisions depend only on declaration and event, so the scheduler
/// evaluates them for every instance before the first dispatch; a malformed
/// pattern therefore aborts the run with zero jobs executed.
pub struct Gate<'a> {
    event: &'a Event,
}

impl<'a> Gate<'a> {
    pub fn new(event: &'a Event) -> Self {
        Self { event }
    }

    /// Whether the instance may be dispatched at all. A refusal records the
    /// instance as skipped. Dependency outcomes are not consulted here;
    /// that is the graph's cancellation rule.
    pub fn permits(&self, instance: &JobInstance) -> Result<bool, ConfigError> {
        match &instance.condition {
            JobCondition::OnSuccess | JobCondition::Always => Ok(true),
            JobCondition::RefMatches(pattern) => {
                Ok(RefPattern::compile(pattern)?.matches(self.event.ref_name()))
            }
        }
    }

    /// The step subset that actually runs for this event. A publish job
    /// keeps one graph node and one outcome while running its real steps on
    /// a release tag and its dry-run steps everywhere else.
    pub fn select_steps(
        &self,
        instance: &JobInstance,
    ) -> Result<Vec<StepDefinition>, ConfigError> {
        let mut selected = Vec::with_capacity(instance.steps.len());
        for step in &instance.steps {
            if self.step_applies(step)? {
                selected.push(step.clone());
            }
        }
        Ok(selected)
    }

    fn step_applies(&self, step: &StepDefinition) -> Result<bool, ConfigError> {
        let Some(condition) = &step.condition else {
            return Ok(true);
        };
        let name = self.event.ref_name();

        if let Some(pattern) = &condition.if_ref
            && !RefPattern::compile(pattern)?.matches(name)
        {
            return Ok(false);
        }
        if let Some(pattern) = &condition.unless_ref
            && RefPattern::compile(pattern)?.matches(name)
        {
            return Ok(false);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::ids::InstanceId;
    use capstan_core::pipeline::StepCondition;
    use std::collections::HashMap;

    const VERSION_TAG: &str = "v[0-9]+.[0-9]+.[0-9]+";

    fn step(name: &str, condition: Option<StepCondition>) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            run: "true".to_string(),
            variables: HashMap::new(),
            secrets: vec![],
            condition,
            timeout_seconds: 60,
        }
    }

    fn publish_instance(condition: JobCondition) -> JobInstance {
        JobInstance {
            id: InstanceId::new("publish", vec![]),
            needs: vec!["test".to_string()],
            condition,
            variables: HashMap::new(),
            steps: vec![
                step("checkout", None),
                step(
                    "upload",
                    Some(StepCondition {
                        if_ref: Some(VERSION_TAG.to_string()),
                        unless_ref: None,
                    }),
                ),
                step(
                    "dry-run",
                    Some(StepCondition {
                        if_ref: None,
                        unless_ref: Some(VERSION_TAG.to_string()),
                    }),
                ),
            ],
        }
    }

    #[test]
    fn default_condition_always_permits() {
        let event = Event::push("refs/heads/main");
        let gate = Gate::new(&event);
        let instance = publish_instance(JobCondition::OnSuccess);
        assert!(gate.permits(&instance).unwrap());
    }

    #[test]
    fn ref_condition_gates_on_the_event_ref() {
        let instance = publish_instance(JobCondition::RefMatches(VERSION_TAG.to_string()));

        let tag = Event::push("refs/tags/v1.2.3");
        assert!(Gate::new(&tag).permits(&instance).unwrap());

        let branch = Event::push("refs/heads/main");
        assert!(!Gate::new(&branch).permits(&instance).unwrap());
    }

    #[test]
    fn tag_ref_selects_the_real_subset() {
        let event = Event::push("refs/tags/v1.2.3");
        let gate = Gate::new(&event);
        let steps = gate
            .select_steps(&publish_instance(JobCondition::OnSuccess))
            .unwrap();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["checkout", "upload"]);
    }

    #[test]
    fn other_refs_select_the_dry_run_subset() {
        let event = Event::push("refs/heads/main");
        let gate = Gate::new(&event);
        let steps = gate
            .select_steps(&publish_instance(JobCondition::OnSuccess))
            .unwrap();
        let names: Vec<&str> = steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["checkout", "dry-run"]);
    }

    #[test]
    fn malformed_condition_pattern_is_a_config_error() {
        let event = Event::push("main");
        let gate = Gate::new(&event);
        let instance = publish_instance(JobCondition::RefMatches("v[0-9".to_string()));
        assert!(matches!(
            gate.permits(&instance),
            Err(ConfigError::InvalidPattern { .. })
        ));
    }
}
