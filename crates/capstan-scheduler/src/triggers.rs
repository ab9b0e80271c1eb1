//! Trigger evaluation: does this event start a run at all?

use capstan_core::error::ConfigError;
use capstan_core::event::{Event, EventKind};
use capstan_core::pattern::RefPattern;
use capstan_core::pipeline::{PipelineDefinition, TriggerKind, TriggerRule};

/// Pure, total trigger evaluation. Unmatched combinations do not run.
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Whether the pipeline should run for this event. Returns a boolean,
    /// never a count: a ref matching several patterns is one run.
    pub fn should_run(
        &self,
        pipeline: &PipelineDefinition,
        event: &Event,
    ) -> Result<bool, ConfigError> {
        if pipeline.triggers.is_empty() {
            // Default: branch pushes only. Tags and PRs must opt in.
            return Ok(event.kind == EventKind::Push && !event.is_tag_ref());
        }

        for rule in &pipeline.triggers {
            if self.rule_matches(rule, event)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn rule_matches(&self, rule: &TriggerRule, event: &Event) -> Result<bool, ConfigError> {
        match (rule.kind, event.kind) {
            (TriggerKind::Push, EventKind::Push) => self.push_matches(rule, event),
            (TriggerKind::PullRequest, EventKind::PullRequest) => self.pr_matches(rule, event),
            (TriggerKind::Manual, EventKind::Manual) => Ok(true),
            _ => Ok(false),
        }
    }

    fn push_matches(&self, rule: &TriggerRule, event: &Event) -> Result<bool, ConfigError> {
        let name = event.ref_name();

        // Explicit tag refs consult only the tag patterns. A bare ref is
        // indistinguishable from a tag name, so it consults them too.
        if any_match(&rule.tags, name)? {
            return Ok(true);
        }
        if event.is_tag_ref() {
            return Ok(false);
        }

        if rule.branches.is_empty() {
            // A rule that only names tags is a tag rule; it must not widen
            // into matching every branch push.
            return Ok(rule.tags.is_empty());
        }
        any_match(&rule.branches, name)
    }

    fn pr_matches(&self, rule: &TriggerRule, event: &Event) -> Result<bool, ConfigError> {
        let target = event.target_branch.as_deref().unwrap_or("");
        if !rule.target_branches.is_empty() && !any_match(&rule.target_branches, target)? {
            return Ok(false);
        }
        if !rule.actions.is_empty() {
            let action = event.action.as_deref().unwrap_or("");
            if !rule.actions.iter().any(|a| a == action) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Default for TriggerEvaluator {
    fn default() -> Self {
        Self::new()
    }
}

fn any_match(patterns: &[String], text: &str) -> Result<bool, ConfigError> {
    for pattern in patterns {
        if RefPattern::compile(pattern)?.matches(text) {
            return Ok(true);
        }
    }
    Ok(false)
}
