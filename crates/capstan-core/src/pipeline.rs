//! Pipeline declaration types.
//!
//! These types represent the user-authored pipeline YAML. They are consumed
//! by the engine, never produced by it, and are immutable at run time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub triggers: Vec<TriggerRule>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub jobs: Vec<JobDefinition>,
    /// Upper bound on concurrently running job instances.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_parallel() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TriggerRule {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    /// Branch patterns for push rules. Empty means any branch, unless tag
    /// patterns are declared, in which case branches match nothing.
    #[serde(default)]
    pub branches: Vec<String>,
    /// Tag patterns for push rules. Empty means tags never match.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Target-branch patterns for pull-request rules. Empty means any.
    #[serde(default)]
    pub target_branches: Vec<String>,
    /// PR actions for pull-request rules, e.g. `opened`. Empty means any.
    #[serde(default)]
    pub actions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    Push,
    PullRequest,
    Manual,
}

/// A named unit of work: ordered steps, matrix axes, declared dependencies,
/// and an optional run-condition. Authored statically.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobDefinition {
    pub name: String,
    /// Names of job templates whose every instance must finish first.
    #[serde(default)]
    pub needs: Vec<String>,
    #[serde(default)]
    pub condition: Option<JobCondition>,
    /// Matrix axes in declaration order. The expansion order, and therefore
    /// instance identity, follows this order.
    #[serde(default)]
    pub matrix: Vec<MatrixAxis>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<String>,
}

/// Run-condition for a whole job.
///
/// Authored either as a bare string (`condition: always`) or as a map
/// (`condition: { ref_matches: "v[0-9]+..." }`), so serde's externally
/// tagged enum encoding does not fit and the impls are written by hand.
#[derive(Debug, Clone, PartialEq, Eq, JsonSchema)]
pub enum JobCondition {
    /// Run only when every dependency succeeded. The default.
    OnSuccess,
    /// Run whenever every dependency is terminal, however it ended.
    Always,
    /// Run only when the event ref matches the pattern; otherwise the job
    /// is recorded as skipped.
    RefMatches(String),
}

impl Default for JobCondition {
    fn default() -> Self {
        Self::OnSuccess
    }
}

impl Serialize for JobCondition {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            JobCondition::OnSuccess => serializer.serialize_str("on_success"),
            JobCondition::Always => serializer.serialize_str("always"),
            JobCondition::RefMatches(pattern) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("ref_matches", pattern)?;
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for JobCondition {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ConditionVisitor;

        impl<'de> serde::de::Visitor<'de> for ConditionVisitor {
            type Value = JobCondition;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("\"on_success\", \"always\", or a map with a \"ref_matches\" key")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<JobCondition, E> {
                match value {
                    "on_success" => Ok(JobCondition::OnSuccess),
                    "always" => Ok(JobCondition::Always),
                    other => Err(E::unknown_variant(
                        other,
                        &["on_success", "always", "ref_matches"],
                    )),
                }
            }

            fn visit_map<A: serde::de::MapAccess<'de>>(
                self,
                mut map: A,
            ) -> Result<JobCondition, A::Error> {
                let Some(key) = map.next_key::<String>()? else {
                    return Err(serde::de::Error::invalid_length(0, &self));
                };
                if key != "ref_matches" {
                    return Err(serde::de::Error::unknown_field(&key, &["ref_matches"]));
                }
                let pattern: String = map.next_value()?;
                if map.next_key::<String>()?.is_some() {
                    return Err(serde::de::Error::custom(
                        "condition map takes a single ref_matches key",
                    ));
                }
                Ok(JobCondition::RefMatches(pattern))
            }
        }

        deserializer.deserialize_any(ConditionVisitor)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepDefinition {
    pub name: String,
    /// Shell command line for this step.
    pub run: String,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    #[serde(default)]
    pub secrets: Vec<SecretReference>,
    #[serde(default)]
    pub condition: Option<StepCondition>,
    #[serde(default = "default_step_timeout")]
    pub timeout_seconds: u64,
}

fn default_step_timeout() -> u64 {
    1800
}

/// Per-step ref condition. Lets one job carry alternative step subsets, a
/// real publish path on release tags and a dry-run path elsewhere, while
/// keeping a single graph node and a single reported outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct StepCondition {
    /// Run the step only when the event ref matches.
    #[serde(default)]
    pub if_ref: Option<String>,
    /// Run the step only when the event ref does not match.
    #[serde(default)]
    pub unless_ref: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    /// Name looked up in the secret store.
    pub name: String,
    /// Environment variable the value is exposed as. Defaults to the name.
    #[serde(default)]
    pub env: Option<String>,
    /// Whether resolution failure fails the step.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl SecretReference {
    pub fn env_name(&self) -> &str {
        self.env.as_deref().unwrap_or(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_pipeline_parses() {
        let yaml = r#"
name: minimal
jobs:
  - name: build
    steps:
      - name: compile
        run: cargo build
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.name, "minimal");
        assert_eq!(def.max_parallel, 4);
        assert_eq!(def.jobs.len(), 1);
        assert!(def.jobs[0].needs.is_empty());
        assert_eq!(def.jobs[0].steps[0].timeout_seconds, 1800);
    }

    #[test]
    fn conditions_and_matrix_parse() {
        let yaml = r#"
name: release
triggers:
  - type: push
    tags: ["v[0-9]+.[0-9]+.[0-9]+"]
  - type: pull_request
    target_branches: [main, master]
    actions: [opened, synchronize]
jobs:
  - name: test
    matrix:
      - name: toolchain
        values: ["stable", "1.64.0"]
    steps:
      - name: unit
        run: cargo test
  - name: publish
    needs: [test]
    condition:
      ref_matches: "v[0-9]+.[0-9]+.[0-9]+"
    steps:
      - name: upload
        run: cargo publish
        secrets:
          - name: REGISTRY_TOKEN
        condition:
          if_ref: "v[0-9]+.[0-9]+.[0-9]+"
      - name: dry-run
        run: cargo publish --dry-run
        condition:
          unless_ref: "v[0-9]+.[0-9]+.[0-9]+"
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.triggers.len(), 2);
        assert_eq!(def.jobs[0].matrix[0].values.len(), 2);
        assert_eq!(
            def.jobs[1].condition,
            Some(JobCondition::RefMatches(
                "v[0-9]+.[0-9]+.[0-9]+".to_string()
            ))
        );
        let publish = &def.jobs[1];
        assert!(publish.steps[0].condition.as_ref().unwrap().if_ref.is_some());
        assert!(publish.steps[0].secrets[0].required);
        assert_eq!(publish.steps[0].secrets[0].env_name(), "REGISTRY_TOKEN");
    }

    #[test]
    fn unit_conditions_parse_as_strings() {
        let yaml = r#"
name: p
jobs:
  - name: cleanup
    needs: [build]
    condition: always
    steps:
      - name: sweep
        run: rm -rf target/tmp
  - name: build
    steps:
      - name: compile
        run: cargo build
"#;
        let def: PipelineDefinition = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(def.jobs[0].condition, Some(JobCondition::Always));
    }

    #[test]
    fn job_condition_forms_roundtrip_through_yaml() {
        for condition in [
            JobCondition::OnSuccess,
            JobCondition::Always,
            JobCondition::RefMatches("v[0-9]+.[0-9]+.[0-9]+".to_string()),
        ] {
            let yaml = serde_yaml::to_string(&condition).unwrap();
            let back: JobCondition = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(back, condition, "emitted YAML: {yaml}");
        }

        // The map form is what pipeline authors write.
        let parsed: JobCondition =
            serde_yaml::from_str("ref_matches: \"v[0-9]+.[0-9]+.[0-9]+\"").unwrap();
        assert_eq!(
            parsed,
            JobCondition::RefMatches("v[0-9]+.[0-9]+.[0-9]+".to_string())
        );
    }
}
