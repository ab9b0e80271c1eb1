//! Trigger event description.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Manual,
}

/// Immutable description of the action that may start a pipeline run.
///
/// Created once per invocation and read-only thereafter. `git_ref` accepts
/// both full refs (`refs/heads/main`, `refs/tags/v1.2.3`) and short names;
/// pattern matching always sees the short name.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Event {
    pub kind: EventKind,
    pub git_ref: String,
    /// Branch a pull request targets. Only meaningful for PR events.
    #[serde(default)]
    pub target_branch: Option<String>,
    /// PR action, e.g. `opened` or `synchronize`.
    #[serde(default)]
    pub action: Option<String>,
}

impl Event {
    pub fn push(git_ref: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            git_ref: git_ref.into(),
            target_branch: None,
            action: None,
        }
    }

    pub fn pull_request(
        git_ref: impl Into<String>,
        target_branch: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            kind: EventKind::PullRequest,
            git_ref: git_ref.into(),
            target_branch: Some(target_branch.into()),
            action: Some(action.into()),
        }
    }

    pub fn manual(git_ref: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Manual,
            git_ref: git_ref.into(),
            target_branch: None,
            action: None,
        }
    }

    /// The short ref name, with any `refs/heads/` or `refs/tags/` prefix
    /// stripped.
    pub fn ref_name(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .or_else(|| self.git_ref.strip_prefix("refs/tags/"))
            .unwrap_or(&self.git_ref)
    }

    /// Whether the ref is explicitly a tag ref. Short names are treated as
    /// branch-like; only `refs/tags/` is definitive.
    pub fn is_tag_ref(&self) -> bool {
        self.git_ref.starts_with("refs/tags/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_name_strips_prefixes() {
        assert_eq!(Event::push("refs/heads/main").ref_name(), "main");
        assert_eq!(Event::push("refs/tags/v1.2.3").ref_name(), "v1.2.3");
        assert_eq!(Event::push("feature/foo").ref_name(), "feature/foo");
    }

    #[test]
    fn tag_refs_need_the_full_prefix() {
        assert!(Event::push("refs/tags/v1.0.0").is_tag_ref());
        assert!(!Event::push("v1.0.0").is_tag_ref());
    }
}
