//! Interpolation and redaction context for job execution.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{\{\s*([^}]+?)\s*\}\}").expect("placeholder regex"))
}

/// Variables, matrix coordinates, and resolved secret values for one job
/// instance. Secrets are held here solely so output can be redacted; they
/// are never interpolated into command text.
#[derive(Debug, Clone, Default)]
pub struct JobContext {
    /// Pipeline, job, and step variables, merged in that order.
    pub variables: HashMap<String, String>,
    /// Matrix coordinate values for this instance.
    pub matrix: HashMap<String, String>,
    /// Resolved secret values, keyed by env name. Redaction input.
    pub secrets: HashMap<String, String>,
}

impl JobContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `${{ var }}` and `${{ matrix.axis }}` placeholders. Unknown
    /// names resolve to the empty string.
    pub fn interpolate(&self, input: &str) -> String {
        placeholder_re()
            .replace_all(input, |caps: &regex::Captures| {
                let expr = caps.get(1).map_or("", |m| m.as_str()).trim();
                if let Some(key) = expr.strip_prefix("matrix.") {
                    return self.matrix.get(key).cloned().unwrap_or_default();
                }
                self.variables.get(expr).cloned().unwrap_or_default()
            })
            .to_string()
    }

    /// Mask every known secret value in `input`. Applied to each output
    /// line before it is stored or displayed; this is a correctness
    /// property of the report, not cosmetics.
    pub fn redact(&self, input: &str) -> String {
        let mut output = input.to_string();
        for value in self.secrets.values() {
            if !value.is_empty() {
                output = output.replace(value, "***");
            }
        }
        output
    }

    /// Environment variable spelling of a matrix axis name.
    pub fn matrix_env_name(axis: &str) -> String {
        let upper: String = axis
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("MATRIX_{}", upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn interpolates_variables_and_matrix() {
        let mut ctx = JobContext::new();
        ctx.variables.insert("profile".to_string(), "release".to_string());
        ctx.matrix.insert("toolchain".to_string(), "stable".to_string());

        assert_eq!(
            ctx.interpolate("cargo +${{ matrix.toolchain }} build --profile ${{ profile }}"),
            "cargo +stable build --profile release"
        );
    }

    #[test]
    fn unknown_placeholders_become_empty() {
        let ctx = JobContext::new();
        assert_eq!(ctx.interpolate("x${{ nope }}y"), "xy");
    }

    #[test]
    fn redacts_all_secret_values() {
        let mut ctx = JobContext::new();
        ctx.secrets.insert("TOKEN".to_string(), "S3CRET".to_string());
        ctx.secrets.insert("OTHER".to_string(), "hunter2".to_string());

        let masked = ctx.redact("token=S3CRET pass=hunter2 S3CRET again");
        assert_eq!(masked, "token=*** pass=*** *** again");
    }

    #[test]
    fn matrix_env_name_spelling() {
        assert_eq!(JobContext::matrix_env_name("toolchain"), "MATRIX_TOOLCHAIN");
        assert_eq!(JobContext::matrix_env_name("node-version"), "MATRIX_NODE_VERSION");
    }
}
