//! CLI command definitions.

use clap::{Subcommand, ValueEnum};

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a pipeline declaration without running it
    Validate {
        /// Path to the pipeline file
        #[arg(default_value = "capstan.yaml")]
        path: String,
    },

    /// Run a pipeline for a simulated trigger event
    Run {
        /// Path to the pipeline file
        #[arg(short, long, default_value = "capstan.yaml")]
        pipeline: String,

        /// Event kind to simulate
        #[arg(short, long, value_enum, default_value_t = EventArg::Push)]
        event: EventArg,

        /// Git ref the event carries (e.g. refs/heads/main or v1.2.3)
        #[arg(short, long, default_value = "refs/heads/main")]
        git_ref: String,

        /// Target branch, for pull request events
        #[arg(long)]
        target_branch: Option<String>,

        /// Pull request action (opened, synchronize, ...)
        #[arg(long, default_value = "opened")]
        action: String,

        /// Override the pipeline's max_parallel
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Extra pipeline variables, KEY=VALUE, repeatable
        #[arg(long = "var", value_parser = parse_key_value)]
        vars: Vec<(String, String)>,

        /// Inline secret values, NAME=VALUE, repeatable. When absent,
        /// secrets resolve from the process environment instead.
        #[arg(long = "secret", value_parser = parse_key_value)]
        secrets: Vec<(String, String)>,

        /// Working directory for step commands
        #[arg(short, long)]
        workspace: Option<String>,

        /// Run the pipeline even if no trigger rule matches the event
        #[arg(long)]
        no_trigger_check: bool,

        /// Output format for the run report
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EventArg {
    Push,
    PullRequest,
    Manual,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => {
            Ok((key.to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
