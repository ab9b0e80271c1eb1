//! Command handlers.

use crate::commands::{EventArg, OutputFormat};
use capstan_core::event::Event;
use capstan_core::pipeline::PipelineDefinition;
use capstan_core::report::{Outcome, RunReport};
use capstan_core::secrets::{EnvSecrets, SecretStore, StaticSecrets};
use capstan_runner::{RunnerConfig, ShellExecutor};
use capstan_scheduler::{Scheduler, SchedulerConfig, TriggerEvaluator, validate_pipeline};
use console::style;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Validate a pipeline declaration.
pub fn validate(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    let definition = load_pipeline(path)?;

    let instances = validate_pipeline(&definition)?;
    println!(
        "{} Pipeline \"{}\" is valid",
        style("✓").green(),
        definition.name
    );
    println!(
        "  {} job templates, {} concrete instances",
        definition.jobs.len(),
        instances
    );
    Ok(())
}

pub struct RunArgs {
    pub pipeline: String,
    pub event: EventArg,
    pub git_ref: String,
    pub target_branch: Option<String>,
    pub action: String,
    pub max_parallel: Option<usize>,
    pub vars: Vec<(String, String)>,
    pub secrets: Vec<(String, String)>,
    pub workspace: Option<String>,
    pub no_trigger_check: bool,
    pub format: OutputFormat,
}

/// Run a pipeline for a simulated event and return the process exit code.
pub async fn run(args: RunArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let mut definition = load_pipeline(&args.pipeline)?;
    for (key, value) in args.vars {
        definition.variables.insert(key, value);
    }

    let event = match args.event {
        EventArg::Push => Event::push(&args.git_ref),
        EventArg::PullRequest => {
            let target = args.target_branch.as_deref().unwrap_or("main");
            Event::pull_request(&args.git_ref, target, &args.action)
        }
        EventArg::Manual => Event::manual(&args.git_ref),
    };

    if !args.no_trigger_check && !TriggerEvaluator::new().should_run(&definition, &event)? {
        println!(
            "{} No trigger rule matches {} for pipeline \"{}\"",
            style("-").dim(),
            style(event.ref_name()).bold(),
            definition.name
        );
        return Ok(0);
    }

    // Inline --secret pairs take over completely; otherwise secrets come
    // from the process environment by name.
    let secrets: Arc<dyn SecretStore> = if args.secrets.is_empty() {
        Arc::new(EnvSecrets::new())
    } else {
        Arc::new(StaticSecrets::from_map(args.secrets.into_iter().collect()))
    };

    let workspace = match args.workspace {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    let executor = ShellExecutor::new(
        secrets,
        RunnerConfig {
            workspace,
            shell: "sh".to_string(),
        },
    );
    let scheduler = Scheduler::new(
        Arc::new(executor),
        SchedulerConfig {
            max_parallel: args.max_parallel,
            ..SchedulerConfig::default()
        },
    );

    info!(pipeline = %definition.name, git_ref = %event.git_ref, "starting run");
    let report = scheduler.run(&definition, &event).await?;

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_summary(&report),
    }
    Ok(report.exit_code())
}

fn load_pipeline(path: &str) -> Result<PipelineDefinition, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read {path}: {e}"))?;
    let definition: PipelineDefinition = serde_yaml::from_str(&content)?;
    Ok(definition)
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "Run {} for pipeline {}",
        style(&report.run_id).dim(),
        style(&report.pipeline_name).bold()
    );

    for (id, record) in &report.jobs {
        let mark = match record.outcome {
            Outcome::Success => style("✓").green(),
            Outcome::Failure => style("✗").red(),
            Outcome::Skipped => style("-").dim(),
            Outcome::Cancelled => style("⊘").yellow(),
        };
        println!("  {} {}", mark, id);
        for step in &record.steps {
            println!(
                "      {} {} {}",
                style("·").dim(),
                step.name,
                match step.exit_code {
                    Some(code) => style(format!("(exit {code})")).dim().to_string(),
                    None => String::new(),
                }
            );
        }
    }

    let verdict = match report.overall() {
        Outcome::Success => style("success").green().bold(),
        _ => style("failure").red().bold(),
    };
    println!();
    println!("Overall: {}", verdict);
}
