//! Shell-based job execution on the host.

use async_trait::async_trait;
use capstan_core::context::JobContext;
use capstan_core::error::Result;
use capstan_core::instance::JobInstance;
use capstan_core::pipeline::{SecretReference, StepDefinition};
use capstan_core::ports::JobExecutor;
use capstan_core::report::{
    JobRecord, Outcome, OutputLine, OutputStream, StepOutcome, StepRecord,
};
use capstan_core::secrets::SecretStore;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Working directory for step commands.
    pub workspace: PathBuf,
    /// Shell binary used for `run` lines.
    pub shell: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            shell: "sh".to_string(),
        }
    }
}

/// Runs a job instance's steps strictly in order on the host, fail-fast.
///
/// Owns no shared state; everything it produces goes into the returned
/// record. Secret values are resolved at dispatch time and masked in every
/// captured line before it is stored.
pub struct ShellExecutor {
    secrets: Arc<dyn SecretStore>,
    config: RunnerConfig,
}

impl ShellExecutor {
    pub fn new(secrets: Arc<dyn SecretStore>, config: RunnerConfig) -> Self {
        Self { secrets, config }
    }

    async fn run_step(
        &self,
        instance: &JobInstance,
        step: &StepDefinition,
        ctx: &mut JobContext,
    ) -> StepRecord {
        let started_at = Utc::now();
        let mut record = StepRecord {
            name: step.name.clone(),
            outcome: StepOutcome::Failure,
            exit_code: None,
            lines: Vec::new(),
            started_at: Some(started_at),
            completed_at: None,
        };

        // Secrets resolve first so even a failing step's output is masked.
        let secret_env = match self.resolve_secrets(&step.secrets, ctx).await {
            Ok(env) => env,
            Err(missing) => {
                warn!(instance = %instance.id, step = %step.name, secret = %missing, "required secret missing");
                record.lines.push(diagnostic(format!(
                    "secret '{}' could not be resolved",
                    missing
                )));
                record.completed_at = Some(Utc::now());
                return record;
            }
        };

        let command = ctx.interpolate(&step.run);
        debug!(instance = %instance.id, step = %step.name, "spawning step command");

        let mut cmd = Command::new(&self.config.shell);
        cmd.arg("-c")
            .arg(&command)
            .current_dir(&self.config.workspace)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        for (key, value) in &ctx.variables {
            cmd.env(key, value);
        }
        for (key, value) in &step.variables {
            cmd.env(key, ctx.interpolate(value));
        }
        for (axis, value) in instance.coords() {
            cmd.env(JobContext::matrix_env_name(axis), value);
        }
        for (key, value) in &secret_env {
            cmd.env(key, value);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                record
                    .lines
                    .push(diagnostic(format!("failed to spawn: {}", err)));
                record.completed_at = Some(Utc::now());
                return record;
            }
        };

        // Readers collect per stream; lines are merged by timestamp below.
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let stdout_ctx = ctx.clone();
        let stdout_handle = tokio::spawn(async move {
            collect_lines(stdout, OutputStream::Stdout, &stdout_ctx).await
        });
        let stderr_ctx = ctx.clone();
        let stderr_handle = tokio::spawn(async move {
            collect_lines(stderr, OutputStream::Stderr, &stderr_ctx).await
        });

        let wait = timeout(Duration::from_secs(step.timeout_seconds), child.wait()).await;
        if wait.is_err() {
            // Kill before awaiting the readers: they only return at pipe
            // EOF, which a hung child holding stdout open never produces.
            warn!(instance = %instance.id, step = %step.name, timeout_seconds = step.timeout_seconds, "step timed out");
            let _ = child.kill().await;
        }
        let mut lines = Vec::new();
        lines.extend(stdout_handle.await.unwrap_or_default());
        lines.extend(stderr_handle.await.unwrap_or_default());
        lines.sort_by_key(|line| line.timestamp);

        match wait {
            Ok(Ok(status)) => {
                let exit_code = status.code().unwrap_or(-1);
                record.exit_code = Some(exit_code);
                record.outcome = if status.success() {
                    StepOutcome::Success
                } else {
                    StepOutcome::Failure
                };
                record.lines = lines;
                info!(
                    instance = %instance.id,
                    step = %step.name,
                    exit_code,
                    "step finished"
                );
            }
            Ok(Err(err)) => {
                record.lines = lines;
                record
                    .lines
                    .push(diagnostic(format!("failed to wait for process: {}", err)));
            }
            Err(_) => {
                record.lines = lines;
                record.lines.push(diagnostic(format!(
                    "step timed out after {}s",
                    step.timeout_seconds
                )));
            }
        }

        record.completed_at = Some(Utc::now());
        record
    }

    /// Resolve secret references concurrently. Resolved values land both in
    /// the child environment map and in the context for redaction. Returns
    /// the name of the first missing required secret on failure.
    async fn resolve_secrets(
        &self,
        references: &[SecretReference],
        ctx: &mut JobContext,
    ) -> std::result::Result<HashMap<String, String>, String> {
        let lookups = references
            .iter()
            .map(|reference| async move {
                (reference, self.secrets.get(&reference.name).await)
            });

        let mut env = HashMap::new();
        for (reference, resolved) in join_all(lookups).await {
            match resolved {
                Ok(Some(value)) => {
                    ctx.secrets
                        .insert(reference.env_name().to_string(), value.clone());
                    env.insert(reference.env_name().to_string(), value);
                }
                Ok(None) | Err(_) if reference.required => {
                    return Err(reference.name.clone());
                }
                Ok(None) | Err(_) => {}
            }
        }
        Ok(env)
    }
}

#[async_trait]
impl JobExecutor for ShellExecutor {
    async fn run_job(
        &self,
        instance: &JobInstance,
        steps: &[StepDefinition],
        mut ctx: JobContext,
    ) -> Result<JobRecord> {
        let started_at = Utc::now();
        let mut records = Vec::with_capacity(steps.len());
        let mut failed = false;

        for step in steps {
            if failed {
                // Fail-fast: later steps never run once one has failed.
                records.push(StepRecord::skipped(&step.name));
                continue;
            }
            let record = self.run_step(instance, step, &mut ctx).await;
            failed = record.outcome == StepOutcome::Failure;
            records.push(record);
        }

        let outcome = if failed {
            Outcome::Failure
        } else {
            Outcome::Success
        };
        Ok(JobRecord {
            outcome,
            steps: records,
            started_at: Some(started_at),
            completed_at: Some(Utc::now()),
        })
    }
}

async fn collect_lines(
    stream: Option<impl AsyncRead + Unpin>,
    kind: OutputStream,
    ctx: &JobContext,
) -> Vec<OutputLine> {
    let Some(stream) = stream else {
        return Vec::new();
    };
    let mut collected = Vec::new();
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        collected.push(OutputLine {
            stream: kind,
            content: ctx.redact(&line),
            timestamp: Utc::now(),
        });
    }
    collected
}

fn diagnostic(content: String) -> OutputLine {
    OutputLine {
        stream: OutputStream::Stderr,
        content,
        timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capstan_core::ids::InstanceId;
    use capstan_core::pipeline::JobCondition;
    use capstan_core::secrets::StaticSecrets;

    fn executor(secrets: StaticSecrets) -> ShellExecutor {
        ShellExecutor::new(
            Arc::new(secrets),
            RunnerConfig {
                workspace: std::env::temp_dir(),
                shell: "sh".to_string(),
            },
        )
    }

    fn instance(coords: Vec<(String, String)>) -> JobInstance {
        JobInstance {
            id: InstanceId::new("job", coords),
            needs: vec![],
            condition: JobCondition::OnSuccess,
            variables: HashMap::new(),
            steps: vec![],
        }
    }

    fn step(name: &str, run: &str) -> StepDefinition {
        StepDefinition {
            name: name.to_string(),
            run: run.to_string(),
            variables: HashMap::new(),
            secrets: vec![],
            condition: None,
            timeout_seconds: 10,
        }
    }

    fn stdout_of(record: &JobRecord, step_index: usize) -> Vec<&str> {
        record.steps[step_index]
            .lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stdout)
            .map(|l| l.content.as_str())
            .collect()
    }

    #[tokio::test]
    async fn successful_steps_run_in_order() {
        let exec = executor(StaticSecrets::new());
        let steps = vec![step("one", "echo first"), step("two", "echo second")];

        let record = exec
            .run_job(&instance(vec![]), &steps, JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(stdout_of(&record, 0), vec!["first"]);
        assert_eq!(stdout_of(&record, 1), vec!["second"]);
        assert_eq!(record.steps[1].exit_code, Some(0));
    }

    #[tokio::test]
    async fn job_fails_fast_on_first_failing_step() {
        let exec = executor(StaticSecrets::new());
        let steps = vec![
            step("bad", "exit 3"),
            step("never", "echo should-not-run"),
        ];

        let record = exec
            .run_job(&instance(vec![]), &steps, JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Failure);
        assert_eq!(record.steps[0].outcome, StepOutcome::Failure);
        assert_eq!(record.steps[0].exit_code, Some(3));
        assert_eq!(record.steps[1].outcome, StepOutcome::Skipped);
        assert!(record.steps[1].lines.is_empty());
    }

    #[tokio::test]
    async fn echoed_secret_values_are_redacted() {
        let mut secrets = StaticSecrets::new();
        secrets.insert("TOKEN", "S3CRET");
        let exec = executor(secrets);

        let mut s = step("leak", "echo token is $TOKEN; echo S3CRET >&2");
        s.secrets = vec![SecretReference {
            name: "TOKEN".to_string(),
            env: None,
            required: true,
        }];

        let record = exec
            .run_job(&instance(vec![]), &[s], JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Success);
        for line in &record.steps[0].lines {
            assert!(
                !line.content.contains("S3CRET"),
                "secret leaked: {}",
                line.content
            );
        }
        assert_eq!(stdout_of(&record, 0), vec!["token is ***"]);
    }

    #[tokio::test]
    async fn missing_required_secret_fails_the_step() {
        let exec = executor(StaticSecrets::new());
        let mut s = step("publish", "echo should-not-run");
        s.secrets = vec![SecretReference {
            name: "REGISTRY_TOKEN".to_string(),
            env: None,
            required: true,
        }];

        let record = exec
            .run_job(&instance(vec![]), &[s], JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Failure);
        assert_eq!(record.steps[0].exit_code, None);
        assert!(
            record.steps[0]
                .lines
                .iter()
                .any(|l| l.content.contains("REGISTRY_TOKEN"))
        );
    }

    #[tokio::test]
    async fn optional_missing_secret_is_ignored() {
        let exec = executor(StaticSecrets::new());
        let mut s = step("tolerant", "echo ok");
        s.secrets = vec![SecretReference {
            name: "OPTIONAL".to_string(),
            env: None,
            required: false,
        }];

        let record = exec
            .run_job(&instance(vec![]), &[s], JobContext::new())
            .await
            .unwrap();
        assert_eq!(record.outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn matrix_coordinates_reach_the_environment_and_interpolation() {
        let exec = executor(StaticSecrets::new());
        let coords = vec![("toolchain".to_string(), "stable".to_string())];

        let mut ctx = JobContext::new();
        ctx.matrix
            .insert("toolchain".to_string(), "stable".to_string());

        let s = step(
            "show",
            "echo env=$MATRIX_TOOLCHAIN interp=${{ matrix.toolchain }}",
        );
        let record = exec.run_job(&instance(coords), &[s], ctx).await.unwrap();

        assert_eq!(stdout_of(&record, 0), vec!["env=stable interp=stable"]);
    }

    #[tokio::test]
    async fn step_timeout_kills_the_command() {
        let exec = executor(StaticSecrets::new());
        // The child holds its stdout pipe open until it exits, so the only
        // way to finish quickly is an actual kill, not waiting for EOF.
        let mut s = step("slow", "sleep 30");
        s.timeout_seconds = 1;

        let start = std::time::Instant::now();
        let record = exec
            .run_job(&instance(vec![]), &[s], JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Failure);
        assert!(start.elapsed() < std::time::Duration::from_secs(5));
        assert!(
            record.steps[0]
                .lines
                .iter()
                .any(|l| l.content.contains("timed out"))
        );
    }

    #[tokio::test]
    async fn steps_share_the_workspace_directory() {
        let workspace = tempfile::tempdir().expect("tempdir");
        let exec = ShellExecutor::new(
            Arc::new(StaticSecrets::new()),
            RunnerConfig {
                workspace: workspace.path().to_path_buf(),
                shell: "sh".to_string(),
            },
        );
        let steps = vec![
            step("write", "echo artifact > out.txt"),
            step("read", "cat out.txt"),
        ];

        let record = exec
            .run_job(&instance(vec![]), &steps, JobContext::new())
            .await
            .unwrap();

        assert_eq!(record.outcome, Outcome::Success);
        assert_eq!(stdout_of(&record, 1), vec!["artifact"]);
    }

    #[tokio::test]
    async fn variables_are_injected_and_interpolated() {
        let exec = executor(StaticSecrets::new());

        let mut ctx = JobContext::new();
        ctx.variables
            .insert("profile".to_string(), "release".to_string());

        let mut s = step("show", "echo $profile ${{ profile }} $extra");
        s.variables
            .insert("extra".to_string(), "${{ profile }}-extra".to_string());

        let record = exec
            .run_job(&instance(vec![]), &[s], ctx)
            .await
            .unwrap();
        assert_eq!(
            stdout_of(&record, 0),
            vec!["release release release-extra"]
        );
    }
}
