//! The orchestration loop.
//!
//! One coordinating task owns the instance graph, so completion state has a
//! single writer; executors run in spawned tasks and own nothing shared
//! beyond their own record, which flows back through the JoinSet.

use crate::gate::Gate;
use crate::graph::{GraphPolicy, InstanceGraph};
use crate::matrix::MatrixExpander;

use capstan_core::context::JobContext;
use capstan_core::error::{ConfigError, Error, Result};
use capstan_core::event::Event;
use capstan_core::ids::{InstanceId, RunId};
use capstan_core::instance::JobInstance;
use capstan_core::pipeline::{PipelineDefinition, StepDefinition};
use capstan_core::ports::JobExecutor;
use capstan_core::report::{JobRecord, Outcome, RunReport};

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default)]
pub struct SchedulerConfig {
    /// Overrides the pipeline's declared `max_parallel` when set.
    pub max_parallel: Option<usize>,
    pub policy: GraphPolicy,
}

/// Per-instance dispatch decision, fixed before the first dispatch.
struct DispatchPlan {
    permitted: bool,
    steps: Vec<StepDefinition>,
}

pub struct Scheduler {
    executor: Arc<dyn JobExecutor>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(executor: Arc<dyn JobExecutor>, config: SchedulerConfig) -> Self {
        Self { executor, config }
    }

    /// Run the whole pipeline for one event and return the aggregated
    /// report. Configuration errors abort before any job is dispatched.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        event: &Event,
    ) -> Result<RunReport> {
        let started_at = chrono::Utc::now();
        let run_id = RunId::new();

        validate_jobs(definition)?;
        let instances = expand_all(definition);
        let mut graph = InstanceGraph::build(instances, self.config.policy)?;

        // Gate decisions depend only on declaration and event; evaluating
        // them all up front surfaces pattern errors with zero jobs executed.
        let gate = Gate::new(event);
        let mut plans: HashMap<InstanceId, DispatchPlan> = HashMap::new();
        for instance in graph.instances() {
            plans.insert(
                instance.id.clone(),
                DispatchPlan {
                    permitted: gate.permits(instance)?,
                    steps: gate.select_steps(instance)?,
                },
            );
        }

        let max_parallel = self
            .config
            .max_parallel
            .unwrap_or(definition.max_parallel)
            .max(1);

        info!(
            pipeline = %definition.name,
            run_id = %run_id,
            instances = graph.len(),
            max_parallel,
            "starting run"
        );

        let mut records: BTreeMap<InstanceId, JobRecord> = BTreeMap::new();
        let mut join_set: JoinSet<(InstanceId, Result<JobRecord>)> = JoinSet::new();
        // Join errors carry only the task id, so the instance must be
        // recoverable from it to give a crashed job a terminal state.
        let mut task_ids: HashMap<tokio::task::Id, InstanceId> = HashMap::new();

        loop {
            // Dispatch everything that is ready, skipping refused instances;
            // a skip is terminal and can unlock further instances, so loop
            // to a fixpoint.
            loop {
                let mut progressed = false;
                for id in graph.ready() {
                    // A skip earlier in this pass can cancel later entries
                    // of the same snapshot.
                    if !graph.is_pending(&id) {
                        continue;
                    }
                    let Some(plan) = plans.get(&id) else {
                        continue;
                    };
                    if !plan.permitted {
                        debug!(instance = %id, "run-condition false, skipping");
                        graph.mark_complete(&id, Outcome::Skipped);
                        records.insert(id, JobRecord::undispatched(Outcome::Skipped));
                        progressed = true;
                    } else if join_set.len() < max_parallel {
                        debug!(instance = %id, in_flight = join_set.len(), "dispatching");
                        graph.mark_dispatched(&id);
                        let executor = Arc::clone(&self.executor);
                        let instance = graph
                            .instance(&id)
                            .cloned()
                            .ok_or_else(|| Error::Internal(format!("lost instance {}", id)))?;
                        let steps = plan.steps.clone();
                        let ctx = job_context(&instance);
                        let handle = join_set.spawn(async move {
                            let record = executor.run_job(&instance, &steps, ctx).await;
                            (instance.id.clone(), record)
                        });
                        task_ids.insert(handle.id(), id);
                        progressed = true;
                    }
                }
                if !progressed {
                    break;
                }
            }

            if join_set.is_empty() {
                break;
            }

            if let Some(joined) = join_set.join_next_with_id().await {
                let (id, record) = match joined {
                    Ok((task_id, done)) => {
                        task_ids.remove(&task_id);
                        done
                    }
                    Err(err) => {
                        // A panicked executor task fails that job, not the
                        // whole scheduler; its node still goes terminal so
                        // dependents cancel and the report stays complete.
                        warn!(error = %err, "job task panicked");
                        match task_ids.remove(&err.id()) {
                            Some(id) => (id, Ok(JobRecord::undispatched(Outcome::Failure))),
                            None => continue,
                        }
                    }
                };
                let record = record.unwrap_or_else(|err| {
                    warn!(instance = %id, error = %err, "executor error");
                    JobRecord::undispatched(Outcome::Failure)
                });
                info!(instance = %id, outcome = ?record.outcome, "job finished");
                graph.mark_complete(&id, record.outcome);
                records.insert(id, record);
            }
        }

        // Instances that never dispatched (cancelled, or skipped upstream of
        // a failure) get their terminal outcome from the graph.
        for (id, outcome) in graph.outcomes() {
            records
                .entry(id)
                .or_insert_with(|| JobRecord::undispatched(outcome));
        }

        let report = RunReport {
            run_id,
            pipeline_name: definition.name.clone(),
            jobs: records,
            started_at,
            completed_at: chrono::Utc::now(),
        };
        info!(
            run_id = %run_id,
            overall = ?report.overall(),
            jobs = report.jobs.len(),
            "run complete"
        );
        Ok(report)
    }
}

fn job_context(instance: &JobInstance) -> JobContext {
    let mut ctx = JobContext::new();
    ctx.variables = instance.variables.clone();
    for (axis, value) in instance.coords() {
        ctx.matrix.insert(axis.clone(), value.clone());
    }
    ctx
}

fn validate_jobs(definition: &PipelineDefinition) -> std::result::Result<(), ConfigError> {
    if definition.jobs.is_empty() {
        return Err(ConfigError::EmptyPipeline);
    }
    let mut seen = HashSet::new();
    for job in &definition.jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(ConfigError::DuplicateJob(job.name.clone()));
        }
    }
    Ok(())
}

fn expand_all(definition: &PipelineDefinition) -> Vec<JobInstance> {
    let expander = MatrixExpander::new();
    definition
        .jobs
        .iter()
        .flat_map(|job| expander.expand(job, &definition.variables))
        .collect()
}

/// Static validation for `capstan validate`: declaration shape, every ref
/// pattern, matrix expansion, and graph construction. Returns the number of
/// concrete instances the pipeline would run.
pub fn validate_pipeline(
    definition: &PipelineDefinition,
) -> std::result::Result<usize, ConfigError> {
    use capstan_core::pattern::RefPattern;

    validate_jobs(definition)?;

    for rule in &definition.triggers {
        for pattern in rule
            .branches
            .iter()
            .chain(&rule.tags)
            .chain(&rule.target_branches)
        {
            RefPattern::compile(pattern)?;
        }
    }
    for job in &definition.jobs {
        if let Some(capstan_core::pipeline::JobCondition::RefMatches(pattern)) = &job.condition {
            RefPattern::compile(pattern)?;
        }
        for step in &job.steps {
            if let Some(condition) = &step.condition {
                for pattern in condition.if_ref.iter().chain(&condition.unless_ref) {
                    RefPattern::compile(pattern)?;
                }
            }
        }
    }

    let instances = expand_all(definition);
    let graph = InstanceGraph::build(instances, GraphPolicy::default())?;
    Ok(graph.len())
}
