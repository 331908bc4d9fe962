//! Runs an approved plan against the package-manager capability.
//!
//! Actions run strictly in order. Cancellation is observed only between
//! actions. Each action is bounded by its own timeout.

use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{CapabilityError, ErrorKind};
use crate::kernel::event::{ActionOutput, ActionStatus, ExecutionResult, Phase, ProgressEvent};
use crate::planner::types::{Action, Op, Plan, PlanKind, ARG_FROM, ARG_PACKAGE, ARG_QUERY, ARG_TO};
use crate::services::package_manager::{
    GenerationId, OperationHandle, OperationUpdate, PackageManager,
};

const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Progress(ProgressEvent),
    /// Always last; one result per action, in plan order.
    Completed(Vec<ExecutionResult>),
}

/// Stream of engine events for one plan run.
pub struct ExecutionStream {
    inner: ReceiverStream<EngineEvent>,
}

impl Stream for ExecutionStream {
    type Item = EngineEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl ExecutionStream {
    /// Drains the stream, discarding progress.
    pub async fn results(mut self) -> Vec<ExecutionResult> {
        while let Some(event) = self.next().await {
            if let EngineEvent::Completed(results) = event {
                return results;
            }
        }
        Vec::new()
    }
}

/// Compensation registered for an op, if any.
fn compensation_for(op: Op) -> Option<Op> {
    match op {
        Op::Update => Some(Op::Rollback),
        _ => None,
    }
}

pub struct ExecutionEngine {
    capability: Arc<dyn PackageManager>,
}

impl ExecutionEngine {
    pub fn new(capability: Arc<dyn PackageManager>) -> Self {
        Self { capability }
    }

    /// Panics if the plan is not an executable plan with well-formed actions.
    pub fn execute(&self, plan: Plan, cancel: CancellationToken) -> ExecutionStream {
        assert!(
            plan.kind == PlanKind::Execute,
            "only Execute plans reach the execution engine"
        );
        assert!(
            plan.actions.iter().all(Action::is_well_formed),
            "plan reached the execution engine with incomplete arguments"
        );

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let run = PlanRun {
            capability: Arc::clone(&self.capability),
            tx,
            cancel,
        };
        tokio::spawn(async move {
            let results = run.run(plan).await;
            let _ = run.tx.send(EngineEvent::Completed(results)).await;
        });

        ExecutionStream {
            inner: ReceiverStream::new(rx),
        }
    }
}

struct PlanRun {
    capability: Arc<dyn PackageManager>,
    tx: mpsc::Sender<EngineEvent>,
    cancel: CancellationToken,
}

/// What one capability call produced.
struct CallOutcome {
    generation: Option<GenerationId>,
    output: Option<ActionOutput>,
}

impl PlanRun {
    async fn run(&self, plan: Plan) -> Vec<ExecutionResult> {
        info!(plan_id = %plan.id, actions = plan.actions.len(), dry_run = plan.dry_run, "Plan execution started");

        let mut results = Vec::with_capacity(plan.actions.len());
        // Idempotency key -> generation the first successful run started from.
        let mut completed: HashMap<String, Option<GenerationId>> = HashMap::new();
        // Set once the plan halts; every later action is skipped with it.
        let mut halted: Option<Option<ErrorKind>> = None;
        let mut generation = plan.base_generation;

        for (index, action) in plan.actions.iter().enumerate() {
            if halted.is_none() && self.cancel.is_cancelled() {
                info!(plan_id = %plan.id, index, "Cancelled between actions");
                halted = Some(Some(ErrorKind::CancellationRequested));
            }
            if let Some(error_kind) = &halted {
                results.push(skipped(index, action, error_kind.clone(), generation));
                continue;
            }

            self.emit(index, Phase::Started, None, action.describe()).await;

            let result = if plan.dry_run {
                simulated(index, action, generation)
            } else if let Some(first_before) = completed.get(&action.idempotency_key) {
                // Same key already succeeded in this run: report, don't call.
                finished(index, action, ActionStatus::Success, None, 0, *first_before, generation)
            } else {
                self.run_action(index, action, generation).await
            };

            self.emit(index, Phase::Completed, Some(100.0), format!("{:?}", result.status))
                .await;

            match result.status {
                ActionStatus::Success => {
                    completed
                        .entry(action.idempotency_key.clone())
                        .or_insert(result.generation_before);
                    if result.generation_after.is_some() {
                        generation = result.generation_after;
                    }
                }
                ActionStatus::RolledBack | ActionStatus::Failed => {
                    if result.generation_after.is_some() {
                        generation = result.generation_after;
                    }
                    if !action.independent {
                        warn!(plan_id = %plan.id, index, op = %action.op, "Dependent action failed; halting plan");
                        halted = Some(None);
                    }
                }
                ActionStatus::SkippedDueToPriorFailure => {}
            }
            results.push(result);
        }

        info!(plan_id = %plan.id, results = results.len(), "Plan execution finished");
        results
    }

    async fn emit(&self, index: usize, phase: Phase, percent: Option<f32>, message: String) {
        let _ = self
            .tx
            .send(EngineEvent::Progress(ProgressEvent {
                action_index: index,
                phase,
                percent,
                message,
            }))
            .await;
    }

    async fn run_action(&self, index: usize, action: &Action, before: Option<GenerationId>) -> ExecutionResult {
        let started = Instant::now();
        let limit = Duration::from_millis(action.timeout_ms.max(1));
        let elapsed = |started: Instant| started.elapsed().as_millis() as u64;

        let outcome = tokio::time::timeout(limit, self.call(index, action)).await;
        match outcome {
            Err(_) => {
                warn!(index, op = %action.op, timeout_ms = action.timeout_ms, "Action timed out");
                finished(index, action, ActionStatus::Failed, Some(ErrorKind::Timeout), elapsed(started), before, None)
            }
            Ok(Ok(call)) => {
                let mut result = finished(
                    index,
                    action,
                    ActionStatus::Success,
                    None,
                    elapsed(started),
                    before,
                    call.generation.or(before),
                );
                result.output = call.output;
                result
            }
            Ok(Err(err)) => {
                warn!(index, op = %action.op, error = %err, "Capability error");
                let error_kind = Some(ErrorKind::from(&err));
                if err.is_interface() {
                    if let (Some(_), Some(target)) = (compensation_for(action.op), before) {
                        if let Some(restored) = self.compensate(index, action, target).await {
                            return finished(
                                index,
                                action,
                                ActionStatus::RolledBack,
                                error_kind,
                                elapsed(started),
                                before,
                                Some(restored),
                            );
                        }
                    }
                }
                finished(index, action, ActionStatus::Failed, error_kind, elapsed(started), before, None)
            }
        }
    }

    /// Exactly one compensating rollback. Returns the restored generation.
    async fn compensate(&self, index: usize, action: &Action, target: GenerationId) -> Option<GenerationId> {
        warn!(index, op = %action.op, target, "Compensating with rollback");
        self.emit(index, Phase::Progress, None, format!("rolling back to generation {}", target))
            .await;

        let limit = Duration::from_millis(action.timeout_ms.max(1));
        let attempt = async {
            let handle = self.capability.rollback(target).await?;
            self.drive(index, handle).await
        };
        match tokio::time::timeout(limit, attempt).await {
            Ok(Ok(generation)) => Some(generation.unwrap_or(target)),
            Ok(Err(err)) => {
                warn!(index, error = %err, "Compensation failed");
                None
            }
            Err(_) => {
                warn!(index, "Compensation timed out");
                None
            }
        }
    }

    async fn call(&self, index: usize, action: &Action) -> Result<CallOutcome, CapabilityError> {
        let cap = &self.capability;
        let mutation = |generation| CallOutcome {
            generation,
            output: None,
        };
        let data = |output| CallOutcome {
            generation: None,
            output: Some(output),
        };
        let arg = |key| action.arg(key).unwrap_or_default();
        let generation_arg = |key| arg(key).parse::<GenerationId>().unwrap_or_default();

        match action.op {
            Op::Install => {
                let handle = cap.install(arg(ARG_PACKAGE)).await?;
                self.drive(index, handle).await.map(mutation)
            }
            Op::Remove => {
                let handle = cap.remove(arg(ARG_PACKAGE)).await?;
                self.drive(index, handle).await.map(mutation)
            }
            Op::Update => {
                let targets = action.update_targets();
                let handle = cap.update(targets.as_deref()).await?;
                self.drive(index, handle).await.map(mutation)
            }
            Op::Rollback => {
                let generation = action.generation().unwrap_or_default();
                let handle = cap.rollback(generation).await?;
                self.drive(index, handle).await.map(mutation)
            }
            Op::ListGenerations => cap
                .list_generations()
                .await
                .map(|g| data(ActionOutput::Generations(g))),
            Op::ListInstalled => cap
                .snapshot()
                .await
                .map(|s| data(ActionOutput::Installed(s.installed.into_iter().collect()))),
            Op::Search => cap
                .search(arg(ARG_QUERY))
                .await
                .map(|p| data(ActionOutput::Packages(p))),
            Op::Diff => cap
                .diff(generation_arg(ARG_FROM), generation_arg(ARG_TO))
                .await
                .map(|c| data(ActionOutput::Changes(c))),
        }
    }

    /// Forwards progress until the operation finishes. A handle that closes
    /// without finishing is an interface error.
    async fn drive(&self, index: usize, mut handle: OperationHandle) -> Result<Option<GenerationId>, CapabilityError> {
        while let Some(update) = handle.next().await {
            match update {
                OperationUpdate::Progress { percent, message } => {
                    self.emit(index, Phase::Progress, percent, message).await;
                }
                OperationUpdate::Finished(result) => return result.map(|o| o.generation),
            }
        }
        Err(CapabilityError::Interface(
            "operation handle closed before completion".to_string(),
        ))
    }
}

fn finished(
    index: usize,
    action: &Action,
    status: ActionStatus,
    error_kind: Option<ErrorKind>,
    duration_ms: u64,
    before: Option<GenerationId>,
    after: Option<GenerationId>,
) -> ExecutionResult {
    ExecutionResult {
        action_index: index,
        op: action.op,
        args: action.args.clone(),
        status,
        error_kind,
        duration_ms,
        output: None,
        preview: None,
        generation_before: before,
        generation_after: after,
    }
}

fn skipped(index: usize, action: &Action, error_kind: Option<ErrorKind>, at: Option<GenerationId>) -> ExecutionResult {
    finished(index, action, ActionStatus::SkippedDueToPriorFailure, error_kind, 0, at, None)
}

fn simulated(index: usize, action: &Action, at: Option<GenerationId>) -> ExecutionResult {
    let mut result = finished(index, action, ActionStatus::Success, None, 0, at, at);
    result.preview = Some(format!("would {}", action.describe()));
    result
}
