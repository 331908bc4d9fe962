use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::entity::{EntityIndex, EntityKind};
use crate::error::ConfigError;
use crate::kernel::cancel::CancellationRegistry;
use crate::kernel::event::{ActionOutput, ActionStatus, ExecutionResult, TurnEvent, TurnOutcome};
use crate::kernel::executor::{EngineEvent, ExecutionEngine};
use crate::kernel::focus::FocusEntry;
use crate::kernel::intent::types::{Intent, Verb, PARAM_ALIAS, PARAM_APPROVED, PARAM_DRY_RUN};
use crate::kernel::intent::IntentExtractor;
use crate::kernel::state::{Environment, HistoryEntry, SessionContext, StateDelta};
use crate::kernel::telemetry::{TelemetryEvent, TelemetryRecorder, TelemetrySnapshot};
use crate::memory::SessionStore;
use crate::outputs::{NullPublisher, ResultPublisher};
use crate::planner::types::ARG_PACKAGE;
use crate::planner::{Op, PlanCompiler, StateSnapshot};
use crate::safety::{GateDecision, GateMode, SafetyGate, SafetyPolicy};
use crate::services::package_manager::PackageManager;

const TURN_EVENT_BUFFER: usize = 64;

/// Drives turns through extract -> compile -> gate -> execute and applies
/// the resulting deltas to the session. Cheap to clone.
#[derive(Clone)]
pub struct Reactor {
    inner: Arc<ReactorInner>,
}

struct ReactorInner {
    config: Config,
    index: Arc<EntityIndex>,
    extractor: IntentExtractor,
    compiler: PlanCompiler,
    gate: SafetyGate,
    engine: ExecutionEngine,
    capability: Arc<dyn PackageManager>,
    store: SessionStore,
    cancel_registry: CancellationRegistry,
    /// Completion signal of each session's newest queued turn.
    tails: DashMap<String, oneshot::Receiver<()>>,
    publisher: Arc<dyn ResultPublisher>,
    telemetry: Mutex<TelemetryRecorder>,
}

/// Events of one submitted turn: `Interpreted`, `Preview`, any `Progress`,
/// then one `Completed`.
pub struct TurnHandle {
    session_id: String,
    cancel: CancellationToken,
    events: ReceiverStream<TurnEvent>,
}

impl Stream for TurnHandle {
    type Item = TurnEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl TurnHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Cancels this turn, even while it is still queued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the stream. `None` if the turn died before completing.
    pub async fn outcome(mut self) -> Option<TurnOutcome> {
        while let Some(event) = self.events.next().await {
            if let TurnEvent::Completed(outcome) = event {
                return Some(outcome);
            }
        }
        None
    }
}

impl Reactor {
    pub fn new(config: Config, capability: Arc<dyn PackageManager>) -> Result<Self, ConfigError> {
        Self::with_publisher(config, capability, Arc::new(NullPublisher))
    }

    pub fn with_publisher(
        config: Config,
        capability: Arc<dyn PackageManager>,
        publisher: Arc<dyn ResultPublisher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let policy = SafetyPolicy::new(&config.policy)?;
        let index = Arc::new(EntityIndex::new());

        let inner = ReactorInner {
            extractor: IntentExtractor::new(Arc::clone(&index), config.extractor.clone()),
            compiler: PlanCompiler::new(policy, config.execution.clone()),
            gate: SafetyGate::new(),
            engine: ExecutionEngine::new(Arc::clone(&capability)),
            store: SessionStore::new(config.session.clone()),
            cancel_registry: CancellationRegistry::new(),
            tails: DashMap::new(),
            telemetry: Mutex::new(TelemetryRecorder::new()),
            index,
            capability,
            publisher,
            config,
        };
        info!("Reactor ready");
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Queues one turn. Turns of the same session run one at a time, in
    /// submission order; different sessions run concurrently.
    ///
    /// `approved` overrides the approval flag of the extracted intent.
    pub fn submit_utterance(&self, session_id: &str, text: &str, approved: Option<bool>) -> TurnHandle {
        let (tx, rx) = mpsc::channel(TURN_EVENT_BUFFER);
        let cancel = CancellationToken::new();

        // Taking the handle now keeps the session from eviction while queued.
        let session = self.inner.store.handle(session_id);
        let (done_tx, done_rx) = oneshot::channel();
        let previous = self.inner.tails.insert(session_id.to_string(), done_rx);

        let turn = Turn {
            inner: Arc::clone(&self.inner),
            session_id: session_id.to_string(),
            text: text.to_string(),
            approved,
            cancel: cancel.clone(),
            tx,
        };
        tokio::spawn(async move {
            if let Some(previous) = previous {
                // Err means the previous turn died; the queue moves on.
                let _ = previous.await;
            }
            let ctx = session.lock_owned().await;
            turn.run(ctx).await;
            let _ = done_tx.send(());
        });

        TurnHandle {
            session_id: session_id.to_string(),
            cancel,
            events: ReceiverStream::new(rx),
        }
    }

    pub async fn submit_and_wait(&self, session_id: &str, text: &str, approved: Option<bool>) -> Option<TurnOutcome> {
        self.submit_utterance(session_id, text, approved).outcome().await
    }

    /// Cancels the session's running turn between actions. Returns false if
    /// no turn was running.
    pub fn cancel(&self, session_id: &str) -> bool {
        self.inner.cancel_registry.cancel(session_id)
    }

    pub fn is_busy(&self, session_id: &str) -> bool {
        self.inner.cancel_registry.is_active(session_id)
    }

    pub async fn set_environment(&self, session_id: &str, environment: Environment) {
        let mut ctx = self.inner.store.acquire(session_id).await;
        ctx.reduce(StateDelta::EnvironmentChanged(environment));
        if ctx.is_private() {
            if let Err(err) = self.inner.store.discard(session_id) {
                warn!(session_id, error = %err, "Failed to discard session record");
            }
        } else if let Err(err) = self.inner.store.persist(&ctx) {
            warn!(session_id, error = %err, "Failed to persist session");
        }
    }

    pub async fn environment(&self, session_id: &str) -> Environment {
        self.inner.store.acquire(session_id).await.environment()
    }

    pub async fn focus_snapshot(&self, session_id: &str) -> Vec<FocusEntry> {
        self.inner.store.acquire(session_id).await.focus_snapshot()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.inner.recorder().snapshot()
    }

    pub fn index(&self) -> &EntityIndex {
        &self.inner.index
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn session_count(&self) -> usize {
        self.inner.store.len()
    }

    /// Evicts sessions idle past the TTL as of `now`.
    pub fn evict_idle(&self, now: DateTime<Utc>) -> Vec<String> {
        let evicted = self.inner.store.evict_idle(now);
        for id in &evicted {
            let store = &self.inner.store;
            self.inner.tails.remove_if(id, |id, _| !store.contains(id));
        }
        if !evicted.is_empty() {
            self.inner.recorder().record(TelemetryEvent::SessionsEvicted {
                count: evicted.len(),
            });
        }
        evicted
    }

    /// Periodic eviction until `shutdown` fires.
    pub fn spawn_sweeper(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let reactor = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        reactor.evict_idle(Utc::now());
                    }
                }
            }
        })
    }
}

impl ReactorInner {
    fn recorder(&self) -> std::sync::MutexGuard<'_, TelemetryRecorder> {
        self.telemetry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// One queued turn.
struct Turn {
    inner: Arc<ReactorInner>,
    session_id: String,
    text: String,
    approved: Option<bool>,
    cancel: CancellationToken,
    tx: mpsc::Sender<TurnEvent>,
}

impl Turn {
    async fn run(self, mut ctx: tokio::sync::OwnedMutexGuard<SessionContext>) {
        let started = Instant::now();
        let inner = &self.inner;
        let turn_id = Uuid::new_v4();
        inner
            .cancel_registry
            .activate(&self.session_id, turn_id, self.cancel.clone());

        // === 1. INTERPRET ===
        let intent = self.interpret(&ctx);
        inner.recorder().record(TelemetryEvent::IntentClassified {
            verb: intent.verb,
            op: intent.op,
        });
        if let Some(reason) = intent.clarify_reason() {
            inner.recorder().record(TelemetryEvent::Clarification { reason });
        }
        self.emit(TurnEvent::Interpreted {
            verb: intent.verb,
            op: intent.op,
            confidence: intent.confidence,
        })
        .await;

        if intent.verb == Verb::Teach {
            if let (Some(alias), Some(target)) = (intent.param(PARAM_ALIAS), intent.target_ids().first()) {
                inner.index.learn(alias, target);
            }
        }

        // === 2. SNAPSHOT ===
        let system = match inner.capability.snapshot().await {
            Ok(system) => system,
            Err(err) => {
                warn!(session_id = %self.session_id, error = %err, "Snapshot failed; planning against an empty system");
                Default::default()
            }
        };
        let snapshot = StateSnapshot::new(system, ctx.last_mutation());

        // === 3. PLAN + GATE ===
        let plan = inner.compiler.compile(&intent, &snapshot);
        let plan_id = plan.id;
        let plan_kind = plan.kind;
        let candidates = plan.candidates.clone();
        let preview_text = plan.preview_text.clone();
        let requires_confirmation = plan.requires_confirmation;
        let action_count = plan.actions.len();

        let mode = GateMode {
            dry_run: inner.config.execution.dry_run || intent.flag(PARAM_DRY_RUN),
        };
        let gated = inner.gate.gate(plan, mode);
        inner.recorder().record(TelemetryEvent::PlanGated {
            plan_id,
            kind: plan_kind,
            decision: gated.decision,
            actions: action_count,
            blocked: gated.blocked_reasons.len(),
        });

        // Preview always precedes execution.
        self.emit(TurnEvent::Preview {
            plan_id,
            lines: preview_text.clone(),
            requires_confirmation,
        })
        .await;

        // === 4. EXECUTE ===
        let mut results = Vec::new();
        let runs = matches!(gated.decision, GateDecision::Execute | GateDecision::DryRun);
        if runs && gated.approved.is_executable() {
            let mut stream = inner.engine.execute(gated.approved, self.cancel.clone());
            while let Some(event) = stream.next().await {
                match event {
                    EngineEvent::Progress(progress) => self.emit(TurnEvent::Progress(progress)).await,
                    EngineEvent::Completed(done) => results = done,
                }
            }
        }
        for result in &results {
            inner.recorder().record(TelemetryEvent::ActionFinished {
                plan_id,
                op: result.op,
                status: result.status,
                duration_ms: result.duration_ms,
            });
        }

        // === 5. REDUCE ===
        let mut deltas = Vec::new();
        if gated.decision == GateDecision::AwaitConfirmation {
            deltas.push(StateDelta::PendingSet(intent.clone()));
        } else {
            deltas.push(StateDelta::PendingCleared);
        }
        if !candidates.is_empty() {
            deltas.push(StateDelta::FocusPushed {
                kind: EntityKind::Package,
                ids: candidates.clone(),
            });
        }
        deltas.extend(focus_from_results(&results));
        deltas.push(StateDelta::TurnRecorded(HistoryEntry {
            intent: intent.clone(),
            plan_kind,
            results: results.clone(),
            at: Utc::now(),
        }));
        deltas.push(StateDelta::Touched(Utc::now()));
        for delta in deltas {
            ctx.reduce(delta);
        }

        // === 6. PERSIST ===
        if let Err(err) = inner.store.persist(&ctx) {
            warn!(session_id = %self.session_id, error = %err, "Failed to persist session");
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        if self.cancel.is_cancelled() {
            inner.recorder().record(TelemetryEvent::TurnCancelled { plan_id });
        }
        inner
            .recorder()
            .record(TelemetryEvent::TurnCompleted { plan_id, duration_ms });
        info!(
            session_id = %self.session_id,
            %plan_id,
            verb = ?intent.verb,
            decision = ?gated.decision,
            results = results.len(),
            duration_ms,
            "Turn completed"
        );

        // === 7. PUBLISH ===
        let outcome = TurnOutcome {
            session_id: self.session_id.clone(),
            plan_id,
            verb: intent.verb,
            confidence: intent.confidence,
            plan_kind,
            decision: gated.decision,
            preview_text,
            candidates,
            blocked_reasons: gated.blocked_reasons,
            results,
            focus: ctx.focus_snapshot(),
        };
        self.emit(TurnEvent::Completed(outcome)).await;
        inner.cancel_registry.finish(&self.session_id, turn_id);
    }

    /// Extraction plus the session-level rewrites: a confirmation re-issues
    /// the pending intent, and the caller's approval flag wins.
    fn interpret(&self, ctx: &SessionContext) -> Intent {
        let mut intent = self.inner.extractor.extract(&self.text, ctx);
        if intent.verb == Verb::Confirm {
            if let Some(pending) = ctx.pending() {
                info!(session_id = %self.session_id, "Confirming pending intent");
                intent = pending.with_approval();
            }
        }
        match self.approved {
            Some(true) => intent.with_approval(),
            Some(false) => {
                intent.parameters.remove(PARAM_APPROVED);
                intent
            }
            None => intent,
        }
    }

    async fn emit(&self, event: TurnEvent) {
        self.inner.publisher.publish(&self.session_id, &event);
        // A dropped handle does not stop the turn.
        let _ = self.tx.send(event).await;
    }
}

/// Entities a turn showed the user, one focus group per listing.
fn focus_from_results(results: &[ExecutionResult]) -> Vec<StateDelta> {
    let mut deltas = Vec::new();
    let touched: Vec<String> = results
        .iter()
        .filter(|r| r.status == ActionStatus::Success && matches!(r.op, Op::Install | Op::Remove))
        .filter_map(|r| r.args.get(ARG_PACKAGE).cloned())
        .collect();
    if !touched.is_empty() {
        deltas.push(StateDelta::FocusPushed {
            kind: EntityKind::Package,
            ids: touched,
        });
    }
    for output in results.iter().filter_map(|r| r.output.as_ref()) {
        let (kind, ids): (EntityKind, Vec<String>) = match output {
            ActionOutput::Packages(packages) => {
                (EntityKind::Package, packages.iter().map(|p| p.name.clone()).collect())
            }
            ActionOutput::Generations(generations) => (
                EntityKind::Generation,
                generations.iter().map(|g| g.id.to_string()).collect(),
            ),
            ActionOutput::Changes(changes) => {
                (EntityKind::Package, changes.iter().map(|c| c.package.clone()).collect())
            }
            ActionOutput::Installed(names) => (EntityKind::Package, names.clone()),
        };
        if !ids.is_empty() {
            deltas.push(StateDelta::FocusPushed { kind, ids });
        }
    }
    deltas
}
