use std::sync::Arc;
use std::time::Duration;

use parlance::error::ErrorKind;
use parlance::kernel::event::{ActionOutput, ActionStatus, Phase};
use parlance::kernel::executor::{EngineEvent, ExecutionEngine};
use parlance::planner::{Action, Op, Plan, PlanKind};
use parlance::services::package_manager::{Fault, SimulatedPackageManager};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

const TIMEOUT_MS: u64 = 5_000;

fn action(mut action: Action, independent: bool) -> Action {
    action.independent = independent;
    action.timeout_ms = TIMEOUT_MS;
    action
}

fn plan(actions: Vec<Action>) -> Plan {
    let mut plan = Plan::new(PlanKind::Execute);
    plan.actions = actions;
    plan.base_generation = Some(2);
    plan
}

fn setup() -> (Arc<SimulatedPackageManager>, ExecutionEngine) {
    let capability = Arc::new(SimulatedPackageManager::new());
    let engine = ExecutionEngine::new(capability.clone());
    (capability, engine)
}

#[tokio::test]
async fn test_install_succeeds_and_commits_a_generation() {
    let (capability, engine) = setup();

    let results = engine
        .execute(plan(vec![action(Action::install("firefox"), true)]), CancellationToken::new())
        .results()
        .await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, ActionStatus::Success);
    assert_eq!(results[0].op, Op::Install);
    assert_eq!(results[0].generation_before, Some(2));
    assert_eq!(results[0].generation_after, Some(3));
    assert!(capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_progress_precedes_completion() {
    let (_capability, engine) = setup();
    let mut stream = engine.execute(plan(vec![action(Action::install("htop"), true)]), CancellationToken::new());

    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }

    match events.first() {
        Some(EngineEvent::Progress(p)) => {
            assert_eq!(p.action_index, 0);
            assert_eq!(p.phase, Phase::Started);
        }
        other => panic!("expected a Started event first, got {:?}", other),
    }
    assert!(matches!(events.last(), Some(EngineEvent::Completed(_))));
    assert_eq!(
        events.iter().filter(|e| matches!(e, EngineEvent::Completed(_))).count(),
        1
    );
}

#[tokio::test]
async fn test_repeated_idempotency_key_calls_capability_once() {
    let (capability, engine) = setup();

    let results = engine
        .execute(
            plan(vec![
                action(Action::install("firefox"), true),
                action(Action::install("firefox"), true),
            ]),
            CancellationToken::new(),
        )
        .results()
        .await;

    assert!(results.iter().all(|r| r.status == ActionStatus::Success));
    assert_eq!(capability.calls(Op::Install), 1, "second action must not reach the capability");
}

#[tokio::test]
async fn test_repeated_key_reports_the_first_run_generations() {
    let (_capability, engine) = setup();

    let results = engine
        .execute(
            plan(vec![
                action(Action::install("firefox"), true),
                action(Action::install("firefox"), true),
            ]),
            CancellationToken::new(),
        )
        .results()
        .await;

    assert_eq!(results[0].generation_before, Some(2));
    assert_eq!(results[0].generation_after, Some(3));
    assert_eq!(results[1].generation_before, Some(2), "starts where the first run started");
    assert_eq!(results[1].generation_after, Some(3));
}

#[tokio::test]
async fn test_dependent_failure_skips_the_rest() {
    let (capability, engine) = setup();
    capability.inject_fault(Op::Update, None, Fault::Fail("build failed".to_string()));

    // 1. A ok, B fails (dependent), C must be skipped
    let results = engine
        .execute(
            plan(vec![
                action(Action::install("firefox"), true),
                action(Action::update(&["git".to_string()]), false),
                action(Action::install("htop"), true),
            ]),
            CancellationToken::new(),
        )
        .results()
        .await;

    assert_eq!(results[0].status, ActionStatus::Success);
    assert_eq!(results[1].status, ActionStatus::Failed);
    assert_eq!(
        results[1].error_kind,
        Some(ErrorKind::CapabilityError("operation failed: build failed".to_string()))
    );
    assert_eq!(results[2].status, ActionStatus::SkippedDueToPriorFailure);
    assert_eq!(results[2].op, Op::Install);
    assert_eq!(capability.calls(Op::Install), 1);
    assert!(!capability.is_installed("htop"));
}

#[tokio::test]
async fn test_independent_failure_continues() {
    let (capability, engine) = setup();

    let results = engine
        .execute(
            plan(vec![
                action(Action::install("not-a-real-package"), true),
                action(Action::install("htop"), true),
            ]),
            CancellationToken::new(),
        )
        .results()
        .await;

    assert_eq!(results[0].status, ActionStatus::Failed);
    assert!(matches!(results[0].error_kind, Some(ErrorKind::CapabilityError(_))));
    assert_eq!(results[1].status, ActionStatus::Success);
    assert!(capability.is_installed("htop"));
}

#[tokio::test]
async fn test_dry_run_never_mutates() {
    let (capability, engine) = setup();
    let mut dry = plan(vec![
        action(Action::install("firefox"), true),
        action(Action::remove("git"), true),
        action(Action::update(&[]), false),
        action(Action::rollback(1), false),
    ]);
    dry.dry_run = true;

    let results = engine.execute(dry, CancellationToken::new()).results().await;

    assert_eq!(capability.mutation_calls(), 0);
    assert_eq!(results.len(), 4);
    for result in &results {
        assert_eq!(result.status, ActionStatus::Success);
        assert!(result.preview.as_deref().unwrap_or_default().starts_with("would "));
    }
    assert_eq!(capability.current_generation(), 2);
}

#[tokio::test]
async fn test_cancellation_before_start_skips_everything() {
    let (capability, engine) = setup();
    let token = CancellationToken::new();
    token.cancel();

    let results = engine
        .execute(
            plan(vec![
                action(Action::install("firefox"), true),
                action(Action::install("htop"), true),
            ]),
            token,
        )
        .results()
        .await;

    assert_eq!(capability.mutation_calls(), 0);
    for result in &results {
        assert_eq!(result.status, ActionStatus::SkippedDueToPriorFailure);
        assert_eq!(result.error_kind, Some(ErrorKind::CancellationRequested));
    }
}

#[tokio::test]
async fn test_cancellation_is_observed_between_actions() {
    let capability = Arc::new(SimulatedPackageManager::new().with_latency(Duration::from_millis(200)));
    let engine = ExecutionEngine::new(capability.clone());
    let token = CancellationToken::new();

    let mut stream = engine.execute(
        plan(vec![
            action(Action::install("firefox"), true),
            action(Action::install("htop"), true),
        ]),
        token.clone(),
    );

    // 1. Cancel as soon as the first action starts
    let mut results = Vec::new();
    while let Some(event) = stream.next().await {
        match event {
            EngineEvent::Progress(p) if p.phase == Phase::Started => token.cancel(),
            EngineEvent::Completed(done) => results = done,
            _ => {}
        }
    }

    // 2. The running action finishes; the next one never starts
    assert_eq!(results[0].status, ActionStatus::Success);
    assert_eq!(results[1].status, ActionStatus::SkippedDueToPriorFailure);
    assert_eq!(results[1].error_kind, Some(ErrorKind::CancellationRequested));
    assert_eq!(capability.calls(Op::Install), 1);
}

#[tokio::test]
async fn test_hanging_action_times_out() {
    let (capability, engine) = setup();
    capability.inject_fault(Op::Install, Some("firefox"), Fault::Hang);

    let mut hang = action(Action::install("firefox"), true);
    hang.timeout_ms = 50;
    let results = engine
        .execute(plan(vec![hang, action(Action::install("htop"), true)]), CancellationToken::new())
        .results()
        .await;

    assert_eq!(results[0].status, ActionStatus::Failed);
    assert_eq!(results[0].error_kind, Some(ErrorKind::Timeout));
    assert_eq!(results[1].status, ActionStatus::Success, "independent action still runs");
}

#[tokio::test]
async fn test_interface_failure_during_update_is_rolled_back() {
    let (capability, engine) = setup();
    capability.inject_fault(Op::Update, None, Fault::Interface("daemon went away".to_string()));

    let results = engine
        .execute(plan(vec![action(Action::update(&[]), false)]), CancellationToken::new())
        .results()
        .await;

    assert_eq!(results[0].status, ActionStatus::RolledBack);
    assert!(matches!(results[0].error_kind, Some(ErrorKind::CapabilityError(_))));
    assert_eq!(results[0].generation_after, Some(2));
    assert_eq!(capability.current_generation(), 2, "compensating rollback restored generation 2");
    assert_eq!(capability.calls(Op::Rollback), 1);
}

#[tokio::test]
async fn test_queries_return_data() {
    let (_capability, engine) = setup();

    let results = engine
        .execute(
            plan(vec![
                action(Action::search("editor"), true),
                action(Action::list_generations(), true),
                action(Action::diff(1, 2), true),
            ]),
            CancellationToken::new(),
        )
        .results()
        .await;

    match &results[0].output {
        Some(ActionOutput::Packages(hits)) => {
            let names: Vec<&str> = hits.iter().map(|p| p.name.as_str()).collect();
            assert_eq!(names, vec!["emacs", "neovim", "vim", "vscode"]);
        }
        other => panic!("expected packages, got {:?}", other),
    }
    match &results[1].output {
        Some(ActionOutput::Generations(generations)) => {
            assert_eq!(generations.len(), 2);
            assert!(generations[1].current);
        }
        other => panic!("expected generations, got {:?}", other),
    }
    match &results[2].output {
        Some(ActionOutput::Changes(changes)) => {
            let names: Vec<&str> = changes.iter().map(|c| c.package.as_str()).collect();
            assert_eq!(names, vec!["git", "vim"]);
        }
        other => panic!("expected changes, got {:?}", other),
    }
}

#[tokio::test]
#[should_panic(expected = "only Execute plans")]
async fn test_non_execute_plan_is_rejected() {
    let (_capability, engine) = setup();
    let _ = engine.execute(Plan::new(PlanKind::NoOp), CancellationToken::new());
}
