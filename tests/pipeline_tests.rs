use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parlance::config::Config;
use parlance::entity::EntityKind;
use parlance::error::ErrorKind;
use parlance::kernel::event::{ActionStatus, TurnEvent};
use parlance::kernel::intent::Verb;
use parlance::outputs::BroadcastPublisher;
use parlance::planner::{Op, PlanKind};
use parlance::safety::GateDecision;
use parlance::services::package_manager::SimulatedPackageManager;
use parlance::Reactor;
use tokio_stream::StreamExt;

fn setup() -> (Arc<SimulatedPackageManager>, Reactor) {
    setup_with(Config::default(), SimulatedPackageManager::new())
}

fn setup_with(config: Config, capability: SimulatedPackageManager) -> (Arc<SimulatedPackageManager>, Reactor) {
    let capability = Arc::new(capability);
    let reactor = Reactor::new(config, capability.clone()).expect("default config is valid");
    (capability, reactor)
}

#[tokio::test]
async fn test_install_firefox_on_fresh_session() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "install firefox", None)
        .await
        .expect("turn completes");

    assert_eq!(outcome.verb, Verb::Command);
    assert_eq!(outcome.confidence, 1.0);
    assert_eq!(outcome.plan_kind, PlanKind::Execute);
    assert_eq!(outcome.decision, GateDecision::Execute);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].op, Op::Install);
    assert_eq!(outcome.results[0].args.get("package").map(String::as_str), Some("firefox"));
    assert_eq!(outcome.results[0].status, ActionStatus::Success);
    assert!(capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_turn_events_arrive_in_order() {
    let (_capability, reactor) = setup();

    let mut turn = reactor.submit_utterance("s1", "install htop", None);
    let mut events = Vec::new();
    while let Some(event) = turn.next().await {
        events.push(event);
    }

    assert!(matches!(events.first(), Some(TurnEvent::Interpreted { verb: Verb::Command, .. })));
    assert!(matches!(events.get(1), Some(TurnEvent::Preview { .. })));
    assert!(events[2..events.len() - 1]
        .iter()
        .all(|e| matches!(e, TurnEvent::Progress(_))));
    assert!(matches!(events.last(), Some(TurnEvent::Completed(_))));
}

#[tokio::test]
async fn test_remove_git_waits_for_confirmation() {
    let (capability, reactor) = setup();

    // 1. No approval: preview only
    let mut turn = reactor.submit_utterance("s1", "remove git", None);
    let mut preview = None;
    let mut outcome = None;
    while let Some(event) = turn.next().await {
        match event {
            TurnEvent::Preview { lines, requires_confirmation, .. } => {
                assert!(requires_confirmation);
                preview = Some(lines);
            }
            TurnEvent::Progress(_) => panic!("nothing may execute before confirmation"),
            TurnEvent::Completed(done) => outcome = Some(done),
            _ => {}
        }
    }
    let outcome = outcome.expect("turn completes");
    assert_eq!(outcome.decision, GateDecision::AwaitConfirmation);
    assert!(outcome.awaiting_confirmation());
    assert!(outcome.results.is_empty());
    assert!(preview.unwrap_or_default().iter().any(|l| l.contains("Remove git")));
    assert_eq!(capability.mutation_calls(), 0);
    assert!(capability.is_installed("git"));

    // 2. "yes" re-issues the pending intent with approval
    let confirmed = reactor
        .submit_and_wait("s1", "yes", None)
        .await
        .expect("turn completes");
    assert_eq!(confirmed.decision, GateDecision::Execute);
    assert_eq!(confirmed.results[0].op, Op::Remove);
    assert_eq!(confirmed.results[0].status, ActionStatus::Success);
    assert!(!capability.is_installed("git"));
}

#[tokio::test]
async fn test_explicit_approval_executes_immediately() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "remove git", Some(true))
        .await
        .expect("turn completes");

    assert_eq!(outcome.decision, GateDecision::Execute);
    assert_eq!(outcome.results[0].status, ActionStatus::Success);
    assert!(!capability.is_installed("git"));
}

#[tokio::test]
async fn test_confirmation_without_pending_is_a_no_op() {
    let (capability, reactor) = setup();

    let outcome = reactor.submit_and_wait("s1", "yes", None).await.expect("turn completes");
    assert_eq!(outcome.verb, Verb::Confirm);
    assert_eq!(outcome.plan_kind, PlanKind::NoOp);
    assert!(outcome.results.is_empty());
    assert_eq!(capability.mutation_calls(), 0);
}

#[tokio::test]
async fn test_pending_intent_does_not_outlive_the_next_turn() {
    let (capability, reactor) = setup();

    reactor.submit_and_wait("s1", "remove git", None).await.expect("turn completes");
    reactor.submit_and_wait("s1", "search for htop", None).await.expect("turn completes");
    let outcome = reactor.submit_and_wait("s1", "yes", None).await.expect("turn completes");

    assert_eq!(outcome.plan_kind, PlanKind::NoOp);
    assert!(capability.is_installed("git"));
}

#[tokio::test]
async fn test_install_the_first_one_after_a_suggestion() {
    let (capability, reactor) = setup();

    // 1. The session is shown [firefox, chromium, brave]
    let suggested = reactor
        .submit_and_wait("s1", "suggest a browser", None)
        .await
        .expect("turn completes");
    assert_eq!(suggested.plan_kind, PlanKind::Suggestion);
    assert_eq!(suggested.candidates, vec!["firefox", "chromium", "brave"]);
    let shown: Vec<&str> = suggested.focus.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(shown, vec!["firefox", "chromium", "brave"]);
    assert_eq!(capability.mutation_calls(), 0);

    // 2. "install the first one"
    let outcome = reactor
        .submit_and_wait("s1", "install the first one", None)
        .await
        .expect("turn completes");
    assert_eq!(outcome.verb, Verb::Command);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].args.get("package").map(String::as_str), Some("firefox"));
    assert_eq!(outcome.results[0].status, ActionStatus::Success);
    assert!(capability.is_installed("firefox"));
    assert!(!capability.is_installed("chromium"));
}

#[tokio::test]
async fn test_search_results_become_the_focus() {
    let (capability, reactor) = setup();

    reactor
        .submit_and_wait("s1", "search for editor", None)
        .await
        .expect("turn completes");
    let focus = reactor.focus_snapshot("s1").await;
    let shown: Vec<&str> = focus
        .iter()
        .filter(|e| e.kind == EntityKind::Package)
        .map(|e| e.id.as_str())
        .collect();
    assert_eq!(shown, vec!["emacs", "neovim", "vim", "vscode"]);

    reactor
        .submit_and_wait("s1", "install the second one", None)
        .await
        .expect("turn completes");
    assert!(capability.is_installed("neovim"));
}

#[tokio::test]
async fn test_undo_with_empty_history_explains_itself() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "undo that", None)
        .await
        .expect("turn completes");

    assert_eq!(outcome.verb, Verb::Undo);
    assert_eq!(outcome.plan_kind, PlanKind::NoOp);
    assert!(outcome.results.is_empty());
    assert!(outcome.preview_text.iter().any(|l| l.contains("nothing to undo")));
    assert_eq!(capability.mutation_calls(), 0);
}

#[tokio::test]
async fn test_undo_reverts_the_last_change() {
    let (capability, reactor) = setup();

    // 1. Change something
    reactor.submit_and_wait("s1", "install firefox", None).await.expect("turn completes");
    assert_eq!(capability.current_generation(), 3);

    // 2. Queries are not undoable
    reactor.submit_and_wait("s1", "list generations", None).await.expect("turn completes");

    // 3. Undo needs confirmation, then rolls back to the generation before the install
    let pending = reactor.submit_and_wait("s1", "undo that", None).await.expect("turn completes");
    assert_eq!(pending.decision, GateDecision::AwaitConfirmation);
    assert!(pending.preview_text[0].contains("install firefox"));

    let done = reactor.submit_and_wait("s1", "yes", None).await.expect("turn completes");
    assert_eq!(done.results[0].op, Op::Rollback);
    assert_eq!(done.results[0].status, ActionStatus::Success);
    assert_eq!(capability.current_generation(), 2);
    assert!(!capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_dry_run_request_never_mutates() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "preview remove git", None)
        .await
        .expect("turn completes");

    assert_eq!(outcome.decision, GateDecision::DryRun);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(outcome.results[0].preview.as_deref(), Some("would remove git"));
    assert_eq!(capability.mutation_calls(), 0);

    // A dry run is not something "undo" can revert.
    let undo = reactor.submit_and_wait("s1", "undo", None).await.expect("turn completes");
    assert_eq!(undo.plan_kind, PlanKind::NoOp);
}

#[tokio::test]
async fn test_global_dry_run_mode() {
    let mut config = Config::default();
    config.execution.dry_run = true;
    let (capability, reactor) = setup_with(config, SimulatedPackageManager::new());

    for utterance in ["install firefox", "update everything", "rollback to generation 1"] {
        let outcome = reactor
            .submit_and_wait("s1", utterance, Some(true))
            .await
            .expect("turn completes");
        assert_eq!(outcome.decision, GateDecision::DryRun, "utterance {:?}", utterance);
    }
    assert_eq!(capability.mutation_calls(), 0);
}

#[tokio::test]
async fn test_critical_package_is_blocked() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "remove systemd", Some(true))
        .await
        .expect("turn completes");

    assert_eq!(outcome.decision, GateDecision::Blocked);
    assert_eq!(outcome.blocked_reasons, vec!["systemd is a critical system package"]);
    assert!(outcome.results.is_empty());
    assert_eq!(capability.mutation_calls(), 0);
}

#[tokio::test]
async fn test_gibberish_clarifies_without_touching_the_system() {
    let (capability, reactor) = setup();

    let outcome = reactor
        .submit_and_wait("s1", "flibber the wotsit", None)
        .await
        .expect("turn completes");

    assert_eq!(outcome.verb, Verb::Clarify);
    assert_eq!(outcome.confidence, 0.0);
    assert_eq!(outcome.plan_kind, PlanKind::Clarification);
    assert!(outcome.results.is_empty());
    assert_eq!(capability.mutation_calls(), 0);
}

#[tokio::test]
async fn test_taught_alias_is_used_by_later_turns() {
    let (capability, reactor) = setup();

    let taught = reactor
        .submit_and_wait("s1", "when i say ff i mean firefox", None)
        .await
        .expect("turn completes");
    assert_eq!(taught.verb, Verb::Teach);

    // Learned aliases are shared across sessions.
    reactor.submit_and_wait("s2", "install ff", None).await.expect("turn completes");
    assert!(capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_turns_of_one_session_run_in_submission_order() {
    let (capability, reactor) = setup_with(
        Config::default(),
        SimulatedPackageManager::new().with_latency(Duration::from_millis(50)),
    );

    // 1. Submit both before awaiting either
    let first = reactor.submit_utterance("s1", "install firefox", None);
    let second = reactor.submit_utterance("s1", "remove it", Some(true));

    // 2. "it" can only mean firefox if the install ran first
    let second = second.outcome().await.expect("turn completes");
    let first = first.outcome().await.expect("turn completes");
    assert_eq!(first.results[0].status, ActionStatus::Success);
    assert_eq!(second.results[0].args.get("package").map(String::as_str), Some("firefox"));
    assert_eq!(second.results[0].status, ActionStatus::Success);
    assert!(!capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_cancel_skips_remaining_actions() {
    let (capability, reactor) = setup_with(
        Config::default(),
        SimulatedPackageManager::new().with_latency(Duration::from_millis(200)),
    );

    let mut turn = reactor.submit_utterance("s1", "install firefox, htop and tmux", None);
    let mut outcome = None;
    let mut cancelled = false;
    while let Some(event) = turn.next().await {
        match event {
            TurnEvent::Progress(_) if !cancelled => {
                cancelled = reactor.cancel("s1");
            }
            TurnEvent::Completed(done) => outcome = Some(done),
            _ => {}
        }
    }

    assert!(cancelled);
    let outcome = outcome.expect("turn completes");
    assert_eq!(outcome.results[0].status, ActionStatus::Success);
    for skipped in &outcome.results[1..] {
        assert_eq!(skipped.status, ActionStatus::SkippedDueToPriorFailure);
        assert_eq!(skipped.error_kind, Some(ErrorKind::CancellationRequested));
    }
    assert_eq!(capability.calls(Op::Install), 1);
    assert!(!reactor.cancel("s1"), "nothing left to cancel");
    assert_eq!(reactor.telemetry().turn_stats.cancelled, 1);
}

#[tokio::test]
async fn test_sessions_are_isolated() {
    let (_capability, reactor) = setup();

    reactor.submit_and_wait("alice", "suggest a browser", None).await.expect("turn completes");
    let outcome = reactor
        .submit_and_wait("bob", "install the first one", None)
        .await
        .expect("turn completes");

    assert_eq!(outcome.verb, Verb::Clarify, "bob's focus stack is empty");
    assert!(reactor.focus_snapshot("bob").await.is_empty());
    assert_eq!(reactor.focus_snapshot("alice").await.len(), 3);
}

#[tokio::test]
async fn test_publisher_sees_every_event() {
    let capability = Arc::new(SimulatedPackageManager::new());
    let publisher = Arc::new(BroadcastPublisher::new(64));
    let mut rx = publisher.subscribe();
    let reactor = Reactor::with_publisher(Config::default(), capability, publisher.clone())
        .expect("default config is valid");

    reactor.submit_and_wait("s1", "list generations", None).await.expect("turn completes");

    let mut kinds = Vec::new();
    while let Ok(published) = rx.try_recv() {
        assert_eq!(published.session_id, "s1");
        kinds.push(published.event);
    }
    assert!(matches!(kinds.first(), Some(TurnEvent::Interpreted { .. })));
    assert!(matches!(kinds.last(), Some(TurnEvent::Completed(_))));
}

#[tokio::test]
async fn test_idle_sessions_are_evicted() {
    let (_capability, reactor) = setup();

    reactor.submit_and_wait("s1", "help", None).await.expect("turn completes");
    assert_eq!(reactor.session_count(), 1);

    assert!(reactor.evict_idle(Utc::now()).is_empty(), "fresh sessions stay");
    let evicted = reactor.evict_idle(Utc::now() + chrono::Duration::hours(1));
    assert_eq!(evicted, vec!["s1".to_string()]);
    assert_eq!(reactor.session_count(), 0);
    assert_eq!(reactor.telemetry().sessions_evicted, 1);
}

#[tokio::test]
async fn test_telemetry_counts_turns() {
    let (_capability, reactor) = setup();

    reactor.submit_and_wait("s1", "install firefox", None).await.expect("turn completes");
    reactor.submit_and_wait("s1", "remove git", None).await.expect("turn completes");
    reactor.submit_and_wait("s1", "blargh wibble", None).await.expect("turn completes");

    let snapshot = reactor.telemetry();
    assert_eq!(snapshot.turn_stats.completed, 3);
    assert_eq!(snapshot.turn_stats.clarifications, 1);
    assert_eq!(snapshot.gate_stats.executed, 1);
    assert_eq!(snapshot.gate_stats.awaiting_confirmation, 1);
    assert_eq!(snapshot.action_stats.succeeded, 1);
    assert_eq!(snapshot.verb_counts.get(&Verb::Command), Some(&2));
}

#[tokio::test]
async fn test_undo_after_a_repeated_install_returns_to_the_start() {
    let (capability, reactor) = setup();

    // 1. The second firefox is answered from the first run
    let installed = reactor
        .submit_and_wait("s1", "install firefox and firefox", None)
        .await
        .expect("turn completes");
    assert_eq!(installed.results.len(), 2);
    assert_eq!(capability.calls(Op::Install), 1);
    assert_eq!(installed.results[1].generation_before, Some(2));
    assert_eq!(installed.results[1].generation_after, Some(3));

    // 2. Undo targets the generation before the install
    let pending = reactor.submit_and_wait("s1", "undo that", None).await.expect("turn completes");
    assert_eq!(pending.decision, GateDecision::AwaitConfirmation);
    assert!(pending.preview_text[0].contains("generation 2"), "{:?}", pending.preview_text);

    let done = reactor.submit_and_wait("s1", "yes", None).await.expect("turn completes");
    assert_eq!(done.results[0].op, Op::Rollback);
    assert_eq!(done.results[0].args.get("generation").map(String::as_str), Some("2"));
    assert_eq!(capability.current_generation(), 2);
    assert!(!capability.is_installed("firefox"));
}

#[tokio::test]
async fn test_change_that_kept_the_generation_is_not_undoable() {
    let (capability, reactor) = setup();

    // vim is already part of generation 2.
    let installed = reactor.submit_and_wait("s1", "install vim", None).await.expect("turn completes");
    assert_eq!(installed.results[0].status, ActionStatus::Success);
    assert_eq!(capability.current_generation(), 2);

    let undo = reactor.submit_and_wait("s1", "undo that", None).await.expect("turn completes");
    assert_eq!(undo.plan_kind, PlanKind::NoOp);
    assert!(undo.results.is_empty());
    assert_eq!(capability.calls(Op::Rollback), 0);
}

#[tokio::test]
async fn test_undo_is_a_no_op_when_already_back_on_the_old_generation() {
    let (capability, reactor) = setup();

    // 1. Install moves 2 -> 3, an explicit rollback moves back to 2
    reactor.submit_and_wait("s1", "install firefox", None).await.expect("turn completes");
    reactor.submit_and_wait("s2", "rollback to generation 2", Some(true)).await.expect("turn completes");
    assert_eq!(capability.current_generation(), 2);

    // 2. s1's last change started from generation 2, which is current
    let undo = reactor.submit_and_wait("s1", "undo that", None).await.expect("turn completes");
    assert_eq!(undo.plan_kind, PlanKind::NoOp);
    assert!(undo.preview_text.iter().any(|l| l.contains("already on generation 2")));
    assert_eq!(capability.calls(Op::Rollback), 1);
}

#[tokio::test]
async fn test_installed_packages_can_be_listed_and_referenced() {
    let (capability, reactor) = setup();

    let listed = reactor
        .submit_and_wait("s1", "What's installed?", None)
        .await
        .expect("turn completes");
    assert_eq!(listed.verb, Verb::Query);
    assert_eq!(listed.results[0].op, Op::ListInstalled);
    assert_eq!(capability.mutation_calls(), 0);

    let shown: Vec<&str> = listed.focus.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(
        shown,
        vec!["bash", "coreutils", "git", "glibc", "networkmanager", "nix", "openssh", "systemd", "vim"]
    );

    // 3. Ordinals index into the listing
    let removed = reactor
        .submit_and_wait("s1", "remove the last one", Some(true))
        .await
        .expect("turn completes");
    assert_eq!(removed.results[0].args.get("package").map(String::as_str), Some("vim"));
    assert!(!capability.is_installed("vim"));
}

#[tokio::test]
async fn test_cancel_typed_while_a_turn_streams() {
    let (capability, reactor) = setup_with(
        Config::default(),
        SimulatedPackageManager::new().with_latency(Duration::from_millis(200)),
    );

    // Input arrives from its own task, the way stdin does in the console
    let (tx, mut input) = tokio::sync::mpsc::channel::<String>(4);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        for line in ["search for htop", ":cancel"] {
            let _ = tx.send(line.to_string()).await;
        }
    });

    let mut turn = reactor.submit_utterance("s1", "install firefox, htop and tmux", None);
    let mut queued = Vec::new();
    let mut cancelled = false;
    let mut outcome = None;
    let mut input_open = true;
    loop {
        tokio::select! {
            event = turn.next() => match event {
                Some(TurnEvent::Completed(done)) => outcome = Some(done),
                Some(_) => {}
                None => break,
            },
            line = input.recv(), if input_open => match line.as_deref() {
                Some(":cancel") => cancelled = reactor.cancel("s1"),
                Some(other) => queued.push(other.to_string()),
                None => input_open = false,
            },
        }
    }

    assert!(cancelled);
    assert_eq!(queued, vec!["search for htop"]);
    let outcome = outcome.expect("turn completes");
    let last = outcome.results.last().expect("results");
    assert_eq!(last.status, ActionStatus::SkippedDueToPriorFailure);
    assert_eq!(last.error_kind, Some(ErrorKind::CancellationRequested));
    assert!(capability.calls(Op::Install) < 3);
    assert!(!capability.is_installed("tmux"));

    // The queued line runs once the cancelled turn is over
    let next = reactor
        .submit_and_wait("s1", &queued[0], None)
        .await
        .expect("turn completes");
    assert_eq!(next.verb, Verb::Query);
}
