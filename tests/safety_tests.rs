use parlance::planner::{Action, Plan, PlanKind};
use parlance::safety::{GateDecision, GateMode, SafetyClass, SafetyGate};

fn execute_plan(actions: Vec<Action>) -> Plan {
    let mut plan = Plan::new(PlanKind::Execute);
    plan.actions = actions;
    plan.preview_text.push("preview".to_string());
    plan.refresh_confirmation();
    plan
}

fn with_class(mut action: Action, class: SafetyClass) -> Action {
    action.safety_class = class;
    action
}

#[test]
fn test_safe_plan_executes() {
    let plan = execute_plan(vec![Action::install("firefox")]);
    let outcome = SafetyGate::new().gate(plan, GateMode::default());

    assert_eq!(outcome.decision, GateDecision::Execute);
    assert_eq!(outcome.approved.actions.len(), 1);
    assert!(outcome.blocked_reasons.is_empty());
    assert!(!outcome.approved.dry_run);
}

#[test]
fn test_confirmation_needed_without_approval() {
    let plan = execute_plan(vec![with_class(Action::remove("git"), SafetyClass::ConfirmRequired)]);
    let outcome = SafetyGate::new().gate(plan, GateMode::default());

    assert_eq!(outcome.decision, GateDecision::AwaitConfirmation);
    assert!(outcome.approved.actions.is_empty(), "nothing is released for execution");
    assert_eq!(outcome.approved.preview_text, vec!["preview"], "preview survives");
}

#[test]
fn test_approved_plan_executes_confirm_required_actions() {
    let mut plan = execute_plan(vec![with_class(Action::remove("git"), SafetyClass::ConfirmRequired)]);
    plan.approved = true;
    let outcome = SafetyGate::new().gate(plan, GateMode::default());

    assert_eq!(outcome.decision, GateDecision::Execute);
    assert_eq!(outcome.approved.actions.len(), 1);
}

#[test]
fn test_dry_run_wins_over_confirmation() {
    let plan = execute_plan(vec![
        Action::install("firefox"),
        with_class(Action::remove("git"), SafetyClass::ConfirmRequired),
    ]);
    let outcome = SafetyGate::new().gate(plan, GateMode { dry_run: true });

    assert_eq!(outcome.decision, GateDecision::DryRun);
    assert!(outcome.approved.dry_run);
    assert_eq!(outcome.approved.actions.len(), 2);
}

#[test]
fn test_all_blocked_plan_is_blocked() {
    let mut blocked = with_class(Action::remove("glibc"), SafetyClass::Blocked);
    blocked.note = Some("glibc is a critical system package".to_string());
    let outcome = SafetyGate::new().gate(execute_plan(vec![blocked]), GateMode::default());

    assert_eq!(outcome.decision, GateDecision::Blocked);
    assert_eq!(outcome.blocked_reasons, vec!["glibc is a critical system package"]);
    assert!(outcome.approved.actions.is_empty());
}

#[test]
fn test_blocked_action_without_note_gets_a_reason() {
    let blocked = with_class(Action::remove("nix"), SafetyClass::Blocked);
    let outcome = SafetyGate::new().gate(execute_plan(vec![blocked]), GateMode::default());
    assert_eq!(outcome.blocked_reasons, vec!["remove nix is not allowed by policy"]);
}

#[test]
fn test_removing_blocked_action_recomputes_confirmation() {
    let plan = execute_plan(vec![
        with_class(Action::remove("systemd"), SafetyClass::Blocked),
        Action::install("htop"),
    ]);
    let outcome = SafetyGate::new().gate(plan, GateMode::default());

    assert_eq!(outcome.decision, GateDecision::Execute);
    assert!(!outcome.approved.requires_confirmation);
    assert_eq!(outcome.blocked_reasons.len(), 1);
}

#[test]
fn test_non_execute_plans_release_nothing() {
    for kind in [PlanKind::Suggestion, PlanKind::Clarification, PlanKind::NoOp] {
        let mut plan = Plan::new(kind);
        plan.actions.push(Action::install("firefox"));
        let outcome = SafetyGate::new().gate(plan, GateMode { dry_run: true });
        assert_eq!(outcome.decision, GateDecision::Nothing, "kind {:?}", kind);
        assert!(!outcome.approved.is_executable());
    }
}
