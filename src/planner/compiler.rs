use tracing::info;

use crate::config::ExecutionConfig;
use crate::entity::EntityKind;
use crate::kernel::intent::types::{
    ClarifyReason, EntityRef, Intent, Verb, PARAM_ALIAS, PARAM_GENERATION, PARAM_QUERY, PARAM_TOPIC,
};
use crate::planner::types::{Action, Op, Plan, PlanKind, StateSnapshot, ARG_PACKAGE};
use crate::safety::policy::{SafetyClass, SafetyPolicy};

const HELP_LINES: &[&str] = &[
    "Things you can say:",
    "  install firefox / remove git / update everything",
    "  search for a text editor / list generations / what changed?",
    "  what is installed?",
    "  undo that / rollback to generation 3",
    "  install the first one (after a search)",
    "  when i say ff i mean firefox",
];

/// Pure `Intent` + `StateSnapshot` -> `Plan`.
pub struct PlanCompiler {
    policy: SafetyPolicy,
    execution: ExecutionConfig,
}

impl PlanCompiler {
    pub fn new(policy: SafetyPolicy, execution: ExecutionConfig) -> Self {
        Self { policy, execution }
    }

    pub fn policy(&self) -> &SafetyPolicy {
        &self.policy
    }

    /// Panics if the intent still holds an unresolved reference; the
    /// extractor turns those into Clarify intents.
    pub fn compile(&self, intent: &Intent, snapshot: &StateSnapshot) -> Plan {
        assert!(
            intent.all_resolved(),
            "unresolved entity reference reached the plan compiler"
        );

        let mut plan = match intent.verb {
            Verb::Command => self.command(intent, snapshot),
            Verb::Suggest => suggestion(intent),
            Verb::Undo => undo(snapshot),
            Verb::Query => query(intent, snapshot),
            Verb::Clarify => clarification(intent),
            Verb::Teach => teach(intent),
            Verb::Confirm => Plan::noop("There is nothing waiting for confirmation."),
        };

        plan.approved = intent.is_approved();
        plan.base_generation = snapshot.current_generation;

        for action in &mut plan.actions {
            self.policy.apply(action, snapshot);
            action.timeout_ms = self.execution.timeout_for(action.op).as_millis() as u64;
            // Suggested actions are offers; taking one is the user's call.
            if plan.kind == PlanKind::Suggestion {
                action.safety_class = action.safety_class.max(SafetyClass::ConfirmRequired);
            }
        }
        plan.refresh_confirmation();
        render_actions(&mut plan, snapshot);

        info!(
            plan_id = %plan.id,
            kind = ?plan.kind,
            actions = plan.actions.len(),
            requires_confirmation = plan.requires_confirmation,
            "Plan compiled"
        );
        plan
    }

    fn command(&self, intent: &Intent, snapshot: &StateSnapshot) -> Plan {
        let Some(op) = intent.op else {
            return Plan::noop("I understood a command but not what to do.");
        };

        let categories: Vec<&EntityRef> = intent
            .target_refs
            .iter()
            .filter(|r| r.category_members().is_some())
            .collect();
        if !categories.is_empty() {
            return match op {
                Op::Install => suggestion(intent),
                _ => category_clarification(op, &categories, snapshot),
            };
        }

        let packages: Vec<String> = intent
            .target_refs
            .iter()
            .filter_map(|r| match r {
                EntityRef::Resolved { id, kind: EntityKind::Package, .. } => Some(id.clone()),
                _ => None,
            })
            .collect();

        let mut plan = Plan::new(PlanKind::Execute);
        match op {
            Op::Install | Op::Remove if packages.is_empty() => {
                return Plan::noop(format!("Which package should I {}?", op));
            }
            Op::Install => plan.actions = packages.iter().map(|p| Action::install(p)).collect(),
            Op::Remove => plan.actions = packages.iter().map(|p| Action::remove(p)).collect(),
            Op::Update => plan.actions.push(Action::update(&packages)),
            Op::Rollback => return rollback(intent, snapshot),
            Op::Search | Op::ListGenerations | Op::ListInstalled | Op::Diff => return query(intent, snapshot),
        }
        plan
    }
}

fn rollback(intent: &Intent, snapshot: &StateSnapshot) -> Plan {
    let target = intent
        .param(PARAM_GENERATION)
        .and_then(|g| g.parse::<u64>().ok())
        .or(snapshot.previous_generation);

    match target {
        None => Plan::noop("There is no earlier generation to roll back to."),
        Some(generation) if Some(generation) == snapshot.current_generation => {
            Plan::noop(format!("The system is already on generation {}.", generation))
        }
        Some(generation) => {
            let mut plan = Plan::new(PlanKind::Execute);
            plan.actions.push(Action::rollback(generation));
            plan
        }
    }
}

fn undo(snapshot: &StateSnapshot) -> Plan {
    let Some(last) = &snapshot.last_mutation else {
        return Plan::noop("There is nothing to undo yet: no change has been made in this conversation.");
    };
    let Some(generation) = last.generation_before else {
        return Plan::noop("I can't tell which generation came before the last change, so I can't undo it.");
    };
    if Some(generation) == snapshot.current_generation {
        return Plan::noop(format!(
            "The system is already on generation {}, where it was before the last change.",
            generation
        ));
    }

    let mut plan = Plan::new(PlanKind::Execute);
    let original = Action::new(last.op, last.args.clone());
    plan.preview_text
        .push(format!("Undo \"{}\" by returning to generation {}.", original.describe(), generation));
    plan.actions.push(Action::rollback(generation));
    plan
}

fn query(intent: &Intent, snapshot: &StateSnapshot) -> Plan {
    if intent.param(PARAM_TOPIC) == Some("help") {
        let mut plan = Plan::new(PlanKind::NoOp);
        plan.preview_text = HELP_LINES.iter().map(|l| l.to_string()).collect();
        return plan;
    }

    let mut plan = Plan::new(PlanKind::Execute);
    match intent.op {
        Some(Op::Search) => {
            let query = intent.param(PARAM_QUERY).unwrap_or_default();
            if query.is_empty() {
                return Plan::noop("What should I search for?");
            }
            plan.actions.push(Action::search(query));
        }
        Some(Op::ListGenerations) => plan.actions.push(Action::list_generations()),
        Some(Op::ListInstalled) => plan.actions.push(Action::list_installed()),
        Some(Op::Diff) => match (snapshot.previous_generation, snapshot.current_generation) {
            (Some(from), Some(to)) => plan.actions.push(Action::diff(from, to)),
            _ => return Plan::noop("There is only one generation, so nothing has changed yet."),
        },
        _ => return Plan::noop("I'm not sure what you want to know."),
    }
    plan
}

fn suggestion(intent: &Intent) -> Plan {
    let mut plan = Plan::new(PlanKind::Suggestion);
    for target in &intent.target_refs {
        match (target.category_members(), target) {
            (Some(members), EntityRef::Resolved { id, .. }) => {
                plan.preview_text
                    .push(format!("There are a few good options for a {}:", id));
                plan.candidates.extend(members.iter().cloned());
            }
            (None, EntityRef::Resolved { id, .. }) => plan.candidates.push(id.clone()),
            _ => {}
        }
    }
    plan.candidates.dedup();
    if plan.candidates.is_empty() {
        return Plan::noop("I don't have a suggestion for that.");
    }
    plan.actions = plan.candidates.iter().map(|c| Action::install(c)).collect();
    plan.preview_text
        .push("Say \"install the first one\" (or second, ...) to pick one.".to_string());
    plan
}

fn category_clarification(op: Op, categories: &[&EntityRef], snapshot: &StateSnapshot) -> Plan {
    let mut plan = Plan::new(PlanKind::Clarification);
    for category in categories {
        let members = category.category_members().unwrap_or_default();
        let installed: Vec<String> = members
            .iter()
            .filter(|m| snapshot.is_installed(m))
            .cloned()
            .collect();
        let pool = if installed.is_empty() { members.to_vec() } else { installed };
        plan.candidates.extend(pool);
    }
    plan.preview_text.push(format!(
        "Which one should I {}: {}?",
        op,
        plan.candidates.join(", ")
    ));
    plan
}

fn clarification(intent: &Intent) -> Plan {
    let mut plan = Plan::new(PlanKind::Clarification);
    plan.candidates = intent.disambiguation();
    let listed = plan.candidates.join(", ");
    let question = match intent.clarify_reason() {
        Some(ClarifyReason::AmbiguousReference) if !listed.is_empty() => {
            format!("Which one do you mean: {}?", listed)
        }
        Some(ClarifyReason::AmbiguousReference) | Some(ClarifyReason::UnresolvedReference) => {
            "I'm not sure what you are referring to. Could you name it?".to_string()
        }
        Some(ClarifyReason::UnknownEntity) if !listed.is_empty() => {
            format!("I don't know that package. Did you mean {}?", listed)
        }
        Some(ClarifyReason::UnknownEntity) => "I don't know a package by that name.".to_string(),
        Some(ClarifyReason::LowConfidence) if !listed.is_empty() => {
            format!("I'm not confident I understood. Did you mean {}?", listed)
        }
        _ => "Sorry, I didn't understand that. Try \"install firefox\" or \"help\".".to_string(),
    };
    plan.preview_text.push(question);
    plan
}

fn teach(intent: &Intent) -> Plan {
    match (intent.param(PARAM_ALIAS), intent.target_ids().first()) {
        (Some(alias), Some(target)) => {
            Plan::noop(format!("Got it: \"{}\" now means {}.", alias, target))
        }
        _ => Plan::noop("I couldn't work out what to remember."),
    }
}

/// Appends one preview line per action, after classification.
fn render_actions(plan: &mut Plan, snapshot: &StateSnapshot) {
    let mut lines = Vec::with_capacity(plan.actions.len() + 1);
    for (i, action) in plan.actions.iter().enumerate() {
        let mut line = format!("{}. {}", i + 1, capitalize(&action.describe()));
        if let Some(package) = action.arg(ARG_PACKAGE) {
            match action.op {
                Op::Install if snapshot.is_installed(package) => line.push_str(" (already installed)"),
                Op::Remove if !snapshot.is_installed(package) => line.push_str(" (not currently installed)"),
                _ => {}
            }
        }
        match action.safety_class {
            SafetyClass::Blocked => {
                line.push_str(" [blocked");
                if let Some(note) = &action.note {
                    line.push_str(": ");
                    line.push_str(note);
                }
                line.push(']');
            }
            SafetyClass::ConfirmRequired if plan.kind == PlanKind::Execute => {
                line.push_str(" [needs confirmation");
                if let Some(note) = &action.note {
                    line.push_str(": ");
                    line.push_str(note);
                }
                line.push(']');
            }
            _ => {}
        }
        lines.push(line);
    }
    if plan.kind == PlanKind::Execute && plan.requires_confirmation && !plan.approved {
        lines.push("Say \"yes\" to go ahead.".to_string());
    }
    plan.preview_text.extend(lines);
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
