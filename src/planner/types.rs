use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::safety::policy::SafetyClass;
use crate::services::package_manager::{GenerationId, SystemState};

pub const ARG_PACKAGE: &str = "package";
pub const ARG_PACKAGES: &str = "packages";
pub const ARG_GENERATION: &str = "generation";
pub const ARG_QUERY: &str = "query";
pub const ARG_FROM: &str = "from";
pub const ARG_TO: &str = "to";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Op {
    Install,
    Remove,
    Update,
    Rollback,
    ListGenerations,
    ListInstalled,
    Search,
    Diff,
}

impl Op {
    pub const ALL: [Op; 8] = [
        Op::Install,
        Op::Remove,
        Op::Update,
        Op::Rollback,
        Op::ListGenerations,
        Op::ListInstalled,
        Op::Search,
        Op::Diff,
    ];

    /// Ops that create or switch generations. Only these are undoable.
    pub fn is_mutating(self) -> bool {
        matches!(self, Op::Install | Op::Remove | Op::Update | Op::Rollback)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Op::Install => "install",
            Op::Remove => "remove",
            Op::Update => "update",
            Op::Rollback => "rollback",
            Op::ListGenerations => "list_generations",
            Op::ListInstalled => "list_installed",
            Op::Search => "search",
            Op::Diff => "diff",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Op {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Op::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| format!("unknown op '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub op: Op,
    pub args: BTreeMap<String, String>,
    pub safety_class: SafetyClass,
    pub idempotency_key: String,
    /// Failure of this action does not skip the ones after it.
    pub independent: bool,
    pub timeout_ms: u64,
    /// Why the policy escalated the class, if it did.
    pub note: Option<String>,
}

impl Action {
    pub fn new(op: Op, args: BTreeMap<String, String>) -> Self {
        let idempotency_key = idempotency_key(op, &args);
        Self {
            op,
            args,
            safety_class: SafetyClass::Safe,
            idempotency_key,
            independent: false,
            timeout_ms: 0,
            note: None,
        }
    }

    pub fn install(package: &str) -> Self {
        Self::new(Op::Install, single(ARG_PACKAGE, package))
    }

    pub fn remove(package: &str) -> Self {
        Self::new(Op::Remove, single(ARG_PACKAGE, package))
    }

    pub fn rollback(generation: GenerationId) -> Self {
        Self::new(Op::Rollback, single(ARG_GENERATION, &generation.to_string()))
    }

    /// Empty `packages` updates the whole system.
    pub fn update(packages: &[String]) -> Self {
        if packages.is_empty() {
            Self::new(Op::Update, BTreeMap::new())
        } else {
            Self::new(Op::Update, single(ARG_PACKAGES, &packages.join(",")))
        }
    }

    pub fn search(query: &str) -> Self {
        Self::new(Op::Search, single(ARG_QUERY, query))
    }

    pub fn list_generations() -> Self {
        Self::new(Op::ListGenerations, BTreeMap::new())
    }

    pub fn list_installed() -> Self {
        Self::new(Op::ListInstalled, BTreeMap::new())
    }

    pub fn diff(from: GenerationId, to: GenerationId) -> Self {
        let mut args = single(ARG_FROM, &from.to_string());
        args.insert(ARG_TO.to_string(), to.to_string());
        Self::new(Op::Diff, args)
    }

    pub fn arg(&self, key: &str) -> Option<&str> {
        self.args.get(key).map(String::as_str)
    }

    /// Update targets; `None` means the whole system.
    pub fn update_targets(&self) -> Option<Vec<String>> {
        self.arg(ARG_PACKAGES)
            .filter(|s| !s.is_empty())
            .map(|s| s.split(',').map(str::to_string).collect())
    }

    pub fn generation(&self) -> Option<GenerationId> {
        self.arg(ARG_GENERATION).and_then(|g| g.parse().ok())
    }

    /// Every argument the op needs is present and parseable.
    pub fn is_well_formed(&self) -> bool {
        match self.op {
            Op::Install | Op::Remove => self.arg(ARG_PACKAGE).map_or(false, |p| !p.is_empty()),
            Op::Update | Op::ListGenerations | Op::ListInstalled => true,
            Op::Rollback => self.generation().is_some(),
            Op::Search => self.arg(ARG_QUERY).is_some(),
            Op::Diff => {
                let parse = |k| self.arg(k).and_then(|v| v.parse::<GenerationId>().ok());
                parse(ARG_FROM).is_some() && parse(ARG_TO).is_some()
            }
        }
    }

    /// Short imperative description, e.g. "install firefox".
    pub fn describe(&self) -> String {
        match self.op {
            Op::Install => format!("install {}", self.arg(ARG_PACKAGE).unwrap_or("?")),
            Op::Remove => format!("remove {}", self.arg(ARG_PACKAGE).unwrap_or("?")),
            Op::Update => match self.update_targets() {
                Some(targets) => format!("update {}", targets.join(", ")),
                None => "update the whole system".to_string(),
            },
            Op::Rollback => format!(
                "roll back to generation {}",
                self.arg(ARG_GENERATION).unwrap_or("?")
            ),
            Op::ListGenerations => "list system generations".to_string(),
            Op::ListInstalled => "list installed packages".to_string(),
            Op::Search => format!("search for '{}'", self.arg(ARG_QUERY).unwrap_or("")),
            Op::Diff => format!(
                "compare generation {} with {}",
                self.arg(ARG_FROM).unwrap_or("?"),
                self.arg(ARG_TO).unwrap_or("?")
            ),
        }
    }
}

fn single(key: &str, value: &str) -> BTreeMap<String, String> {
    let mut args = BTreeMap::new();
    args.insert(key.to_string(), value.to_string());
    args
}

/// Deterministic key over op and arguments; equal actions share a key.
pub fn idempotency_key(op: Op, args: &BTreeMap<String, String>) -> String {
    let body = args
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",");
    format!("{}:{}", op, body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlanKind {
    /// Actions to run (subject to the gate).
    Execute,
    /// Candidate actions offered to the user; never executed.
    Suggestion,
    /// A question back to the user.
    Clarification,
    /// Nothing to do; the preview explains why.
    NoOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub id: Uuid,
    pub kind: PlanKind,
    pub actions: Vec<Action>,
    pub requires_confirmation: bool,
    pub preview_text: Vec<String>,
    /// Entities offered for the user's next turn (suggestions, disambiguation).
    pub candidates: Vec<String>,
    pub approved: bool,
    pub dry_run: bool,
    pub base_generation: Option<GenerationId>,
}

impl Plan {
    pub fn new(kind: PlanKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            actions: Vec::new(),
            requires_confirmation: false,
            preview_text: Vec::new(),
            candidates: Vec::new(),
            approved: false,
            dry_run: false,
            base_generation: None,
        }
    }

    pub fn noop(explanation: impl Into<String>) -> Self {
        let mut plan = Self::new(PlanKind::NoOp);
        plan.preview_text.push(explanation.into());
        plan
    }

    /// Re-derive `requires_confirmation` from the action classes.
    pub fn refresh_confirmation(&mut self) {
        self.requires_confirmation = self
            .actions
            .iter()
            .any(|a| a.safety_class == SafetyClass::ConfirmRequired);
    }

    pub fn is_executable(&self) -> bool {
        self.kind == PlanKind::Execute && !self.actions.is_empty()
    }
}

/// The most recent successful mutating action, as remembered by the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRecord {
    pub op: Op,
    pub args: BTreeMap<String, String>,
    pub generation_before: Option<GenerationId>,
}

/// Everything the compiler may read: the system as the capability reports it,
/// plus the session's undo anchor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub current_generation: Option<GenerationId>,
    pub previous_generation: Option<GenerationId>,
    pub installed: BTreeSet<String>,
    /// Running service -> package providing it.
    pub running_services: BTreeMap<String, String>,
    pub last_mutation: Option<MutationRecord>,
}

impl StateSnapshot {
    pub fn new(system: SystemState, last_mutation: Option<MutationRecord>) -> Self {
        Self {
            current_generation: system.current_generation,
            previous_generation: system.previous_generation,
            installed: system.installed,
            running_services: system.running_services,
            last_mutation,
        }
    }

    pub fn is_installed(&self, package: &str) -> bool {
        self.installed.contains(package)
    }

    /// Running services provided by `package`.
    pub fn services_of<'a>(&'a self, package: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.running_services
            .iter()
            .filter(move |(_, pkg)| pkg.as_str() == package)
            .map(|(svc, _)| svc.as_str())
    }
}
