use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::PolicyConfig;
use crate::error::ConfigError;
use crate::planner::types::{Action, Op, StateSnapshot, ARG_PACKAGE};

/// Ordered: a stricter class compares greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyClass {
    Safe,
    ConfirmRequired,
    Blocked,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub class: SafetyClass,
    pub reason: Option<String>,
}

/// Static per-op table plus dynamic checks against the system snapshot.
#[derive(Debug, Clone)]
pub struct SafetyPolicy {
    overrides: BTreeMap<Op, SafetyClass>,
    critical_packages: BTreeSet<String>,
    critical_services: BTreeSet<String>,
}

impl Default for SafetyPolicy {
    fn default() -> Self {
        let config = PolicyConfig::default();
        Self {
            overrides: BTreeMap::new(),
            critical_packages: config.critical_packages.into_iter().collect(),
            critical_services: config.critical_services.into_iter().collect(),
        }
    }
}

impl SafetyPolicy {
    pub fn new(config: &PolicyConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            overrides: config.parsed_overrides()?,
            critical_packages: config.critical_packages.iter().cloned().collect(),
            critical_services: config.critical_services.iter().cloned().collect(),
        })
    }

    /// Independent actions do not halt the plan when they fail.
    pub fn is_independent(op: Op) -> bool {
        !matches!(op, Op::Update | Op::Rollback)
    }

    pub fn is_critical_package(&self, package: &str) -> bool {
        self.critical_packages.contains(package)
    }

    pub fn static_class(&self, action: &Action) -> SafetyClass {
        if let Some(class) = self.overrides.get(&action.op) {
            return *class;
        }
        match action.op {
            Op::Search | Op::ListGenerations | Op::ListInstalled | Op::Diff | Op::Install => SafetyClass::Safe,
            Op::Remove | Op::Rollback => SafetyClass::ConfirmRequired,
            Op::Update => match action.update_targets() {
                Some(targets) if targets.len() == 1 => SafetyClass::Safe,
                _ => SafetyClass::ConfirmRequired,
            },
        }
    }

    pub fn classify(&self, action: &Action, snapshot: &StateSnapshot) -> Classification {
        let mut class = self.static_class(action);
        let mut reason = None;

        if action.op == Op::Remove {
            if let Some(package) = action.arg(ARG_PACKAGE) {
                if self.is_critical_package(package) {
                    class = SafetyClass::Blocked;
                    reason = Some(format!("{} is a critical system package", package));
                } else {
                    for service in snapshot.services_of(package) {
                        if self.critical_services.contains(service) {
                            class = SafetyClass::Blocked;
                            reason = Some(format!(
                                "{} provides the running critical service {}",
                                package, service
                            ));
                            break;
                        }
                        class = class.max(SafetyClass::ConfirmRequired);
                        reason.get_or_insert_with(|| {
                            format!("removing {} stops the running service {}", package, service)
                        });
                    }
                }
            }
        }

        debug!(op = %action.op, ?class, "Action classified");
        Classification { class, reason }
    }

    /// Tags the action in place with its class, note and independence flag.
    pub fn apply(&self, action: &mut Action, snapshot: &StateSnapshot) {
        let Classification { class, reason } = self.classify(action, snapshot);
        action.safety_class = class;
        action.note = reason;
        action.independent = Self::is_independent(action.op);
    }
}
