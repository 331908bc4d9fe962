use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::entity::EntityKind;
use crate::planner::types::Op;

pub const PARAM_APPROVED: &str = "approved";
pub const PARAM_NEEDS_DISAMBIGUATION: &str = "needsDisambiguation";
pub const PARAM_REASON: &str = "reason";
pub const PARAM_QUERY: &str = "query";
pub const PARAM_GENERATION: &str = "generation";
pub const PARAM_ALIAS: &str = "alias";
pub const PARAM_TOPIC: &str = "topic";
pub const PARAM_DRY_RUN: &str = "dryRun";
pub const PARAM_CATEGORY: &str = "category";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verb {
    Query,
    Command,
    Suggest,
    Confirm,
    Clarify,
    Teach,
    Undo,
}

/// Why an utterance became a Clarify intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClarifyReason {
    /// No rule matched.
    ParseFailure,
    /// A reference matched more than one thing.
    AmbiguousReference,
    /// A deictic with nothing to point at.
    UnresolvedReference,
    /// A name the index does not know.
    UnknownEntity,
    LowConfidence,
}

impl ClarifyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ClarifyReason::ParseFailure => "parse_failure",
            ClarifyReason::AmbiguousReference => "ambiguous_reference",
            ClarifyReason::UnresolvedReference => "unresolved_reference",
            ClarifyReason::UnknownEntity => "unknown_entity",
            ClarifyReason::LowConfidence => "low_confidence",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [
            ClarifyReason::ParseFailure,
            ClarifyReason::AmbiguousReference,
            ClarifyReason::UnresolvedReference,
            ClarifyReason::UnknownEntity,
            ClarifyReason::LowConfidence,
        ]
        .into_iter()
        .find(|r| r.as_str() == s)
    }
}

impl fmt::Display for ClarifyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a reference was turned into a canonical id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Exact,
    Fuzzy { distance: usize },
    Category { members: Vec<String> },
    Deictic { marker: String, focus_index: usize },
    /// Unknown to the index but shaped like a package name.
    Literal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityRef {
    Resolved {
        id: String,
        kind: EntityKind,
        via: Resolution,
    },
    Unresolved {
        marker: String,
        focus_index: Option<usize>,
    },
}

impl EntityRef {
    pub fn resolved(id: impl Into<String>, kind: EntityKind, via: Resolution) -> Self {
        EntityRef::Resolved {
            id: id.into(),
            kind,
            via,
        }
    }

    pub fn id(&self) -> Option<&str> {
        match self {
            EntityRef::Resolved { id, .. } => Some(id),
            EntityRef::Unresolved { .. } => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, EntityRef::Resolved { .. })
    }

    pub fn category_members(&self) -> Option<&[String]> {
        match self {
            EntityRef::Resolved {
                via: Resolution::Category { members },
                ..
            } => Some(members),
            _ => None,
        }
    }
}

/// Typed interpretation of one utterance. Never mutated after extraction;
/// approval produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub verb: Verb,
    pub op: Option<Op>,
    pub target_refs: Vec<EntityRef>,
    pub parameters: BTreeMap<String, String>,
    pub raw_text: String,
    pub confidence: f32,
}

impl Intent {
    pub fn new(verb: Verb, op: Option<Op>, raw_text: impl Into<String>) -> Self {
        Self {
            verb,
            op,
            target_refs: Vec::new(),
            parameters: BTreeMap::new(),
            raw_text: raw_text.into(),
            confidence: 1.0,
        }
    }

    pub fn clarify(raw_text: impl Into<String>, reason: ClarifyReason, candidates: &[String]) -> Self {
        let mut intent = Self::new(Verb::Clarify, None, raw_text);
        intent.confidence = 0.0;
        intent
            .parameters
            .insert(PARAM_REASON.to_string(), reason.as_str().to_string());
        if !candidates.is_empty() {
            intent
                .parameters
                .insert(PARAM_NEEDS_DISAMBIGUATION.to_string(), candidates.join(","));
        }
        intent
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.param(key) == Some("true")
    }

    pub fn is_approved(&self) -> bool {
        self.flag(PARAM_APPROVED)
    }

    pub fn with_approval(&self) -> Intent {
        let mut approved = self.clone();
        approved
            .parameters
            .insert(PARAM_APPROVED.to_string(), "true".to_string());
        approved
    }

    pub fn clarify_reason(&self) -> Option<ClarifyReason> {
        self.param(PARAM_REASON).and_then(ClarifyReason::parse)
    }

    pub fn disambiguation(&self) -> Vec<String> {
        self.param(PARAM_NEEDS_DISAMBIGUATION)
            .map(|s| s.split(',').filter(|c| !c.is_empty()).map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn all_resolved(&self) -> bool {
        self.target_refs.iter().all(EntityRef::is_resolved)
    }

    pub fn target_ids(&self) -> Vec<&str> {
        self.target_refs.iter().filter_map(EntityRef::id).collect()
    }
}
