use serde::{Deserialize, Serialize};

use crate::entity::EntityKind;

const MAX_ENTRIES: usize = 50;

/// One entity recently shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusEntry {
    pub id: String,
    pub kind: EntityKind,
    /// Entries pushed together (one listing) share a group.
    pub group: u64,
}

/// Short-term memory of recently presented entities, newest last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusStack {
    entries: Vec<FocusEntry>,
    next_group: u64,
}

impl FocusStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes one listing. Returns its group id, or `None` if `ids` was empty.
    pub fn push_group<I>(&mut self, kind: EntityKind, ids: I) -> Option<u64>
    where
        I: IntoIterator<Item = String>,
    {
        let group = self.next_group;
        let before = self.entries.len();
        self.entries
            .extend(ids.into_iter().map(|id| FocusEntry { id, kind, group }));
        if self.entries.len() == before {
            return None;
        }
        self.next_group += 1;
        if self.entries.len() > MAX_ENTRIES {
            let excess = self.entries.len() - MAX_ENTRIES;
            self.entries.drain(..excess);
        }
        Some(group)
    }

    pub fn entries(&self) -> &[FocusEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest group holding entries of `kind`, as (stack index, entry) in
    /// the order they were shown.
    pub fn latest_group(&self, kind: EntityKind) -> Vec<(usize, &FocusEntry)> {
        let group = match self
            .entries
            .iter()
            .rev()
            .find(|e| e.kind == kind)
            .map(|e| e.group)
        {
            Some(g) => g,
            None => return Vec::new(),
        };
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.group == group && e.kind == kind)
            .collect()
    }
}
