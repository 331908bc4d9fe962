use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info};

use super::catalog::{CATEGORIES, PACKAGES};

/// Spans shorter than this are never fuzzy-matched.
const MIN_FUZZY_LEN: usize = 3;
/// Spans shorter than this match only within one edit, counting a swap of
/// adjacent letters as one edit.
const SHORT_SPAN_LEN: usize = 4;
const SHORT_SPAN_DISTANCE: usize = 1;
/// Radius used when collecting "did you mean" suggestions for a miss.
const SUGGESTION_DISTANCE: usize = 3;
const MAX_SUGGESTIONS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Exact { canonical: String },
    Fuzzy { canonical: String, distance: usize },
    Category { name: String, members: Vec<String> },
    /// Several names are equally close.
    Ambiguous { candidates: Vec<String> },
    Miss { suggestions: Vec<String> },
}

#[derive(Debug, Clone)]
struct Category {
    name: String,
    keywords: Vec<String>,
    members: Vec<String>,
}

/// Natural words -> canonical package names, plus category keywords.
///
/// The static vocabulary is immutable; learned aliases live in a concurrent
/// map so a single index can be shared by every session.
#[derive(Debug)]
pub struct EntityIndex {
    aliases: HashMap<String, String>,
    canonicals: BTreeSet<String>,
    categories: Vec<Category>,
    learned: DashMap<String, String>,
}

impl Default for EntityIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityIndex {
    pub fn new() -> Self {
        let mut aliases = HashMap::new();
        let mut canonicals = BTreeSet::new();
        for words in PACKAGES {
            canonicals.insert(words.canonical.to_string());
            aliases.insert(words.canonical.to_string(), words.canonical.to_string());
            for alias in words.aliases {
                aliases.insert(alias.to_string(), words.canonical.to_string());
            }
        }
        let categories = CATEGORIES
            .iter()
            .map(|c| Category {
                name: c.name.to_string(),
                keywords: c.keywords.iter().map(|k| k.to_string()).collect(),
                members: c.members.iter().map(|m| m.to_string()).collect(),
            })
            .collect();
        Self {
            aliases,
            canonicals,
            categories,
            learned: DashMap::new(),
        }
    }

    pub fn is_known(&self, canonical: &str) -> bool {
        self.canonicals.contains(canonical)
    }

    pub fn category_members(&self, name: &str) -> Option<Vec<String>> {
        self.categories
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.members.clone())
    }

    /// Exact alias, then an exact category keyword, then edit distance, then a
    /// category keyword contained in the span.
    ///
    /// A span that is exactly a category keyword ("browser") lists the
    /// category even when a package name is within edit distance.
    pub fn resolve(&self, span: &str, max_distance: usize) -> Lookup {
        let span = span.trim();
        if let Some(canonical) = self.exact(span) {
            return Lookup::Exact { canonical };
        }
        if let Some(category) = self.categories.iter().find(|c| c.keywords.iter().any(|k| k == span)) {
            return category_lookup(category);
        }
        if let Some(lookup) = self.fuzzy(span, max_distance) {
            return lookup;
        }
        if let Some(category) = self.contained_category(span) {
            return category_lookup(category);
        }
        Lookup::Miss {
            suggestions: self.suggestions(span),
        }
    }

    /// Records `alias` as another name for `canonical`. Returns the previous
    /// meaning if the alias was already learned.
    pub fn learn(&self, alias: &str, canonical: &str) -> Option<String> {
        let alias = alias.trim().to_lowercase();
        let previous = self.learned.insert(alias.clone(), canonical.to_string());
        info!(alias = %alias, canonical, "Alias learned");
        previous
    }

    /// Learned aliases, sorted by alias.
    pub fn learned(&self) -> Vec<(String, String)> {
        let mut learned: Vec<(String, String)> = self
            .learned
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        learned.sort();
        learned
    }

    fn exact(&self, span: &str) -> Option<String> {
        if let Some(canonical) = self.learned.get(span) {
            return Some(canonical.value().clone());
        }
        self.aliases.get(span).cloned()
    }

    fn fuzzy(&self, span: &str, max_distance: usize) -> Option<Lookup> {
        let len = span.chars().count();
        if len < MIN_FUZZY_LEN {
            return None;
        }
        let radius = if len < SHORT_SPAN_LEN {
            max_distance.min(SHORT_SPAN_DISTANCE)
        } else {
            max_distance
        };
        let scored = self.scored(span, radius);
        let best = scored.first()?.1;
        let winners: BTreeSet<String> = scored
            .iter()
            .filter(|(_, d)| *d == best)
            .map(|(c, _)| c.clone())
            .collect();
        debug!(span, distance = best, winners = winners.len(), "Fuzzy lookup");
        if winners.len() == 1 {
            let canonical = winners.into_iter().next()?;
            Some(Lookup::Fuzzy {
                canonical,
                distance: best,
            })
        } else {
            Some(Lookup::Ambiguous {
                candidates: winners.into_iter().collect(),
            })
        }
    }

    /// (canonical, distance) pairs within `radius`, closest first.
    fn scored(&self, span: &str, radius: usize) -> Vec<(String, usize)> {
        let learned = self.learned();
        let mut best: HashMap<String, usize> = HashMap::new();
        let pairs = self.aliases.iter().chain(learned.iter().map(|(a, c)| (a, c)));
        let short = span.chars().count() < SHORT_SPAN_LEN;
        for (alias, canonical) in pairs {
            let distance = if short {
                strsim::osa_distance(span, alias)
            } else {
                strsim::levenshtein(span, alias)
            };
            if distance <= radius {
                let entry = best.entry(canonical.clone()).or_insert(distance);
                *entry = (*entry).min(distance);
            }
        }
        let mut scored: Vec<(String, usize)> = best.into_iter().collect();
        scored.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        scored
    }

    fn contained_category(&self, span: &str) -> Option<&Category> {
        let padded = format!(" {} ", span);
        self.categories
            .iter()
            .flat_map(|c| c.keywords.iter().map(move |k| (c, k)))
            .filter(|(_, k)| padded.contains(&format!(" {} ", k)))
            .max_by_key(|(_, k)| k.len())
            .map(|(c, _)| c)
    }

    fn suggestions(&self, span: &str) -> Vec<String> {
        let len = span.chars().count();
        if len < MIN_FUZZY_LEN {
            return Vec::new();
        }
        let radius = if len < SHORT_SPAN_LEN {
            SHORT_SPAN_DISTANCE
        } else {
            SUGGESTION_DISTANCE
        };
        self.scored(span, radius)
            .into_iter()
            .take(MAX_SUGGESTIONS)
            .map(|(c, _)| c)
            .collect()
    }
}

fn category_lookup(category: &Category) -> Lookup {
    Lookup::Category {
        name: category.name.clone(),
        members: category.members.clone(),
    }
}
