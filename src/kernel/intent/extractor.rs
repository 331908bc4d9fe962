use std::sync::Arc;
use tracing::debug;

use super::normalize::normalize;
use super::rules::{best_match, Slot};
use super::types::{
    ClarifyReason, EntityRef, Intent, Resolution, PARAM_ALIAS, PARAM_DRY_RUN,
    PARAM_GENERATION, PARAM_QUERY, PARAM_TOPIC,
};
use crate::config::ExtractorConfig;
use crate::entity::{EntityIndex, EntityKind, Lookup};
use crate::kernel::state::SessionContext;
use crate::planner::types::Op;

const ARTICLES: &[&str] = &["a", "an", "the", "some", "my"];
const SEPARATORS: &[&str] = &[",", "and", "&"];
const ORDINALS: &[(&str, usize)] = &[
    ("first", 1),
    ("1st", 1),
    ("second", 2),
    ("2nd", 2),
    ("third", 3),
    ("3rd", 3),
    ("fourth", 4),
    ("4th", 4),
    ("fifth", 5),
    ("5th", 5),
    ("sixth", 6),
    ("seventh", 7),
    ("eighth", 8),
    ("ninth", 9),
    ("tenth", 10),
];
const PRONOUNS: &[&[&str]] = &[&["it"], &["that"], &["this"], &["that", "one"], &["this", "one"]];
/// Nouns that may follow an ordinal ("the second one", "the last generation").
const ORDINAL_NOUNS: &[&str] = &["one", "package", "option", "entry", "generation"];
const WHOLE_SYSTEM: &[&str] = &[
    "everything",
    "all",
    "system",
    "whole system",
    "entire system",
    "nixos",
    "packages",
    "all packages",
    "all my packages",
];
const PREVIOUS_GENERATION: &[&str] = &["previous", "previous one", "previous generation", "prior", "before"];
/// Words that are never taken as a literal package name.
const NOT_PACKAGES: &[&str] = &[
    "it", "that", "this", "them", "one", "something", "anything", "stuff", "things", "app",
    "program", "software", "package", "everything", "all",
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Deictic {
    Pronoun,
    Nth(usize),
    Last,
}

/// Why a span could not become a resolved reference.
#[derive(Debug, Clone)]
struct Unresolved {
    reason: ClarifyReason,
    candidates: Vec<String>,
}

impl Unresolved {
    fn new(reason: ClarifyReason, candidates: Vec<String>) -> Self {
        Self { reason, candidates }
    }
}

#[derive(Debug, Default)]
struct Penalties {
    approximate: u32,
    deictic: bool,
}

/// Rule-based utterance -> `Intent` extraction.
pub struct IntentExtractor {
    index: Arc<EntityIndex>,
    config: ExtractorConfig,
}

impl IntentExtractor {
    pub fn new(index: Arc<EntityIndex>, config: ExtractorConfig) -> Self {
        Self { index, config }
    }

    pub fn index(&self) -> &EntityIndex {
        &self.index
    }

    /// Total over every input: anything unmatched becomes a Clarify intent.
    pub fn extract(&self, utterance: &str, ctx: &SessionContext) -> Intent {
        let normalized = normalize(utterance);
        let Some((rule, captures)) = best_match(&normalized.tokens) else {
            debug!(tokens = normalized.tokens.len(), "No rule matched");
            return Intent::clarify(utterance, ClarifyReason::ParseFailure, &[]);
        };
        debug!(verb = ?rule.verb, op = ?rule.op, specificity = rule.specificity(), "Rule matched");

        let mut intent = Intent::new(rule.verb, rule.op, utterance);
        if normalized.dry_run {
            intent.parameters.insert(PARAM_DRY_RUN.to_string(), "true".to_string());
        }
        if let Some(topic) = rule.topic {
            intent.parameters.insert(PARAM_TOPIC.to_string(), topic.to_string());
        }

        let mut penalties = Penalties::default();
        for (slot, words) in captures {
            let outcome = match slot {
                Slot::Targets => self.fill_targets(&mut intent, &words, ctx, &mut penalties),
                Slot::Query => {
                    let query = strip_articles(&words).join(" ");
                    intent.parameters.insert(PARAM_QUERY.to_string(), query);
                    Ok(())
                }
                Slot::Generation => self.fill_generation(&mut intent, &words, ctx, &mut penalties),
                Slot::Alias => {
                    let alias = strip_articles(&words).join(" ");
                    if parse_deictic(&alias).is_some() || alias.is_empty() {
                        Err(Unresolved::new(ClarifyReason::UnresolvedReference, Vec::new()))
                    } else {
                        intent.parameters.insert(PARAM_ALIAS.to_string(), alias);
                        Ok(())
                    }
                }
                Slot::Meaning => {
                    let span = strip_articles(&words).join(" ");
                    self.resolve_span(&span, ctx, &mut penalties).and_then(|r| match r {
                        EntityRef::Resolved { kind: EntityKind::Package, .. } => {
                            intent.target_refs.push(r);
                            Ok(())
                        }
                        _ => Err(Unresolved::new(ClarifyReason::UnknownEntity, Vec::new())),
                    })
                }
                Slot::Rest => Ok(()),
            };

            if let Err(unresolved) = outcome {
                debug!(reason = %unresolved.reason, candidates = unresolved.candidates.len(), "Reference unresolved");
                let mut clarify = Intent::clarify(utterance, unresolved.reason, &unresolved.candidates);
                clarify.op = rule.op;
                return clarify;
            }
        }

        intent.confidence = self.confidence(&penalties);
        if intent.confidence < self.config.confidence_threshold {
            debug!(confidence = intent.confidence, "Confidence below threshold");
            let candidates: Vec<String> = intent.target_ids().iter().map(|s| s.to_string()).collect();
            let mut clarify = Intent::clarify(utterance, ClarifyReason::LowConfidence, &candidates);
            clarify.op = rule.op;
            clarify.confidence = intent.confidence;
            return clarify;
        }
        intent
    }

    fn confidence(&self, penalties: &Penalties) -> f32 {
        let mut confidence = self.config.fuzzy_penalty.powi(penalties.approximate as i32);
        if penalties.deictic {
            confidence *= self.config.deictic_penalty;
        }
        confidence.clamp(0.0, 1.0)
    }

    fn fill_targets(
        &self,
        intent: &mut Intent,
        words: &[String],
        ctx: &SessionContext,
        penalties: &mut Penalties,
    ) -> Result<(), Unresolved> {
        for span in split_spans(words) {
            if intent.op == Some(Op::Update) && WHOLE_SYSTEM.contains(&span.as_str()) {
                continue;
            }
            let resolved = self.resolve_span(&span, ctx, penalties)?;
            intent.target_refs.push(resolved);
        }
        Ok(())
    }

    fn fill_generation(
        &self,
        intent: &mut Intent,
        words: &[String],
        ctx: &SessionContext,
        penalties: &mut Penalties,
    ) -> Result<(), Unresolved> {
        let stripped = strip_articles(words);
        let span = stripped.join(" ");
        if PREVIOUS_GENERATION.contains(&span.as_str()) {
            return Ok(());
        }

        let number = stripped
            .iter()
            .filter(|w| w.as_str() != "generation")
            .find_map(|w| w.trim_start_matches('#').parse::<u64>().ok());
        let (id, via) = if let Some(number) = number {
            (number.to_string(), Resolution::Exact)
        } else if let Some(deictic) = parse_deictic(&span) {
            penalties.deictic = true;
            self.resolve_deictic(&span, deictic, EntityKind::Generation, ctx)?
        } else {
            return Err(Unresolved::new(ClarifyReason::UnresolvedReference, Vec::new()));
        };

        intent.parameters.insert(PARAM_GENERATION.to_string(), id.clone());
        intent
            .target_refs
            .push(EntityRef::resolved(id, EntityKind::Generation, via));
        Ok(())
    }

    fn resolve_span(
        &self,
        span: &str,
        ctx: &SessionContext,
        penalties: &mut Penalties,
    ) -> Result<EntityRef, Unresolved> {
        if let Some(deictic) = parse_deictic(span) {
            penalties.deictic = true;
            let (id, via) = self.resolve_deictic(span, deictic, EntityKind::Package, ctx)?;
            return Ok(EntityRef::resolved(id, EntityKind::Package, via));
        }

        match self.index.resolve(span, self.config.max_edit_distance) {
            Lookup::Exact { canonical } => {
                Ok(EntityRef::resolved(canonical, EntityKind::Package, Resolution::Exact))
            }
            Lookup::Fuzzy { canonical, distance } => {
                penalties.approximate += 1;
                Ok(EntityRef::resolved(
                    canonical,
                    EntityKind::Package,
                    Resolution::Fuzzy { distance },
                ))
            }
            Lookup::Category { name, members } => Ok(EntityRef::resolved(
                name,
                EntityKind::Category,
                Resolution::Category { members },
            )),
            Lookup::Ambiguous { candidates } => {
                Err(Unresolved::new(ClarifyReason::AmbiguousReference, candidates))
            }
            Lookup::Miss { suggestions } => {
                if looks_like_package(span) {
                    penalties.approximate += 1;
                    Ok(EntityRef::resolved(span, EntityKind::Package, Resolution::Literal))
                } else {
                    Err(Unresolved::new(ClarifyReason::UnknownEntity, suggestions))
                }
            }
        }
    }

    /// Resolves within the newest focus group of `kind`.
    fn resolve_deictic(
        &self,
        marker: &str,
        deictic: Deictic,
        kind: EntityKind,
        ctx: &SessionContext,
    ) -> Result<(String, Resolution), Unresolved> {
        let group = ctx.focus().latest_group(kind);
        let candidates = || group.iter().map(|(_, e)| e.id.clone()).collect::<Vec<_>>();
        if group.is_empty() {
            return Err(Unresolved::new(ClarifyReason::UnresolvedReference, Vec::new()));
        }

        let picked = match deictic {
            Deictic::Pronoun if group.len() == 1 => group.first(),
            Deictic::Pronoun => {
                return Err(Unresolved::new(ClarifyReason::AmbiguousReference, candidates()));
            }
            Deictic::Nth(n) => group.get(n.saturating_sub(1)),
            Deictic::Last => group.last(),
        };

        match picked {
            Some((focus_index, entry)) => Ok((
                entry.id.clone(),
                Resolution::Deictic {
                    marker: marker.to_string(),
                    focus_index: *focus_index,
                },
            )),
            None => Err(Unresolved::new(ClarifyReason::AmbiguousReference, candidates())),
        }
    }
}

fn strip_articles(words: &[String]) -> Vec<String> {
    let start = words
        .iter()
        .position(|w| !ARTICLES.contains(&w.as_str()))
        .unwrap_or(words.len());
    words[start..].to_vec()
}

/// Splits on commas and "and", dropping articles and empty spans.
fn split_spans(words: &[String]) -> Vec<String> {
    words
        .split(|w| SEPARATORS.contains(&w.as_str()))
        .map(strip_articles)
        .filter(|span| !span.is_empty())
        .map(|span| span.join(" "))
        .collect()
}

fn parse_deictic(span: &str) -> Option<Deictic> {
    let words: Vec<&str> = span.split_whitespace().collect();
    if PRONOUNS.iter().any(|p| *p == words.as_slice()) {
        return Some(Deictic::Pronoun);
    }
    let head = match words.as_slice() {
        [word] => *word,
        [word, noun] if ORDINAL_NOUNS.contains(noun) => *word,
        ["number", n] => return n.parse::<usize>().ok().filter(|n| *n > 0).map(Deictic::Nth),
        _ => return None,
    };
    if head == "last" {
        return Some(Deictic::Last);
    }
    ORDINALS
        .iter()
        .find(|(word, _)| *word == head)
        .map(|(_, n)| Deictic::Nth(*n))
}

fn looks_like_package(span: &str) -> bool {
    let mut chars = span.chars();
    let starts_with_letter = chars.next().map_or(false, |c| c.is_ascii_lowercase());
    starts_with_letter
        && span.len() >= 2
        && span
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+'))
        && !NOT_PACKAGES.contains(&span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(s: &str) -> Vec<String> {
        s.split_whitespace().map(str::to_string).collect()
    }

    #[test]
    fn spans_split_on_commas_and_and() {
        assert_eq!(
            split_spans(&words("the firefox , vim and a git")),
            vec!["firefox", "vim", "git"]
        );
    }

    #[test]
    fn deictic_forms() {
        assert_eq!(parse_deictic("that one"), Some(Deictic::Pronoun));
        assert_eq!(parse_deictic("second one"), Some(Deictic::Nth(2)));
        assert_eq!(parse_deictic("last"), Some(Deictic::Last));
        assert_eq!(parse_deictic("number 3"), Some(Deictic::Nth(3)));
        assert_eq!(parse_deictic("firefox"), None);
    }

    #[test]
    fn literal_names_must_look_like_packages() {
        assert!(looks_like_package("pip"));
        assert!(looks_like_package("python312"));
        assert!(!looks_like_package("something"));
        assert!(!looks_like_package("a nice thing"));
        assert!(!looks_like_package("9lives"));
    }
}
