//! Verb-pattern rules: literal tokens and named slots.

use super::types::Verb;
use crate::planner::types::Op;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Comma/"and"-separated entity spans.
    Targets,
    /// Free text passed through (search terms).
    Query,
    /// A generation number or a reference to one.
    Generation,
    /// The new word being taught.
    Alias,
    /// What the taught word stands for.
    Meaning,
    /// Matched and ignored ("undo that").
    Rest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Piece {
    Lit(&'static str),
    Slot(Slot),
}

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub verb: Verb,
    pub op: Option<Op>,
    pub topic: Option<&'static str>,
    pub pattern: &'static [Piece],
}

impl Rule {
    /// Number of literal tokens; the tie-breaker between matching rules.
    pub fn specificity(&self) -> usize {
        self.pattern
            .iter()
            .filter(|p| matches!(p, Piece::Lit(_)))
            .count()
    }
}

pub type Captures = Vec<(Slot, Vec<String>)>;

use Piece::{Lit, Slot as S};
use Slot::{Alias, Generation, Meaning, Query, Rest, Targets};

const fn rule(verb: Verb, op: Option<Op>, pattern: &'static [Piece]) -> Rule {
    Rule {
        verb,
        op,
        topic: None,
        pattern,
    }
}

const fn cmd(op: Op, pattern: &'static [Piece]) -> Rule {
    rule(Verb::Command, Some(op), pattern)
}

const fn query(op: Op, pattern: &'static [Piece]) -> Rule {
    rule(Verb::Query, Some(op), pattern)
}

pub const RULES: &[Rule] = &[
    // install
    cmd(Op::Install, &[Lit("install"), S(Targets)]),
    cmd(Op::Install, &[Lit("add"), S(Targets)]),
    cmd(Op::Install, &[Lit("get"), S(Targets)]),
    cmd(Op::Install, &[Lit("get"), Lit("me"), S(Targets)]),
    cmd(Op::Install, &[Lit("set"), Lit("up"), S(Targets)]),
    cmd(Op::Install, &[Lit("i"), Lit("need"), S(Targets)]),
    cmd(Op::Install, &[Lit("i"), Lit("want"), S(Targets)]),
    cmd(Op::Install, &[Lit("give"), Lit("me"), S(Targets)]),
    // remove
    cmd(Op::Remove, &[Lit("remove"), S(Targets)]),
    cmd(Op::Remove, &[Lit("uninstall"), S(Targets)]),
    cmd(Op::Remove, &[Lit("delete"), S(Targets)]),
    cmd(Op::Remove, &[Lit("get"), Lit("rid"), Lit("of"), S(Targets)]),
    cmd(Op::Remove, &[Lit("i"), Lit("do"), Lit("not"), Lit("want"), S(Targets), Lit("anymore")]),
    cmd(Op::Remove, &[Lit("i"), Lit("do"), Lit("not"), Lit("need"), S(Targets), Lit("anymore")]),
    // update
    cmd(Op::Update, &[Lit("update")]),
    cmd(Op::Update, &[Lit("upgrade")]),
    cmd(Op::Update, &[Lit("update"), S(Targets)]),
    cmd(Op::Update, &[Lit("upgrade"), S(Targets)]),
    // rollback to an explicit generation
    cmd(Op::Rollback, &[Lit("rollback")]),
    cmd(Op::Rollback, &[Lit("roll"), Lit("back")]),
    cmd(Op::Rollback, &[Lit("rollback"), Lit("to"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("roll"), Lit("back"), Lit("to"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("rollback"), Lit("to"), Lit("generation"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("roll"), Lit("back"), Lit("to"), Lit("generation"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("switch"), Lit("to"), Lit("generation"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("go"), Lit("back"), Lit("to"), Lit("generation"), S(Generation)]),
    cmd(Op::Rollback, &[Lit("revert"), Lit("to"), Lit("generation"), S(Generation)]),
    // undo the last change
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("undo")]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("undo"), S(Rest)]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("revert")]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("revert"), S(Rest)]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("go"), Lit("back")]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("take"), Lit("that"), Lit("back")]),
    rule(Verb::Undo, Some(Op::Rollback), &[Lit("that"), Lit("was"), Lit("a"), Lit("mistake")]),
    // search
    query(Op::Search, &[Lit("search"), S(Query)]),
    query(Op::Search, &[Lit("search"), Lit("for"), S(Query)]),
    query(Op::Search, &[Lit("find"), S(Query)]),
    query(Op::Search, &[Lit("look"), Lit("for"), S(Query)]),
    query(Op::Search, &[Lit("is"), Lit("there"), S(Query)]),
    query(Op::Search, &[Lit("do"), Lit("you"), Lit("have"), S(Query)]),
    query(Op::Search, &[Lit("show"), Lit("me"), S(Query), Lit("packages")]),
    // generations
    query(Op::ListGenerations, &[Lit("list"), Lit("generations")]),
    query(Op::ListGenerations, &[Lit("list"), Lit("my"), Lit("generations")]),
    query(Op::ListGenerations, &[Lit("show"), Lit("generations")]),
    query(Op::ListGenerations, &[Lit("show"), Lit("my"), Lit("generations")]),
    query(Op::ListGenerations, &[Lit("show"), Lit("me"), Lit("my"), Lit("generations")]),
    query(Op::ListGenerations, &[Lit("what"), Lit("generations"), Lit("do"), Lit("i"), Lit("have")]),
    // installed packages
    query(Op::ListInstalled, &[Lit("what"), Lit("is"), Lit("installed")]),
    query(Op::ListInstalled, &[Lit("list"), Lit("installed"), Lit("packages")]),
    query(Op::ListInstalled, &[Lit("list"), Lit("installed")]),
    query(Op::ListInstalled, &[Lit("show"), Lit("installed"), Lit("packages")]),
    query(Op::ListInstalled, &[Lit("what"), Lit("do"), Lit("i"), Lit("have"), Lit("installed")]),
    query(Op::ListInstalled, &[Lit("what"), Lit("packages"), Lit("do"), Lit("i"), Lit("have")]),
    // what changed
    query(Op::Diff, &[Lit("what"), Lit("changed")]),
    query(Op::Diff, &[Lit("what"), Lit("is"), Lit("changed")]),
    query(Op::Diff, &[Lit("what"), Lit("has"), Lit("changed")]),
    query(Op::Diff, &[Lit("what"), Lit("is"), Lit("different")]),
    query(Op::Diff, &[Lit("show"), Lit("changes")]),
    query(Op::Diff, &[Lit("show"), Lit("me"), Lit("what"), Lit("changed")]),
    query(Op::Diff, &[Lit("diff")]),
    // help
    Rule { verb: Verb::Query, op: None, topic: Some("help"), pattern: &[Lit("help")] },
    Rule { verb: Verb::Query, op: None, topic: Some("help"), pattern: &[Lit("help"), Lit("me")] },
    Rule { verb: Verb::Query, op: None, topic: Some("help"), pattern: &[Lit("what"), Lit("can"), Lit("you"), Lit("do")] },
    // suggestions
    rule(Verb::Suggest, Some(Op::Install), &[Lit("suggest"), S(Targets)]),
    rule(Verb::Suggest, Some(Op::Install), &[Lit("recommend"), S(Targets)]),
    rule(Verb::Suggest, Some(Op::Install), &[Lit("what"), S(Targets), Lit("should"), Lit("i"), Lit("use")]),
    rule(Verb::Suggest, Some(Op::Install), &[Lit("which"), S(Targets), Lit("should"), Lit("i"), Lit("install")]),
    // confirmation
    rule(Verb::Confirm, None, &[Lit("yes")]),
    rule(Verb::Confirm, None, &[Lit("yeah")]),
    rule(Verb::Confirm, None, &[Lit("yep")]),
    rule(Verb::Confirm, None, &[Lit("sure")]),
    rule(Verb::Confirm, None, &[Lit("ok")]),
    rule(Verb::Confirm, None, &[Lit("okay")]),
    rule(Verb::Confirm, None, &[Lit("confirm")]),
    rule(Verb::Confirm, None, &[Lit("proceed")]),
    rule(Verb::Confirm, None, &[Lit("do"), Lit("it")]),
    rule(Verb::Confirm, None, &[Lit("go"), Lit("ahead")]),
    rule(Verb::Confirm, None, &[Lit("yes"), Lit("do"), Lit("it")]),
    // teaching
    rule(Verb::Teach, None, &[S(Alias), Lit("means"), S(Meaning)]),
    rule(Verb::Teach, None, &[Lit("remember"), S(Alias), Lit("means"), S(Meaning)]),
    rule(Verb::Teach, None, &[Lit("remember"), Lit("that"), S(Alias), Lit("means"), S(Meaning)]),
    rule(Verb::Teach, None, &[Lit("when"), Lit("i"), Lit("say"), S(Alias), Lit("i"), Lit("mean"), S(Meaning)]),
    rule(Verb::Teach, None, &[Lit("by"), S(Alias), Lit("i"), Lit("mean"), S(Meaning)]),
];

/// Matches `pattern` against the whole token list. Slots are lazy and take
/// at least one token; a trailing slot takes everything left.
pub fn match_pattern(pattern: &[Piece], tokens: &[String]) -> Option<Captures> {
    match pattern.split_first() {
        None => tokens.is_empty().then(Vec::new),
        Some((Piece::Lit(word), rest)) => {
            let (first, remaining) = tokens.split_first()?;
            if first.as_str() == *word {
                match_pattern(rest, remaining)
            } else {
                None
            }
        }
        Some((Piece::Slot(slot), rest)) => {
            if rest.is_empty() {
                if tokens.is_empty() {
                    return None;
                }
                return Some(vec![(*slot, tokens.to_vec())]);
            }
            for take in 1..=tokens.len() {
                if let Some(mut captures) = match_pattern(rest, &tokens[take..]) {
                    captures.insert(0, (*slot, tokens[..take].to_vec()));
                    return Some(captures);
                }
            }
            None
        }
    }
}

/// Most specific matching rule; earlier rules win ties.
pub fn best_match(tokens: &[String]) -> Option<(&'static Rule, Captures)> {
    let mut best: Option<(&'static Rule, Captures)> = None;
    for rule in RULES {
        if let Some(captures) = match_pattern(rule.pattern, tokens) {
            let better = best
                .as_ref()
                .map_or(true, |(current, _)| rule.specificity() > current.specificity());
            if better {
                best = Some((rule, captures));
            }
        }
    }
    best
}
