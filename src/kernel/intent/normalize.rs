//! Utterance normalisation ahead of rule matching.

const CONTRACTIONS: &[(&str, &str)] = &[
    ("what's", "what is"),
    ("that's", "that is"),
    ("it's", "it is"),
    ("there's", "there is"),
    ("let's", "let us"),
    ("i'm", "i am"),
    ("i'd", "i would"),
    ("i've", "i have"),
    ("i'll", "i will"),
    ("you're", "you are"),
    ("don't", "do not"),
    ("doesn't", "does not"),
    ("didn't", "did not"),
    ("isn't", "is not"),
    ("can't", "cannot"),
    ("won't", "will not"),
    ("shouldn't", "should not"),
    ("what've", "what have"),
];

const LEADING_FILLERS: &[&[&str]] = &[
    &["please"],
    &["kindly"],
    &["hey"],
    &["just"],
    &["can", "you"],
    &["could", "you"],
    &["would", "you"],
    &["will", "you"],
    &["i", "would", "like", "to"],
    &["i", "want", "to"],
    &["i", "need", "to"],
    &["help", "me"],
    &["go", "ahead", "and"],
];

const TRAILING_FILLERS: &[&[&str]] = &[
    &["please"],
    &["for", "me"],
    &["now"],
    &["thanks"],
    &["thank", "you"],
];

const DRY_RUN_PREFIXES: &[&[&str]] = &[
    &["preview"],
    &["simulate"],
    &["dry", "run"],
    &["what", "would", "happen", "if", "i"],
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub tokens: Vec<String>,
    /// The user asked for a preview rather than the real thing.
    pub dry_run: bool,
}

pub fn normalize(utterance: &str) -> Normalized {
    let lowered = utterance.to_lowercase().replace('\u{2019}', "'");

    let mut spaced = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            c if c.is_alphanumeric() => spaced.push(c),
            '-' | '_' | '.' | '+' | '\'' => spaced.push(c),
            ',' => spaced.push_str(" , "),
            _ => spaced.push(' '),
        }
    }

    let mut tokens = Vec::new();
    for word in spaced.split_whitespace() {
        if let Some((_, expanded)) = CONTRACTIONS.iter().find(|(short, _)| *short == word) {
            tokens.extend(expanded.split(' ').map(str::to_string));
            continue;
        }
        let word = word.strip_suffix("'s").unwrap_or(word);
        let word: String = word.chars().filter(|c| *c != '\'').collect();
        let word = word.trim_matches('.');
        if !word.is_empty() {
            tokens.push(word.to_string());
        }
    }

    let mut dry_run = false;
    loop {
        if let Some(len) = matching_prefix(&tokens, DRY_RUN_PREFIXES) {
            dry_run = true;
            tokens.drain(..len);
            continue;
        }
        match matching_prefix(&tokens, LEADING_FILLERS) {
            Some(len) if len < tokens.len() => {
                tokens.drain(..len);
            }
            _ => break,
        }
    }
    while let Some(len) = matching_suffix(&tokens, TRAILING_FILLERS) {
        if len >= tokens.len() {
            break;
        }
        tokens.truncate(tokens.len() - len);
    }
    while tokens.last().map(String::as_str) == Some(",") {
        tokens.pop();
    }

    Normalized { tokens, dry_run }
}

fn matching_prefix(tokens: &[String], phrases: &[&[&str]]) -> Option<usize> {
    phrases
        .iter()
        .filter(|p| p.len() <= tokens.len() && p.iter().zip(tokens).all(|(a, b)| *a == b.as_str()))
        .map(|p| p.len())
        .max()
}

fn matching_suffix(tokens: &[String], phrases: &[&[&str]]) -> Option<usize> {
    phrases
        .iter()
        .filter(|p| {
            p.len() <= tokens.len()
                && p.iter().zip(&tokens[tokens.len() - p.len()..]).all(|(a, b)| *a == b.as_str())
        })
        .map(|p| p.len())
        .max()
}
