use rand::Rng;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::lorebook::{Entry, Lorebook};

/// Case and word-boundary rules for one entry. Entry flags win over the
/// lorebook defaults when they are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    pub case_sensitive: bool,
    pub match_whole_words: bool,
}

impl MatchOptions {
    pub fn resolve(entry: &Entry, lorebook: &Lorebook) -> Self {
        Self {
            case_sensitive: entry.case_sensitive || lorebook.case_sensitive,
            match_whole_words: entry.match_whole_words || lorebook.match_whole_words,
        }
    }
}

/// An entry's keys compiled once per call and reused across recursion rounds.
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    constant: bool,
    selective: bool,
    primary: Vec<Regex>,
    secondary: Vec<Regex>,
}

impl KeyMatcher {
    pub fn compile(entry: &Entry, options: MatchOptions) -> Self {
        Self {
            constant: entry.constant,
            selective: entry.selective,
            primary: entry
                .primary_keys()
                .filter_map(|k| compile_key(k, options))
                .collect(),
            secondary: entry
                .secondary_keys()
                .filter_map(|k| compile_key(k, options))
                .collect(),
        }
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// Key test over a window made of independent text segments. Segment
    /// edges count as word boundaries.
    pub fn keys_match(&self, segments: &[&str]) -> bool {
        if self.constant {
            return true;
        }

        let any_found = |keys: &[Regex]| {
            keys.iter()
                .any(|key| segments.iter().any(|text| key.is_match(text)))
        };

        if !any_found(&self.primary) {
            return false;
        }

        // A selective entry without secondary keys behaves like a plain one.
        if self.selective && !self.secondary.is_empty() {
            return any_found(&self.secondary);
        }

        true
    }
}

fn compile_key(key: &str, options: MatchOptions) -> Option<Regex> {
    let escaped = regex::escape(key);

    // Multi-word keys are matched as plain phrases.
    let pattern = if options.match_whole_words && !key.contains(char::is_whitespace) {
        format!(r"(?:^|\W){escaped}(?:\W|$)")
    } else {
        escaped
    };

    match RegexBuilder::new(&pattern)
        .case_insensitive(!options.case_sensitive)
        .build()
    {
        Ok(re) => Some(re),
        Err(err) => {
            warn!(key, %err, "dropping lorebook key that does not compile");
            None
        }
    }
}

/// Roll the entry's activation chance. Drawn fresh on every call.
pub fn roll_probability<R: Rng + ?Sized>(entry: &Entry, rng: &mut R) -> bool {
    match entry.activation_chance() {
        None => true,
        Some(chance) => rng.gen_range(1..=100u32) <= chance,
    }
}

/// The full match predicate: constant entries always pass, everything else
/// needs its keys in the window and then a successful probability roll.
pub fn entry_matches<R: Rng + ?Sized>(
    matcher: &KeyMatcher,
    entry: &Entry,
    segments: &[&str],
    rng: &mut R,
) -> bool {
    if matcher.is_constant() {
        return true;
    }
    matcher.keys_match(segments) && roll_probability(entry, rng)
}
