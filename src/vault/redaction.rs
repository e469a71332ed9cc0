//! Auto-redaction of credential plaintext in arbitrary text.
//!
//! Matching is whole-token only: a stored value `password` must redact the
//! standalone word `password` but never the `password` inside `password123`.
//! Candidates are found with an Aho-Corasick automaton (leftmost-longest) and
//! confirmed against Unicode word boundaries.

use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};

/// Replacement rendered for credential `name`.
fn replacement(name: &str) -> String {
    format!("***{name}***")
}

/// Immutable snapshot of the redaction table. The vault swaps a fresh
/// snapshot in on every store/delete/rotate; readers never hold a lock
/// across a scan.
pub struct RedactionTable {
    automaton: Option<AhoCorasick>,
    /// `(plaintext, credential name)` aligned with automaton pattern ids.
    entries: Vec<(String, String)>,
}

impl RedactionTable {
    /// Build from `(plaintext, name)` pairs. Empty plaintexts are skipped.
    pub fn new(pairs: Vec<(String, String)>) -> Self {
        let entries: Vec<(String, String)> = pairs
            .into_iter()
            .filter(|(plain, _)| !plain.is_empty())
            .collect();
        let automaton = if entries.is_empty() {
            None
        } else {
            AhoCorasickBuilder::new()
                .match_kind(MatchKind::LeftmostLongest)
                .build(entries.iter().map(|(plain, _)| plain.as_str()))
                .ok()
        };
        Self { automaton, entries }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Substitute every whole-token occurrence of a stored plaintext with
    /// `***<name>***`.
    pub fn redact(&self, text: &str) -> String {
        let Some(automaton) = &self.automaton else {
            return text.to_string();
        };
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for m in automaton.find_iter(text) {
            if !is_word_bounded(text, m.start(), m.end()) {
                continue;
            }
            let (_, name) = &self.entries[m.pattern().as_usize()];
            out.push_str(&text[last..m.start()]);
            out.push_str(&replacement(name));
            last = m.end();
        }
        out.push_str(&text[last..]);
        out
    }

    /// Whole-token match spans as `(start, end, credential name)`.
    /// The anonymiser uses these to tokenise vault credentials.
    pub fn whole_token_matches(&self, text: &str) -> Vec<(usize, usize, &str)> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };
        automaton
            .find_iter(text)
            .filter(|m| is_word_bounded(text, m.start(), m.end()))
            .map(|m| {
                let (_, name) = &self.entries[m.pattern().as_usize()];
                (m.start(), m.end(), name.as_str())
            })
            .collect()
    }

    /// Whether `text` still contains any stored plaintext as a whole token.
    pub fn contains_plaintext(&self, text: &str) -> bool {
        let Some(automaton) = &self.automaton else {
            return false;
        };
        automaton
            .find_iter(text)
            .any(|m| is_word_bounded(text, m.start(), m.end()))
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// True when `[start, end)` is delimited by Unicode word boundaries.
fn is_word_bounded(text: &str, start: usize, end: usize) -> bool {
    let before_ok = text[..start]
        .chars()
        .next_back()
        .map(|c| !is_word_char(c))
        .unwrap_or(true);
    let after_ok = text[end..]
        .chars()
        .next()
        .map(|c| !is_word_char(c))
        .unwrap_or(true);
    before_ok && after_ok
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(pairs: &[(&str, &str)]) -> RedactionTable {
        RedactionTable::new(
            pairs
                .iter()
                .map(|(p, n)| (p.to_string(), n.to_string()))
                .collect(),
        )
    }

    #[test]
    fn whole_token_is_redacted() {
        let t = table(&[("password", "secret")]);
        assert_eq!(t.redact("my password here"), "my ***secret*** here");
    }

    #[test]
    fn substring_is_never_redacted() {
        let t = table(&[("password", "secret")]);
        assert_eq!(
            t.redact("My password123 is different"),
            "My password123 is different"
        );
        assert_eq!(t.redact("xpassword"), "xpassword");
    }

    #[test]
    fn mixed_occurrences_redact_only_whole_tokens() {
        let t = table(&[("password", "secret")]);
        assert_eq!(
            t.redact("password and password123 and password."),
            "***secret*** and password123 and ***secret***."
        );
    }

    #[test]
    fn punctuation_and_string_edges_count_as_boundaries() {
        let t = table(&[("hunter2", "irc")]);
        assert_eq!(t.redact("hunter2"), "***irc***");
        assert_eq!(t.redact("(hunter2)"), "(***irc***)");
        assert_eq!(t.redact("pass=hunter2;"), "pass=***irc***;");
    }

    #[test]
    fn longest_match_wins_for_overlapping_values() {
        let t = table(&[("abc", "short"), ("abc def", "long")]);
        assert_eq!(t.redact("x abc def y"), "x ***long*** y");
    }

    #[test]
    fn unicode_neighbours_block_redaction() {
        let t = table(&[("clé", "fr")]);
        assert_eq!(t.redact("la clé est là"), "la ***fr*** est là");
        assert_eq!(t.redact("laclé"), "laclé");
    }

    #[test]
    fn empty_table_is_identity() {
        let t = RedactionTable::empty();
        assert!(t.is_empty());
        assert_eq!(t.redact("anything"), "anything");
        assert!(!t.contains_plaintext("anything"));
    }

    #[test]
    fn contains_plaintext_tracks_whole_tokens() {
        let t = table(&[("tok3n", "api")]);
        assert!(t.contains_plaintext("use tok3n now"));
        assert!(!t.contains_plaintext("use tok3nX now"));
    }
}
