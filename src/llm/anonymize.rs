//! Reversible pseudonymisation of sensitive text before it leaves the
//! process.
//!
//! Scans for emails, IPv4 addresses, bearer-token-shaped strings, and vault
//! credentials; each occurrence becomes a unique opaque token `<KIND_i>`.
//! The same original always maps to the same token inside one operation, and
//! `deanonymise(anonymise(x)) == x` byte-for-byte.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::vault::RedactionTable;

/// Substitution table for one anonymisation operation. Resolves tokens back
/// to plaintext only inside the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AnonymisationMap {
    /// `(token, original)` pairs in replacement order.
    entries: Vec<(String, String)>,
}

impl AnonymisationMap {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn original_for(&self, token: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == token)
            .map(|(_, original)| original.as_str())
    }
}

/// Pattern scanner. Construct once, share via `Arc`.
pub struct Anonymiser {
    email: Regex,
    ipv4: Regex,
    bearer: Regex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SensitiveKind {
    Email,
    Ip,
    Token,
    Vault,
}

impl SensitiveKind {
    fn label(self) -> &'static str {
        match self {
            Self::Email => "EMAIL",
            Self::Ip => "IP",
            Self::Token => "TOKEN",
            Self::Vault => "VAULT",
        }
    }
}

struct Span {
    start: usize,
    end: usize,
    kind: SensitiveKind,
}

impl Default for Anonymiser {
    fn default() -> Self {
        Self::new()
    }
}

impl Anonymiser {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
                .expect("email pattern"),
            ipv4: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 pattern"),
            bearer: Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/\-]+=*").expect("bearer pattern"),
        }
    }

    /// Replace every sensitive occurrence with an opaque token. The optional
    /// redaction snapshot contributes vault-credential matches.
    pub fn anonymise(
        &self,
        text: &str,
        vault: Option<&Arc<RedactionTable>>,
    ) -> (String, AnonymisationMap) {
        let mut spans: Vec<Span> = Vec::new();
        for m in self.email.find_iter(text) {
            spans.push(Span {
                start: m.start(),
                end: m.end(),
                kind: SensitiveKind::Email,
            });
        }
        for m in self.ipv4.find_iter(text) {
            spans.push(Span {
                start: m.start(),
                end: m.end(),
                kind: SensitiveKind::Ip,
            });
        }
        for m in self.bearer.find_iter(text) {
            spans.push(Span {
                start: m.start(),
                end: m.end(),
                kind: SensitiveKind::Token,
            });
        }
        if let Some(table) = vault {
            for (start, end, _name) in table.whole_token_matches(text) {
                spans.push(Span {
                    start,
                    end,
                    kind: SensitiveKind::Vault,
                });
            }
        }

        // Earlier starts first; longer spans win on equal start. Overlaps
        // with an already-taken span are dropped.
        spans.sort_by(|a, b| a.start.cmp(&b.start).then(b.end.cmp(&a.end)));

        let mut out = String::with_capacity(text.len());
        let mut map = AnonymisationMap::default();
        let mut token_by_original: HashMap<(&'static str, String), String> = HashMap::new();
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        let mut cursor = 0usize;

        for span in spans {
            if span.start < cursor {
                continue;
            }
            let original = text[span.start..span.end].to_string();
            let label = span.kind.label();
            let token = token_by_original
                .entry((label, original.clone()))
                .or_insert_with(|| {
                    let counter = counters.entry(label).or_insert(0);
                    *counter += 1;
                    let token = format!("<{label}_{counter}>");
                    map.entries.push((token.clone(), original.clone()));
                    token
                })
                .clone();
            out.push_str(&text[cursor..span.start]);
            out.push_str(&token);
            cursor = span.end;
        }
        out.push_str(&text[cursor..]);
        (out, map)
    }

    /// Reverse a substitution exactly.
    pub fn deanonymise(&self, text: &str, map: &AnonymisationMap) -> String {
        let mut out = text.to_string();
        for (token, original) in &map.entries {
            out = out.replace(token, original);
        }
        out
    }
}
