//! String-literal masking.
//!
//! Rules run against a copy of the statement in which every non-empty
//! single-quoted literal is replaced by an indexed placeholder, so a pattern
//! like `SYSDATE` or `ROWNUM` inside a value can never be rewritten. The
//! quote tracking is the scanner's own, so masking and splitting agree on
//! where strings start and end.

use crate::parser::QuoteTracker;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const MARK: char = '\u{1}';

static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x01(\d+)\x01").unwrap());

/// A statement with its literals lifted out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskedStatement {
    pub(crate) text: String,
    pub(crate) literals: Vec<String>,
}

impl MaskedStatement {
    /// Mask every non-empty literal. Returns `None` for an unterminated
    /// literal or input that already contains the placeholder marker.
    pub fn mask(stmt: &str) -> Option<Self> {
        if stmt.contains(MARK) {
            return None;
        }

        let bytes = stmt.as_bytes();
        let mut tracker = QuoteTracker::new();
        let mut text = String::with_capacity(stmt.len());
        let mut literals = Vec::new();
        let mut lit_start: Option<usize> = None;
        let mut copied = 0;

        for (i, &b) in bytes.iter().enumerate() {
            let was_in = tracker.in_string();
            tracker.feed(b);
            let now_in = tracker.in_string();

            if !was_in && now_in {
                if lit_start.is_none() {
                    lit_start = Some(i);
                }
            } else if was_in && !now_in {
                // '' inside a literal is an escaped quote, not the end
                if bytes.get(i + 1) == Some(&b'\'') {
                    continue;
                }
                if let Some(start) = lit_start.take() {
                    let literal = &stmt[start..=i];
                    text.push_str(&stmt[copied..start]);
                    if literal == "''" {
                        text.push_str(literal);
                    } else {
                        text.push(MARK);
                        text.push_str(&literals.len().to_string());
                        text.push(MARK);
                        literals.push(literal.to_string());
                    }
                    copied = i + 1;
                }
            }
        }

        if tracker.in_string() {
            return None;
        }
        text.push_str(&stmt[copied..]);
        Some(Self { text, literals })
    }

    /// Masked text, literals replaced by placeholders
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn literals(&self) -> &[String] {
        &self.literals
    }

    /// Put the literals back.
    pub fn unmask(&self) -> String {
        if self.literals.is_empty() {
            return self.text.clone();
        }
        RE_PLACEHOLDER
            .replace_all(&self.text, |caps: &Captures| {
                caps[1]
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| self.literals.get(i))
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Contents of a literal without its outer quotes, or `None` if the literal
/// contains an escaped quote.
pub(crate) fn literal_body(literal: &str) -> Option<&str> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    if inner.contains('\'') || inner.contains('\\') {
        None
    } else {
        Some(inner)
    }
}
