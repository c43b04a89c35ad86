//! Structured result extraction from script stdout
//!
//! Scripts report free-text progress and may print one JSON object as their
//! result. The default extractor takes the largest brace-delimited span
//! (first `{` to last `}`); other protocols plug in through
//! [`ResultExtractor`].

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub trait ResultExtractor: Send + Sync {
    /// Structured result embedded in `stdout`, if any. Never fails.
    fn extract(&self, stdout: &str) -> Option<Value>;
}

/// First `{` through last `}` parsed as JSON; unparseable spans yield `None`
#[derive(Debug, Clone, Copy, Default)]
pub struct BraceSpanExtractor;

fn brace_span() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)\{.*\}").expect("brace span pattern is valid"))
}

impl ResultExtractor for BraceSpanExtractor {
    fn extract(&self, stdout: &str) -> Option<Value> {
        let span = brace_span().find(stdout)?;
        match serde_json::from_str(span.as_str()) {
            Ok(value) => Some(value),
            Err(e) => {
                log::debug!("Script output contains no parseable JSON result: {}", e);
                None
            }
        }
    }
}
