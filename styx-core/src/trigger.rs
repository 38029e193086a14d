// ABOUTME: Detects when message content addresses the AI participant.
// ABOUTME: Mention triggers bind to a standalone @ token; phrase triggers bind on word boundaries.

use anyhow::{Context, Result};
use regex::Regex;

/// Trigger phrases used when the configuration does not override them.
pub const DEFAULT_TRIGGERS: &[&str] = &[
    "@ai",
    "@assistant",
    "@bot",
    "@styx",
    "hey ai",
    "hey styx",
    "ai help",
    "ai:",
];

/// Compiled trigger matcher. Patterns are built once at construction; a
/// message matches when any pattern does.
pub struct TriggerDetector {
    patterns: Vec<Regex>,
}

impl TriggerDetector {
    pub fn new<I, S>(phrases: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut patterns = Vec::new();
        for phrase in phrases {
            let phrase = phrase.as_ref().trim().to_lowercase();
            if phrase.is_empty() {
                continue;
            }
            let escaped = regex::escape(&phrase);
            // The trailing context group is consumed rather than asserted
            // (the regex crate has no lookahead); only is_match is ever
            // consulted, so that is equivalent. Both shapes refuse to match
            // a trigger embedded inside a longer token.
            let pattern = if phrase.starts_with('@') {
                format!(r"(?i)(^|\s){escaped}($|\s|[,.!?;:])")
            } else {
                format!(r"(?i)\b{escaped}($|\s|[,.!?;:])")
            };
            patterns.push(
                Regex::new(&pattern)
                    .with_context(|| format!("Invalid trigger phrase: {}", phrase))?,
            );
        }
        Ok(Self { patterns })
    }

    pub fn with_defaults() -> Self {
        // The built-in phrase list always compiles.
        Self::new(DEFAULT_TRIGGERS.iter().copied()).expect("default triggers compile")
    }

    pub fn should_trigger(&self, content: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.is_match(content))
    }
}
