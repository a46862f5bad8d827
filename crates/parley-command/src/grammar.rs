//! Priority-ordered command grammar shared by every registered handler.
//!
//! The grammar is an ordered alternation: matching walks entries from the
//! highest priority down and returns the first hit. Within one priority tier
//! the most recently added entry ranks first; callers that need a stable
//! relative order between two commands should give them distinct priorities.

use std::collections::BTreeMap;

use regex::Regex;

use crate::expr::{ExprError, MatchExpr};

#[derive(Debug, Clone)]
struct GrammarEntry {
    priority: i32,
    name: String,
    pattern: Regex,
}

/// Named captures produced by a successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchArgs {
    values: BTreeMap<String, String>,
}

impl MatchArgs {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn insert(&mut self, name: &str, value: &str) {
        self.values.insert(name.to_string(), value.to_string());
    }
}

/// Outcome of a successful grammar match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedCommand {
    pub name: String,
    pub args: MatchArgs,
}

/// The combined grammar over all registered command expressions.
#[derive(Debug, Clone)]
pub struct CommandGrammar {
    alert: String,
    entries: Vec<GrammarEntry>,
}

impl CommandGrammar {
    pub fn new(alert: impl Into<String>) -> Self {
        Self {
            alert: alert.into(),
            entries: Vec::new(),
        }
    }

    /// The configured alert prefix.
    pub fn alert(&self) -> &str {
        &self.alert
    }

    /// Inserts an entry, keeping the sequence sorted by descending priority.
    /// Insertion is linear in entry count, which is fine for the handler
    /// counts this is built for (well under ~1000).
    pub fn add(&mut self, expr: &MatchExpr, name: &str, priority: i32) -> Result<(), ExprError> {
        let pattern = expr.compile()?;
        let entry = GrammarEntry {
            priority,
            name: name.to_string(),
            pattern,
        };
        let at = self
            .entries
            .iter()
            .position(|existing| priority >= existing.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(at, entry);
        Ok(())
    }

    /// Attempts the ordered alternation against `text`.
    ///
    /// In a direct message the alert prefix is optional; everywhere else a
    /// missing prefix means no entry is even attempted. A `None` return is an
    /// expected outcome, not an error.
    pub fn try_match(&self, text: &str, direct_message: bool) -> Option<MatchedCommand> {
        let trimmed = text.trim_start();
        let body = match trimmed.strip_prefix(&self.alert) {
            Some(rest) => rest.trim_start(),
            None if direct_message => trimmed,
            None => return None,
        };
        for entry in &self.entries {
            if let Some(captures) = entry.pattern.captures(body) {
                let mut args = MatchArgs::default();
                for name in entry.pattern.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        args.insert(name, value.as_str());
                    }
                }
                return Some(MatchedCommand {
                    name: entry.name.clone(),
                    args,
                });
            }
        }
        None
    }

    /// True when `text` would match some entry. Used to classify user-issued
    /// command messages during history sweeps.
    pub fn matches(&self, text: &str, direct_message: bool) -> bool {
        self.try_match(text, direct_message).is_some()
    }
}
