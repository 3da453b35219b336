//! Regex rewrite rules.
//!
//! A [`PatternMatcher`] is an ordered list of (regex, template) pairs. The
//! first rule whose regex matches the input wins and its template is expanded
//! with that match's capture groups.

use regex::Regex;

use crate::config::PatternRule;
use crate::error::PatternError;

/// Compiled, immutable rule set.
#[derive(Debug, Default)]
pub struct PatternMatcher {
    rules: Vec<(Regex, String)>,
}

impl PatternMatcher {
    /// Compile `rules` in order. Fails on the first rule that does not compile.
    pub fn new(rules: &[PatternRule]) -> Result<Self, PatternError> {
        let rules = rules
            .iter()
            .enumerate()
            .map(|(index, rule)| {
                Regex::new(&rule.pattern)
                    .map(|re| (re, rule.template.clone()))
                    .map_err(|source| PatternError {
                        index,
                        pattern: rule.pattern.clone(),
                        source,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Rewrite `text` through the first matching rule.
    ///
    /// Returns an empty string when `text` is empty or nothing matches.
    pub fn apply(&self, text: &str) -> String {
        if text.is_empty() {
            return String::new();
        }
        for (re, template) in &self.rules {
            if let Some(caps) = re.captures(text) {
                let mut out = String::new();
                caps.expand(template, &mut out);
                return out;
            }
        }
        String::new()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}
