//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, Profile};
use std::collections::HashSet;
use thiserror::Error;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("bot.id is required")]
    MissingId,
    #[error("bot {0}: nick is required")]
    MissingNick(String),
    #[error("bot {0}: server is required")]
    MissingServer(String),
    #[error("bot id {0:?} is used more than once")]
    DuplicateId(String),
    #[error("bot {id}: {field}[{index}] does not compile: {error}")]
    InvalidPattern {
        id: String,
        field: &'static str,
        index: usize,
        error: String,
    },
    #[error("sandbox.program does not exist: {0}")]
    SandboxNotFound(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(ref program) = config.sandbox.program
        && !program.exists()
    {
        errors.push(ValidationError::SandboxNotFound(program.display().to_string()));
    }

    let mut seen = HashSet::new();
    for bot in &config.bots {
        if !bot.id.is_empty() && !seen.insert(bot.id.as_str()) {
            errors.push(ValidationError::DuplicateId(bot.id.clone()));
        }
        validate_profile(bot, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_profile(bot: &Profile, errors: &mut Vec<ValidationError>) {
    if bot.id.is_empty() {
        errors.push(ValidationError::MissingId);
    }
    if bot.nick.is_empty() {
        errors.push(ValidationError::MissingNick(bot.id.clone()));
    }
    if bot.server.is_empty() {
        errors.push(ValidationError::MissingServer(bot.id.clone()));
    }

    for (field, rules) in [("patterns", &bot.patterns), ("patterns_raw", &bot.patterns_raw)] {
        for (index, rule) in rules.iter().enumerate() {
            if let Err(e) = regex::Regex::new(&rule.pattern) {
                errors.push(ValidationError::InvalidPattern {
                    id: bot.id.clone(),
                    field,
                    index,
                    error: e.to_string(),
                });
            }
        }
    }
}
