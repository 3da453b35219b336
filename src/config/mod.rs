//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Top-level config, sandbox and bouncer settings
//! - [`profile`]: Per-bot declarative profiles and pattern rules
//! - [`defaults`]: serde default functions
//! - [`validation`]: startup checks

mod defaults;
mod profile;
mod types;
mod validation;

pub use profile::{PatternRule, Profile};
pub use types::{BouncerConfig, Config, ConfigError, SandboxConfig};
pub use validation::{ValidationError, validate};
