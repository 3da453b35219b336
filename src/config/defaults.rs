//! Default value functions for configuration.
//!
//! Separated into its own module for clarity and reuse.

// =============================================================================
// Rate Defaults
// =============================================================================

/// Transport write interval and task admission interval share this default.
pub fn default_rate_ms() -> u64 {
    1000
}

pub fn default_login_timeout_secs() -> u64 {
    30
}

// =============================================================================
// Sandbox Defaults
// =============================================================================

pub fn default_grace_ms() -> u64 {
    2000
}

// =============================================================================
// Bouncer Defaults
// =============================================================================

pub fn default_handshake_ms() -> u64 {
    1000
}

pub fn default_welcome_ms() -> u64 {
    1000
}

pub fn default_bouncer_write_interval_ms() -> u64 {
    1
}
