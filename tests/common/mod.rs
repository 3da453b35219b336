//! Integration test common infrastructure.
//!
//! Provides a fake IRC server, a line-oriented test client and profile
//! helpers for driving sessions end to end.

pub mod client;
pub mod server;

#[allow(unused_imports)]
pub use client::TestClient;
#[allow(unused_imports)]
pub use server::{SERVER_NAME, TestServer};

use sitbot::config::{PatternRule, Profile};
use std::time::Duration;

/// A profile pointed at `server` with pacing turned off.
#[allow(dead_code)]
pub fn profile(id: &str, server: &TestServer) -> Profile {
    let mut profile = Profile::new(id, server.address(), "sitbot");
    profile.rate_ms = 0;
    profile.task_rate_ms = 0;
    profile.login_timeout_secs = 5;
    profile
}

#[allow(dead_code)]
pub fn rule(pattern: &str, template: &str) -> PatternRule {
    PatternRule::new(pattern, template)
}

/// Poll `check` until it holds or five seconds pass.
#[allow(dead_code)]
pub async fn eventually<F>(mut check: F) -> anyhow::Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("condition not reached in time");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}
