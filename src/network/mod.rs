//! Network module.
//!
//! Contains the dialer, the framed Transport with its subscriber fan-out,
//! and fixed-interval pacing.

pub mod dial;
pub mod limit;
mod transport;

pub use transport::{Subscription, Transport};
