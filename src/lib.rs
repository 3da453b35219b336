//! sitbot - a persistent IRC session engine.
//!
//! One outbound session per bot, fanned out to independent processing stages,
//! with regex-dispatched external commands and a bouncer that re-exposes the
//! live session to secondary clients.

pub mod admin;
pub mod bouncer;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gang;
pub mod login;
pub mod network;
pub mod pattern;
pub mod session;
pub mod stage;
pub mod state;
pub mod task;
pub mod telemetry;

pub use crate::admin::Admin;
pub use crate::gang::Gang;
pub use crate::session::{Session, SessionInfo};
