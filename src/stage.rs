//! Inbound processing stages.
//!
//! Each stage owns its own [`Subscription`] to the session Transport and runs
//! as an independent consumer, so a slow stage never reorders frames for
//! another.

use sitbot_proto::Message;
use std::sync::Arc;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug};

use crate::network::Subscription;

/// A consumer of the session's inbound frames.
pub trait Stage: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// React to one frame. Long-running work goes through the scheduler.
    fn process(&self, msg: &Message);
}

/// Drive `stage` from `subscription` until the Transport closes.
pub fn spawn<S: Stage>(tracker: &TaskTracker, stage: Arc<S>, mut subscription: Subscription) {
    let span = tracing::debug_span!("stage", name = stage.name());
    tracker.spawn(
        async move {
            while let Some(msg) = subscription.recv().await {
                stage.process(&msg);
            }
            debug!("inbound closed");
        }
        .instrument(span),
    );
}
