use std::time::{Duration, Instant};

pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod event_engine_job;
pub mod gateway;
pub mod notifier;
pub mod placement;
pub mod poller_job;
pub mod reconciler;
pub mod recovery;
pub mod report;
pub mod resize_job;
pub mod state;

/// Drift-corrected cooldown: sleep only the time left in the interval, or
/// not at all when the cycle overran it.
pub fn remaining_cooldown(started: Instant, interval: Duration) -> Duration {
    interval.saturating_sub(started.elapsed())
}
