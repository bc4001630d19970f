use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::remaining_cooldown;
use crate::state::AppState;

// TODO: create instances from the snapshot when the fleet drops below
// min_instance_count, observing min_zone_spread when placing them.
/// Fleet resizing job. Currently a paced no-op that only keeps the loop
/// structure in place.
pub async fn run(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.engine_interval_secs);
    while !state.shutting_down() {
        let started = Instant::now();
        tokio::time::sleep(remaining_cooldown(started, interval)).await;
    }
}
