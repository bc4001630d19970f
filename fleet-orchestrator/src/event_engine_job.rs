use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::task::JoinSet;

use fleet_common::events::FleetEvent;

use crate::placement::ZoneRanker;
use crate::reconciler::{self, ReconcileParams};
use crate::recovery::{self, plan_recovery};
use crate::remaining_cooldown;
use crate::report;
use crate::state::AppState;

/// Continuously reconcile the cached view against the live view and react
/// to what changed. Event handlers run as tasks in a `JoinSet` so shutdown
/// can drain them instead of abandoning half-done recoveries.
pub async fn run(state: Arc<AppState>) {
    let interval = Duration::from_secs(state.config.engine_interval_secs);
    let mut handlers: JoinSet<()> = JoinSet::new();

    while !state.shutting_down() {
        let started = Instant::now();
        if let Err(e) = tick(&state, &mut handlers).await {
            tracing::error!("event engine tick failed: {:#}", e);
            state.notifier.queue_report(
                "Fleet orchestrator engine failure",
                &format!("The event engine hit an error and will retry: {:#}", e),
            );
        }
        // Reap finished handlers without blocking the tick.
        while handlers.try_join_next().is_some() {}
        tokio::time::sleep(remaining_cooldown(started, interval)).await;
    }

    while handlers.join_next().await.is_some() {}
}

async fn tick(state: &Arc<AppState>, handlers: &mut JoinSet<()>) -> Result<()> {
    let live = state.live.read().await.clone();
    let params = ReconcileParams::from(&state.config);

    let (outcome, report_html) = {
        let mut cache = state.cache.lock().await;
        let outcome = reconciler::reconcile(&mut cache, &live, params);
        let report_html = if outcome.events.is_empty() {
            None
        } else {
            Some(report::html_summary(
                &state.config,
                &cache,
                &live,
                &state.notifier.recent_logs(10),
            ))
        };
        (outcome, report_html)
    };

    for (zone, name) in &outcome.stop_requests {
        let state = state.clone();
        let zone = zone.clone();
        let name = name.clone();
        handlers.spawn(async move {
            if state.gateway.stop_instance(&zone, &name).await.is_none() {
                tracing::error!("stop of matured instance {} in {} failed", name, zone);
            }
        });
    }

    // Termination announcements run synchronously so they report the flag
    // and strategy as they were at this tick, before recovery rotates them.
    for event in &outcome.events {
        if let FleetEvent::Terminated(instance) = event {
            let target = {
                let cache = state.cache.lock().await;
                let live = state.live.read().await;
                let ranker = ZoneRanker::new(&state.config, &cache, &live);
                plan_recovery(instance, &ranker)
            };
            state
                .notifier
                .announce_termination(
                    instance,
                    &target,
                    report_html.as_deref().unwrap_or_default(),
                )
                .await;
        }
    }

    state.dispatcher.enqueue(outcome.events);
    for event in state.dispatcher.drain() {
        let state = state.clone();
        let report_html = report_html.clone();
        handlers.spawn(async move {
            handle_event(state, event, report_html).await;
        });
    }

    state.persist_cache_if_idle().await;

    let flush_state = state.clone();
    handlers.spawn(async move {
        flush_state.notifier.flush_email_queue().await;
    });

    Ok(())
}

async fn handle_event(state: Arc<AppState>, event: FleetEvent, report_html: Option<String>) {
    match event {
        FleetEvent::Created(instance) => state.notifier.announce_created(&instance).await,
        FleetEvent::Started(instance) => {
            state
                .notifier
                .announce_started(&instance, report_html.as_deref())
                .await
        }
        FleetEvent::Running(_) => {}
        FleetEvent::Deleted(instance) => state.notifier.announce_deleted(&instance).await,
        FleetEvent::Terminated(instance) => {
            recovery::process_terminated_instance(state, instance).await
        }
    }
}
