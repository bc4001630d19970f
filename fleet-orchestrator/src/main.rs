use std::process::ExitCode;
use std::sync::Arc;

use fleet_providers::gce::{GceProvider, GceSettings};
use fleet_providers::mock::MockProvider;
use fleet_providers::ComputeProvider;

use fleet_orchestrator::config::{Config, ProviderKind};
use fleet_orchestrator::state::AppState;
use fleet_orchestrator::{event_engine_job, poller_job, report, resize_job};

const USAGE: &str = "Usage: fleet-orchestrator <config_file.yml>";

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let Some(config_path) = std::env::args().nth(1) else {
        println!("{}", USAGE);
        return ExitCode::from(2);
    };

    let config = match Config::load(&config_path).and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("invalid configuration {}: {}", config_path, e);
            return ExitCode::FAILURE;
        }
    };

    let provider: Arc<dyn ComputeProvider> = match config.provider {
        ProviderKind::Mock => Arc::new(MockProvider::new()),
        ProviderKind::Gce => {
            let Some(access_token) = config.resolve_access_token() else {
                tracing::error!("no usable access token configured");
                return ExitCode::FAILURE;
            };
            let settings = GceSettings {
                project_id: config.project_id.clone(),
                access_token,
                snapshot_source: config.snapshot_source.clone(),
                machine_type: config.machine_type.clone(),
                disk_type: config.disk_type.clone(),
                instance_tags: config.instance_tags.clone(),
            };
            match GceProvider::new(settings) {
                Ok(provider) => Arc::new(provider),
                Err(e) => {
                    tracing::error!("provider initialization failed: {:#}", e);
                    return ExitCode::FAILURE;
                }
            }
        }
    };

    let state = AppState::new(config, provider);

    // Without one complete fleet view nothing downstream can be trusted.
    let Some(initial) = poller_job::poll_all_zones(&state).await else {
        tracing::error!("initial fleet poll failed; aborting");
        return ExitCode::FAILURE;
    };
    *state.live.write().await = initial;
    state.sync_zone_instance_counts().await;

    let startup = format!(
        "Instance monitoring started for project '{}'",
        state.config.project_id
    );
    state.notifier.log(&startup).await;
    {
        let cache = state.cache.lock().await;
        let live = state.live.read().await;
        let html = report::html_summary(
            &state.config,
            &cache,
            &live,
            &state.notifier.recent_logs(10),
        );
        state.notifier.queue_report(&startup, &html);
    }
    state.notifier.flush_email_queue().await;

    let poller = tokio::spawn(poller_job::run(state.clone()));
    let engine = tokio::spawn(event_engine_job::run(state.clone()));
    let resizer = tokio::spawn(resize_job::run(state.clone()));

    wait_for_shutdown_signal().await;
    state.begin_shutdown();
    state
        .notifier
        .log(&format!(
            "Instance monitoring stopped for project '{}'",
            state.config.project_id
        ))
        .await;

    for (name, handle) in [("poller", poller), ("event engine", engine), ("resizer", resizer)] {
        if let Err(e) = handle.await {
            tracing::error!("{} job did not shut down cleanly: {}", name, e);
        }
    }

    // Recoveries are drained by now, so this snapshot is consistent.
    state.persist_cache().await;
    state.notifier.flush_email_queue().await;
    ExitCode::SUCCESS
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                tracing::error!("cannot install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
