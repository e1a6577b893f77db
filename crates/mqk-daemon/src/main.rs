//! mqk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, resolves config,
//! connects the database, wires the process orchestrator, and starts the
//! HTTP server. All route handlers live in `routes.rs`; all shared state
//! types live in `state.rs`; concrete collaborators live in `components.rs`.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use chrono::Utc;
use mqk_config::AutonomyRuntimeConfig;
use mqk_daemon::{
    components::{HttpAdvisoryOracle, PaperExchange},
    routes, state,
};
use mqk_alerts::{AlertDedupeTracker, AlertPolicyConfig, AlertStore, ChannelRouting};
use mqk_daemon::reflect_job::{self, PolicyDefaults};
use mqk_eventscan::{EvaluateInput, EventScanConfig, EventScanCoordinator, ScanVerdict};
use mqk_heartbeat::{ExecutionMode as HeartbeatExecutionMode, HeartbeatConfig, HeartbeatSupervisor};
use mqk_policy::MutatorConfig;
use mqk_portfolio::Micros;
use mqk_runtime::Runtime;
use mqk_scheduler::{JobDefinition, JobHandler, PgJobStore, ScheduleKind, Scheduler};
use tokio::sync::Mutex;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{debug, info, warn, Level};

const DISCOVERY_SCAN_JOB: &str = "discovery_scan";
const REFLECTIVE_MUTATION_JOB: &str = "reflective_mutation";

/// The only venue this build's paper exchange reports via `Executor::provider`.
/// A live Hyperliquid adapter would report this same string.
const CONFIGURED_VENUE: &str = "paper";

fn to_heartbeat_execution_mode(mode: mqk_config::autonomy::ExecutionMode) -> HeartbeatExecutionMode {
    match mode {
        mqk_config::autonomy::ExecutionMode::Paper => HeartbeatExecutionMode::Paper,
        mqk_config::autonomy::ExecutionMode::Live => HeartbeatExecutionMode::Live,
        mqk_config::autonomy::ExecutionMode::Webhook => HeartbeatExecutionMode::Webhook,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Silent if the file does not exist — production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    let config = resolve_config();

    let pool = mqk_db::connect_from_env().await.context("connect to Postgres")?;
    mqk_db::migrate(&pool).await.context("run database migrations")?;
    info!("database connected and migrated");

    let shared = Arc::new(state::AppState::new(pool.clone(), config.clone()));
    state::spawn_heartbeat(shared.bus.clone(), Duration::from_secs(1));

    let job_store = Arc::new(PgJobStore::new(pool.clone()));
    let scheduler = Arc::new(Scheduler::new(job_store, "mqk-daemon"));

    let recovered = scheduler
        .recover_at_startup(Utc::now())
        .await
        .context("recover expired leases at startup")?;
    if !recovered.is_empty() {
        warn!(?recovered, "recovered jobs with expired leases at startup");
    }

    register_discovery_scan(&scheduler, &config, pool.clone()).await?;
    register_reflective_mutation(&scheduler, &config, pool.clone()).await?;

    let exchange = Arc::new(
        PaperExchange::new(pool.clone(), Micros::new(100_000 * 1_000_000), 5)
            .await
            .context("load paper exchange")?,
    );
    let oracle_url =
        std::env::var("MQK_ADVISORY_ORACLE_URL").unwrap_or_else(|_| "http://127.0.0.1:8081/v1/decide".to_string());
    let oracle = HttpAdvisoryOracle::new(oracle_url);

    let heartbeat_cfg = HeartbeatConfig {
        enabled: config.heartbeat.enabled,
        execution_mode: to_heartbeat_execution_mode(config.execution.mode),
        configured_venue: CONFIGURED_VENUE.to_string(),
        tick_interval_seconds: config.heartbeat.tick_interval_seconds,
        rolling_buffer_size: config.heartbeat.rolling_buffer_size,
        max_calls_per_hour: config.heartbeat.max_calls_per_hour,
        ..HeartbeatConfig::default()
    };
    let supervisor = Arc::new(Mutex::new(HeartbeatSupervisor::new(
        heartbeat_cfg,
        exchange.clone(),
        exchange.clone(),
        oracle,
    )));

    let runtime = Runtime::spawn(
        scheduler,
        Duration::from_millis(config.scheduler.tick_interval_ms),
        supervisor,
        Duration::from_secs(config.heartbeat.tick_interval_seconds),
    );

    let app = routes::build_router(Arc::clone(&shared))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr_from_env().unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8899)));
    info!("mqk-daemon listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    runtime.shutdown(Duration::from_secs(10)).await?;
    Ok(())
}

/// Loads and merges YAML config files named in `MQK_CONFIG_PATHS` (a
/// comma-separated list), if set. A missing env var, a missing file, or a
/// parse error all degrade to documented defaults rather than aborting
/// startup — config is an optimization over defaults, not a precondition.
fn resolve_config() -> AutonomyRuntimeConfig {
    let paths_env = std::env::var("MQK_CONFIG_PATHS").unwrap_or_default();
    let paths: Vec<&str> = paths_env.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

    if paths.is_empty() {
        return AutonomyRuntimeConfig::default();
    }

    match mqk_config::load_layered_yaml(&paths) {
        Ok(loaded) => {
            info!(config_hash = %loaded.config_hash, "resolved config from MQK_CONFIG_PATHS");
            AutonomyRuntimeConfig::resolve(&loaded.config_json)
        }
        Err(e) => {
            warn!(error = %e, "failed to load MQK_CONFIG_PATHS, falling back to defaults");
            AutonomyRuntimeConfig::default()
        }
    }
}

/// Registers the interval-scheduled discovery-scan job. Its handler gates on
/// the event-scan coordinator's cooldown (so a CLI-forced early tick and the
/// job's own cadence share one debounce) and logs whether policy currently
/// permits anything beyond observation. Actual strategy signal generation is
/// an external collaborator this build does not implement.
async fn register_discovery_scan(
    scheduler: &Arc<Scheduler<PgJobStore>>,
    config: &AutonomyRuntimeConfig,
    pool: sqlx::PgPool,
) -> anyhow::Result<()> {
    let def = JobDefinition {
        name: DISCOVERY_SCAN_JOB.to_string(),
        schedule: ScheduleKind::Interval {
            period_ms: (config.autonomy.scan_interval_seconds as i64) * 1000,
        },
        lease_ms: config.scheduler.default_lease_ms as i64,
    };

    let coordinator = Arc::new(Mutex::new(EventScanCoordinator::new(EventScanConfig {
        enabled: config.event_scan.enabled,
        cooldown: Duration::from_millis(config.event_scan.cooldown_ms),
    })));

    let handler: Arc<dyn JobHandler> = Arc::new(move || {
        let coordinator = coordinator.clone();
        let pool = pool.clone();
        async move {
            let now = Utc::now();
            let verdict = {
                let mut c = coordinator.lock().await;
                c.try_acquire(&EvaluateInput {
                    event_key: DISCOVERY_SCAN_JOB,
                    item_count: 1,
                    min_items: 1,
                    now,
                })
            };

            match verdict {
                ScanVerdict::Allowed => {
                    let policy = mqk_db::load_policy_state(&pool).await?.unwrap_or_default();
                    let observation_only = policy.observation_only_until.map(|u| u > now).unwrap_or(false);
                    if observation_only {
                        info!("discovery scan admitted but policy is observation-only; no orders will be placed");
                    } else {
                        info!("discovery scan admitted");
                    }
                }
                other => debug!(?other, "discovery scan not admitted"),
            }
            Ok(())
        }
    });

    scheduler.register_job(def, handler, Utc::now()).await?;
    Ok(())
}

/// Registers the reflective-mutation job: on the same cadence as the
/// discovery scan, folds the recent trade journal into the policy-state row
/// and raises an alert the first time a pass forces observation mode.
async fn register_reflective_mutation(
    scheduler: &Arc<Scheduler<PgJobStore>>,
    config: &AutonomyRuntimeConfig,
    pool: sqlx::PgPool,
) -> anyhow::Result<()> {
    let def = JobDefinition {
        name: REFLECTIVE_MUTATION_JOB.to_string(),
        schedule: ScheduleKind::Interval {
            period_ms: (config.autonomy.scan_interval_seconds as i64) * 1000,
        },
        lease_ms: config.scheduler.default_lease_ms as i64,
    };

    let defaults = PolicyDefaults {
        min_edge: 0.03,
        max_trades_per_scan: config.autonomy.max_trades_per_day,
        leverage_cap: config.hyperliquid.max_leverage,
    };
    let alerts = Arc::new(AlertStore::new(pool.clone()));
    let dedupe = Arc::new(Mutex::new(AlertDedupeTracker::default()));
    let alert_policy = Arc::new(AlertPolicyConfig {
        enabled: config.alerts.enabled,
        actionable_reasons: None,
        dedupe_window: chrono::Duration::seconds(config.alerts.dedupe_window_seconds as i64),
        cooldown: chrono::Duration::seconds(config.alerts.cooldown_seconds as i64),
        channels: ChannelRouting {
            default: vec!["log".to_string()],
            by_severity: std::collections::HashMap::new(),
        },
    });
    let mutator_cfg = MutatorConfig {
        observation_forcing: mqk_policy::mutator::ObservationForcingConfig {
            scan_interval_seconds: config.autonomy.scan_interval_seconds as i64,
            ..Default::default()
        },
        ..Default::default()
    };

    let handler: Arc<dyn JobHandler> = Arc::new(move || {
        let pool = pool.clone();
        let alerts = alerts.clone();
        let dedupe = dedupe.clone();
        let alert_policy = alert_policy.clone();
        let mutator_cfg = mutator_cfg.clone();
        let defaults = PolicyDefaults {
            min_edge: defaults.min_edge,
            max_trades_per_scan: defaults.max_trades_per_scan,
            leverage_cap: defaults.leverage_cap,
        };
        async move { reflect_job::run_once(&pool, &alerts, &dedupe, &alert_policy, &mutator_cfg, &defaults).await }
    });

    scheduler.register_job(def, handler, Utc::now()).await?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn bind_addr_from_env() -> Option<SocketAddr> {
    std::env::var("MQK_DAEMON_ADDR").ok()?.parse().ok()
}

/// CORS: allow only localhost origins.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
        "http://localhost:1420",
        "http://127.0.0.1:1420",
    ];

    let origins: Vec<HeaderValue> = allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
