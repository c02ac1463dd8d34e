use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use adrules_core::config::{load_core_config, CoreConfig};
use adrules_core::db::{run_migrations, DatabaseMigrator, DatabasePool};
use adrules_engine::{
    AdPlatformConnector, EngineApiBuilder, EngineConfig, EngineServices, EntityState, HttpConnector,
    InMemoryConnector, LogNotifier, Notifier, PlatformLimits, WebhookNotifier,
};
use adrules_protocol::metrics::MetricsSnapshot;
use adrules_rules::pg::{PgHistoryBackend, PgRuleBackend, RulesMigrator};
use adrules_rules::{AlertLog, HistoryLogger, RuleApiBuilder, RuleStore, TracingAlertSink};
use anyhow::Context;
use serde::Deserialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::output;

const ALERT_LOG_CAPACITY: usize = 256;

pub struct ServeOptions {
    pub bind: String,
    pub simulate: bool,
    pub seed: Option<PathBuf>,
    pub templates: Option<PathBuf>,
    pub workers: Option<usize>,
    pub connector_url: Option<String>,
    pub notification_webhook: Option<String>,
    pub schedule_interval: Option<Duration>,
    pub trigger_interval: Option<Duration>,
}

impl ServeOptions {
    /// Command-line flags win over the environment-derived config.
    fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        let mut config = EngineConfig::from_env()?;
        if let Some(workers) = self.workers {
            config.workers = workers.max(1);
        }
        if let Some(url) = &self.connector_url {
            config.connector_base_url = Some(url.clone());
        }
        if let Some(webhook) = &self.notification_webhook {
            config.notification_webhook = Some(webhook.clone());
        }
        if let Some(interval) = self.schedule_interval {
            config.schedule_interval = interval;
        }
        if let Some(interval) = self.trigger_interval {
            config.trigger_interval = interval;
        }
        Ok(config)
    }
}

/// Entities and metrics preloaded into the simulated platform.
#[derive(Debug, Default, Deserialize)]
struct SimulationSeed {
    #[serde(default)]
    entities: Vec<EntityState>,
    #[serde(default)]
    snapshots: Vec<MetricsSnapshot>,
}

fn load_seed(path: &Path) -> anyhow::Result<SimulationSeed> {
    let raw = fs::read_to_string(path).with_context(|| format!("failed to read seed {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid seed file {}", path.display()))
}

async fn open_stores(core: &CoreConfig, alerts: &AlertLog) -> anyhow::Result<(RuleStore, HistoryLogger)> {
    let alert_sink = Arc::new(alerts.clone());
    match core.database_url() {
        Some(url) => {
            let pool = DatabasePool::connect_with_url(url).await?;
            let migrators: Vec<Box<dyn DatabaseMigrator + Send + Sync>> = vec![Box::new(RulesMigrator)];
            run_migrations(&pool, &migrators).await?;
            info!("using postgres rule storage");
            Ok((
                RuleStore::new(Arc::new(PgRuleBackend::new(pool.clone()))),
                HistoryLogger::new(Arc::new(PgHistoryBackend::new(pool)), alert_sink),
            ))
        }
        None => {
            warn!("DATABASE_URL not set; rules and history live in memory only");
            Ok((RuleStore::in_memory(), HistoryLogger::in_memory(alert_sink)))
        }
    }
}

fn build_connector(options: &ServeOptions, config: &EngineConfig) -> anyhow::Result<Arc<dyn AdPlatformConnector>> {
    let limits = PlatformLimits {
        min_budget: config.min_budget,
        min_bid: config.min_bid,
    };

    match (&config.connector_base_url, options.simulate) {
        (Some(url), false) => {
            info!(%url, "using http ad-platform connector");
            Ok(Arc::new(HttpConnector::new(url, config.connector_timeout, limits)?))
        }
        (None, false) => anyhow::bail!("no connector configured: pass --connector-url or --simulate"),
        (_, true) => {
            let connector = InMemoryConnector::new(limits);
            if let Some(path) = &options.seed {
                let seed = load_seed(path)?;
                info!(
                    entities = seed.entities.len(),
                    snapshots = seed.snapshots.len(),
                    "seeding simulated platform"
                );
                seed.entities.into_iter().for_each(|entity| connector.put_entity(entity));
                seed.snapshots
                    .into_iter()
                    .for_each(|snapshot| connector.put_snapshot(snapshot));
            }
            info!("using simulated ad platform");
            Ok(Arc::new(connector))
        }
    }
}

fn build_notifier(config: &EngineConfig) -> anyhow::Result<Arc<dyn Notifier>> {
    Ok(match &config.notification_webhook {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.connector_timeout)?),
        None => Arc::new(LogNotifier),
    })
}

pub async fn serve(options: ServeOptions) -> anyhow::Result<()> {
    let core = load_core_config()?;
    let engine_config = options.engine_config()?;
    let bind_addr: SocketAddr = options
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", options.bind))?;

    let alerts = AlertLog::new(ALERT_LOG_CAPACITY, Arc::new(TracingAlertSink));
    let (store, history) = open_stores(&core, &alerts).await?;
    let catalog = Arc::new(output::load_catalog(options.templates.as_deref())?);
    info!(templates = catalog.len(), "template catalogue loaded");

    let connector = build_connector(&options, &engine_config)?;
    let notifier = build_notifier(&engine_config)?;

    let engine = EngineApiBuilder::new(
        EngineServices {
            store: store.clone(),
            history: history.clone(),
            alerts,
            connector,
            notifier,
        },
        engine_config,
    )
    .start()?;

    let app = RuleApiBuilder::new(store, history, catalog)
        .into_router()
        .merge(engine.router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let listener = TcpListener::bind(bind_addr).await?;
    let actual_addr = listener.local_addr()?;
    info!(%actual_addr, node = %core.node_name, "starting adrules service");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("http server stopped, draining engine");
    engine.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
