use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};

use schedule_leveler::config::ServerConfig;
use schedule_leveler::http::{build_router, AppState};
use schedule_leveler::logging::init_tracing;
use schedule_leveler::models::ProjectSnapshot;
use schedule_leveler::service::{InMemoryStore, LevelingService, StaticTokenAuth};

fn load_seed(config: &ServerConfig) -> Result<Vec<ProjectSnapshot>> {
    let Some(path) = &config.seed_path else {
        return Ok(Vec::new());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading seed snapshots from {}", path.display()))?;
    let snapshots: Vec<ProjectSnapshot> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing seed snapshots from {}", path.display()))?;
    Ok(snapshots)
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(ServerConfig::DEFAULT_FILE));
    let config = ServerConfig::load(&config_path).context("loading configuration")?;
    init_tracing(&config.log_filter).context("installing tracing subscriber")?;

    let snapshots = load_seed(&config)?;
    tracing::info!(
        projects = snapshots.len(),
        tokens = config.api_tokens.len(),
        "seeded in-memory store"
    );

    let store = Arc::new(InMemoryStore::with_snapshots(snapshots));
    let auth = Arc::new(StaticTokenAuth::new(&config.api_tokens));
    let service = LevelingService::new(
        store,
        auth,
        config.solver.clone(),
        config.request_timeout(),
    );
    let app = build_router(AppState::new(service));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "schedule leveler listening");
    axum::serve(listener, app).await.context("serving http")?;
    Ok(())
}
