//! Configuration types for the leveling engine and its server.

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order in which conflicting tasks are chosen for delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelingOrder {
    /// Most remaining slack after the move goes first.
    #[default]
    Float,
    /// Least important (largest priority rank) goes first.
    Priority,
}

/// Per-request leveling options.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelingOptions {
    /// Never delay a task with zero (or negative) total float.
    pub respect_critical_path: bool,
    pub leveling_order: LevelingOrder,
}

impl Default for LevelingOptions {
    fn default() -> Self {
        Self {
            respect_critical_path: true,
            leveling_order: LevelingOrder::Float,
        }
    }
}

/// Solver limits and trace verbosity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Hard ceiling on solver iterations regardless of project size.
    pub max_iterations_cap: usize,
    /// 0-3, see [`crate::logging`].
    pub verbosity: u8,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations_cap: 500,
            verbosity: 0,
        }
    }
}

/// A bearer token accepted by the static auth provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApiToken {
    pub token: String,
    pub subject: String,
    pub company_id: Uuid,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub request_timeout_ms: u64,
    /// JSON array of project snapshots loaded into the in-memory store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed_path: Option<PathBuf>,
    pub api_tokens: Vec<ApiToken>,
    pub log_filter: String,
    pub solver: SolverConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
            seed_path: None,
            api_tokens: Vec::new(),
            log_filter: "info,tower_http=debug".to_string(),
            solver: SolverConfig::default(),
        }
    }
}

impl ServerConfig {
    pub const ENV_PREFIX: &'static str = "LEVELER_";
    pub const DEFAULT_FILE: &'static str = "leveler.toml";

    /// Precedence, highest first: `LEVELER_*` env vars (`__` nests), the
    /// TOML file, defaults.
    pub fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(Self::ENV_PREFIX).split("__"))
    }

    pub fn load(path: &Path) -> Result<Self, figment::Error> {
        Self::figment(path).extract()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
