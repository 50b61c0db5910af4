//! Server configuration
//!
//! Every flag falls back to an environment variable, then to a default.

use clap::Parser;
use std::path::PathBuf;

/// Command-line and environment configuration for the server binary
#[derive(Debug, Clone, Parser)]
#[command(name = "newsroom")]
#[command(about = "Collaborative document server with ranked block locking")]
#[command(version)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "NEWSROOM_BIND", default_value = "0.0.0.0:3000")]
    pub bind: String,

    /// SQLite connection string
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:newsroom.db")]
    pub database_url: String,

    /// Idle time after which a block lock is reclaimed
    #[arg(long, env = "NEWSROOM_STALE_THRESHOLD_SECS", default_value_t = 300)]
    pub stale_threshold_secs: u64,

    /// How often the stale-lock sweep runs
    #[arg(long, env = "NEWSROOM_SWEEP_INTERVAL_SECS", default_value_t = 30)]
    pub sweep_interval_secs: u64,

    /// Rank levels a requester must be above the holder to preempt
    #[arg(long, env = "NEWSROOM_PREEMPTION_GAP", default_value_t = 2)]
    pub preemption_gap: u32,

    /// Ranks allowed to force-unlock a block
    #[arg(
        long,
        env = "NEWSROOM_EMERGENCY_RANKS",
        value_delimiter = ',',
        default_value = "1,2"
    )]
    pub emergency_ranks: Vec<u32>,

    /// JSON role table; built-in newsroom roles are used when absent
    #[arg(long, env = "NEWSROOM_ROLES_FILE")]
    pub roles_file: Option<PathBuf>,
}

impl ServerConfig {
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            stale_threshold: chrono::Duration::seconds(self.stale_threshold_secs as i64),
            sweep_interval: std::time::Duration::from_secs(self.sweep_interval_secs.max(1)),
            preemption_gap: self.preemption_gap,
            emergency_ranks: self.emergency_ranks.clone(),
        }
    }
}

/// Engine-level settings shared by every document session
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub stale_threshold: chrono::Duration,
    pub sweep_interval: std::time::Duration,
    pub preemption_gap: u32,
    pub emergency_ranks: Vec<u32>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            stale_threshold: chrono::Duration::seconds(300),
            sweep_interval: std::time::Duration::from_secs(30),
            preemption_gap: 2,
            emergency_ranks: vec![1, 2],
        }
    }
}
