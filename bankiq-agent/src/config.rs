//! Configuration resolution for bankiq-agent
//!
//! Settings resolve with CLI → environment → TOML file → compiled default
//! priority. The winning source for the file layer is logged so operators
//! can see where a value came from.

use bankiq_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// Command-line arguments. Every flag also reads its `BANKIQ_*` environment
/// variable, so container deployments need no argv plumbing.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "bankiq-agent", about = "BankIQ agent gateway")]
pub struct Cli {
    /// Path to a TOML config file
    #[arg(long, env = "BANKIQ_CONFIG")]
    pub config: Option<PathBuf>,

    /// TCP port to listen on
    #[arg(long, env = "BANKIQ_PORT")]
    pub port: Option<u16>,

    /// Base URL of the hosted conversational AI backend
    #[arg(long, env = "BANKIQ_BACKEND_URL")]
    pub backend_url: Option<String>,

    /// Base URL of the pre-indexed knowledge-base retrieval endpoint
    #[arg(long, env = "BANKIQ_KNOWLEDGE_BASE_URL")]
    pub knowledge_base_url: Option<String>,
}

/// Optional TOML file layer. Field names match the CLI flags.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileConfig {
    pub port: Option<u16>,
    pub backend_url: Option<String>,
    pub knowledge_base_url: Option<String>,
    pub fdic_base_url: Option<String>,
    pub edgar_base_url: Option<String>,
    pub cache_ttl_filings_secs: Option<u64>,
    pub cache_ttl_metrics_secs: Option<u64>,
    pub cache_ttl_search_secs: Option<u64>,
    pub job_timeout_secs: Option<u64>,
    pub source_timeout_secs: Option<u64>,
    pub job_retention_secs: Option<u64>,
    pub sweep_interval_secs: Option<u64>,
}

/// Fully resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub port: u16,
    pub backend_url: String,
    pub knowledge_base_url: String,
    pub fdic_base_url: String,
    pub edgar_base_url: String,
    /// Per-category cache TTLs, fixed at configuration time
    pub cache_ttl_filings: Duration,
    pub cache_ttl_metrics: Duration,
    pub cache_ttl_search: Duration,
    /// Overall per-job ceiling; a job with no terminal transition inside
    /// this budget is forced to `failed`
    pub job_timeout: Duration,
    /// Per-upstream-call budget, strictly shorter than the job ceiling so a
    /// slow source can be abandoned in favor of the next fallback
    pub source_timeout: Duration,
    /// How long terminal jobs stay readable before eviction
    pub job_retention: Duration,
    /// Retention sweeper interval
    pub sweep_interval: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            port: 5810,
            backend_url: "http://127.0.0.1:8080/invocations".to_string(),
            knowledge_base_url: "http://127.0.0.1:8081".to_string(),
            fdic_base_url: "https://api.fdic.gov".to_string(),
            edgar_base_url: "https://data.sec.gov".to_string(),
            cache_ttl_filings: Duration::from_secs(24 * 60 * 60),
            cache_ttl_metrics: Duration::from_secs(60 * 60),
            cache_ttl_search: Duration::from_secs(6 * 60 * 60),
            job_timeout: Duration::from_secs(300),
            source_timeout: Duration::from_secs(20),
            job_retention: Duration::from_secs(900),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

impl AgentConfig {
    /// Resolve configuration from CLI arguments, the environment (via clap's
    /// env fallbacks), an optional TOML file, and compiled defaults.
    pub fn resolve(cli: &Cli) -> Result<Self> {
        let file = match &cli.config {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("read config {}: {}", path.display(), e))
                })?;
                let parsed: FileConfig = toml::from_str(&content)
                    .map_err(|e| Error::Config(format!("parse config {}: {}", path.display(), e)))?;
                info!(path = %path.display(), "Loaded TOML config layer");
                parsed
            }
            None => FileConfig::default(),
        };

        let defaults = AgentConfig::default();
        let secs = Duration::from_secs;

        let config = AgentConfig {
            port: cli.port.or(file.port).unwrap_or(defaults.port),
            backend_url: cli
                .backend_url
                .clone()
                .or(file.backend_url)
                .unwrap_or(defaults.backend_url),
            knowledge_base_url: cli
                .knowledge_base_url
                .clone()
                .or(file.knowledge_base_url)
                .unwrap_or(defaults.knowledge_base_url),
            fdic_base_url: file.fdic_base_url.unwrap_or(defaults.fdic_base_url),
            edgar_base_url: file.edgar_base_url.unwrap_or(defaults.edgar_base_url),
            cache_ttl_filings: file
                .cache_ttl_filings_secs
                .map(secs)
                .unwrap_or(defaults.cache_ttl_filings),
            cache_ttl_metrics: file
                .cache_ttl_metrics_secs
                .map(secs)
                .unwrap_or(defaults.cache_ttl_metrics),
            cache_ttl_search: file
                .cache_ttl_search_secs
                .map(secs)
                .unwrap_or(defaults.cache_ttl_search),
            job_timeout: file
                .job_timeout_secs
                .map(secs)
                .unwrap_or(defaults.job_timeout),
            source_timeout: file
                .source_timeout_secs
                .map(secs)
                .unwrap_or(defaults.source_timeout),
            job_retention: file
                .job_retention_secs
                .map(secs)
                .unwrap_or(defaults.job_retention),
            sweep_interval: file
                .sweep_interval_secs
                .map(secs)
                .unwrap_or(defaults.sweep_interval),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that would break the timeout layering.
    fn validate(&self) -> Result<()> {
        if self.source_timeout >= self.job_timeout {
            return Err(Error::Config(format!(
                "source_timeout ({:?}) must be shorter than job_timeout ({:?})",
                self.source_timeout, self.job_timeout
            )));
        }
        if self.sweep_interval > self.job_retention {
            warn!(
                sweep_interval_secs = self.sweep_interval.as_secs(),
                job_retention_secs = self.job_retention.as_secs(),
                "Sweep interval exceeds retention window; terminal jobs will linger"
            );
        }
        Ok(())
    }
}
