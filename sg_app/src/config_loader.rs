use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use config::File;
use serde::Deserialize;
use sg_ratelimit::LimitConfig;
use sg_ratelimit::RateLimit;

use crate::errors::AppError;
use crate::errors::Result;

const DEFAULT_REQUESTS: u32 = 10;

/// Limits to enforce together, plus how many gated requests to issue
#[derive(Debug, Deserialize)]
pub struct GateConfig {
    pub limits: Vec<LimitConfig>,
    #[serde(default = "default_requests")]
    pub requests: u32,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_requests() -> u32 {
    DEFAULT_REQUESTS
}

/// Where and how verbosely the gate logs
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub level: String,
    /// Log every reacquire round of a group acquisition
    pub group_retries: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { directory: "logs".to_string(), level: "info".to_string(), group_retries: false }
    }
}

impl Default for GateConfig {
    /// A burst cap next to a slower sustained quota
    fn default() -> Self {
        Self {
            limits: vec![LimitConfig::new("burst", 2, Duration::from_millis(250)), LimitConfig::new("sustained", 5, Duration::from_secs(1))],
            requests: DEFAULT_REQUESTS,
            logging: LoggingConfig::default(),
        }
    }
}

impl GateConfig {
    /// Build every configured limit, naming the first one that is invalid
    pub fn build_limits(&self) -> Result<Vec<Arc<RateLimit>>> {
        if self.limits.is_empty() {
            return Err(AppError::NoLimits);
        }

        self.limits
            .iter()
            .map(|limit| limit.build().map(Arc::new).map_err(|source| AppError::InvalidLimit { name: limit.name.clone(), source }))
            .collect()
    }
}

pub fn load_gate_config<P: AsRef<Path>>(path: P) -> std::result::Result<GateConfig, ConfigError> {
    let config = Config::builder().add_source(File::from(path.as_ref())).build()?;

    config.try_deserialize()
}

/// Load gate config with fallback to default
///
/// The load error comes back alongside the defaults so it can be logged once tracing
/// is configured from them.
pub fn load_gate_config_or_default(path: &str) -> (GateConfig, Option<ConfigError>) {
    match load_gate_config(path) {
        Ok(config) => (config, None),
        Err(err) => (GateConfig::default(), Some(err)),
    }
}
