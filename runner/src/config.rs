use crate::{insert::DEFAULT_BATCH_SIZE, provision::DEFAULT_TABLE_PREFIX};
use http::Uri;
use serde::{Deserialize, Serialize};
use std::{
    env, fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{error, info, warn};

/// the only place the database connection string is read from
pub const CONNECTION_ENV: &str = "DBCONN";

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("Config contains invalid values")]
    Invalid,
    #[error("Environment variable {0} is not set")]
    MissingEnvironment(&'static str),
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct BenchConfig {
    // JSON array with one object per record
    pub dataset: PathBuf,
    // prepended to a variant name to find its table
    pub table_prefix: String,
    // rows per insert statement
    pub batch_size: usize,
    pub iterations: IterationConfig,
    // fixed seed for the variant order, a fresh one is drawn if unset
    pub seed: Option<u64>,
    pub gateway: GatewayConfig,
    pub dashboard: Option<DashboardConfig>,
    pub sizelimit: SizeLimitConfig,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct IterationConfig {
    pub insert: usize,
    pub query: usize,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct GatewayConfig {
    #[serde(with = "http_serde::uri")]
    pub url: Uri,
    // no timeout unless configured
    pub timeout_ms: Option<u64>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct DashboardConfig {
    #[serde(with = "http_serde::uri")]
    pub url: Uri,
    // dashboard ids, e.g. `b3a7d255-.../postgresql-benchmark-load`
    pub insert: String,
    pub query: String,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields, default)]
pub struct SizeLimitConfig {
    // smallest and largest number of chunks aggregated into a single value
    pub from: usize,
    pub to: usize,
    pub rows_per_chunk: usize,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::from("data/records.json"),
            table_prefix: DEFAULT_TABLE_PREFIX.to_owned(),
            batch_size: DEFAULT_BATCH_SIZE,
            iterations: IterationConfig::default(),
            seed: None,
            gateway: GatewayConfig::default(),
            dashboard: None,
            sizelimit: SizeLimitConfig::default(),
        }
    }
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            insert: 15,
            query: 200,
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: Uri::from_static("http://localhost:9191/"),
            timeout_ms: None,
        }
    }
}

impl Default for SizeLimitConfig {
    fn default() -> Self {
        Self {
            from: 14,
            to: 20,
            rows_per_chunk: 100_000,
        }
    }
}

impl BenchConfig {
    /// load the YAML config at `path`, or the defaults if no path was given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigErrors> {
        match path {
            Some(path) => {
                let content = fs::read_to_string(path).map_err(|source| ConfigErrors::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                let config = Self::from_yaml(&content)?;

                info!(path = ?path, "Loaded config");

                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigErrors> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validate all values, returns true if at least one problem was found.
    ///
    /// Every problem is logged, not just the first one.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.batch_size == 0 {
            error!("batch_size must be at least 1");
            contains_error = true;
        }

        if self.iterations.insert == 0 {
            error!("iterations.insert must be at least 1");
            contains_error = true;
        }

        if self.iterations.query == 0 {
            error!("iterations.query must be at least 1");
            contains_error = true;
        }

        if self.table_prefix.is_empty() {
            error!("table_prefix cannot be empty, tables would be named after bare variants");
            contains_error = true;
        }

        if self.sizelimit.from > self.sizelimit.to {
            error!(
                "sizelimit.from ({}) is larger than sizelimit.to ({})",
                self.sizelimit.from, self.sizelimit.to
            );
            contains_error = true;
        }

        if self.sizelimit.from == 0 || self.sizelimit.rows_per_chunk == 0 {
            error!("sizelimit.from and sizelimit.rows_per_chunk must be at least 1");
            contains_error = true;
        }

        if self.gateway.url.host().is_none() {
            error!("gateway.url ({}) has no host", self.gateway.url);
            contains_error = true;
        }

        if !self.dataset.is_file() {
            warn!(
                "dataset {} does not exist (yet), loading it will fail",
                self.dataset.to_string_lossy()
            );
        }

        contains_error
    }

    /// connection string for the benchmarked database
    pub fn connection_string() -> Result<String, ConfigErrors> {
        env::var(CONNECTION_ENV).map_err(|_| ConfigErrors::MissingEnvironment(CONNECTION_ENV))
    }
}
