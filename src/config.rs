//! Server configuration from `TABLEMATCH_*` environment variables.

use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    /// Directory holding `reservations.wal`.
    pub data_dir: PathBuf,
    /// JSON file with diners, restaurants and tables. Empty directory if unset.
    pub seed_path: Option<PathBuf>,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends before the compactor rewrites the log.
    pub compact_threshold: u64,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            seed_path: None,
            password: "tablematch".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, BoxError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; unset or empty values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, BoxError> {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            bind: get("TABLEMATCH_BIND").unwrap_or(defaults.bind),
            port: parse_or(get("TABLEMATCH_PORT"), "TABLEMATCH_PORT", defaults.port)?,
            data_dir: get("TABLEMATCH_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            seed_path: get("TABLEMATCH_SEED").map(PathBuf::from),
            password: get("TABLEMATCH_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_or(
                get("TABLEMATCH_MAX_CONNECTIONS"),
                "TABLEMATCH_MAX_CONNECTIONS",
                defaults.max_connections,
            )?,
            compact_threshold: parse_or(
                get("TABLEMATCH_COMPACT_THRESHOLD"),
                "TABLEMATCH_COMPACT_THRESHOLD",
                defaults.compact_threshold,
            )?,
            tls_cert: get("TABLEMATCH_TLS_CERT").map(PathBuf::from),
            tls_key: get("TABLEMATCH_TLS_KEY").map(PathBuf::from),
            metrics_port: get("TABLEMATCH_METRICS_PORT")
                .map(|v| v.parse::<u16>().map_err(|e| format!("TABLEMATCH_METRICS_PORT: {e}")))
                .transpose()?,
        })
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T>(value: Option<String>, name: &str, default: T) -> Result<T, BoxError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v.parse().map_err(|e| format!("{name}: {e}").into()),
        None => Ok(default),
    }
}
