use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

pub const DEFAULT_PORT: u16 = 5433;
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Server settings, read once at startup from `TIMETABLED_*` variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends since the last compaction before the compactor rewrites it.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "timetabled".into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source. Unparseable numbers keep their
    /// default and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "TIMETABLED_PORT").unwrap_or(defaults.port),
            bind: lookup("TIMETABLED_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("TIMETABLED_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("TIMETABLED_PASSWORD").unwrap_or(defaults.password),
            max_connections: parsed(&lookup, "TIMETABLED_MAX_CONNECTIONS")
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "TIMETABLED_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "TIMETABLED_METRICS_PORT"),
            tls_cert: lookup("TIMETABLED_TLS_CERT"),
            tls_key: lookup("TIMETABLED_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("ignoring {name}={raw:?}: not a valid number");
            None
        }
    }
}
