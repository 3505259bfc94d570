//! Server settings from `ROADSTAY_*` environment variables.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("both ROADSTAY_TLS_CERT and ROADSTAY_TLS_KEY must be set, or neither")]
    PartialTls,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsFiles {
    pub cert: PathBuf,
    pub key: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: IpAddr,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub tls: Option<TlsFiles>,
    pub metrics_port: Option<u16>,
    pub directory_file: Option<PathBuf>,
    pub admins: Vec<String>,
    /// Age after which pending reservations are rejected. `None` disables it.
    pub pending_ttl: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: IpAddr::from([0, 0, 0, 0]),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roadstay".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls: None,
            metrics_port: None,
            directory_file: None,
            admins: Vec::new(),
            pending_ttl: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset keys take defaults; set but
    /// malformed keys are errors.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Config::default();

        let tls = match (get("ROADSTAY_TLS_CERT"), get("ROADSTAY_TLS_KEY")) {
            (None, None) => None,
            (Some(cert), Some(key)) => Some(TlsFiles {
                cert: cert.into(),
                key: key.into(),
            }),
            _ => return Err(ConfigError::PartialTls),
        };

        let pending_ttl = parse_opt::<i64>("ROADSTAY_PENDING_TTL_HOURS", get("ROADSTAY_PENDING_TTL_HOURS"))?;
        if let Some(hours) = pending_ttl
            && hours <= 0
        {
            return Err(invalid("ROADSTAY_PENDING_TTL_HOURS", &hours.to_string(), "must be positive"));
        }

        let max_connections = parse_opt("ROADSTAY_MAX_CONNECTIONS", get("ROADSTAY_MAX_CONNECTIONS"))?
            .unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(invalid("ROADSTAY_MAX_CONNECTIONS", "0", "must be positive"));
        }

        Ok(Self {
            bind: parse_opt("ROADSTAY_BIND", get("ROADSTAY_BIND"))?.unwrap_or(defaults.bind),
            port: parse_opt("ROADSTAY_PORT", get("ROADSTAY_PORT"))?.unwrap_or(defaults.port),
            data_dir: get("ROADSTAY_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            password: get("ROADSTAY_PASSWORD").unwrap_or(defaults.password),
            max_connections,
            compact_threshold: parse_opt("ROADSTAY_COMPACT_THRESHOLD", get("ROADSTAY_COMPACT_THRESHOLD"))?
                .unwrap_or(defaults.compact_threshold),
            tls,
            metrics_port: parse_opt("ROADSTAY_METRICS_PORT", get("ROADSTAY_METRICS_PORT"))?,
            directory_file: get("ROADSTAY_DIRECTORY_FILE").map(PathBuf::from),
            admins: get("ROADSTAY_ADMINS")
                .map(|list| {
                    list.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
            pending_ttl: pending_ttl.map(Duration::hours),
        })
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("reservations.wal")
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_opt<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|v| {
        v.trim()
            .parse()
            .map_err(|e: T::Err| invalid(var, &v, &e.to_string()))
    })
    .transpose()
}
