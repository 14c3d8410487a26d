//! Runtime configuration (C10, §6): every external input to the process is
//! an environment variable, read once at startup. This is the one place
//! the process exits non-zero on a bad value (§7) — a malformed feed
//! response never does.

use eyre::{eyre, Result};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Remote,
    Direct,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub store_mode: StoreMode,
    pub store_url: Option<String>,
    pub store_token: String,
    pub store_dsn: Option<String>,
    pub log_level: String,
    pub health_port: u16,
    pub disabled: BTreeSet<String>,
    pub nasa_firms_api_key: Option<String>,
    pub waqi_api_key: Option<String>,
    pub aprs_fi_api_key: Option<String>,
    pub opensky_client_id: Option<String>,
    pub opensky_client_secret: Option<String>,
    pub fetch_timeout: Duration,
}

/// Collector names `DISABLE_<NAME>` is checked against; kept in one place
/// so the supervisor's registration table and this scan can't drift apart.
pub const COLLECTOR_NAMES: &[&str] =
    &["seismic", "fogos", "gdacs", "ipma", "kiwisdr", "spaceweather", "tec", "aurora", "gfs", "aprs", "lightning"];

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Core of `from_env`, parameterized over the variable lookup so tests
    /// can exercise it without mutating real process environment.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let store_mode = match lookup("STORE_MODE").unwrap_or_else(|| "remote".to_string()).to_lowercase().as_str() {
            "remote" => StoreMode::Remote,
            "direct" => StoreMode::Direct,
            other => return Err(eyre!("STORE_MODE must be 'remote' or 'direct', got '{other}'")),
        };

        let store_url = lookup("STORE_URL");
        let store_token = lookup("STORE_TOKEN").unwrap_or_default();
        let store_dsn = lookup("STORE_DSN");

        match store_mode {
            StoreMode::Remote if store_url.is_none() => {
                return Err(eyre!("STORE_MODE=remote requires STORE_URL"));
            }
            StoreMode::Direct if store_dsn.is_none() => {
                return Err(eyre!("STORE_MODE=direct requires STORE_DSN"));
            }
            _ => {}
        }

        let log_level = lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let health_port: u16 = match lookup("HEALTH_PORT") {
            Some(v) => v.parse().map_err(|_| eyre!("HEALTH_PORT must be a valid port number, got '{v}'"))?,
            None => 8080,
        };

        let disabled = COLLECTOR_NAMES
            .iter()
            .filter(|name| {
                lookup(&format!("DISABLE_{}", name.to_uppercase()))
                    .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            })
            .map(|s| s.to_string())
            .collect();

        Ok(Self {
            store_mode,
            store_url,
            store_token,
            store_dsn,
            log_level,
            health_port,
            disabled,
            nasa_firms_api_key: lookup("NASA_FIRMS_API_KEY"),
            waqi_api_key: lookup("WAQI_API_KEY"),
            aprs_fi_api_key: lookup("APRS_FI_API_KEY"),
            opensky_client_id: lookup("OPENSKY_CLIENT_ID"),
            opensky_client_secret: lookup("OPENSKY_CLIENT_SECRET"),
            fetch_timeout: Duration::from_secs(30),
        })
    }

    pub fn is_disabled(&self, name: &str) -> bool {
        self.disabled.contains(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn lookup_from(vars: &BTreeMap<&str, &str>) -> impl Fn(&str) -> Option<String> + '_ {
        move |key| vars.get(key).map(|v| v.to_string())
    }

    #[test]
    fn remote_mode_requires_store_url() {
        let vars = BTreeMap::from([("STORE_MODE", "remote")]);
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("STORE_URL"));
    }

    #[test]
    fn direct_mode_requires_store_dsn() {
        let vars = BTreeMap::from([("STORE_MODE", "direct")]);
        let err = Config::from_lookup(lookup_from(&vars)).unwrap_err();
        assert!(err.to_string().contains("STORE_DSN"));
    }

    #[test]
    fn unknown_store_mode_is_rejected() {
        let vars = BTreeMap::from([("STORE_MODE", "carrier-pigeon")]);
        assert!(Config::from_lookup(lookup_from(&vars)).is_err());
    }

    #[test]
    fn disable_flags_are_per_collector() {
        let vars = BTreeMap::from([
            ("STORE_MODE", "remote"),
            ("STORE_URL", "http://localhost:8090"),
            ("DISABLE_GFS", "true"),
            ("DISABLE_APRS", "0"),
        ]);
        let cfg = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert!(cfg.is_disabled("gfs"));
        assert!(!cfg.is_disabled("aprs"));
        assert!(!cfg.is_disabled("fogos"));
    }

    #[test]
    fn health_port_defaults_to_8080() {
        let vars = BTreeMap::from([("STORE_MODE", "remote"), ("STORE_URL", "http://localhost:8090")]);
        let cfg = Config::from_lookup(lookup_from(&vars)).unwrap();
        assert_eq!(cfg.health_port, 8080);
    }
}
