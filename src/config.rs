use std::path::PathBuf;
use std::str::FromStr;

/// Server settings, read from `CREWCAL_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// Log records between compactions; 0 disables compaction.
    pub compact_threshold: u64,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 5433,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            password: "crewcal".into(),
            max_connections: 256,
            compact_threshold: 1000,
            tls_cert: None,
            tls_key: None,
            metrics_port: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset or unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parse_var(&lookup, "CREWCAL_PORT").unwrap_or(defaults.port),
            bind: lookup("CREWCAL_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("CREWCAL_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            password: lookup("CREWCAL_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "CREWCAL_MAX_CONNECTIONS").unwrap_or(defaults.max_connections),
            compact_threshold: parse_var(&lookup, "CREWCAL_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            tls_cert: lookup("CREWCAL_TLS_CERT"),
            tls_key: lookup("CREWCAL_TLS_KEY"),
            metrics_port: parse_var(&lookup, "CREWCAL_METRICS_PORT"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|s| s.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = Config::from_lookup(|_| None);
        assert_eq!(config, Config::default());
        assert_eq!(config.listen_addr(), "0.0.0.0:5433");
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("CREWCAL_PORT", "6543"),
            ("CREWCAL_BIND", "127.0.0.1"),
            ("CREWCAL_DATA_DIR", "/var/lib/crewcal"),
            ("CREWCAL_PASSWORD", "s3cret"),
            ("CREWCAL_MAX_CONNECTIONS", "16"),
            ("CREWCAL_COMPACT_THRESHOLD", "0"),
            ("CREWCAL_TLS_CERT", "cert.pem"),
            ("CREWCAL_TLS_KEY", "key.pem"),
            ("CREWCAL_METRICS_PORT", "9100"),
        ]));
        assert_eq!(config.port, 6543);
        assert_eq!(config.listen_addr(), "127.0.0.1:6543");
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/crewcal"));
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.max_connections, 16);
        assert_eq!(config.compact_threshold, 0);
        assert_eq!(config.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(config.tls_key.as_deref(), Some("key.pem"));
        assert_eq!(config.metrics_port, Some(9100));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("CREWCAL_PORT", "not-a-port"),
            ("CREWCAL_MAX_CONNECTIONS", "-1"),
            ("CREWCAL_METRICS_PORT", "99999"),
        ]));
        assert_eq!(config.port, 5433);
        assert_eq!(config.max_connections, 256);
        assert_eq!(config.metrics_port, None);
    }
}
