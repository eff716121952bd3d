//! Kiosk configuration: TOML file, environment overrides, validation.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs, io};

use serde::Deserialize;
use toml::de::Error as TomlError;

use crate::actuation::{
    ActuationPolicy, CONFIDENCE_THRESHOLD, DEFAULT_BIN_COUNT, IDLE_WINDOW, TICK_INTERVAL,
};
use crate::locator::{CandidateList, DEFAULT_PROBE_TIMEOUT};
use crate::mapping::Mapping;
use crate::model::{
    BinIndex, DEFAULT_PORT, Endpoint, EndpointParseError, FALLBACK_HOST, WasteClass,
};
use crate::source::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT,
    DEFAULT_RECONNECT_DELAY, FeedOptions,
};

/// Environment variable naming the config file.
pub const ENV_CONFIG: &str = "ECOSORT_CONFIG";
/// Environment variable pinning the backend and skipping discovery.
pub const ENV_BACKEND: &str = "ECOSORT_BACKEND";
/// Environment variable carrying the kiosk's own host name.
pub const ENV_PAGE_HOST: &str = "ECOSORT_PAGE_HOST";
/// Environment variable overriding the poll period in milliseconds.
pub const ENV_POLL_INTERVAL_MS: &str = "ECOSORT_POLL_INTERVAL_MS";

const DEFAULT_CANDIDATES: [&str; 3] = ["192.168.1.100", "localhost", "127.0.0.1"];

#[derive(thiserror::Error, Debug)]
/// Errors raised while loading configuration.
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {}: {source}", path.display())]
    Io {
        /// File that failed.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("invalid config file: {0}")]
    Parse(#[from] TomlError),
    /// An endpoint string is malformed.
    #[error(transparent)]
    Endpoint(#[from] EndpointParseError),
    /// A value is out of range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    backend: BackendSection,
    feeds: FeedSection,
    actuation: ActuationSection,
    mapping: BTreeMap<String, usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackendSection {
    candidates: Option<Vec<String>>,
    port: Option<u16>,
    fallback: Option<String>,
    endpoint: Option<String>,
    page_host: Option<String>,
    probe_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FeedSection {
    push_enabled: Option<bool>,
    poll_enabled: Option<bool>,
    poll_interval_ms: Option<u64>,
    poll_timeout_ms: Option<u64>,
    reconnect_delay_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ActuationSection {
    threshold: Option<f32>,
    idle_window_ms: Option<u64>,
    tick_interval_ms: Option<u64>,
    bin_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
/// Discovery settings.
pub struct BackendSettings {
    /// Hosts probed in order, before the fallback.
    pub candidates: Vec<Endpoint>,
    /// Endpoint returned when nothing answers.
    pub fallback: Endpoint,
    /// Skip discovery and use this endpoint.
    pub pinned: Option<Endpoint>,
    /// The kiosk's own host, probed first when not loopback.
    pub page_host: Option<String>,
    /// Port assumed for candidates and the page host.
    pub port: u16,
    /// Per-candidate probe bound.
    pub probe_timeout: Duration,
}

impl BackendSettings {
    /// Probe list with the page host promoted.
    #[must_use]
    pub fn candidate_list(&self) -> CandidateList {
        CandidateList::new(self.candidates.iter().cloned(), self.fallback.clone())
            .with_page_host(self.page_host.as_deref(), self.port)
    }
}

#[derive(Debug, Clone, PartialEq)]
/// Fully resolved kiosk configuration.
pub struct KioskConfig {
    /// Discovery settings.
    pub backend: BackendSettings,
    /// Feed selection and timing.
    pub feeds: FeedOptions,
    /// Controller tunables.
    pub policy: ActuationPolicy,
    /// Number of physical bins.
    pub bin_count: usize,
    /// Mapping installed at startup.
    pub mapping: Mapping,
}

impl Default for KioskConfig {
    fn default() -> Self {
        Self {
            backend: BackendSettings {
                candidates: DEFAULT_CANDIDATES
                    .iter()
                    .map(|host| Endpoint::new(*host, DEFAULT_PORT))
                    .collect(),
                fallback: Endpoint::fallback(),
                pinned: None,
                page_host: None,
                port: DEFAULT_PORT,
                probe_timeout: DEFAULT_PROBE_TIMEOUT,
            },
            feeds: FeedOptions::default(),
            policy: ActuationPolicy::default(),
            bin_count: DEFAULT_BIN_COUNT,
            mapping: Mapping::default(),
        }
    }
}

impl KioskConfig {
    /// Load from `path` (or `ECOSORT_CONFIG` when `None`), then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, or a value is invalid.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = env::var(ENV_CONFIG).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .map_err(|source| ConfigError::Io { path, source })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown keys, and
    /// [`ConfigError::Endpoint`] for malformed host strings.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        Self::from_file(file)
    }

    fn from_file(file: ConfigFile) -> Result<Self, ConfigError> {
        let backend = file.backend;
        let port = backend.port.unwrap_or(DEFAULT_PORT);

        let candidates = match backend.candidates {
            Some(hosts) => hosts
                .iter()
                .map(|host| Endpoint::parse_with_default_port(host, port))
                .collect::<Result<Vec<_>, _>>()?,
            None => DEFAULT_CANDIDATES
                .iter()
                .map(|host| Endpoint::new(*host, port))
                .collect(),
        };
        let fallback = backend
            .fallback
            .map(|raw| Endpoint::parse_with_default_port(&raw, port))
            .transpose()?
            .unwrap_or_else(|| Endpoint::new(FALLBACK_HOST, port));
        let pinned = backend
            .endpoint
            .map(|raw| Endpoint::parse_with_default_port(&raw, port))
            .transpose()?;

        let mut mapping = Mapping::default();
        for (name, bin) in file.mapping {
            let class = name.parse::<WasteClass>().map_err(|err| ConfigError::Invalid {
                key: "mapping",
                reason: err.to_string(),
            })?;
            mapping.assign(class, BinIndex(bin));
        }

        Ok(Self {
            backend: BackendSettings {
                candidates,
                fallback,
                pinned,
                page_host: backend.page_host,
                port,
                probe_timeout: millis_or(backend.probe_timeout_ms, DEFAULT_PROBE_TIMEOUT),
            },
            feeds: FeedOptions {
                push: file.feeds.push_enabled.unwrap_or(true),
                poll: file.feeds.poll_enabled.unwrap_or(true),
                poll_interval: millis_or(file.feeds.poll_interval_ms, DEFAULT_POLL_INTERVAL),
                poll_timeout: millis_or(file.feeds.poll_timeout_ms, DEFAULT_POLL_TIMEOUT),
                reconnect_delay: zero_disables(
                    file.feeds.reconnect_delay_ms,
                    DEFAULT_RECONNECT_DELAY,
                ),
                connect_timeout: millis_or(
                    file.feeds.connect_timeout_ms,
                    DEFAULT_CONNECT_TIMEOUT,
                ),
                idle_timeout: zero_disables(file.feeds.idle_timeout_ms, DEFAULT_IDLE_TIMEOUT),
            },
            policy: ActuationPolicy {
                threshold: file.actuation.threshold.unwrap_or(CONFIDENCE_THRESHOLD),
                idle_window: millis_or(file.actuation.idle_window_ms, IDLE_WINDOW),
                tick_interval: millis_or(file.actuation.tick_interval_ms, TICK_INTERVAL),
            },
            bin_count: file.actuation.bin_count.unwrap_or(DEFAULT_BIN_COUNT),
            mapping,
        })
    }

    /// Apply `ECOSORT_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when an override value does not parse.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(raw) = present(ENV_BACKEND) {
            self.backend.pinned = Some(Endpoint::parse_with_default_port(&raw, self.backend.port)?);
        }
        if let Some(host) = present(ENV_PAGE_HOST) {
            self.backend.page_host = Some(host.trim().to_owned());
        }
        if let Some(raw) = present(ENV_POLL_INTERVAL_MS) {
            let millis = raw.trim().parse::<u64>().map_err(|err| ConfigError::Invalid {
                key: ENV_POLL_INTERVAL_MS,
                reason: err.to_string(),
            })?;
            self.feeds.poll_interval = Duration::from_millis(millis);
        }
        Ok(())
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.policy.threshold) {
            return Err(invalid("actuation.threshold", "must be within [0, 1]"));
        }
        if self.bin_count == 0 {
            return Err(invalid("actuation.bin_count", "must be at least 1"));
        }
        if self.policy.idle_window.is_zero() {
            return Err(invalid("actuation.idle_window_ms", "must be greater than zero"));
        }
        if self.policy.tick_interval.is_zero() {
            return Err(invalid("actuation.tick_interval_ms", "must be greater than zero"));
        }
        if self.feeds.poll_interval.is_zero() {
            return Err(invalid("feeds.poll_interval_ms", "must be greater than zero"));
        }
        if self.feeds.poll_timeout.is_zero() {
            return Err(invalid("feeds.poll_timeout_ms", "must be greater than zero"));
        }
        if self.feeds.connect_timeout.is_zero() {
            return Err(invalid("feeds.connect_timeout_ms", "must be greater than zero"));
        }
        if self.backend.probe_timeout.is_zero() {
            return Err(invalid("backend.probe_timeout_ms", "must be greater than zero"));
        }
        if !self.feeds.push && !self.feeds.poll {
            return Err(invalid("feeds", "enable at least one of push or poll"));
        }
        Ok(())
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map_or(default, Duration::from_millis)
}

/// `Some(0)` turns the setting off; absent keeps `default`.
fn zero_disables(value: Option<u64>, default: Duration) -> Option<Duration> {
    match value {
        Some(0) => None,
        Some(millis) => Some(Duration::from_millis(millis)),
        None => Some(default),
    }
}

fn invalid(key: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key,
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let config = KioskConfig::from_toml_str("").expect("empty config parses");
        assert_eq!(config, KioskConfig::default(), "every key has a default");
        assert_eq!(
            config.backend.candidate_list().candidates().last(),
            Some(&Endpoint::fallback()),
            "the fallback is probed last"
        );
    }

    #[test]
    fn reads_every_section() {
        let raw = r#"
            [backend]
            candidates = ["10.29.180.26", "172.30.52.221:8000"]
            port = 8150
            page_host = "kiosk-01.local"
            probe_timeout_ms = 1500

            [feeds]
            push_enabled = false
            poll_interval_ms = 1500
            poll_timeout_ms = 4000
            reconnect_delay_ms = 0
            connect_timeout_ms = 2500
            idle_timeout_ms = 0

            [actuation]
            threshold = 0.6
            idle_window_ms = 1200
            bin_count = 4

            [mapping]
            plastic = 3
        "#;
        let config = KioskConfig::from_toml_str(raw).expect("valid config");

        assert_eq!(
            config.backend.candidates,
            vec![
                Endpoint::new("10.29.180.26", 8150),
                Endpoint::new("172.30.52.221", 8000)
            ],
            "candidates keep their explicit ports"
        );
        assert_eq!(
            config.backend.candidate_list().candidates().first(),
            Some(&Endpoint::new("kiosk-01.local", 8150)),
            "page host goes first"
        );
        assert_eq!(config.backend.probe_timeout, Duration::from_millis(1500), "probe bound");
        assert!(!config.feeds.push, "push disabled");
        assert!(config.feeds.poll, "poll keeps its default");
        assert_eq!(config.feeds.poll_timeout, Duration::from_millis(4000), "poll bound");
        assert_eq!(config.feeds.reconnect_delay, None, "zero disables reconnects");
        assert_eq!(
            config.feeds.connect_timeout,
            Duration::from_millis(2500),
            "handshake bound"
        );
        assert_eq!(config.feeds.idle_timeout, None, "zero disables the idle bound");
        assert_eq!(config.policy.idle_window, Duration::from_millis(1200), "idle window");
        assert_eq!(config.policy.tick_interval, TICK_INTERVAL, "tick keeps its default");
        assert_eq!(config.bin_count, 4, "bin count");
        assert_eq!(
            config.mapping.bin_for(WasteClass::Plastic),
            Some(BinIndex(3)),
            "mapping entry overrides the default"
        );
        assert_eq!(
            config.mapping.bin_for(WasteClass::Glass),
            Some(BinIndex(1)),
            "unlisted classes keep the default"
        );
        config.validate().expect("parsed config is in range");
    }

    #[test]
    fn rejects_unknown_keys_and_classes() {
        assert!(
            matches!(
                KioskConfig::from_toml_str("[backend]\nhots = []"),
                Err(ConfigError::Parse(_))
            ),
            "misspelt keys are rejected"
        );
        assert!(
            matches!(
                KioskConfig::from_toml_str("[mapping]\nbattery = 1"),
                Err(ConfigError::Invalid { key: "mapping", .. })
            ),
            "undeclared classes are rejected"
        );
    }

    #[test]
    fn environment_overrides_win() {
        let vars = HashMap::from([
            (ENV_BACKEND, "10.0.0.9:9000"),
            (ENV_PAGE_HOST, "kiosk"),
            (ENV_POLL_INTERVAL_MS, "750"),
        ]);
        let mut config = KioskConfig::default();
        config
            .apply_overrides(|key| vars.get(key).map(|value| (*value).to_owned()))
            .expect("overrides parse");

        assert_eq!(
            config.backend.pinned,
            Some(Endpoint::new("10.0.0.9", 9000)),
            "pinned backend"
        );
        assert_eq!(config.backend.page_host.as_deref(), Some("kiosk"), "page host");
        assert_eq!(
            config.feeds.poll_interval,
            Duration::from_millis(750),
            "poll interval"
        );
    }

    #[test]
    fn bad_override_is_reported() {
        let mut config = KioskConfig::default();
        let result = config.apply_overrides(|key| {
            (key == ENV_POLL_INTERVAL_MS).then(|| "soon".to_owned())
        });
        assert!(
            matches!(
                result,
                Err(ConfigError::Invalid {
                    key: ENV_POLL_INTERVAL_MS,
                    ..
                })
            ),
            "a non-numeric interval names its variable"
        );
    }

    fn rejection(edit: impl FnOnce(&mut KioskConfig)) -> ConfigError {
        let mut config = KioskConfig::default();
        edit(&mut config);
        config.validate().expect_err("edited config is out of range")
    }

    #[test]
    fn validation_catches_out_of_range_values() {
        assert!(
            matches!(
                rejection(|config| config.policy.threshold = 1.5),
                ConfigError::Invalid {
                    key: "actuation.threshold",
                    ..
                }
            ),
            "threshold above one"
        );
        assert!(
            matches!(
                rejection(|config| config.bin_count = 0),
                ConfigError::Invalid {
                    key: "actuation.bin_count",
                    ..
                }
            ),
            "no bins"
        );
        assert!(
            matches!(
                rejection(|config| {
                    config.feeds.push = false;
                    config.feeds.poll = false;
                }),
                ConfigError::Invalid { key: "feeds", .. }
            ),
            "no feed enabled"
        );
        assert!(
            matches!(
                rejection(|config| config.feeds.poll_timeout = Duration::ZERO),
                ConfigError::Invalid {
                    key: "feeds.poll_timeout_ms",
                    ..
                }
            ),
            "a zero poll bound would fail every tick"
        );
    }
}
