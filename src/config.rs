use crate::feed::VehicleIdPolicy;
use crate::routing::RoutingEngine;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("could not read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },
}

/// Whether the pause between cycles accounts for the time the cycle took.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SleepPolicy {
    /// Always sleep the full interval.
    #[default]
    Fixed,
    /// Sleep the interval minus the elapsed cycle time.
    Aligned,
}

impl FromStr for SleepPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(SleepPolicy::Fixed),
            "aligned" => Ok(SleepPolicy::Aligned),
            other => Err(format!("expected fixed or aligned, got {other}")),
        }
    }
}

/// Settings as written in a RON file. Every field is optional; environment
/// variables take precedence.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct ConfigFile {
    pub feed_url: Option<String>,
    pub routing_engine_url: Option<String>,
    pub routing_engine: Option<RoutingEngine>,
    pub routing_profile: Option<String>,
    pub refresh_interval_secs: Option<u64>,
    pub sleep_policy: Option<SleepPolicy>,
    pub concurrency_cap: Option<usize>,
    pub batch_size: Option<usize>,
    pub path_length: Option<usize>,
    pub coordinate_precision: Option<u32>,
    pub route_timeout_ms: Option<u64>,
    pub feed_timeout_secs: Option<u64>,
    pub feed_archive_entry: Option<String>,
    pub vehicle_id_policy: Option<VehicleIdPolicy>,
    pub skip_stationary: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct LarchConfig {
    pub feed_url: Url,
    pub routing_engine_url: Url,
    pub routing_engine: RoutingEngine,
    pub routing_profile: String,
    pub refresh_interval: Duration,
    pub sleep_policy: SleepPolicy,
    pub concurrency_cap: usize,
    pub batch_size: usize,
    pub path_length: usize,
    pub coordinate_precision: u32,
    pub route_timeout: Duration,
    pub feed_timeout: Duration,
    pub feed_archive_entry: String,
    pub vehicle_id_policy: VehicleIdPolicy,
    pub skip_stationary: bool,
}

impl LarchConfig {
    /// Reads the optional RON file, overlays the process environment and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Overlays `lookup` on top of `file`. Split out from [`LarchConfig::load`]
    /// so tests do not touch the process environment.
    pub fn resolve(
        mut file: ConfigFile,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        overlay(&mut file.feed_url, lookup("FEED_URL"));
        overlay(&mut file.routing_engine_url, lookup("ROUTING_ENGINE_URL"));
        overlay(&mut file.routing_profile, lookup("ROUTING_PROFILE"));
        overlay(&mut file.feed_archive_entry, lookup("FEED_ARCHIVE_ENTRY"));
        overlay_parsed(&mut file.routing_engine, "ROUTING_ENGINE", &lookup)?;
        overlay_parsed(
            &mut file.refresh_interval_secs,
            "REFRESH_INTERVAL_SECS",
            &lookup,
        )?;
        overlay_parsed(&mut file.sleep_policy, "SLEEP_POLICY", &lookup)?;
        overlay_parsed(&mut file.concurrency_cap, "CONCURRENCY_CAP", &lookup)?;
        overlay_parsed(&mut file.batch_size, "BATCH_SIZE", &lookup)?;
        overlay_parsed(&mut file.path_length, "PATH_LENGTH", &lookup)?;
        overlay_parsed(
            &mut file.coordinate_precision,
            "COORDINATE_PRECISION",
            &lookup,
        )?;
        overlay_parsed(&mut file.route_timeout_ms, "ROUTE_TIMEOUT_MS", &lookup)?;
        overlay_parsed(&mut file.feed_timeout_secs, "FEED_TIMEOUT_SECS", &lookup)?;
        overlay_parsed(&mut file.vehicle_id_policy, "VEHICLE_ID_POLICY", &lookup)?;
        overlay_parsed(&mut file.skip_stationary, "SKIP_STATIONARY", &lookup)?;

        file.validate()
    }
}

impl ConfigFile {
    fn validate(self) -> Result<LarchConfig, ConfigError> {
        let feed_url = parse_url("FEED_URL", self.feed_url)?;
        let routing_engine_url = parse_url("ROUTING_ENGINE_URL", self.routing_engine_url)?;
        let routing_engine = self.routing_engine.unwrap_or_default();

        let refresh_interval_secs = at_least("REFRESH_INTERVAL_SECS", self.refresh_interval_secs, 60, 1)?;
        let concurrency_cap = at_least("CONCURRENCY_CAP", self.concurrency_cap, 500, 1)?;
        let batch_size = at_least("BATCH_SIZE", self.batch_size, 100, 1)?;
        let path_length = at_least("PATH_LENGTH", self.path_length, 10, 1)?;
        let route_timeout_ms = at_least("ROUTE_TIMEOUT_MS", self.route_timeout_ms, 10_000, 1)?;
        let feed_timeout_secs = at_least("FEED_TIMEOUT_SECS", self.feed_timeout_secs, 60, 1)?;

        let coordinate_precision = self.coordinate_precision.unwrap_or(5);
        if coordinate_precision > 10 {
            return Err(ConfigError::Invalid {
                key: "COORDINATE_PRECISION",
                value: coordinate_precision.to_string(),
                reason: String::from("must be at most 10"),
            });
        }

        let routing_profile = self
            .routing_profile
            .filter(|profile| !profile.trim().is_empty())
            .unwrap_or_else(|| routing_engine.default_profile().to_string());

        let feed_archive_entry = self
            .feed_archive_entry
            .filter(|entry| !entry.trim().is_empty())
            .unwrap_or_else(|| String::from("siri.xml"));

        Ok(LarchConfig {
            feed_url,
            routing_engine_url,
            routing_engine,
            routing_profile,
            refresh_interval: Duration::from_secs(refresh_interval_secs),
            sleep_policy: self.sleep_policy.unwrap_or_default(),
            concurrency_cap,
            batch_size,
            path_length,
            coordinate_precision,
            route_timeout: Duration::from_millis(route_timeout_ms),
            feed_timeout: Duration::from_secs(feed_timeout_secs),
            feed_archive_entry,
            vehicle_id_policy: self.vehicle_id_policy.unwrap_or_default(),
            skip_stationary: self.skip_stationary.unwrap_or(false),
        })
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    ron::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value {
        *slot = Some(value);
    }
}

fn overlay_parsed<T>(
    slot: &mut Option<T>,
    key: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        let parsed = raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })?;
        *slot = Some(parsed);
    }

    Ok(())
}

fn parse_url(key: &'static str, value: Option<String>) -> Result<Url, ConfigError> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or(ConfigError::Missing(key))?;

    let url = Url::parse(value.trim()).map_err(|e| ConfigError::Invalid {
        key,
        value: value.clone(),
        reason: e.to_string(),
    })?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid {
            key,
            value,
            reason: format!("unsupported scheme {other}"),
        }),
    }
}

fn at_least<T>(key: &'static str, value: Option<T>, default: T, minimum: T) -> Result<T, ConfigError>
where
    T: PartialOrd + std::fmt::Display,
{
    let value = value.unwrap_or(default);

    if value < minimum {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("must be at least {minimum}"),
        });
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("FEED_URL", "https://data.bus-data.dft.gov.uk/avl/download/bulk_archive"),
        ("ROUTING_ENGINE_URL", "http://localhost:8989"),
    ];

    #[test]
    fn defaults_with_required_urls() {
        let config = LarchConfig::resolve(ConfigFile::default(), env(&REQUIRED)).unwrap();

        assert_eq!(config.routing_engine, RoutingEngine::GraphHopper);
        assert_eq!(config.routing_profile, "car");
        assert_eq!(config.refresh_interval, Duration::from_secs(60));
        assert_eq!(config.sleep_policy, SleepPolicy::Fixed);
        assert_eq!(config.concurrency_cap, 500);
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.path_length, 10);
        assert_eq!(config.coordinate_precision, 5);
        assert_eq!(config.feed_archive_entry, "siri.xml");
        assert_eq!(config.vehicle_id_policy, VehicleIdPolicy::Composite);
        assert!(!config.skip_stationary);
    }

    #[test]
    fn missing_feed_url_is_fatal() {
        let err = LarchConfig::resolve(
            ConfigFile::default(),
            env(&[("ROUTING_ENGINE_URL", "http://localhost:8989")]),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Missing("FEED_URL")));
    }

    #[test]
    fn zero_concurrency_cap_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("CONCURRENCY_CAP", "0"));

        let err = LarchConfig::resolve(ConfigFile::default(), env(&pairs)).unwrap_err();

        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "CONCURRENCY_CAP",
                ..
            }
        ));
    }

    #[test]
    fn unparsable_number_is_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("PATH_LENGTH", "ten"));

        let err = LarchConfig::resolve(ConfigFile::default(), env(&pairs)).unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { key: "PATH_LENGTH", .. }));
    }

    #[test]
    fn environment_overrides_file() {
        let file: ConfigFile = ron::from_str(
            r#"(
                feed_url: Some("http://feed.example/archive.zip"),
                routing_engine_url: Some("http://osrm.example:5001"),
                routing_engine: Some(osrm),
                path_length: Some(8),
                vehicle_id_policy: Some(vehicle_ref),
            )"#,
        )
        .unwrap();

        let config =
            LarchConfig::resolve(file, env(&[("PATH_LENGTH", "12"), ("SLEEP_POLICY", "aligned")]))
                .unwrap();

        assert_eq!(config.routing_engine, RoutingEngine::Osrm);
        assert_eq!(config.routing_profile, "driving");
        assert_eq!(config.path_length, 12);
        assert_eq!(config.sleep_policy, SleepPolicy::Aligned);
        assert_eq!(config.vehicle_id_policy, VehicleIdPolicy::VehicleRef);
        assert_eq!(config.feed_url.as_str(), "http://feed.example/archive.zip");
    }

    #[test]
    fn non_http_url_is_rejected() {
        let err = LarchConfig::resolve(
            ConfigFile::default(),
            env(&[
                ("FEED_URL", "ftp://example.com/feed.zip"),
                ("ROUTING_ENGINE_URL", "http://localhost:8989"),
            ]),
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::Invalid { key: "FEED_URL", .. }));
    }
}
