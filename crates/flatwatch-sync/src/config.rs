use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use flatwatch_adapters::AdapterSettings;
use flatwatch_core::{DispositionError, DispositionSet};
use flatwatch_storage::{HttpClientConfig, DEFAULT_USER_AGENT};
use thiserror::Error;

use crate::filter::PriceFilter;
use crate::retry::RetryPolicy;
use crate::scheduler::{RefreshIntervals, SchedulerSettings};

/// Discord caps a message at ten embeds, so a batch cannot be larger.
const MAX_EMBED_BATCH_SIZE: usize = 10;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is required")]
    Missing { var: &'static str },
    #[error("{var}={value:?} is invalid: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("{var} lists an unknown disposition: {source}")]
    Dispositions {
        var: &'static str,
        #[source]
        source: DispositionError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscordSettings {
    pub token: String,
    pub offers_channel: u64,
    pub dev_channel: u64,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub debug: bool,
    pub found_offers_file: PathBuf,
    pub refresh_interval_daytime_minutes: u64,
    pub refresh_interval_nighttime_minutes: u64,
    pub dispositions: DispositionSet,
    pub embed_batch_size: usize,
    pub min_price: Option<u64>,
    pub max_price: Option<u64>,
    pub image_deduplication_threshold: u32,
    pub discord_token: Option<String>,
    pub discord_offers_channel: Option<u64>,
    pub discord_dev_channel: Option<u64>,
    /// Source names to keep; empty keeps every shipped source.
    pub sources: Vec<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub source_timeout_secs: u64,
    pub retry_delay_ms: u64,
    pub batch_pacing_ms: u64,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from any variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        let dispositions = match get("DISPOSITIONS") {
            Some(raw) => raw.parse::<DispositionSet>().map_err(|source| ConfigError::Dispositions {
                var: "DISPOSITIONS",
                source,
            })?,
            None => DispositionSet::empty(),
        };

        let config = Self {
            debug: parse_bool("DEBUG", get("DEBUG"))?.unwrap_or(false),
            found_offers_file: get("FOUND_OFFERS_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("found_offers.txt")),
            refresh_interval_daytime_minutes: parse_num(
                "REFRESH_INTERVAL_DAYTIME_MINUTES",
                get("REFRESH_INTERVAL_DAYTIME_MINUTES"),
            )?
            .unwrap_or(30),
            refresh_interval_nighttime_minutes: parse_num(
                "REFRESH_INTERVAL_NIGHTTIME_MINUTES",
                get("REFRESH_INTERVAL_NIGHTTIME_MINUTES"),
            )?
            .unwrap_or(90),
            dispositions,
            embed_batch_size: parse_num("EMBED_BATCH_SIZE", get("EMBED_BATCH_SIZE"))?
                .unwrap_or(MAX_EMBED_BATCH_SIZE),
            min_price: parse_num("MIN_PRICE", get("MIN_PRICE"))?,
            max_price: parse_num("MAX_PRICE", get("MAX_PRICE"))?,
            image_deduplication_threshold: parse_num(
                "IMAGE_DEDUPLICATION_THRESHOLD",
                get("IMAGE_DEDUPLICATION_THRESHOLD"),
            )?
            .unwrap_or(5),
            discord_token: get("DISCORD_TOKEN"),
            discord_offers_channel: parse_num("DISCORD_OFFERS_CHANNEL", get("DISCORD_OFFERS_CHANNEL"))?,
            discord_dev_channel: parse_num("DISCORD_DEV_CHANNEL", get("DISCORD_DEV_CHANNEL"))?,
            sources: get("FLATWATCH_SOURCES")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            user_agent: get("FLATWATCH_USER_AGENT").unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            http_timeout_secs: parse_num("FLATWATCH_HTTP_TIMEOUT_SECS", get("FLATWATCH_HTTP_TIMEOUT_SECS"))?
                .unwrap_or(20),
            source_timeout_secs: parse_num(
                "FLATWATCH_SOURCE_TIMEOUT_SECS",
                get("FLATWATCH_SOURCE_TIMEOUT_SECS"),
            )?
            .unwrap_or(120),
            retry_delay_ms: parse_num("FLATWATCH_RETRY_DELAY_MS", get("FLATWATCH_RETRY_DELAY_MS"))?
                .unwrap_or(5_000),
            batch_pacing_ms: parse_num("FLATWATCH_BATCH_PACING_MS", get("FLATWATCH_BATCH_PACING_MS"))?
                .unwrap_or(1_500),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (var, minutes) in [
            ("REFRESH_INTERVAL_DAYTIME_MINUTES", self.refresh_interval_daytime_minutes),
            ("REFRESH_INTERVAL_NIGHTTIME_MINUTES", self.refresh_interval_nighttime_minutes),
        ] {
            if minutes == 0 {
                return Err(invalid(var, minutes, "must be at least one minute"));
            }
        }
        if !(1..=MAX_EMBED_BATCH_SIZE).contains(&self.embed_batch_size) {
            return Err(invalid(
                "EMBED_BATCH_SIZE",
                self.embed_batch_size,
                &format!("must be between 1 and {MAX_EMBED_BATCH_SIZE}"),
            ));
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(invalid("MIN_PRICE", min, "exceeds MAX_PRICE"));
            }
        }
        Ok(())
    }

    /// Credentials needed by `run`; previews work without them.
    pub fn discord(&self) -> Result<DiscordSettings, ConfigError> {
        Ok(DiscordSettings {
            token: self
                .discord_token
                .clone()
                .ok_or(ConfigError::Missing { var: "DISCORD_TOKEN" })?,
            offers_channel: self.discord_offers_channel.ok_or(ConfigError::Missing {
                var: "DISCORD_OFFERS_CHANNEL",
            })?,
            dev_channel: self.discord_dev_channel.ok_or(ConfigError::Missing {
                var: "DISCORD_DEV_CHANNEL",
            })?,
        })
    }

    pub fn adapter_settings(&self) -> AdapterSettings {
        AdapterSettings {
            dispositions: self.dispositions,
            min_price: self.min_price,
            max_price: self.max_price,
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: self.user_agent.clone(),
            ..Default::default()
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            intervals: RefreshIntervals {
                daytime: Duration::from_secs(self.refresh_interval_daytime_minutes * 60),
                nighttime: Duration::from_secs(self.refresh_interval_nighttime_minutes * 60),
            },
            batch_size: self.embed_batch_size,
            batch_pacing: Duration::from_millis(self.batch_pacing_ms),
            retry: RetryPolicy::forever(Duration::from_millis(self.retry_delay_ms)),
            price_filter: PriceFilter::new(self.min_price, self.max_price),
            dedup_threshold: self.image_deduplication_threshold,
            source_timeout: Duration::from_secs(self.source_timeout_secs),
        }
    }
}

fn invalid(var: &'static str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_num<T>(var: &'static str, raw: Option<String>) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|raw| {
        raw.trim()
            .parse::<T>()
            .map_err(|e| invalid(var, &raw, &e.to_string()))
    })
    .transpose()
}

fn parse_bool(var: &'static str, raw: Option<String>) -> Result<Option<bool>, ConfigError> {
    raw.map(|raw| match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, &raw, "expected a boolean")),
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flatwatch_core::Disposition;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<SyncConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SyncConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = config_from(&[]).unwrap();
        assert!(!config.debug);
        assert_eq!(config.found_offers_file, PathBuf::from("found_offers.txt"));
        assert_eq!(config.refresh_interval_daytime_minutes, 30);
        assert_eq!(config.refresh_interval_nighttime_minutes, 90);
        assert!(config.dispositions.is_empty());
        assert_eq!(config.embed_batch_size, 10);
        assert_eq!(config.image_deduplication_threshold, 5);
        assert_eq!(config.min_price, None);
        assert!(config.sources.is_empty());

        let settings = config.scheduler_settings();
        assert_eq!(settings.intervals.daytime, Duration::from_secs(30 * 60));
        assert_eq!(settings.retry.delay, Duration::from_secs(5));
        assert_eq!(settings.retry.deadline, None);
    }

    #[test]
    fn reads_dispositions_prices_and_sources() {
        let config = config_from(&[
            ("DEBUG", "True"),
            ("DISPOSITIONS", "2+kk, 3+1"),
            ("MIN_PRICE", "9000"),
            ("MAX_PRICE", "18000"),
            ("FLATWATCH_SOURCES", "bravis, realingo,"),
            ("DISCORD_TOKEN", "secret"),
            ("DISCORD_OFFERS_CHANNEL", "111"),
            ("DISCORD_DEV_CHANNEL", "222"),
        ])
        .unwrap();

        assert!(config.debug);
        assert!(config.dispositions.contains(Disposition::Flat2kk));
        assert!(config.dispositions.contains(Disposition::Flat3));
        assert!(!config.dispositions.contains(Disposition::Flat1kk));
        assert_eq!(config.adapter_settings().max_price, Some(18_000));
        assert_eq!(config.sources, vec!["bravis", "realingo"]);
        assert_eq!(
            config.discord().unwrap(),
            DiscordSettings {
                token: "secret".to_string(),
                offers_channel: 111,
                dev_channel: 222,
            }
        );
    }

    #[test]
    fn unknown_disposition_is_a_config_error() {
        let err = config_from(&[("DISPOSITIONS", "2+kk,penthouse")]).unwrap_err();
        assert!(matches!(err, ConfigError::Dispositions { .. }));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        assert!(matches!(
            config_from(&[("MIN_PRICE", "cheap")]),
            Err(ConfigError::Invalid { var: "MIN_PRICE", .. })
        ));
        assert!(matches!(
            config_from(&[("EMBED_BATCH_SIZE", "11")]),
            Err(ConfigError::Invalid { var: "EMBED_BATCH_SIZE", .. })
        ));
        assert!(matches!(
            config_from(&[("MIN_PRICE", "20000"), ("MAX_PRICE", "10000")]),
            Err(ConfigError::Invalid { var: "MIN_PRICE", .. })
        ));
        assert!(matches!(
            config_from(&[("REFRESH_INTERVAL_DAYTIME_MINUTES", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }

    #[test]
    fn missing_discord_settings_are_reported_by_name() {
        let config = config_from(&[("DISCORD_TOKEN", "secret")]).unwrap();
        match config.discord() {
            Err(ConfigError::Missing { var }) => assert_eq!(var, "DISCORD_OFFERS_CHANNEL"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
