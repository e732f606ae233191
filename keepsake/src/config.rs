use chrono::NaiveDate;
use serde::Deserialize;
use std::env;

fn parse_env_or<T: std::str::FromStr>(var: &str, default: T) -> T
where
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(val) => match val.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a `YYYY-MM-DD` env var, falling back to `default` on absence or bad input.
fn parse_env_date(var: &str, default: NaiveDate) -> NaiveDate {
    match env::var(var) {
        Ok(val) => match NaiveDate::parse_from_str(&val, "%Y-%m-%d") {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Invalid value '{}' for {}: {}. Using default.", val, var, e);
                default
            }
        },
        Err(_) => default,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub remote: RemoteConfig,
    pub photo: PhotoConfig,
    pub grid: GridConfig,
    pub feed: FeedConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub auth_token: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoConfig {
    pub max_width: u32,
    pub jpeg_quality: u8,
}

/// The calendar window the journal renders. The defaults cover the
/// season the journal ships with (Nov 2024 through Oct 2025).
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub cache_size: usize,
}

/// Resubscription behavior for the change feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedConfig {
    pub backoff_initial_ms: u64,
    pub backoff_cap_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            remote: RemoteConfig {
                base_url: env::var("KEEPSAKE_REMOTE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".to_string()),
                auth_token: env::var("KEEPSAKE_REMOTE_TOKEN").ok(),
                timeout_secs: parse_env_or("KEEPSAKE_REMOTE_TIMEOUT_SECS", 30),
            },
            photo: PhotoConfig {
                max_width: parse_env_or("KEEPSAKE_PHOTO_MAX_WIDTH", 1200),
                jpeg_quality: parse_env_or("KEEPSAKE_PHOTO_QUALITY", 80),
            },
            grid: GridConfig {
                window_start: parse_env_date(
                    "KEEPSAKE_WINDOW_START",
                    NaiveDate::from_ymd_opt(2024, 11, 1).unwrap_or_default(),
                ),
                window_end: parse_env_date(
                    "KEEPSAKE_WINDOW_END",
                    NaiveDate::from_ymd_opt(2025, 10, 31).unwrap_or_default(),
                ),
                cache_size: parse_env_or("KEEPSAKE_GRID_CACHE_SIZE", 16),
            },
            feed: FeedConfig {
                backoff_initial_ms: parse_env_or("KEEPSAKE_FEED_BACKOFF_MS", 500),
                backoff_cap_secs: parse_env_or("KEEPSAKE_FEED_BACKOFF_CAP_SECS", 30),
            },
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_defaults() {
        std::env::remove_var("KEEPSAKE_REMOTE_URL");
        std::env::remove_var("KEEPSAKE_PHOTO_MAX_WIDTH");
        std::env::remove_var("KEEPSAKE_WINDOW_START");

        let config = Config::default();
        assert_eq!(config.remote.base_url, "http://localhost:3000");
        assert!(config.remote.auth_token.is_none());
        assert_eq!(config.remote.timeout_secs, 30);
        assert_eq!(config.photo.max_width, 1200);
        assert_eq!(config.photo.jpeg_quality, 80);
        assert_eq!(
            config.grid.window_start,
            NaiveDate::from_ymd_opt(2024, 11, 1).unwrap()
        );
        assert_eq!(
            config.grid.window_end,
            NaiveDate::from_ymd_opt(2025, 10, 31).unwrap()
        );
        assert_eq!(config.feed.backoff_initial_ms, 500);
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        std::env::set_var("KEEPSAKE_REMOTE_URL", "http://backend:9000");
        std::env::set_var("KEEPSAKE_REMOTE_TOKEN", "secret");
        std::env::set_var("KEEPSAKE_PHOTO_MAX_WIDTH", "800");
        std::env::set_var("KEEPSAKE_WINDOW_START", "2025-01-01");

        let config = Config::from_env();
        assert_eq!(config.remote.base_url, "http://backend:9000");
        assert_eq!(config.remote.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.photo.max_width, 800);
        assert_eq!(
            config.grid.window_start,
            NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
        );

        std::env::remove_var("KEEPSAKE_REMOTE_URL");
        std::env::remove_var("KEEPSAKE_REMOTE_TOKEN");
        std::env::remove_var("KEEPSAKE_PHOTO_MAX_WIDTH");
        std::env::remove_var("KEEPSAKE_WINDOW_START");
    }

    #[test]
    #[serial]
    fn test_invalid_values_fall_back() {
        std::env::set_var("KEEPSAKE_PHOTO_MAX_WIDTH", "not-a-number");
        std::env::set_var("KEEPSAKE_WINDOW_END", "31/10/2025");

        let config = Config::default();
        assert_eq!(config.photo.max_width, 1200);
        assert_eq!(
            config.grid.window_end,
            NaiveDate::from_ymd_opt(2025, 10, 31).unwrap()
        );

        std::env::remove_var("KEEPSAKE_PHOTO_MAX_WIDTH");
        std::env::remove_var("KEEPSAKE_WINDOW_END");
    }
}
