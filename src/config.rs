use serde::{Deserialize, Serialize};

/// Engine-wide settings, loaded from the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Page size when the caller does not supply one.
    pub default_feed_size: usize,
    /// Default publication lookback window, in days.
    pub default_lookback_days: i64,
    /// Freshness window for shuffle eligibility, in days.
    pub freshness_window_days: i64,
    /// How many leading items the shuffler may permute.
    pub shuffle_top_n: usize,
    /// Variant served when no override or experiment bucket applies.
    pub default_variant: String,
    /// Optional directory of variant definition documents (*.json). Documents
    /// there shadow built-in variants of the same name.
    pub variant_dir: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_feed_size: 30,
            default_lookback_days: 18,
            freshness_window_days: 7,
            shuffle_top_n: 5,
            default_variant: "base".to_string(),
            variant_dir: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_feed_size: env_parse("FEED_DEFAULT_SIZE", defaults.default_feed_size),
            default_lookback_days: env_parse("FEED_LOOKBACK_DAYS", defaults.default_lookback_days),
            freshness_window_days: env_parse(
                "FEED_FRESHNESS_WINDOW_DAYS",
                defaults.freshness_window_days,
            ),
            shuffle_top_n: env_parse("FEED_SHUFFLE_TOP_N", defaults.shuffle_top_n),
            default_variant: std::env::var("FEED_DEFAULT_VARIANT")
                .unwrap_or(defaults.default_variant),
            variant_dir: std::env::var("FEED_VARIANT_DIR").ok(),
        }
    }

    /// Lookback window read at query-build time, not at variant-compile time:
    /// an operational override via FEED_LOOKBACK_DAYS takes effect without a
    /// process restart.
    pub fn lookback_days(&self) -> i64 {
        std::env::var("FEED_LOOKBACK_DAYS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(self.default_lookback_days)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.default_feed_size, 30);
        assert_eq!(settings.default_lookback_days, 18);
        assert_eq!(settings.freshness_window_days, 7);
        assert_eq!(settings.shuffle_top_n, 5);
        assert_eq!(settings.default_variant, "base");
    }

    #[test]
    fn test_lookback_falls_back_to_configured_default() {
        let settings = Settings {
            default_lookback_days: 12,
            ..Settings::default()
        };
        // No env override set in the test environment for this key pattern.
        if std::env::var("FEED_LOOKBACK_DAYS").is_err() {
            assert_eq!(settings.lookback_days(), 12);
        }
    }
}
