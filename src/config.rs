use std::time::Duration;

use serde::Deserialize;

// ------------------------------------------------------------
// Root configuration
// ------------------------------------------------------------
//
// This is the top-level configuration structure loaded from
// `config.json`.
//
// It defines:
// - Browser engine connection settings
// - The sports to track and their entry URLs
// - Rate limiting and retry parameters
//
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Browser engine connection settings
    pub browser: BrowserConfig,

    /// Sources (sports) to collect
    pub sources: Vec<SourceConfig>,

    /// Self-imposed rate limits
    #[serde(default)]
    pub rate: RateConfig,

    /// Retry envelope applied to every collector
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Config {
    /// Look up a source by its sport key.
    pub fn source(&self, sport: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.sport == sport)
    }

    /// Sport keys of all enabled sources, in configuration order.
    pub fn enabled_sports(&self) -> Vec<String> {
        self.sources
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.sport.clone())
            .collect()
    }
}

// ------------------------------------------------------------
// Browser configuration
// ------------------------------------------------------------
//
// Defines how the pipeline reaches the browser engine.
//
// Notes:
// - The engine is an already-running Chromium exposing its
//   DevTools WebSocket endpoint; this process never spawns it.
// - `navigation_timeout_secs` bounds every navigation and reload.
//
#[derive(Debug, Deserialize, Clone)]
pub struct BrowserConfig {
    /// DevTools WebSocket URL (e.g. "ws://127.0.0.1:9222/devtools/browser/…")
    pub cdp_url: String,

    /// Navigation / reload timeout in seconds
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,

    /// Page refresh interval in seconds (live trackers)
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval_secs: u64,
}

impl BrowserConfig {
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

// ------------------------------------------------------------
// Source configuration
// ------------------------------------------------------------
//
// Configuration for a single sport. Each enabled source gets its
// own isolated browser context and collector task.
//
#[derive(Debug, Deserialize, Clone)]
pub struct SourceConfig {
    /// Sport key as it appears in the site's URLs
    /// (e.g. "football", "tennis", "basketball")
    pub sport: String,

    /// Enables or disables this source at runtime
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry URL of the sport's live page
    pub live_url: String,

    /// URL template for a day's schedule page.
    ///
    /// `{date}` is substituted with an ISO date (YYYY-MM-DD).
    pub daily_url_template: String,
}

impl SourceConfig {
    pub fn daily_url(&self, date: chrono::NaiveDate) -> String {
        self.daily_url_template.replace("{date}", &date.to_string())
    }
}

// ------------------------------------------------------------
// Rate limiting configuration
// ------------------------------------------------------------
//
// Minimum intervals the pipeline imposes on itself per source.
// These gates exist to keep the session indistinguishable from a
// patient human visitor; the external site enforces nothing we
// can observe directly.
//
#[derive(Debug, Deserialize, Clone)]
pub struct RateConfig {
    /// Lower bound of the randomized pre-navigation delay (seconds)
    #[serde(default = "default_nav_min")]
    pub navigation_delay_min_secs: u64,

    /// Upper bound of the randomized pre-navigation delay (seconds)
    #[serde(default = "default_nav_max")]
    pub navigation_delay_max_secs: u64,

    /// Fixed delay between backfill date requests (seconds)
    #[serde(default = "default_backfill_delay")]
    pub backfill_delay_secs: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            navigation_delay_min_secs: default_nav_min(),
            navigation_delay_max_secs: default_nav_max(),
            backfill_delay_secs: default_backfill_delay(),
        }
    }
}

// ------------------------------------------------------------
// Retry configuration
// ------------------------------------------------------------
//
// The backoff envelope shared by every collector state machine:
// delay = min(base * 2^attempt, cap) + uniform jitter.
//
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    /// Maximum recoverable failures before a task goes terminal
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in seconds
    #[serde(default = "default_retry_base")]
    pub base_delay_secs: u64,

    /// Backoff cap in seconds
    #[serde(default = "default_retry_cap")]
    pub cap_delay_secs: u64,

    /// Maximum random jitter added on top of the backoff (seconds)
    #[serde(default = "default_retry_jitter")]
    pub jitter_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_retry_base(),
            cap_delay_secs: default_retry_cap(),
            jitter_secs: default_retry_jitter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_navigation_timeout() -> u64 {
    60
}

fn default_refresh_interval() -> u64 {
    300
}

fn default_nav_min() -> u64 {
    2
}

fn default_nav_max() -> u64 {
    5
}

fn default_backfill_delay() -> u64 {
    10
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_base() -> u64 {
    5
}

fn default_retry_cap() -> u64 {
    300
}

fn default_retry_jitter() -> u64 {
    5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_sections() {
        let raw = r#"{
            "browser": { "cdp_url": "ws://127.0.0.1:9222/devtools/browser/x" },
            "sources": [
                {
                    "sport": "football",
                    "live_url": "https://example.com/football",
                    "daily_url_template": "https://example.com/football/{date}"
                }
            ]
        }"#;

        let cfg: Config = serde_json::from_str(raw).unwrap();
        assert!(cfg.sources[0].enabled);
        assert_eq!(cfg.browser.refresh_interval_secs, 300);
        assert_eq!(cfg.rate.navigation_delay_min_secs, 2);
        assert_eq!(cfg.rate.navigation_delay_max_secs, 5);
        assert_eq!(cfg.rate.backfill_delay_secs, 10);
        assert_eq!(cfg.retry.max_attempts, 5);

        let date = chrono::NaiveDate::from_ymd_opt(2026, 8, 24).unwrap();
        assert_eq!(
            cfg.sources[0].daily_url(date),
            "https://example.com/football/2026-08-24"
        );
    }
}
