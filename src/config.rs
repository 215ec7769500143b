//! Configuration management

use anyhow::Result;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub filters: FilterConfig,
    #[serde(default)]
    pub reports: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite file, or ":memory:" for an ephemeral store.
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_database_url() -> String {
    "logmill.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// The domain this log stream belongs to. Referers pointing here are
    /// internal navigation, not inbound traffic.
    #[serde(default = "default_domain")]
    pub domain: String,
    /// Path prefix under which long-form content lives.
    #[serde(default = "default_article_prefix")]
    pub article_prefix: String,
    /// Paths with this suffix are syndication feeds, not articles, even
    /// when they carry the article prefix.
    #[serde(default = "default_feed_suffix")]
    pub feed_suffix: String,
}

fn default_domain() -> String {
    "example.com".to_string()
}

fn default_article_prefix() -> String {
    "/writing/".to_string()
}

fn default_feed_suffix() -> String {
    ".xml".to_string()
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            article_prefix: default_article_prefix(),
            feed_suffix: default_feed_suffix(),
        }
    }
}

/// Deny-lists for the filter pipeline and the probe-path reports.
///
/// Hand-tuned against observed traffic and not exhaustive; they live in
/// configuration so they can change without a rebuild.
#[derive(Debug, Clone, Deserialize)]
pub struct FilterConfig {
    /// User-agent substrings (case-insensitive) of synthetic monitoring
    /// clients: health checkers, link checkers.
    #[serde(default = "default_monitor_agents")]
    pub monitor_agents: Vec<String>,
    /// User-agent substrings (case-insensitive) of spam crawlers, e.g. the
    /// "Mozlila" misspelling used by bots impersonating a browser.
    #[serde(default = "default_spam_agents")]
    pub spam_agents: Vec<String>,
    /// Response statuses treated as noise rather than reportable traffic.
    #[serde(default = "default_junk_statuses")]
    pub junk_statuses: Vec<u16>,
    /// Path prefixes probed by vulnerability scanners.
    #[serde(default = "default_probe_path_prefixes")]
    pub probe_path_prefixes: Vec<String>,
    /// Path suffixes probed by vulnerability scanners.
    #[serde(default = "default_probe_path_suffixes")]
    pub probe_path_suffixes: Vec<String>,
}

fn default_monitor_agents() -> Vec<String> {
    vec!["updown.io".to_string(), "lychee".to_string()]
}

fn default_spam_agents() -> Vec<String> {
    vec!["mozlila".to_string()]
}

fn default_junk_statuses() -> Vec<u16> {
    vec![404]
}

fn default_probe_path_prefixes() -> Vec<String> {
    vec!["/wp-".to_string()]
}

fn default_probe_path_suffixes() -> Vec<String> {
    vec![".php".to_string()]
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            monitor_agents: default_monitor_agents(),
            spam_agents: default_spam_agents(),
            junk_statuses: default_junk_statuses(),
            probe_path_prefixes: default_probe_path_prefixes(),
            probe_path_suffixes: default_probe_path_suffixes(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReportConfig {
    /// Trailing window, in days, that reports cover by default.
    #[serde(default = "default_window_days")]
    pub window_days: i64,
    /// Row cap for top-N reports.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Rows kept per calendar day in the per-day article ranking.
    #[serde(default = "default_per_day_top")]
    pub per_day_top: usize,
}

fn default_window_days() -> i64 {
    7
}

fn default_top_n() -> usize {
    20
}

fn default_per_day_top() -> usize {
    3
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            top_n: default_top_n(),
            per_day_top: default_per_day_top(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("logmill").required(false))
            .add_source(config::Environment::with_prefix("LOGMILL").separator("__"));

        let settings = builder.build()?;
        let config: Config = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            anyhow::bail!("Database URL cannot be empty");
        }

        if self.site.domain.is_empty() {
            anyhow::bail!("Site domain cannot be empty");
        }
        if !self.site.article_prefix.starts_with('/') {
            anyhow::bail!(
                "Article prefix '{}' must be an absolute path",
                self.site.article_prefix
            );
        }

        if self.reports.window_days < 1 {
            anyhow::bail!("Report window must cover at least one day");
        }
        if self.reports.top_n == 0 || self.reports.per_day_top == 0 {
            anyhow::bail!("Report row caps must be positive");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid logging level '{}'. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_relative_article_prefix() {
        let mut config = Config::default();
        config.site.article_prefix = "writing/".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_window() {
        let mut config = Config::default();
        config.reports.window_days = 0;
        assert!(config.validate().is_err());
    }
}
