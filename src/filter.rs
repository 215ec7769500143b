//! Composable row predicates
//!
//! Each cleanup stage the reports rely on is a plain value with a pure
//! predicate over a normalized row. Stages are conjunctive and commute;
//! [`FilterChain`] composes them in order. Rows are only ever dropped,
//! never rewritten or reordered.

use chrono::{DateTime, Duration, Utc};

use crate::config::{FilterConfig, SiteConfig};
use crate::db::NormalizedRow;

/// One stage of the cleanup pipeline.
pub trait RowFilter: Send + Sync {
    /// Keep or drop a row. Must not depend on any other row.
    fn keep(&self, row: &NormalizedRow) -> bool;
}

/// An AND-composition of stages.
#[derive(Default)]
pub struct FilterChain {
    stages: Vec<Box<dyn RowFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then(mut self, stage: impl RowFilter + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn keep(&self, row: &NormalizedRow) -> bool {
        self.stages.iter().all(|stage| stage.keep(row))
    }

    pub fn apply(&self, rows: Vec<NormalizedRow>) -> Vec<NormalizedRow> {
        rows.into_iter().filter(|row| self.keep(row)).collect()
    }
}

fn agent_matches(row: &NormalizedRow, needles: &[String]) -> bool {
    match &row.user_agent {
        Some(agent) => {
            let agent = agent.to_lowercase();
            needles.iter().any(|needle| agent.contains(needle))
        }
        None => false,
    }
}

/// Drops synthetic monitoring traffic: health checkers, link checkers.
/// These probe on a schedule and would dominate naive counts.
pub struct MonitorFilter {
    agents: Vec<String>,
}

impl MonitorFilter {
    pub fn from_config(filters: &FilterConfig) -> Self {
        Self {
            agents: lowercase_all(&filters.monitor_agents),
        }
    }
}

impl RowFilter for MonitorFilter {
    fn keep(&self, row: &NormalizedRow) -> bool {
        !agent_matches(row, &self.agents)
    }
}

/// Drops noise responses and cheaply-identifiable spam crawlers.
///
/// Best effort: only spam that a substring match can spot is removed.
pub struct JunkFilter {
    statuses: Vec<u16>,
    agents: Vec<String>,
}

impl JunkFilter {
    pub fn from_config(filters: &FilterConfig) -> Self {
        Self {
            statuses: filters.junk_statuses.clone(),
            agents: lowercase_all(&filters.spam_agents),
        }
    }
}

impl RowFilter for JunkFilter {
    fn keep(&self, row: &NormalizedRow) -> bool {
        !self.statuses.contains(&row.status) && !agent_matches(row, &self.agents)
    }
}

/// Keeps rows inside a trailing time window. Rows strictly older than the
/// cutoff are dropped; a row exactly on the cutoff stays.
pub struct WindowFilter {
    cutoff: DateTime<Utc>,
}

impl WindowFilter {
    pub fn trailing_days(now: DateTime<Utc>, days: i64) -> Self {
        Self {
            cutoff: now - Duration::days(days),
        }
    }
}

impl RowFilter for WindowFilter {
    fn keep(&self, row: &NormalizedRow) -> bool {
        row.start_time >= self.cutoff
    }
}

/// Keeps long-form content: paths under the article prefix, minus
/// syndication feeds that happen to live there too.
pub struct ArticleFilter {
    prefix: String,
    feed_suffix: String,
}

impl ArticleFilter {
    pub fn from_config(site: &SiteConfig) -> Self {
        Self {
            prefix: site.article_prefix.clone(),
            feed_suffix: site.feed_suffix.clone(),
        }
    }
}

impl RowFilter for ArticleFilter {
    fn keep(&self, row: &NormalizedRow) -> bool {
        match &row.path {
            Some(path) => path.starts_with(&self.prefix) && !path.ends_with(&self.feed_suffix),
            None => false,
        }
    }
}

/// Matcher for vulnerability-scanner path patterns. Used in both
/// directions: the error report drops matching rows, the scanning-network
/// report keeps exactly those.
#[derive(Debug, Clone)]
pub struct ProbePaths {
    prefixes: Vec<String>,
    suffixes: Vec<String>,
}

impl ProbePaths {
    pub fn from_config(filters: &FilterConfig) -> Self {
        Self {
            prefixes: filters.probe_path_prefixes.clone(),
            suffixes: filters.probe_path_suffixes.clone(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.prefixes.iter().any(|p| path.starts_with(p.as_str()))
            || self.suffixes.iter().any(|s| path.ends_with(s.as_str()))
    }
}

/// The canonical cleanup chain every report starts from: monitoring
/// traffic out, junk out, then the trailing window.
pub fn recent_window(
    filters: &FilterConfig,
    now: DateTime<Utc>,
    window_days: i64,
) -> FilterChain {
    FilterChain::new()
        .then(MonitorFilter::from_config(filters))
        .then(JunkFilter::from_config(filters))
        .then(WindowFilter::trailing_days(now, window_days))
}

fn lowercase_all(values: &[String]) -> Vec<String> {
    values.iter().map(|v| v.to_lowercase()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn row(path: &str, status: u16, agent: Option<&str>) -> NormalizedRow {
        let start_time = "2024-01-05T10:30:00Z".parse::<DateTime<Utc>>().unwrap();
        NormalizedRow {
            id: 1,
            client_ip: Some("198.51.100.7".to_string()),
            asn: 64496,
            asn_name: None,
            country_code: Some("US".to_string()),
            status,
            cache_state: "HIT".to_string(),
            response_bytes: 2048,
            response_duration: 0.012,
            start_time,
            date: start_time.date_naive(),
            ipv6: false,
            http2: true,
            path: Some(path.to_string()),
            referer: None,
            user_agent: agent.map(str::to_string),
        }
    }

    pub(crate) fn row_at(path: &str, start_time: DateTime<Utc>) -> NormalizedRow {
        let mut r = row(path, 200, Some("Mozilla/5.0"));
        r.start_time = start_time;
        r.date = start_time.date_naive();
        r
    }

    fn config() -> FilterConfig {
        FilterConfig::default()
    }

    #[test]
    fn monitor_filter_drops_health_checks_case_insensitively() {
        let filter = MonitorFilter::from_config(&config());
        assert!(!filter.keep(&row("/", 200, Some("Mozilla/5.0 (compatible; Updown.io daemon)"))));
        assert!(!filter.keep(&row("/", 200, Some("lychee/0.14"))));
        assert!(filter.keep(&row("/", 200, Some("Mozilla/5.0"))));
        // A row with no recorded agent is not monitoring traffic.
        assert!(filter.keep(&row("/", 200, None)));
    }

    #[test]
    fn junk_filter_drops_not_found_and_spoofed_agents() {
        let filter = JunkFilter::from_config(&config());
        assert!(!filter.keep(&row("/nope", 404, Some("Mozilla/5.0"))));
        assert!(!filter.keep(&row("/", 200, Some("Mozlila/5.0 (Linux; Android 7.0)"))));
        assert!(filter.keep(&row("/", 200, Some("Mozilla/5.0"))));
        assert!(filter.keep(&row("/", 500, Some("Mozilla/5.0"))));
    }

    #[test]
    fn window_filter_boundary_is_inclusive() {
        let now = "2024-01-08T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let filter = WindowFilter::trailing_days(now, 7);

        let on_boundary = row_at("/", "2024-01-01T00:00:00Z".parse().unwrap());
        let just_older = row_at("/", "2023-12-31T23:59:59Z".parse().unwrap());
        let recent = row_at("/", "2024-01-07T12:00:00Z".parse().unwrap());

        assert!(filter.keep(&on_boundary));
        assert!(!filter.keep(&just_older));
        assert!(filter.keep(&recent));
    }

    #[test]
    fn window_filter_ignores_textual_representation() {
        // Same instant, one parsed from each legacy format: the filter
        // must classify both identically.
        let now = "2024-01-08T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let filter = WindowFilter::trailing_days(now, 7);

        let with_zone = crate::record::parse_start_time("2024-01-01T00:00:00Z").unwrap();
        let without_zone = crate::record::parse_start_time("2024-01-01T00:00:00").unwrap();
        assert_eq!(
            filter.keep(&row_at("/", with_zone)),
            filter.keep(&row_at("/", without_zone))
        );
    }

    #[test]
    fn article_filter_keeps_prefix_but_not_feeds() {
        let filter = ArticleFilter::from_config(&SiteConfig::default());
        assert!(filter.keep(&row("/writing/a-post/", 200, None)));
        assert!(!filter.keep(&row("/writing/feed.xml", 200, None)));
        assert!(!filter.keep(&row("/about/", 200, None)));
    }

    #[test]
    fn probe_paths_match_prefixes_and_suffixes() {
        let probes = ProbePaths::from_config(&config());
        assert!(probes.matches("/wp-admin/setup.php"));
        assert!(probes.matches("/wp-login.php"));
        assert!(probes.matches("/cgi-bin/test.php"));
        assert!(!probes.matches("/writing/a-post/"));
    }

    #[test]
    fn chain_stages_commute() {
        let now = "2024-01-08T00:00:00Z".parse::<DateTime<Utc>>().unwrap();
        let mut rows = vec![
            row("/", 200, Some("Mozilla/5.0")),
            row("/nope", 404, Some("Mozilla/5.0")),
            row("/", 200, Some("updown.io/1.0")),
            row_at("/", "2023-11-01T00:00:00Z".parse().unwrap()),
        ];
        for (i, r) in rows.iter_mut().enumerate() {
            r.id = i as i64;
        }

        let canonical = FilterChain::new()
            .then(MonitorFilter::from_config(&config()))
            .then(JunkFilter::from_config(&config()))
            .then(WindowFilter::trailing_days(now, 7));
        let reversed = FilterChain::new()
            .then(WindowFilter::trailing_days(now, 7))
            .then(JunkFilter::from_config(&config()))
            .then(MonitorFilter::from_config(&config()));

        let keep_canonical: Vec<i64> = canonical
            .apply(rows.clone())
            .into_iter()
            .map(|r| r.id)
            .collect();
        let keep_reversed: Vec<i64> = reversed
            .apply(rows)
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(keep_canonical, keep_reversed);
    }

    #[test]
    fn empty_chain_keeps_everything() {
        let chain = FilterChain::new();
        assert!(chain.keep(&row("/", 404, Some("updown.io/1.0"))));
    }
}
