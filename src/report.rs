//! Reporting engine
//!
//! Every report shares one pattern: take a filtered view of the
//! normalized rows, group by a key, count, sort by count descending,
//! slice to the top N. Ranking and tie-breaks are explicit here rather
//! than delegated to the store; ties resolve by count descending, then
//! group key ascending, so repeated runs over unchanged data agree.
//!
//! Value truncation for display is the renderer's job. Grouping always
//! sees full values, or distinct long paths would merge by prefix.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;

use crate::config::Config;
use crate::db::{Database, NormalizedRow};
use crate::error::ReportError;
use crate::filter::{self, ArticleFilter, FilterChain, MonitorFilter, ProbePaths, RowFilter, WindowFilter};

/// Parameters shared by all reports.
#[derive(Debug, Clone)]
pub struct ReportParams {
    pub window_days: i64,
    pub top_n: usize,
    pub per_day_top: usize,
}

impl ReportParams {
    pub fn from_config(config: &Config) -> Self {
        Self {
            window_days: config.reports.window_days,
            top_n: config.reports.top_n,
            per_day_top: config.reports.per_day_top,
        }
    }

    fn validate(&self) -> Result<(), ReportError> {
        if self.window_days < 1 {
            return Err(ReportError::InvalidParams(format!(
                "window must cover at least one day, got {}",
                self.window_days
            )));
        }
        if self.top_n == 0 {
            return Err(ReportError::InvalidParams(
                "top-N cap must be positive".to_string(),
            ));
        }
        if self.per_day_top == 0 {
            return Err(ReportError::InvalidParams(
                "per-day cap must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// The reports the engine knows by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    Agents,
    Referers,
    Pages,
    Articles,
    ArticlesPerDay,
    Errors,
    ScanningAsns,
    TrafficCount,
}

impl FromStr for ReportKind {
    type Err = ReportError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "agents" => Ok(ReportKind::Agents),
            "referers" => Ok(ReportKind::Referers),
            "pages" => Ok(ReportKind::Pages),
            "articles" => Ok(ReportKind::Articles),
            "articles-per-day-top3" => Ok(ReportKind::ArticlesPerDay),
            "errors" => Ok(ReportKind::Errors),
            "scanning-asns" => Ok(ReportKind::ScanningAsns),
            "traffic-count" => Ok(ReportKind::TrafficCount),
            other => Err(ReportError::UnknownReport(other.to_string())),
        }
    }
}

/// An ordered result set with named columns, ready for text rendering.
#[derive(Debug, Clone)]
pub struct Table {
    pub columns: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountStat {
    pub value: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorStat {
    pub status: u16,
    pub path: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AsnStat {
    pub asn: i64,
    pub name: Option<String>,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyArticleStat {
    pub date: NaiveDate,
    pub path: String,
    pub count: u64,
}

/// Run a named report and return its result set. A report either fully
/// succeeds or fails; there is no partial output.
pub async fn run_report(
    db: &Database,
    name: &str,
    params: &ReportParams,
    config: &Config,
) -> Result<Table, ReportError> {
    let kind: ReportKind = name.parse()?;
    params.validate()?;

    let now = Utc::now();
    let rows: Vec<NormalizedRow> = db.normalized().try_collect().await?;

    // The scanning report deliberately works from an earlier pipeline
    // stage: the junk stage would drop the not-found noise that scanners
    // generate, and that noise is this report's subject matter.
    let view = match kind {
        ReportKind::ScanningAsns => FilterChain::new()
            .then(MonitorFilter::from_config(&config.filters))
            .then(WindowFilter::trailing_days(now, params.window_days)),
        _ => filter::recent_window(&config.filters, now, params.window_days),
    };
    let rows = view.apply(rows);

    let probes = ProbePaths::from_config(&config.filters);
    let articles = ArticleFilter::from_config(&config.site);

    Ok(match kind {
        ReportKind::Agents => count_table("user_agent", top_agents(&rows, params.top_n)),
        ReportKind::Referers => count_table(
            "referer",
            top_referers(&rows, params.top_n, &config.site.domain),
        ),
        ReportKind::Pages => count_table("path", top_pages(&rows, params.top_n)),
        ReportKind::Articles => count_table(
            "path",
            top_pages(&articles_only(rows, &articles), params.top_n),
        ),
        ReportKind::ArticlesPerDay => {
            let stats = articles_per_day(&articles_only(rows, &articles), params.per_day_top);
            Table {
                columns: vec!["date", "path", "requests"],
                rows: stats
                    .into_iter()
                    .map(|s| vec![s.date.to_string(), s.path, s.count.to_string()])
                    .collect(),
            }
        }
        ReportKind::Errors => {
            let stats = top_errors(&rows, params.top_n, &probes);
            Table {
                columns: vec!["status", "path", "requests"],
                rows: stats
                    .into_iter()
                    .map(|s| vec![s.status.to_string(), s.path, s.count.to_string()])
                    .collect(),
            }
        }
        ReportKind::ScanningAsns => {
            let stats = scanning_asns(&rows, params.top_n, &probes);
            Table {
                columns: vec!["asn", "name", "requests"],
                rows: stats
                    .into_iter()
                    .map(|s| {
                        vec![
                            s.asn.to_string(),
                            s.name.unwrap_or_default(),
                            s.count.to_string(),
                        ]
                    })
                    .collect(),
            }
        }
        ReportKind::TrafficCount => Table {
            columns: vec!["requests"],
            rows: vec![vec![rows.len().to_string()]],
        },
    })
}

fn count_table(dimension: &'static str, stats: Vec<CountStat>) -> Table {
    Table {
        columns: vec![dimension, "requests"],
        rows: stats
            .into_iter()
            .map(|s| vec![s.value, s.count.to_string()])
            .collect(),
    }
}

fn articles_only(rows: Vec<NormalizedRow>, articles: &ArticleFilter) -> Vec<NormalizedRow> {
    rows.into_iter().filter(|r| articles.keep(r)).collect()
}

/// Sort grouped counts: count descending, then key ascending.
fn ranked<K: Ord>(counts: HashMap<K, u64>) -> Vec<(K, u64)> {
    let mut out: Vec<(K, u64)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    out
}

fn top_values<'a>(values: impl Iterator<Item = &'a str>, top_n: usize) -> Vec<CountStat> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for value in values {
        *counts.entry(value).or_default() += 1;
    }
    let mut out = ranked(counts);
    out.truncate(top_n);
    out.into_iter()
        .map(|(value, count)| CountStat {
            value: value.to_string(),
            count,
        })
        .collect()
}

pub(crate) fn top_agents(rows: &[NormalizedRow], top_n: usize) -> Vec<CountStat> {
    top_values(rows.iter().filter_map(|r| r.user_agent.as_deref()), top_n)
}

pub(crate) fn top_pages(rows: &[NormalizedRow], top_n: usize) -> Vec<CountStat> {
    top_values(rows.iter().filter_map(|r| r.path.as_deref()), top_n)
}

/// Inbound referers only: null and empty referers carry no signal, and a
/// referer on our own domain is internal navigation.
pub(crate) fn top_referers(rows: &[NormalizedRow], top_n: usize, domain: &str) -> Vec<CountStat> {
    top_values(
        rows.iter()
            .filter_map(|r| r.referer.as_deref())
            .filter(|referer| !referer.is_empty() && !is_self_referer(referer, domain)),
        top_n,
    )
}

fn is_self_referer(referer: &str, domain: &str) -> bool {
    let rest = referer
        .strip_prefix("https://")
        .or_else(|| referer.strip_prefix("http://"))
        .unwrap_or(referer);
    let host = rest.split('/').next().unwrap_or("");
    let host = host.split(':').next().unwrap_or("");
    host == domain || host.strip_prefix("www.") == Some(domain)
}

/// Errors a legitimate client could plausibly trigger: status >= 400,
/// minus paths that only scanners request.
pub(crate) fn top_errors(
    rows: &[NormalizedRow],
    top_n: usize,
    probes: &ProbePaths,
) -> Vec<ErrorStat> {
    let mut counts: HashMap<(u16, &str), u64> = HashMap::new();
    for row in rows {
        if row.status < 400 {
            continue;
        }
        let Some(path) = row.path.as_deref() else {
            continue;
        };
        if probes.matches(path) {
            continue;
        }
        *counts.entry((row.status, path)).or_default() += 1;
    }
    let mut out = ranked(counts);
    out.truncate(top_n);
    out.into_iter()
        .map(|((status, path), count)| ErrorStat {
            status,
            path: path.to_string(),
            count,
        })
        .collect()
}

/// The complement of the error report: exactly the probe-path traffic,
/// grouped by the network it came from.
pub(crate) fn scanning_asns(
    rows: &[NormalizedRow],
    top_n: usize,
    probes: &ProbePaths,
) -> Vec<AsnStat> {
    let mut counts: HashMap<i64, u64> = HashMap::new();
    let mut names: HashMap<i64, Option<String>> = HashMap::new();
    for row in rows {
        let Some(path) = row.path.as_deref() else {
            continue;
        };
        if !probes.matches(path) {
            continue;
        }
        *counts.entry(row.asn).or_default() += 1;
        names.entry(row.asn).or_insert_with(|| row.asn_name.clone());
    }
    let mut out = ranked(counts);
    out.truncate(top_n);
    out.into_iter()
        .map(|(asn, count)| AsnStat {
            asn,
            name: names.remove(&asn).flatten(),
            count,
        })
        .collect()
}

/// Per-day article ranking: within each calendar day, order by count
/// descending then path ascending and keep the first K rows, so a day
/// with tied counts still yields exactly K rows. Most recent day first.
pub(crate) fn articles_per_day(rows: &[NormalizedRow], per_day_top: usize) -> Vec<DailyArticleStat> {
    let mut days: HashMap<NaiveDate, HashMap<&str, u64>> = HashMap::new();
    for row in rows {
        if let Some(path) = row.path.as_deref() {
            *days.entry(row.date).or_default().entry(path).or_default() += 1;
        }
    }

    let mut out = Vec::new();
    for (date, counts) in days {
        let mut day = ranked(counts);
        day.truncate(per_day_top);
        out.extend(day.into_iter().map(|(path, count)| DailyArticleStat {
            date,
            path: path.to_string(),
            count,
        }));
    }
    out.sort_by(|a, b| {
        b.date
            .cmp(&a.date)
            .then_with(|| b.count.cmp(&a.count))
            .then_with(|| a.path.cmp(&b.path))
    });
    out
}
