//! Log file ingestion
//!
//! Reads line-delimited JSON records from plain or gzipped files, repairs
//! a known upstream quirk (trailing commas before the closing brace,
//! courtesy of a misconfigured logging template), and writes each record
//! through the dictionary and fact stores. A malformed record is logged
//! and skipped; the file keeps going. Store failures abort the file.

use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use flate2::bufread::GzDecoder;
use regex::Regex;
use tracing::{debug, warn};

use crate::db::{Database, Dictionary, RequestFact};
use crate::error::IngestError;
use crate::record::RawRecord;

#[derive(Debug, Default, Clone, Copy)]
pub struct IngestStats {
    pub ingested: u64,
    pub skipped: u64,
}

/// Ingest one log file; `.gz` files are decompressed on the fly.
pub async fn ingest_file(db: &Database, path: &Path) -> Result<IngestStats> {
    let file = File::open(path).with_context(|| format!("could not open {}", path.display()))?;
    let reader = BufReader::new(file);
    if path.extension().is_some_and(|ext| ext == "gz") {
        ingest_reader(db, BufReader::new(GzDecoder::new(reader))).await
    } else {
        ingest_reader(db, reader).await
    }
    .with_context(|| format!("in log file {}", path.display()))
}

/// Ingest line-delimited JSON records from a reader.
pub async fn ingest_reader(db: &Database, reader: impl BufRead) -> Result<IngestStats> {
    let mut stats = IngestStats::default();
    for (index, line) in reader.lines().enumerate() {
        let line = line.context("could not read log line")?;
        if line.trim().is_empty() {
            continue;
        }
        let repaired = repair_line(&line);
        match serde_json::from_str::<RawRecord>(&repaired) {
            Ok(record) => match ingest_record(db, &record).await {
                Ok(id) => {
                    debug!(id, "stored request");
                    stats.ingested += 1;
                }
                Err(IngestError::Malformed { reason }) => {
                    warn!("skipping record {index}: {reason}");
                    stats.skipped += 1;
                }
                Err(IngestError::Store(err)) => {
                    return Err(err).with_context(|| format!("in record {index}"));
                }
            },
            Err(err) => {
                warn!("skipping record {index}: JSON parse error: {err}");
                stats.skipped += 1;
            }
        }
    }
    Ok(stats)
}

/// Dictionary-encode one record's dimension values and append the fact.
pub async fn ingest_record(db: &Database, record: &RawRecord) -> Result<i64, IngestError> {
    let start_time = record.validate()?;

    let path = db.get_or_create(Dictionary::Paths, &record.url_path).await?;
    let referer = match &record.referer {
        Some(referer) => Some(db.get_or_create(Dictionary::Referers, referer).await?),
        None => None,
    };
    let user_agent = match &record.user_agent {
        Some(agent) => Some(db.get_or_create(Dictionary::UserAgents, agent).await?),
        None => None,
    };
    let client_ip = match &record.client_ip {
        Some(ip) => Some(
            db.get_or_create(Dictionary::ClientIps, &ip.to_string())
                .await?,
        ),
        None => None,
    };
    let asn = db.ensure_asn(record.asn).await?;

    let fact = RequestFact {
        client_ip,
        asn,
        country_code: record.country_code.clone(),
        status: record.status,
        cache_state: record.cache_state.clone(),
        response_bytes: record.response_bytes as i64,
        response_duration: record.response_duration(),
        start_time,
        ipv6: record.ipv6,
        http2: record.http2,
        path,
        referer,
        user_agent,
    };
    Ok(db.append_request(&fact).await?)
}

static TRAILING_COMMA: OnceLock<Regex> = OnceLock::new();

/// Strip the trailing comma the upstream logging template emits before
/// the closing brace. Conforming lines pass through untouched.
fn repair_line(line: &str) -> Cow<'_, str> {
    let re = TRAILING_COMMA.get_or_init(|| Regex::new(r",\s*\}\s*$").expect("trailing-comma pattern"));
    re.replace(line, "}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::test_db;
    use futures::TryStreamExt;
    use std::io::Cursor;

    const GOOD: &str = r#"{"clientIP": "198.51.100.7", "ispID": 64496, "countryCode": "US", "isIPv6": false, "isH2": true, "urlPath": "/writing/a-post/", "httpReferer": "https://news.ycombinator.com/", "httpUA": "Mozilla/5.0", "cacheState": "HIT", "respStatus": 200, "respTotalBytes": 5120, "timeElapsed": 1250, "reqStartTime": "2024-01-05T10:30:00Z"}"#;

    #[test]
    fn repair_strips_trailing_comma() {
        let broken = r#"{"hello": "world", "n": 1, }"#;
        let repaired = repair_line(broken);
        let value: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(value["hello"], "world");
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn repair_leaves_conforming_lines_alone() {
        assert_eq!(repair_line(GOOD), GOOD);
        // A comma inside a string value is not a trailing comma.
        let tricky = r#"{"ua": "a, }"}"#;
        assert_eq!(repair_line(tricky), tricky);
    }

    #[tokio::test]
    async fn ingest_reader_skips_malformed_and_continues() {
        let db = test_db().await;
        let bad_json = r#"{"this is": not json"#;
        let bad_time = GOOD.replace("2024-01-05T10:30:00Z", "whenever");
        let trailing = GOOD.replace(r#""reqStartTime": "2024-01-05T10:30:00Z"}"#,
            r#""reqStartTime": "2024-01-05T10:30:00Z", }"#);
        let input = format!("{GOOD}\n{bad_json}\n{bad_time}\n\n{trailing}\n");

        let stats = ingest_reader(&db, Cursor::new(input)).await.unwrap();
        assert_eq!(stats.ingested, 2);
        assert_eq!(stats.skipped, 2);
        assert_eq!(db.total_requests().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ingest_deduplicates_dimension_values() {
        let db = test_db().await;
        let record: RawRecord = serde_json::from_str(GOOD).unwrap();
        let first = ingest_record(&db, &record).await.unwrap();
        let second = ingest_record(&db, &record).await.unwrap();
        assert_ne!(first, second);

        // Two facts, one dictionary entry each.
        let rows: Vec<crate::db::NormalizedRow> = db.normalized().try_collect().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].path, rows[1].path);
        let path_id = db
            .get_or_create(Dictionary::Paths, "/writing/a-post/")
            .await
            .unwrap();
        let agent_id = db
            .get_or_create(Dictionary::UserAgents, "Mozilla/5.0")
            .await
            .unwrap();
        assert_eq!(
            db.resolve(Dictionary::Paths, path_id).await.unwrap(),
            "/writing/a-post/"
        );
        assert_eq!(
            db.resolve(Dictionary::UserAgents, agent_id).await.unwrap(),
            "Mozilla/5.0"
        );
    }

    #[tokio::test]
    async fn gzipped_input_round_trips() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(GOOD.as_bytes()).unwrap();
        encoder.write_all(b"\n").unwrap();
        let compressed = encoder.finish().unwrap();

        let db = test_db().await;
        let reader = BufReader::new(GzDecoder::new(Cursor::new(compressed)));
        let stats = ingest_reader(&db, reader).await.unwrap();
        assert_eq!(stats.ingested, 1);
    }
}
