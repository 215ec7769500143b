//! Raw log records as emitted by the CDN's logging endpoint

use std::net::IpAddr;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

use crate::error::IngestError;

/// One access-log record, field names as configured on the CDN side.
///
/// Everything dimension-like (path, referer, agent, ASN, client IP) arrives
/// as a raw value here and is dictionary-encoded at ingestion.
#[derive(Debug, Clone, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "clientIP")]
    pub client_ip: Option<IpAddr>,

    // ASNs were 2-byte until ~2007; RFC 6793 formalized 4-byte ASNs.
    #[serde(rename = "ispID")]
    pub asn: u32,

    #[serde(rename = "countryCode")]
    pub country_code: Option<String>,

    #[serde(rename = "isIPv6")]
    pub ipv6: bool,
    #[serde(rename = "isH2")]
    pub http2: bool,

    #[serde(rename = "urlPath")]
    pub url_path: String,
    #[serde(rename = "httpReferer")]
    pub referer: Option<String>,
    #[serde(rename = "httpUA")]
    pub user_agent: Option<String>,

    #[serde(rename = "cacheState")]
    pub cache_state: String,
    #[serde(rename = "respStatus")]
    pub status: u16,
    #[serde(rename = "respTotalBytes")]
    pub response_bytes: u64,
    /// Elapsed handling time in microseconds.
    #[serde(rename = "timeElapsed")]
    pub elapsed_us: f64,
    #[serde(rename = "reqStartTime")]
    pub start_time: String,
}

impl RawRecord {
    /// Check the scalar fields and canonicalize the start time.
    ///
    /// Returns the parsed instant so callers never touch the raw string
    /// again; a failure here means the record is skipped, not the file.
    pub fn validate(&self) -> Result<DateTime<Utc>, IngestError> {
        if self.url_path.is_empty() {
            return Err(IngestError::Malformed {
                reason: "empty url path".to_string(),
            });
        }
        if self.status > 999 {
            return Err(IngestError::Malformed {
                reason: format!("implausible status {}", self.status),
            });
        }
        if !self.elapsed_us.is_finite() || self.elapsed_us < 0.0 {
            return Err(IngestError::Malformed {
                reason: format!("invalid elapsed time {}", self.elapsed_us),
            });
        }
        parse_start_time(&self.start_time)
    }

    /// Elapsed handling time in seconds, as stored on the fact row.
    pub fn response_duration(&self) -> f64 {
        self.elapsed_us / 1_000_000.0
    }
}

/// Parse a request start time into a canonical UTC instant.
///
/// The log archive holds two textual formats: RFC 3339 with an offset or
/// `Z`, and an older designator-less form that was always UTC. Both must
/// land on the same instant so the window filter compares times, never
/// strings.
pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, IngestError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc())
        .map_err(|_| IngestError::Malformed {
            reason: format!("unparseable start time {raw:?}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(start_time: &str) -> RawRecord {
        RawRecord {
            client_ip: Some("198.51.100.7".parse().unwrap()),
            asn: 64496,
            country_code: Some("US".to_string()),
            ipv6: false,
            http2: true,
            url_path: "/writing/a-post/".to_string(),
            referer: None,
            user_agent: Some("Mozilla/5.0".to_string()),
            cache_state: "HIT".to_string(),
            status: 200,
            response_bytes: 5120,
            elapsed_us: 1250.0,
            start_time: start_time.to_string(),
        }
    }

    #[test]
    fn both_time_formats_agree() {
        let with_zone = parse_start_time("2024-01-05T10:30:00Z").unwrap();
        let without_zone = parse_start_time("2024-01-05T10:30:00").unwrap();
        assert_eq!(with_zone, without_zone);

        let offset = parse_start_time("2024-01-05T05:30:00-05:00").unwrap();
        assert_eq!(offset, with_zone);
    }

    #[test]
    fn fractional_seconds_parse() {
        let t = parse_start_time("2024-01-05T10:30:00.250Z").unwrap();
        assert_eq!(t.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn garbage_time_is_malformed() {
        assert!(matches!(
            parse_start_time("last tuesday"),
            Err(IngestError::Malformed { .. })
        ));
    }

    #[test]
    fn validate_accepts_good_record() {
        record("2024-01-05T10:30:00Z").validate().unwrap();
    }

    #[test]
    fn validate_rejects_empty_path() {
        let mut r = record("2024-01-05T10:30:00Z");
        r.url_path.clear();
        assert!(matches!(r.validate(), Err(IngestError::Malformed { .. })));
    }

    #[test]
    fn validate_rejects_negative_duration() {
        let mut r = record("2024-01-05T10:30:00Z");
        r.elapsed_us = -1.0;
        assert!(matches!(r.validate(), Err(IngestError::Malformed { .. })));
    }

    #[test]
    fn validate_rejects_implausible_status() {
        let mut r = record("2024-01-05T10:30:00Z");
        r.status = 1000;
        assert!(matches!(r.validate(), Err(IngestError::Malformed { .. })));
    }

    #[test]
    fn unknown_json_fields_are_ignored() {
        let raw = r#"{
            "clientIP": "198.51.100.7", "ispID": 64496, "countryCode": "US",
            "requests": 12, "isIPv6": false, "isH2": true,
            "urlPath": "/writing/a-post/", "httpReferer": null,
            "httpUA": "Mozilla/5.0", "cacheState": "HIT", "respStatus": 200,
            "respTotalBytes": 5120, "timeElapsed": 1250,
            "reqStartTime": "2024-01-05T10:30:00Z"
        }"#;
        let record: RawRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.asn, 64496);
        record.validate().unwrap();
    }
}
