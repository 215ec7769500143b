//! Database module
//!
//! The two durable stores: deduplicating dictionary tables for repeated
//! string dimensions, and the append-only request fact table referencing
//! them. The normalization join resolves facts back into readable rows;
//! everything downstream of it is computed, never persisted.

mod schema;

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use futures::stream::{Stream, StreamExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqlitePool};

use crate::config::DatabaseConfig;
use crate::error::StoreError;

/// A string dimension with its own deduplicating table.
///
/// Autonomous systems are not listed here: they key on the AS number
/// itself, via [`Database::ensure_asn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dictionary {
    Paths,
    Referers,
    UserAgents,
    ClientIps,
}

impl Dictionary {
    fn table(self) -> &'static str {
        match self {
            Dictionary::Paths => "paths",
            Dictionary::Referers => "referers",
            Dictionary::UserAgents => "user_agents",
            Dictionary::ClientIps => "client_ips",
        }
    }

    fn column(self) -> &'static str {
        match self {
            Dictionary::Paths => "path",
            Dictionary::Referers => "referer",
            Dictionary::UserAgents => "user_agent",
            Dictionary::ClientIps => "address",
        }
    }
}

/// A request ready for the fact table: every dimension value already
/// replaced by its dictionary id.
#[derive(Debug, Clone)]
pub struct RequestFact {
    pub client_ip: Option<i64>,
    pub asn: i64,
    pub country_code: Option<String>,
    pub status: u16,
    pub cache_state: String,
    pub response_bytes: i64,
    pub response_duration: f64,
    pub start_time: DateTime<Utc>,
    pub ipv6: bool,
    pub http2: bool,
    pub path: i64,
    pub referer: Option<i64>,
    pub user_agent: Option<i64>,
}

/// A fact row with every dictionary reference resolved and a derived
/// calendar date. Ephemeral; recomputed on every pass over the store.
#[derive(Debug, Clone)]
pub struct NormalizedRow {
    pub id: i64,
    pub client_ip: Option<String>,
    pub asn: i64,
    pub asn_name: Option<String>,
    pub country_code: Option<String>,
    pub status: u16,
    pub cache_state: String,
    pub response_bytes: i64,
    pub response_duration: f64,
    pub start_time: DateTime<Utc>,
    pub date: NaiveDate,
    pub ipv6: bool,
    pub http2: bool,
    pub path: Option<String>,
    pub referer: Option<String>,
    pub user_agent: Option<String>,
}

// Left joins throughout: an absent reference yields a null resolved value,
// never a dropped row. ORDER BY id keeps the stream order stable.
const NORMALIZED_SQL: &str = r#"
SELECT r.id, ip.address AS client_ip, r.asn, a.name AS asn_name,
       r.country_code, r.status, r.cache_state, r.response_bytes,
       r.response_duration, r.start_time_ms, r.ipv6, r.http2,
       p.path, rf.referer, ua.user_agent
FROM requests r
LEFT JOIN client_ips ip ON ip.id = r.client_ip
LEFT JOIN autonomous_systems a ON a.asn = r.asn
LEFT JOIN paths p ON p.id = r.path
LEFT JOIN referers rf ON rf.id = r.referer
LEFT JOIN user_agents ua ON ua.id = r.user_agent
ORDER BY r.id
"#;

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut opts = SqliteConnectOptions::from_str(&format!("sqlite:{}", config.url))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = if config.url == ":memory:" {
            // An in-memory database exists per connection; more than one
            // pool connection would hand each caller its own empty store.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(opts)
                .await?
        } else {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
            SqlitePool::connect_with(opts).await?
        };
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        for ddl in schema::ALL {
            sqlx::query(ddl).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Return the id for `value`, inserting it on first sighting.
    ///
    /// Lookup, insert-if-absent, lookup again: a concurrent writer racing
    /// us on the same value loses the insert to the uniqueness constraint,
    /// and the second lookup picks up whichever id won. Exact,
    /// case-sensitive matching; no delete path exists.
    pub async fn get_or_create(&self, dict: Dictionary, value: &str) -> Result<i64, StoreError> {
        let (table, column) = (dict.table(), dict.column());
        let select = format!("SELECT id FROM {table} WHERE {column} = ?");
        if let Some((id,)) = sqlx::query_as::<_, (i64,)>(&select)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
        {
            return Ok(id);
        }
        sqlx::query(&format!(
            "INSERT INTO {table} ({column}) VALUES (?) ON CONFLICT({column}) DO NOTHING"
        ))
        .bind(value)
        .execute(&self.pool)
        .await?;
        let (id,) = sqlx::query_as::<_, (i64,)>(&select)
            .bind(value)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Resolve a dictionary id back to its value.
    ///
    /// Facts only ever hold ids handed out by [`get_or_create`], so a miss
    /// here is a corruption signal, not bad input.
    pub async fn resolve(&self, dict: Dictionary, id: i64) -> Result<String, StoreError> {
        let (table, column) = (dict.table(), dict.column());
        sqlx::query_as::<_, (String,)>(&format!("SELECT {column} FROM {table} WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(|(value,)| value)
            .ok_or(StoreError::NotFound {
                dictionary: table,
                id,
            })
    }

    /// Make sure the AS number exists in the autonomous-systems table.
    /// The name stays NULL until enrichment fills it in.
    pub async fn ensure_asn(&self, asn: u32) -> Result<i64, StoreError> {
        sqlx::query("INSERT INTO autonomous_systems (asn) VALUES (?) ON CONFLICT(asn) DO NOTHING")
            .bind(asn as i64)
            .execute(&self.pool)
            .await?;
        Ok(asn as i64)
    }

    /// Append one request to the fact table. The only mutation the fact
    /// store exposes; corrections arrive as future facts, never edits.
    pub async fn append_request(&self, fact: &RequestFact) -> Result<i64, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO requests (
                client_ip, asn, country_code, status, cache_state,
                response_bytes, response_duration, start_time_ms,
                ipv6, http2, path, referer, user_agent
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(fact.client_ip)
        .bind(fact.asn)
        .bind(&fact.country_code)
        .bind(fact.status as i64)
        .bind(&fact.cache_state)
        .bind(fact.response_bytes)
        .bind(fact.response_duration)
        .bind(fact.start_time.timestamp_millis())
        .bind(fact.ipv6)
        .bind(fact.http2)
        .bind(fact.path)
        .bind(fact.referer)
        .bind(fact.user_agent)
        .execute(&self.pool)
        .await
        .map_err(|err| {
            if let sqlx::Error::Database(db) = &err {
                if matches!(db.kind(), sqlx::error::ErrorKind::ForeignKeyViolation) {
                    return StoreError::ReferentialIntegrity { source: err };
                }
            }
            StoreError::Database(err)
        })?;

        Ok(result.last_insert_rowid())
    }

    pub async fn total_requests(&self) -> Result<i64, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM requests")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Stream every fact row joined against the dictionaries.
    ///
    /// A pure function of current store state: each call re-runs the
    /// query, so readers always see whatever ingestion has committed.
    pub fn normalized(&self) -> impl Stream<Item = Result<NormalizedRow, StoreError>> + '_ {
        sqlx::query(NORMALIZED_SQL)
            .fetch(&self.pool)
            .map(|result| decode_normalized(&result?))
    }

    /// AS numbers still waiting for a name.
    pub async fn unnamed_asns(&self) -> Result<Vec<u32>, StoreError> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT asn FROM autonomous_systems WHERE name IS NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(asn,)| asn as u32).collect())
    }

    pub async fn set_asn_name(
        &self,
        asn: u32,
        name: &str,
        droplist: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO autonomous_systems (asn, name, droplist) VALUES (?, ?, ?)
            ON CONFLICT(asn) DO UPDATE
            SET name = excluded.name,
                droplist = COALESCE(excluded.droplist, droplist)
            "#,
        )
        .bind(asn as i64)
        .bind(name)
        .bind(droplist)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn decode_normalized(row: &SqliteRow) -> Result<NormalizedRow, StoreError> {
    let id: i64 = row.try_get("id")?;
    let start_ms: i64 = row.try_get("start_time_ms")?;
    let start_time = DateTime::from_timestamp_millis(start_ms).ok_or_else(|| StoreError::Corrupt {
        id,
        detail: format!("start time {start_ms}ms out of range"),
    })?;
    let status: i64 = row.try_get("status")?;
    let status = u16::try_from(status).map_err(|_| StoreError::Corrupt {
        id,
        detail: format!("status {status}"),
    })?;

    Ok(NormalizedRow {
        id,
        client_ip: row.try_get("client_ip")?,
        asn: row.try_get("asn")?,
        asn_name: row.try_get("asn_name")?,
        country_code: row.try_get("country_code")?,
        status,
        cache_state: row.try_get("cache_state")?,
        response_bytes: row.try_get("response_bytes")?,
        response_duration: row.try_get("response_duration")?,
        date: start_time.date_naive(),
        start_time,
        ipv6: row.try_get("ipv6")?,
        http2: row.try_get("http2")?,
        path: row.try_get("path")?,
        referer: row.try_get("referer")?,
        user_agent: row.try_get("user_agent")?,
    })
}
