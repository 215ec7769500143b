//! Database schema definitions
//!
//! Four deduplicating dictionary tables plus the autonomous-system table
//! (natural key), and the append-only fact table referencing them. Values
//! are unique per dictionary; surrogate ids are AUTOINCREMENT so an id is
//! never reassigned.

pub const CREATE_PATHS: &str = r#"
CREATE TABLE IF NOT EXISTS paths (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE
)
"#;

pub const CREATE_REFERERS: &str = r#"
CREATE TABLE IF NOT EXISTS referers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    referer TEXT NOT NULL UNIQUE
)
"#;

pub const CREATE_USER_AGENTS: &str = r#"
CREATE TABLE IF NOT EXISTS user_agents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_agent TEXT NOT NULL UNIQUE
)
"#;

pub const CREATE_CLIENT_IPS: &str = r#"
CREATE TABLE IF NOT EXISTS client_ips (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    address TEXT NOT NULL UNIQUE
)
"#;

// name and droplist are filled by enrichment after the fact; the AS number
// itself is the key facts reference.
pub const CREATE_AUTONOMOUS_SYSTEMS: &str = r#"
CREATE TABLE IF NOT EXISTS autonomous_systems (
    asn INTEGER PRIMARY KEY,
    name TEXT,
    droplist TEXT
)
"#;

pub const CREATE_REQUESTS: &str = r#"
CREATE TABLE IF NOT EXISTS requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    client_ip INTEGER REFERENCES client_ips(id),
    asn INTEGER NOT NULL REFERENCES autonomous_systems(asn),
    country_code TEXT,
    status INTEGER NOT NULL,
    cache_state TEXT NOT NULL,
    response_bytes INTEGER NOT NULL,
    response_duration REAL NOT NULL,
    start_time_ms BIGINT NOT NULL,
    ipv6 INTEGER NOT NULL,
    http2 INTEGER NOT NULL,
    path INTEGER NOT NULL REFERENCES paths(id),
    referer INTEGER REFERENCES referers(id),
    user_agent INTEGER REFERENCES user_agents(id)
)
"#;

// === INDEXES (optimized for the window + group-by reports) ===

pub const CREATE_INDEX_START_TIME: &str =
    "CREATE INDEX IF NOT EXISTS idx_requests_start_time ON requests(start_time_ms)";

pub const CREATE_INDEX_TIME_PATH: &str =
    "CREATE INDEX IF NOT EXISTS idx_requests_time_path ON requests(start_time_ms, path)";

pub const CREATE_INDEX_TIME_STATUS: &str =
    "CREATE INDEX IF NOT EXISTS idx_requests_time_status ON requests(start_time_ms, status)";

pub const CREATE_INDEX_ASN: &str =
    "CREATE INDEX IF NOT EXISTS idx_requests_asn ON requests(asn)";

/// Everything `run_migrations` applies, in dependency order.
pub const ALL: &[&str] = &[
    CREATE_PATHS,
    CREATE_REFERERS,
    CREATE_USER_AGENTS,
    CREATE_CLIENT_IPS,
    CREATE_AUTONOMOUS_SYSTEMS,
    CREATE_REQUESTS,
    CREATE_INDEX_START_TIME,
    CREATE_INDEX_TIME_PATH,
    CREATE_INDEX_TIME_STATUS,
    CREATE_INDEX_ASN,
];
