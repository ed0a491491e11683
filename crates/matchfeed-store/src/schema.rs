/// SQL DDL for the matchfeed database.
/// Timestamps are fixed-width RFC 3339 UTC text, so lexical order is
/// temporal order and range predicates can compare strings directly.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    sport TEXT NOT NULL,
    home_team TEXT NOT NULL,
    away_team TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'scheduled',
    start_time TEXT NOT NULL,
    end_time TEXT,
    home_score INTEGER NOT NULL DEFAULT 0,
    away_score INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS commentary (
    id TEXT PRIMARY KEY,
    match_id TEXT NOT NULL REFERENCES matches(id) ON DELETE CASCADE,
    minute INTEGER,
    sequence INTEGER NOT NULL,
    period TEXT,
    event_type TEXT NOT NULL,
    actor TEXT,
    team TEXT,
    message TEXT NOT NULL,
    metadata TEXT,
    tags TEXT,
    scheduled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (match_id, sequence)
);

CREATE INDEX IF NOT EXISTS idx_commentary_match ON commentary(match_id);
CREATE INDEX IF NOT EXISTS idx_commentary_created ON commentary(created_at);
CREATE INDEX IF NOT EXISTS idx_matches_created ON matches(created_at);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
