use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::field::{Field, Visit};
use tracing::span;
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

/// A log record persisted to SQLite.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: i64,
    pub timestamp: String,
    pub level: String,
    pub target: String,
    pub message: String,
    pub fields: Option<String>,
    pub match_id: Option<String>,
    pub connection_id: Option<String>,
}

/// Query parameters for searching persisted logs.
#[derive(Clone, Debug, Default)]
pub struct LogQuery {
    pub level: Option<String>,
    pub target: Option<String>,
    pub match_id: Option<String>,
    pub since: Option<String>,
    pub limit: Option<u32>,
}

/// SQLite sink that persists warn+ logs.
pub struct SqliteLogSink {
    conn: Mutex<Connection>,
}

impl SqliteLogSink {
    pub fn new(db_path: &Path) -> Result<Self, rusqlite::Error> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             CREATE TABLE IF NOT EXISTS logs (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 timestamp TEXT NOT NULL,
                 level TEXT NOT NULL,
                 target TEXT NOT NULL,
                 message TEXT NOT NULL,
                 fields TEXT,
                 match_id TEXT,
                 connection_id TEXT
             );
             CREATE INDEX IF NOT EXISTS idx_logs_level ON logs(level);
             CREATE INDEX IF NOT EXISTS idx_logs_match ON logs(match_id);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn insert(&self, record: &LogInsert) {
        let conn = self.conn.lock();
        let _ = conn.execute(
            "INSERT INTO logs (timestamp, level, target, message, fields, match_id, connection_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                record.timestamp,
                record.level,
                record.target,
                record.message,
                record.fields,
                record.match_id,
                record.connection_id,
            ],
        );
    }

    /// Newest records first.
    pub fn query(&self, q: &LogQuery) -> Result<Vec<LogRecord>, rusqlite::Error> {
        let conn = self.conn.lock();
        let mut sql = String::from(
            "SELECT id, timestamp, level, target, message, fields, match_id, connection_id FROM logs WHERE 1=1",
        );
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(level) = &q.level {
            params.push(Box::new(level.clone()));
            sql.push_str(&format!(" AND level = ?{}", params.len()));
        }
        if let Some(target) = &q.target {
            params.push(Box::new(format!("%{target}%")));
            sql.push_str(&format!(" AND target LIKE ?{}", params.len()));
        }
        if let Some(match_id) = &q.match_id {
            params.push(Box::new(match_id.clone()));
            sql.push_str(&format!(" AND match_id = ?{}", params.len()));
        }
        if let Some(since) = &q.since {
            params.push(Box::new(since.clone()));
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }

        sql.push_str(&format!(" ORDER BY id DESC LIMIT {}", q.limit.unwrap_or(100)));

        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), |row| {
            Ok(LogRecord {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                level: row.get(2)?,
                target: row.get(3)?,
                message: row.get(4)?,
                fields: row.get(5)?,
                match_id: row.get(6)?,
                connection_id: row.get(7)?,
            })
        })?;

        rows.collect()
    }

    pub fn count(&self) -> Result<i64, rusqlite::Error> {
        let conn = self.conn.lock();
        conn.query_row("SELECT COUNT(*) FROM logs", [], |row| row.get(0))
    }
}

struct LogInsert {
    timestamp: String,
    level: String,
    target: String,
    message: String,
    fields: Option<String>,
    match_id: Option<String>,
    connection_id: Option<String>,
}

/// tracing Layer that writes warn+ events to SQLite.
pub struct SqliteLogLayer {
    sink: Arc<SqliteLogSink>,
}

impl SqliteLogLayer {
    pub fn new(sink: Arc<SqliteLogSink>) -> Self {
        Self { sink }
    }
}

/// Pulls the message, the correlation ids and everything else out of an
/// event or span.
#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: serde_json::Map<String, serde_json::Value>,
    ids: CorrelationIds,
}

#[derive(Clone, Default)]
struct CorrelationIds {
    match_id: Option<String>,
    connection_id: Option<String>,
}

impl CorrelationIds {
    fn is_empty(&self) -> bool {
        self.match_id.is_none() && self.connection_id.is_none()
    }

    fn fill_from(&mut self, other: &CorrelationIds) {
        if self.match_id.is_none() {
            self.match_id.clone_from(&other.match_id);
        }
        if self.connection_id.is_none() {
            self.connection_id.clone_from(&other.connection_id);
        }
    }
}

impl FieldVisitor {
    fn record_text(&mut self, name: &str, value: String) {
        match name {
            "message" => self.message = Some(value),
            "match_id" => self.ids.match_id = Some(value),
            "connection_id" => self.ids.connection_id = Some(value),
            other => {
                self.fields.insert(other.to_string(), serde_json::Value::String(value));
            }
        }
    }
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        let rendered = match field.name() {
            "match_id" | "connection_id" => rendered.trim_matches('"').to_string(),
            _ => rendered,
        };
        self.record_text(field.name(), rendered);
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_text(field.name(), value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), value.into());
    }
}

impl<S> Layer<S> for SqliteLogLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, ctx: Context<'_, S>) {
        let level = *event.metadata().level();
        if level > tracing::Level::WARN {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        if let Some(scope) = ctx.event_scope(event) {
            for span in scope {
                if let Some(ids) = span.extensions().get::<CorrelationIds>() {
                    visitor.ids.fill_from(ids);
                }
            }
        }

        let fields = if visitor.fields.is_empty() {
            None
        } else {
            serde_json::to_string(&visitor.fields).ok()
        };

        self.sink.insert(&LogInsert {
            timestamp: Utc::now().to_rfc3339(),
            level: level.to_string().to_uppercase(),
            target: event.metadata().target().to_string(),
            message: visitor.message.unwrap_or_default(),
            fields,
            match_id: visitor.ids.match_id,
            connection_id: visitor.ids.connection_id,
        });
    }

    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        attrs.record(&mut visitor);

        if !visitor.ids.is_empty() {
            if let Some(span) = ctx.span(id) {
                span.extensions_mut().insert(visitor.ids);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tracing_subscriber::layer::SubscriberExt;

    fn temp_db() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("matchfeed-test-logs-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join("logs.db")
    }

    fn record(level: &str, target: &str, message: &str, match_id: Option<&str>) -> LogInsert {
        LogInsert {
            timestamp: "2026-10-18T12:00:00Z".into(),
            level: level.into(),
            target: target.into(),
            message: message.into(),
            fields: None,
            match_id: match_id.map(Into::into),
            connection_id: None,
        }
    }

    #[test]
    fn query_filters_by_level_and_match() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        sink.insert(&record("WARN", "matchfeed_server::hub", "send queue full", Some("M1")));
        sink.insert(&record("ERROR", "matchfeed_server::replay", "poll failed", None));
        assert_eq!(sink.count().unwrap(), 2);

        let errors = sink
            .query(&LogQuery {
                level: Some("ERROR".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "poll failed");

        let m1 = sink
            .query(&LogQuery {
                match_id: Some("M1".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(m1.len(), 1);
        assert_eq!(m1[0].target, "matchfeed_server::hub");
    }

    #[test]
    fn query_by_target_substring_with_limit() {
        let sink = SqliteLogSink::new(&temp_db()).unwrap();
        for i in 0..5 {
            sink.insert(&record("WARN", "matchfeed_server::replay", &format!("msg {i}"), None));
        }
        sink.insert(&record("WARN", "matchfeed_store::commentary", "other", None));

        let results = sink
            .query(&LogQuery {
                target: Some("replay".into()),
                limit: Some(2),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].message, "msg 4");
    }

    #[test]
    fn layer_persists_warn_and_inherits_span_ids() {
        let sink = Arc::new(SqliteLogSink::new(&temp_db()).unwrap());
        let subscriber = tracing_subscriber::registry().with(SqliteLogLayer::new(sink.clone()));

        tracing::subscriber::with_default(subscriber, || {
            let span = tracing::info_span!("conn", connection_id = "conn_1");
            let _enter = span.enter();
            tracing::info!("ignored below warn");
            tracing::warn!(match_id = "M9", dropped = 3u64, "send queue full");
        });

        let rows = sink.query(&LogQuery::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].level, "WARN");
        assert_eq!(rows[0].message, "send queue full");
        assert_eq!(rows[0].match_id.as_deref(), Some("M9"));
        assert_eq!(rows[0].connection_id.as_deref(), Some("conn_1"));
        assert!(rows[0].fields.as_deref().unwrap().contains("\"dropped\":3"));
    }
}
