use chrono::{DateTime, Utc};
use tracing::instrument;

use matchfeed_core::{Match, MatchId, MatchStatus, ValidMatch};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{format_ts, parse_enum, parse_ts, stored_ts};

const COLUMNS: &str =
    "id, sport, home_team, away_team, status, start_time, end_time, home_score, away_score, created_at";

#[derive(Clone)]
pub struct MatchRepo {
    db: Database,
}

impl MatchRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a match; its status is derived from the window at `now`.
    #[instrument(skip(self, new), fields(home = %new.home_team, away = %new.away_team))]
    pub fn create(&self, new: ValidMatch, now: DateTime<Utc>) -> Result<Match, StoreError> {
        let m = Match {
            id: MatchId::new(),
            status: MatchStatus::derive(new.start_time, Some(new.end_time), now),
            sport: new.sport,
            home_team: new.home_team,
            away_team: new.away_team,
            start_time: stored_ts(new.start_time),
            end_time: Some(stored_ts(new.end_time)),
            home_score: new.home_score,
            away_score: new.away_score,
            created_at: stored_ts(now),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO matches (id, sport, home_team, away_team, status, start_time, end_time, home_score, away_score, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    m.id.as_str(),
                    m.sport,
                    m.home_team,
                    m.away_team,
                    m.status.as_str(),
                    format_ts(m.start_time),
                    m.end_time.map(format_ts),
                    m.home_score,
                    m.away_score,
                    format_ts(m.created_at),
                ],
            )?;
            Ok(())
        })?;

        Ok(m)
    }

    #[instrument(skip(self), fields(match_id = %id))]
    pub fn get(&self, id: &MatchId) -> Result<Match, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {COLUMNS} FROM matches WHERE id = ?1"))?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_match(row),
                None => Err(StoreError::NotFound(format!("match {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &MatchId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let found: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM matches WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(found != 0)
        })
    }

    /// Most recently created matches first.
    #[instrument(skip(self))]
    pub fn list(&self, limit: u32) -> Result<Vec<Match>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM matches ORDER BY created_at DESC, id DESC LIMIT ?1"
            ))?;
            let mut rows = stmt.query([limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_match(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_match(row: &rusqlite::Row<'_>) -> Result<Match, StoreError> {
    let status: String = row.get(4)?;
    let start_time: String = row.get(5)?;
    let end_time: Option<String> = row.get(6)?;
    let created_at: String = row.get(9)?;

    Ok(Match {
        id: MatchId::from_raw(row.get::<_, String>(0)?),
        sport: row.get(1)?,
        home_team: row.get(2)?,
        away_team: row.get(3)?,
        status: parse_enum(&status, "matches", "status")?,
        start_time: parse_ts(&start_time, "matches", "start_time")?,
        end_time: end_time
            .map(|raw| parse_ts(&raw, "matches", "end_time"))
            .transpose()?,
        home_score: row.get(7)?,
        away_score: row.get(8)?,
        created_at: parse_ts(&created_at, "matches", "created_at")?,
    })
}
