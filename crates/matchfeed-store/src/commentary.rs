use chrono::{DateTime, Utc};
use tracing::instrument;

use matchfeed_core::{Commentary, CommentaryId, MatchId, NewCommentary};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{format_ts, parse_json_opt, parse_ts, stored_ts};

const COLUMNS: &str =
    "id, match_id, minute, sequence, period, event_type, actor, team, message, metadata, tags, created_at";

/// A freshly inserted row and whether its delivery is deferred to the
/// replay engine.
#[derive(Clone, Debug)]
pub struct InsertedCommentary {
    pub row: Commentary,
    pub scheduled: bool,
}

/// Source of commentary rows whose release time has elapsed.
pub trait CommentarySource: Send + Sync {
    /// Scheduled rows with `since < created_at <= until`, ascending by
    /// release time then sequence.
    fn eligible(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Commentary>, StoreError>;
}

#[derive(Clone)]
pub struct CommentaryRepo {
    db: Database,
}

impl CommentaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a row for `match_id`. A release time in the future marks the
    /// row as scheduled; otherwise it is stamped with the given (or current)
    /// time and is immediately visible.
    #[instrument(skip(self, new), fields(match_id = %match_id, sequence = new.sequence))]
    pub fn create(
        &self,
        match_id: &MatchId,
        mut new: NewCommentary,
        now: DateTime<Utc>,
    ) -> Result<InsertedCommentary, StoreError> {
        new.created_at = new.created_at.map(stored_ts);
        let scheduled = new.is_scheduled(now);
        let row = Commentary {
            id: CommentaryId::new(),
            match_id: match_id.clone(),
            minute: new.minute,
            sequence: new.sequence,
            period: new.period,
            event_type: new.event_type,
            actor: new.actor,
            team: new.team,
            message: new.message,
            metadata: new.metadata,
            tags: new.tags,
            created_at: new.created_at.unwrap_or_else(|| stored_ts(now)),
        };

        let metadata = row.metadata.as_ref().map(serde_json::to_string).transpose()?;
        let tags = row.tags.as_ref().map(serde_json::to_string).transpose()?;

        self.db.with_conn(|conn| {
            let exists: i64 = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM matches WHERE id = ?1)",
                [match_id.as_str()],
                |r| r.get(0),
            )?;
            if exists == 0 {
                return Err(StoreError::NotFound(format!("match {match_id}")));
            }

            conn.execute(
                "INSERT INTO commentary (id, match_id, minute, sequence, period, event_type, actor, team, message, metadata, tags, scheduled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                rusqlite::params![
                    row.id.as_str(),
                    row.match_id.as_str(),
                    row.minute,
                    row.sequence,
                    row.period,
                    row.event_type,
                    row.actor,
                    row.team,
                    row.message,
                    metadata,
                    tags,
                    scheduled,
                    format_ts(row.created_at),
                ],
            )
            .map_err(|e| match StoreError::from(e) {
                StoreError::Conflict(_) => StoreError::Conflict(format!(
                    "sequence {} already exists for match {match_id}",
                    row.sequence
                )),
                other => other,
            })?;
            Ok(())
        })?;

        Ok(InsertedCommentary { row, scheduled })
    }

    /// Rows of one match already released at `now`, newest first.
    #[instrument(skip(self), fields(match_id = %match_id))]
    pub fn list_for_match(
        &self,
        match_id: &MatchId,
        limit: u32,
        now: DateTime<Utc>,
    ) -> Result<Vec<Commentary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM commentary
                 WHERE match_id = ?1 AND created_at <= ?2
                 ORDER BY created_at DESC, sequence DESC
                 LIMIT ?3"
            ))?;
            let mut rows =
                stmt.query(rusqlite::params![match_id.as_str(), format_ts(now), limit])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_commentary(row)?);
            }
            Ok(results)
        })
    }
}

impl CommentarySource for CommentaryRepo {
    #[instrument(skip(self))]
    fn eligible(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<Vec<Commentary>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM commentary
                 WHERE scheduled = 1 AND created_at > ?1 AND created_at <= ?2
                 ORDER BY created_at ASC, sequence ASC"
            ))?;
            let mut rows = stmt.query([format_ts(since), format_ts(until)])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_commentary(row)?);
            }
            Ok(results)
        })
    }
}

fn row_to_commentary(row: &rusqlite::Row<'_>) -> Result<Commentary, StoreError> {
    let created_at: String = row.get(11)?;
    Ok(Commentary {
        id: CommentaryId::from_raw(row.get::<_, String>(0)?),
        match_id: MatchId::from_raw(row.get::<_, String>(1)?),
        minute: row.get(2)?,
        sequence: row.get(3)?,
        period: row.get(4)?,
        event_type: row.get(5)?,
        actor: row.get(6)?,
        team: row.get(7)?,
        message: row.get(8)?,
        metadata: parse_json_opt(row.get(9)?, "commentary", "metadata")?,
        tags: parse_json_opt(row.get(10)?, "commentary", "tags")?,
        created_at: parse_ts(&created_at, "commentary", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matches::MatchRepo;
    use chrono::{Duration, TimeZone};
    use matchfeed_core::ValidMatch;

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap()
    }

    fn setup() -> (CommentaryRepo, MatchId) {
        let db = Database::in_memory().unwrap();
        let m = MatchRepo::new(db.clone())
            .create(
                ValidMatch {
                    sport: "football".into(),
                    home_team: "A".into(),
                    away_team: "B".into(),
                    start_time: t0(),
                    end_time: t0() + Duration::hours(2),
                    home_score: 0,
                    away_score: 0,
                },
                t0(),
            )
            .unwrap();
        (CommentaryRepo::new(db), m.id)
    }

    fn entry(sequence: i64, at: Option<DateTime<Utc>>) -> NewCommentary {
        NewCommentary {
            sequence,
            event_type: "update".into(),
            message: format!("event {sequence}"),
            created_at: at,
            ..Default::default()
        }
    }

    #[test]
    fn create_live_row_roundtrips_optional_fields() {
        let (repo, match_id) = setup();
        let new = NewCommentary {
            minute: Some(12),
            period: Some("1H".into()),
            actor: Some("Saka".into()),
            team: Some("A".into()),
            metadata: Some(serde_json::json!({"xg": 0.4})),
            tags: Some(vec!["shot".into()]),
            ..entry(1, None)
        };
        let inserted = repo.create(&match_id, new, t0()).unwrap();
        assert!(!inserted.scheduled);
        assert_eq!(inserted.row.created_at, t0());

        let listed = repo.list_for_match(&match_id, 10, t0()).unwrap();
        assert_eq!(listed, vec![inserted.row]);
    }

    #[test]
    fn duplicate_sequence_is_conflict() {
        let (repo, match_id) = setup();
        repo.create(&match_id, entry(1, None), t0()).unwrap();
        let err = repo.create(&match_id, entry(1, None), t0()).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)), "got: {err}");
    }

    #[test]
    fn unknown_match_is_not_found() {
        let (repo, _) = setup();
        let err = repo
            .create(&MatchId::from_raw("nope"), entry(1, None), t0())
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn future_rows_are_scheduled_and_hidden_until_release() {
        let (repo, match_id) = setup();
        let release = t0() + Duration::seconds(30);
        let inserted = repo.create(&match_id, entry(1, Some(release)), t0()).unwrap();
        assert!(inserted.scheduled);

        assert!(repo.list_for_match(&match_id, 10, t0()).unwrap().is_empty());
        assert_eq!(repo.list_for_match(&match_id, 10, release).unwrap().len(), 1);
    }

    #[test]
    fn list_newest_first_and_limited() {
        let (repo, match_id) = setup();
        for seq in 1..=5 {
            repo.create(&match_id, entry(seq, Some(t0() - Duration::seconds(10 - seq))), t0())
                .unwrap();
        }
        let listed = repo.list_for_match(&match_id, 3, t0()).unwrap();
        let seqs: Vec<i64> = listed.iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, vec![5, 4, 3]);
    }

    #[test]
    fn eligible_uses_half_open_interval() {
        let (repo, match_id) = setup();
        for seq in 1..=4 {
            repo.create(&match_id, entry(seq, Some(t0() + Duration::seconds(seq))), t0())
                .unwrap();
        }

        // (t0+1, t0+3] excludes the lower bound and includes the upper one.
        let rows = repo
            .eligible(t0() + Duration::seconds(1), t0() + Duration::seconds(3))
            .unwrap();
        let seqs: Vec<i64> = rows.iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, vec![2, 3]);

        let rest = repo
            .eligible(t0() + Duration::seconds(3), t0() + Duration::seconds(60))
            .unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].sequence, 4);
    }

    #[test]
    fn eligible_orders_by_time_then_sequence_and_skips_live_rows() {
        let (repo, match_id) = setup();
        let at = t0() + Duration::seconds(5);
        repo.create(&match_id, entry(3, Some(at)), t0()).unwrap();
        repo.create(&match_id, entry(2, Some(at)), t0()).unwrap();
        repo.create(&match_id, entry(1, Some(t0() + Duration::seconds(4))), t0())
            .unwrap();
        // Live row stamped inside the window must not be replayed.
        repo.create(&match_id, entry(9, None), at).unwrap();

        let rows = repo.eligible(t0(), t0() + Duration::seconds(10)).unwrap();
        let seqs: Vec<i64> = rows.iter().map(|c| c.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }

    #[test]
    fn created_row_matches_what_reads_return() {
        let (repo, match_id) = setup();
        let at = t0() + Duration::nanoseconds(5_123_456_789);
        let scheduled = repo.create(&match_id, entry(1, Some(at)), t0()).unwrap();
        assert!(scheduled.scheduled);
        assert_eq!(scheduled.row.created_at, t0() + Duration::microseconds(5_123_456));

        let released = repo.eligible(t0(), t0() + Duration::seconds(10)).unwrap();
        assert_eq!(released, vec![scheduled.row.clone()]);

        let live_at = t0() + Duration::nanoseconds(20_000_000_999);
        let live = repo.create(&match_id, entry(2, None), live_at).unwrap();
        assert!(!live.scheduled);
        let listed = repo
            .list_for_match(&match_id, 10, t0() + Duration::seconds(30))
            .unwrap();
        assert_eq!(listed, vec![live.row, scheduled.row]);
    }
}
