use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::ValidationError;
use crate::ids::{CommentaryId, MatchId};

/// Lifecycle of a match relative to its time window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    Live,
    Finished,
}

impl MatchStatus {
    /// Status of a match with the given window as observed at `now`.
    /// A match without an end time never finishes on its own.
    pub fn derive(start: DateTime<Utc>, end: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        if now < start {
            return Self::Scheduled;
        }
        match end {
            Some(end) if now >= end => Self::Finished,
            _ => Self::Live,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Live => "live",
            Self::Finished => "finished",
        }
    }
}

impl fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(Self::Scheduled),
            "live" => Ok(Self::Live),
            "finished" => Ok(Self::Finished),
            other => Err(format!("unknown match status: {other}")),
        }
    }
}

/// A tracked sporting event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Match {
    pub id: MatchId,
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub status: MatchStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub home_score: i64,
    pub away_score: i64,
    pub created_at: DateTime<Utc>,
}

/// One commentary row. `created_at` doubles as the scheduled release time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commentary {
    pub id: CommentaryId,
    pub match_id: MatchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minute: Option<i64>,
    pub sequence: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
}

/// Request body for creating a match.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMatch {
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: String,
    pub end_time: String,
    #[serde(default)]
    pub home_score: Option<i64>,
    #[serde(default)]
    pub away_score: Option<i64>,
}

/// A `NewMatch` that passed validation, with parsed times.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidMatch {
    pub sport: String,
    pub home_team: String,
    pub away_team: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub home_score: i64,
    pub away_score: i64,
}

impl NewMatch {
    pub fn validate(self) -> Result<ValidMatch, ValidationError> {
        require_non_empty("sport", &self.sport)?;
        require_non_empty("homeTeam", &self.home_team)?;
        require_non_empty("awayTeam", &self.away_team)?;

        let start_time = parse_time("startTime", &self.start_time)?;
        let end_time = parse_time("endTime", &self.end_time)?;
        if end_time <= start_time {
            return Err(ValidationError::field("endTime", "must be after startTime"));
        }

        let home_score = self.home_score.unwrap_or(0);
        let away_score = self.away_score.unwrap_or(0);
        if home_score < 0 {
            return Err(ValidationError::field("homeScore", "must be non-negative"));
        }
        if away_score < 0 {
            return Err(ValidationError::field("awayScore", "must be non-negative"));
        }

        Ok(ValidMatch {
            sport: self.sport,
            home_team: self.home_team,
            away_team: self.away_team,
            start_time,
            end_time,
            home_score,
            away_score,
        })
    }
}

/// Request body for creating a commentary row.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCommentary {
    #[serde(default)]
    pub minute: Option<i64>,
    pub sequence: i64,
    #[serde(default)]
    pub period: Option<String>,
    pub event_type: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
    pub message: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    /// Release time. Omitted means "now"; a future value schedules the row
    /// for the replay engine instead of broadcasting it immediately.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl NewCommentary {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_empty("eventType", &self.event_type)?;
        require_non_empty("message", &self.message)?;
        if let Some(minute) = self.minute {
            if minute < 0 {
                return Err(ValidationError::field("minute", "must be non-negative"));
            }
        }
        if let Some(metadata) = &self.metadata {
            if !metadata.is_object() {
                return Err(ValidationError::field("metadata", "must be an object"));
            }
        }
        Ok(())
    }

    /// Whether this row is held back until its release time.
    pub fn is_scheduled(&self, now: DateTime<Utc>) -> bool {
        self.created_at.is_some_and(|at| at > now)
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::field(field, "is required"));
    }
    Ok(())
}

fn parse_time(field: &'static str, value: &str) -> Result<DateTime<Utc>, ValidationError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ValidationError::field(field, "invalid date format"))
}
