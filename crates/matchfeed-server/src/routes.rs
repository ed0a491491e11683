use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use matchfeed_core::{Commentary, Match, MatchId, NewCommentary, NewMatch, ValidationError};
use matchfeed_store::StoreError;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::server::AppState;

const MAX_LIMIT: i64 = 100;
const DEFAULT_MATCH_LIMIT: i64 = 10;

/// `{data: ...}` envelope used by every successful response.
#[derive(Debug, Serialize)]
pub struct Data<T> {
    pub data: T,
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

impl LimitQuery {
    fn resolve(&self, default: i64) -> Result<u32, ValidationError> {
        let limit = self.limit.unwrap_or(default);
        if limit <= 0 {
            return Err(ValidationError::field("limit", "must be positive"));
        }
        if limit > MAX_LIMIT {
            return Err(ValidationError::field("limit", "must be at most 100"));
        }
        u32::try_from(limit).map_err(|_| ValidationError::field("limit", "out of range"))
    }
}

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub connections: usize,
}

pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        connections: state.hub.count(),
    })
}

pub async fn list_matches(
    State(state): State<AppState>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Data<Vec<Match>>>, ApiError> {
    let Query(query) = query.map_err(|e| ApiError::bad_request("Invalid query", e.body_text()))?;
    let limit = query
        .resolve(DEFAULT_MATCH_LIMIT)
        .map_err(|e| ApiError::invalid("Invalid query", &e))?;
    let data = state.matches.list(limit)?;
    Ok(Json(Data { data }))
}

pub async fn create_match(
    State(state): State<AppState>,
    body: Result<Json<NewMatch>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<Match>>), ApiError> {
    let Json(new) =
        body.map_err(|e| ApiError::bad_request("Invalid match data", e.body_text()))?;
    let valid = new
        .validate()
        .map_err(|e| ApiError::invalid("Invalid match data", &e))?;

    let m = state.matches.create(valid, Utc::now())?;
    let notified = state.broadcaster.match_created(&m);
    tracing::info!(match_id = %m.id, status = %m.status, notified, "match created");

    Ok((StatusCode::CREATED, Json(Data { data: m })))
}

pub async fn list_commentary(
    State(state): State<AppState>,
    Path(match_id): Path<MatchId>,
    query: Result<Query<LimitQuery>, QueryRejection>,
) -> Result<Json<Data<Vec<Commentary>>>, ApiError> {
    let Query(query) =
        query.map_err(|e| ApiError::bad_request("Invalid query parameters", e.body_text()))?;
    let limit = query
        .resolve(MAX_LIMIT)
        .map_err(|e| ApiError::invalid("Invalid query parameters", &e))?;
    let data = state.commentary.list_for_match(&match_id, limit, Utc::now())?;
    Ok(Json(Data { data }))
}

/// Live rows are pushed to subscribers right away; rows with a future
/// `createdAt` are left to the replay engine.
pub async fn create_commentary(
    State(state): State<AppState>,
    Path(match_id): Path<MatchId>,
    body: Result<Json<NewCommentary>, JsonRejection>,
) -> Result<(StatusCode, Json<Data<Commentary>>), ApiError> {
    let Json(new) =
        body.map_err(|e| ApiError::bad_request("Invalid commentary data", e.body_text()))?;
    new.validate()
        .map_err(|e| ApiError::invalid("Invalid commentary data", &e))?;

    let inserted = state
        .commentary
        .create(&match_id, new, Utc::now())
        .map_err(|e| match e {
            StoreError::Conflict(_) => {
                ApiError::Conflict("Commentary sequence already exists for this match".into())
            }
            StoreError::NotFound(_) => ApiError::NotFound("Match not found".into()),
            other => other.into(),
        })?;

    let row = inserted.row;
    if inserted.scheduled {
        tracing::debug!(match_id = %match_id, sequence = row.sequence, release = %row.created_at, "commentary scheduled");
    } else {
        let recipients = state.broadcaster.commentary(&row);
        tracing::debug!(match_id = %match_id, sequence = row.sequence, recipients, "commentary broadcast");
    }

    Ok((StatusCode::CREATED, Json(Data { data: row })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_bounds() {
        let none = LimitQuery::default();
        assert_eq!(none.resolve(DEFAULT_MATCH_LIMIT).unwrap(), 10);
        assert_eq!(none.resolve(MAX_LIMIT).unwrap(), 100);

        let ok = LimitQuery { limit: Some(100) };
        assert_eq!(ok.resolve(DEFAULT_MATCH_LIMIT).unwrap(), 100);

        for bad in [0, -3, 101] {
            let q = LimitQuery { limit: Some(bad) };
            let err = q.resolve(DEFAULT_MATCH_LIMIT).unwrap_err();
            assert_eq!(err.field_name(), Some("limit"), "limit {bad}");
        }
    }
}
