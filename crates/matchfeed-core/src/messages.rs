//! JSON frames exchanged over the `/ws` channel.

use serde::{Deserialize, Serialize};

use crate::ids::MatchId;
use crate::models::{Commentary, Match};

/// Server → client frames.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Welcome,
    MatchCreated {
        #[serde(rename = "match")]
        match_: Match,
    },
    Commentary {
        #[serde(skip_serializing_if = "Option::is_none")]
        match_id: Option<MatchId>,
        data: Commentary,
    },
    /// Subscription acknowledgement. The tag is `subscribe`, not
    /// `subscribed`; existing clients depend on it.
    #[serde(rename = "subscribe")]
    Subscribed { match_id: MatchId },
    Unsubscribed { match_id: MatchId },
    Error { message: String },
}

impl ServerMessage {
    pub fn commentary(row: Commentary) -> Self {
        Self::Commentary {
            match_id: None,
            data: row,
        }
    }

    pub fn match_created(m: Match) -> Self {
        Self::MatchCreated { match_: m }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Wire tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::MatchCreated { .. } => "match_created",
            Self::Commentary { .. } => "commentary",
            Self::Subscribed { .. } => "subscribe",
            Self::Unsubscribed { .. } => "unsubscribed",
            Self::Error { .. } => "error",
        }
    }
}

/// Client → server frames.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Subscribe { match_id: MatchId },
    Unsubscribe { match_id: MatchId },
}

/// Outcome of decoding one inbound text frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Inbound {
    Message(ClientMessage),
    /// Valid JSON that is not a recognized command (unknown type, missing
    /// or non-string `matchId`). Ignored without reply.
    Unrecognized,
    /// Not JSON at all.
    Malformed,
}

impl Inbound {
    pub fn decode(text: &str) -> Self {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => return Self::Malformed,
        };
        match serde_json::from_value::<ClientMessage>(value) {
            Ok(msg) => Self::Message(msg),
            Err(_) => Self::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::CommentaryId;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn row() -> Commentary {
        Commentary {
            id: CommentaryId::from_raw("c1"),
            match_id: MatchId::from_raw("M1"),
            minute: Some(3),
            sequence: 1,
            period: None,
            event_type: "goal".into(),
            actor: None,
            team: None,
            message: "Goal!".into(),
            metadata: None,
            tags: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    #[test]
    fn welcome_is_bare_tag() {
        let v = serde_json::to_value(ServerMessage::Welcome).unwrap();
        assert_eq!(v, json!({"type": "welcome"}));
    }

    #[test]
    fn subscribe_ack_uses_subscribe_tag() {
        let msg = ServerMessage::Subscribed {
            match_id: MatchId::from_raw("M1"),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v, json!({"type": "subscribe", "matchId": "M1"}));
        assert_eq!(msg.kind(), "subscribe");
    }

    #[test]
    fn unsubscribed_and_error_shapes() {
        let v = serde_json::to_value(ServerMessage::Unsubscribed {
            match_id: MatchId::from_raw("M1"),
        })
        .unwrap();
        assert_eq!(v, json!({"type": "unsubscribed", "matchId": "M1"}));

        let v = serde_json::to_value(ServerMessage::error("Invalid JSON")).unwrap();
        assert_eq!(v, json!({"type": "error", "message": "Invalid JSON"}));
    }

    #[test]
    fn commentary_frame_carries_row_as_data() {
        let v = serde_json::to_value(ServerMessage::commentary(row())).unwrap();
        assert_eq!(v["type"], "commentary");
        assert!(v.get("matchId").is_none());
        assert_eq!(v["data"]["matchId"], "M1");
        assert_eq!(v["data"]["eventType"], "goal");
        assert_eq!(v["data"]["sequence"], 1);
    }

    #[test]
    fn decode_subscribe_and_unsubscribe() {
        assert_eq!(
            Inbound::decode(r#"{"type":"subscribe","matchId":"M1"}"#),
            Inbound::Message(ClientMessage::Subscribe {
                match_id: MatchId::from_raw("M1")
            })
        );
        assert_eq!(
            Inbound::decode(r#"{"type":"unsubscribe","matchId":"M1","extra":true}"#),
            Inbound::Message(ClientMessage::Unsubscribe {
                match_id: MatchId::from_raw("M1")
            })
        );
    }

    #[test]
    fn decode_malformed_json() {
        assert_eq!(Inbound::decode("{not json"), Inbound::Malformed);
        assert_eq!(Inbound::decode(""), Inbound::Malformed);
    }

    #[test]
    fn decode_unrecognized_shapes() {
        assert_eq!(Inbound::decode(r#"{"type":"ping"}"#), Inbound::Unrecognized);
        assert_eq!(Inbound::decode(r#"{"type":"subscribe"}"#), Inbound::Unrecognized);
        assert_eq!(
            Inbound::decode(r#"{"type":"subscribe","matchId":42}"#),
            Inbound::Unrecognized
        );
        assert_eq!(Inbound::decode("null"), Inbound::Unrecognized);
        assert_eq!(Inbound::decode("[1,2]"), Inbound::Unrecognized);
    }
}
