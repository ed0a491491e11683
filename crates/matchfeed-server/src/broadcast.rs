use std::sync::Arc;

use axum::extract::ws::Utf8Bytes;
use matchfeed_core::{Commentary, Match, MatchId, ServerMessage};

use crate::connection::{Connection, SendError};
use crate::hub::ConnectionHub;

/// Fan-out of server frames to subscribers of a match or to everyone.
/// Each call encodes its payload once and shares the buffer.
#[derive(Clone)]
pub struct Broadcaster {
    hub: Arc<ConnectionHub>,
}

impl Broadcaster {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    /// Returns the number of connections the frame was queued for. No
    /// subscribers is not an error.
    pub fn broadcast_to_match(&self, match_id: &MatchId, message: &ServerMessage) -> usize {
        let subscribers = self.hub.registry().subscribers(match_id);
        if subscribers.is_empty() {
            tracing::trace!(match_id = %match_id, kind = message.kind(), "no subscribers");
            return 0;
        }
        let Some(payload) = encode(message) else {
            return 0;
        };
        let sent = self.deliver(&subscribers, &payload);
        tracing::debug!(match_id = %match_id, kind = message.kind(), sent, "broadcast to match");
        sent
    }

    /// Every open connection, regardless of subscriptions.
    pub fn broadcast_to_all(&self, message: &ServerMessage) -> usize {
        let connections = self.hub.open_connections();
        if connections.is_empty() {
            return 0;
        }
        let Some(payload) = encode(message) else {
            return 0;
        };
        let sent = self.deliver(&connections, &payload);
        tracing::debug!(kind = message.kind(), sent, "broadcast to all");
        sent
    }

    pub fn commentary(&self, row: &Commentary) -> usize {
        self.broadcast_to_match(&row.match_id, &ServerMessage::commentary(row.clone()))
    }

    pub fn match_created(&self, m: &Match) -> usize {
        self.broadcast_to_all(&ServerMessage::match_created(m.clone()))
    }

    fn deliver(&self, targets: &[Arc<Connection>], payload: &Utf8Bytes) -> usize {
        let mut sent = 0;
        for conn in targets {
            // Open-state is rechecked at send time; a concurrent close wins.
            if !conn.is_open() {
                continue;
            }
            match conn.send_text(payload.clone()) {
                Ok(()) => sent += 1,
                Err(SendError::Disconnected) => self.hub.terminate(conn, "send failed"),
                Err(SendError::NotOpen | SendError::QueueFull | SendError::Encode) => {}
            }
        }
        sent
    }
}

fn encode(message: &ServerMessage) -> Option<Utf8Bytes> {
    match serde_json::to_string(message) {
        Ok(json) => Some(json.into()),
        Err(e) => {
            tracing::error!(kind = message.kind(), error = %e, "failed to encode broadcast");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Frame;
    use chrono::{TimeZone, Utc};
    use matchfeed_core::{CommentaryId, MatchStatus};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn setup() -> (Arc<ConnectionHub>, Broadcaster) {
        let hub = Arc::new(ConnectionHub::new(8, CancellationToken::new()));
        let broadcaster = Broadcaster::new(Arc::clone(&hub));
        (hub, broadcaster)
    }

    /// Accept a connection and swallow its welcome frame.
    fn connect(hub: &ConnectionHub) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (conn, mut rx) = hub.accept();
        rx.try_recv().unwrap();
        (conn, rx)
    }

    fn row(match_id: &str, sequence: i64) -> Commentary {
        Commentary {
            id: CommentaryId::new(),
            match_id: MatchId::from_raw(match_id),
            minute: None,
            sequence,
            period: None,
            event_type: "update".into(),
            actor: None,
            team: None,
            message: format!("event {sequence}"),
            metadata: None,
            tags: None,
            created_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn text(frame: Frame) -> serde_json::Value {
        match frame {
            Frame::Text(t) => serde_json::from_str(t.as_str()).unwrap(),
            Frame::Ping => panic!("expected text frame"),
        }
    }

    #[test]
    fn no_subscribers_is_noop() {
        let (hub, b) = setup();
        let (_conn, mut rx) = connect(&hub);
        assert_eq!(b.commentary(&row("M1", 1)), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn only_subscribers_receive_match_frames() {
        let (hub, b) = setup();
        let (sub, mut sub_rx) = connect(&hub);
        let (_other, mut other_rx) = connect(&hub);
        hub.registry().subscribe(&MatchId::from_raw("M1"), &sub);

        assert_eq!(b.commentary(&row("M1", 1)), 1);
        let v = text(sub_rx.try_recv().unwrap());
        assert_eq!(v["type"], "commentary");
        assert_eq!(v["data"]["sequence"], 1);
        assert!(other_rx.try_recv().is_err());
    }

    #[test]
    fn payload_is_shared_across_recipients() {
        let (hub, b) = setup();
        let (a, mut ra) = connect(&hub);
        let (c, mut rc) = connect(&hub);
        let m1 = MatchId::from_raw("M1");
        hub.registry().subscribe(&m1, &a);
        hub.registry().subscribe(&m1, &c);

        b.commentary(&row("M1", 7));
        let (Frame::Text(x), Frame::Text(y)) = (ra.try_recv().unwrap(), rc.try_recv().unwrap())
        else {
            panic!("expected text frames");
        };
        assert_eq!(x.as_str().as_ptr(), y.as_str().as_ptr());
    }

    #[test]
    fn match_created_reaches_everyone() {
        let (hub, b) = setup();
        let (_a, mut ra) = connect(&hub);
        let (_c, mut rc) = connect(&hub);
        let t = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let m = Match {
            id: MatchId::from_raw("M9"),
            sport: "football".into(),
            home_team: "A".into(),
            away_team: "B".into(),
            status: MatchStatus::Scheduled,
            start_time: t,
            end_time: None,
            home_score: 0,
            away_score: 0,
            created_at: t,
        };
        assert_eq!(b.match_created(&m), 2);
        assert_eq!(text(ra.try_recv().unwrap())["match"]["id"], "M9");
        assert_eq!(text(rc.try_recv().unwrap())["type"], "match_created");
    }

    #[test]
    fn dead_writer_is_reaped_on_send() {
        let (hub, b) = setup();
        let (conn, rx) = connect(&hub);
        let m1 = MatchId::from_raw("M1");
        hub.registry().subscribe(&m1, &conn);
        drop(rx);

        assert_eq!(b.commentary(&row("M1", 1)), 0);
        assert_eq!(hub.count(), 0);
        assert_eq!(hub.registry().match_count(), 0);
    }

    #[test]
    fn closing_connection_is_skipped() {
        let (hub, b) = setup();
        let (a, mut ra) = connect(&hub);
        let (c, mut rc) = connect(&hub);
        let m1 = MatchId::from_raw("M1");
        hub.registry().subscribe(&m1, &a);
        hub.registry().subscribe(&m1, &c);
        a.begin_close();

        assert_eq!(b.commentary(&row("M1", 1)), 1);
        assert!(ra.try_recv().is_err());
        assert!(rc.try_recv().is_ok());
    }
}
