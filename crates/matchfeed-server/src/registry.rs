use std::collections::HashMap;
use std::sync::{Arc, Weak};

use matchfeed_core::{ConnectionId, MatchId};
use parking_lot::Mutex;

use crate::connection::Connection;

type Subscribers = HashMap<ConnectionId, Weak<Connection>>;

/// Match id → interested connections. Holds weak references only; each
/// connection's own subscribed-set is kept in step under the same lock.
///
/// Lock order is registry map, then a connection's subscription set.
/// Keys with no subscribers are removed eagerly.
#[derive(Default)]
pub struct SubscriptionRegistry {
    matches: Mutex<HashMap<MatchId, Subscribers>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent. Returns false (and changes nothing) if the connection is
    /// not open, so a subscribe racing a close cannot leave a stale entry.
    pub fn subscribe(&self, match_id: &MatchId, conn: &Arc<Connection>) -> bool {
        let mut matches = self.matches.lock();
        if !conn.is_open() {
            return false;
        }
        matches
            .entry(match_id.clone())
            .or_default()
            .insert(conn.id().clone(), Arc::downgrade(conn));
        conn.subscriptions_mut().insert(match_id.clone());
        true
    }

    /// No-op if not subscribed. Returns whether a subscription was removed.
    pub fn unsubscribe(&self, match_id: &MatchId, conn: &Connection) -> bool {
        let mut matches = self.matches.lock();
        conn.subscriptions_mut().remove(match_id);
        remove_member(&mut matches, match_id, conn.id())
    }

    /// Drop every subscription held by `conn` and clear its set. Returns the
    /// number of matches it was removed from.
    pub fn cleanup(&self, conn: &Connection) -> usize {
        let mut matches = self.matches.lock();
        let subscribed: Vec<MatchId> = conn.subscriptions_mut().drain().collect();
        subscribed
            .iter()
            .filter(|match_id| remove_member(&mut matches, match_id, conn.id()))
            .count()
    }

    /// Live subscribers of a match, snapshotted so sends happen unlocked.
    pub fn subscribers(&self, match_id: &MatchId) -> Vec<Arc<Connection>> {
        self.matches
            .lock()
            .get(match_id)
            .map(|subs| subs.values().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn subscriber_count(&self, match_id: &MatchId) -> usize {
        self.matches.lock().get(match_id).map_or(0, HashMap::len)
    }

    pub fn is_subscribed(&self, match_id: &MatchId, conn_id: &ConnectionId) -> bool {
        self.matches
            .lock()
            .get(match_id)
            .is_some_and(|subs| subs.contains_key(conn_id))
    }

    /// Number of match ids with at least one subscriber.
    pub fn match_count(&self) -> usize {
        self.matches.lock().len()
    }

    /// Match ids in which `conn_id` appears.
    pub fn matches_for(&self, conn_id: &ConnectionId) -> Vec<MatchId> {
        self.matches
            .lock()
            .iter()
            .filter(|(_, subs)| subs.contains_key(conn_id))
            .map(|(match_id, _)| match_id.clone())
            .collect()
    }
}

fn remove_member(
    matches: &mut HashMap<MatchId, Subscribers>,
    match_id: &MatchId,
    conn_id: &ConnectionId,
) -> bool {
    let Some(subs) = matches.get_mut(match_id) else {
        return false;
    };
    let removed = subs.remove(conn_id).is_some();
    if subs.is_empty() {
        matches.remove(match_id);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Frame;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn open_conn() -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = Arc::new(Connection::new(tx, CancellationToken::new()));
        conn.mark_open();
        (conn, rx)
    }

    fn m(id: &str) -> MatchId {
        MatchId::from_raw(id)
    }

    /// Registry membership and the connection's own set agree.
    fn assert_consistent(reg: &SubscriptionRegistry, conn: &Connection) {
        let mut from_registry = reg.matches_for(conn.id());
        let mut from_conn = conn.subscriptions();
        from_registry.sort();
        from_conn.sort();
        assert_eq!(from_registry, from_conn);
    }

    #[test]
    fn subscribe_is_idempotent() {
        let reg = SubscriptionRegistry::new();
        let (c, _rx) = open_conn();
        assert!(reg.subscribe(&m("M1"), &c));
        assert!(reg.subscribe(&m("M1"), &c));
        assert_eq!(reg.subscriber_count(&m("M1")), 1);
        assert_eq!(c.subscriptions(), vec![m("M1")]);
        assert_consistent(&reg, &c);
    }

    #[test]
    fn unsubscribe_removes_empty_entry() {
        let reg = SubscriptionRegistry::new();
        let (c, _rx) = open_conn();
        reg.subscribe(&m("M1"), &c);
        assert!(reg.unsubscribe(&m("M1"), &c));
        assert_eq!(reg.match_count(), 0);
        assert!(!c.is_subscribed(&m("M1")));
    }

    #[test]
    fn unsubscribe_without_subscription_is_noop() {
        let reg = SubscriptionRegistry::new();
        let (a, _ra) = open_conn();
        let (b, _rb) = open_conn();
        reg.subscribe(&m("M1"), &a);
        assert!(!reg.unsubscribe(&m("M1"), &b));
        assert!(!reg.unsubscribe(&m("M2"), &b));
        assert_eq!(reg.subscriber_count(&m("M1")), 1);
    }

    #[test]
    fn entry_survives_while_other_subscribers_remain() {
        let reg = SubscriptionRegistry::new();
        let (a, _ra) = open_conn();
        let (b, _rb) = open_conn();
        reg.subscribe(&m("M1"), &a);
        reg.subscribe(&m("M1"), &b);
        reg.unsubscribe(&m("M1"), &a);
        assert_eq!(reg.subscriber_count(&m("M1")), 1);
        assert!(reg.is_subscribed(&m("M1"), b.id()));
        assert!(!reg.is_subscribed(&m("M1"), a.id()));
    }

    #[test]
    fn cleanup_after_arbitrary_sequence_leaves_nothing() {
        let reg = SubscriptionRegistry::new();
        let (c, _rc) = open_conn();
        let (other, _ro) = open_conn();
        reg.subscribe(&m("M3"), &other);

        let ops: [(bool, &str); 8] = [
            (true, "M1"),
            (true, "M2"),
            (false, "M1"),
            (true, "M3"),
            (true, "M2"),
            (false, "M4"),
            (true, "M4"),
            (true, "M1"),
        ];
        for (subscribe, id) in ops {
            if subscribe {
                reg.subscribe(&m(id), &c);
            } else {
                reg.unsubscribe(&m(id), &c);
            }
            assert_consistent(&reg, &c);
        }

        assert_eq!(reg.cleanup(&c), 4);
        assert!(reg.matches_for(c.id()).is_empty());
        assert!(c.subscriptions().is_empty());
        // Only the other connection's entry remains; no empty keys.
        assert_eq!(reg.match_count(), 1);
        assert_eq!(reg.subscriber_count(&m("M3")), 1);
    }

    #[test]
    fn subscribe_refused_once_closing() {
        let reg = SubscriptionRegistry::new();
        let (c, _rx) = open_conn();
        c.begin_close();
        assert!(!reg.subscribe(&m("M1"), &c));
        assert_eq!(reg.match_count(), 0);
        assert!(c.subscriptions().is_empty());
    }

    #[test]
    fn subscribers_skip_dropped_connections() {
        let reg = SubscriptionRegistry::new();
        let (a, _ra) = open_conn();
        let (b, _rb) = open_conn();
        reg.subscribe(&m("M1"), &a);
        reg.subscribe(&m("M1"), &b);
        drop(a);
        let live = reg.subscribers(&m("M1"));
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id(), b.id());
    }

    #[test]
    fn concurrent_subscribe_and_cleanup_stay_consistent() {
        let reg = Arc::new(SubscriptionRegistry::new());
        let conns: Vec<_> = (0..8).map(|_| open_conn()).collect();

        std::thread::scope(|s| {
            for (conn, _) in &conns {
                let reg = Arc::clone(&reg);
                let conn = Arc::clone(conn);
                s.spawn(move || {
                    for i in 0..50 {
                        let id = m(&format!("M{}", i % 5));
                        reg.subscribe(&id, &conn);
                        if i % 3 == 0 {
                            reg.unsubscribe(&id, &conn);
                        }
                    }
                    reg.cleanup(&conn);
                });
            }
        });

        assert_eq!(reg.match_count(), 0);
        for (conn, _) in &conns {
            assert!(conn.subscriptions().is_empty());
        }
    }
}
