use std::sync::Arc;

use matchfeed_core::{ClientMessage, Inbound, ServerMessage};

use crate::connection::Connection;
use crate::hub::ConnectionHub;

/// Per-connection command handling for inbound text frames.
#[derive(Clone)]
pub struct ProtocolHandler {
    hub: Arc<ConnectionHub>,
}

impl ProtocolHandler {
    pub fn new(hub: Arc<ConnectionHub>) -> Self {
        Self { hub }
    }

    /// Apply one inbound frame and return the reply, if any. Unrecognized
    /// JSON is ignored; only unparseable text earns an error frame.
    pub fn handle_text(&self, conn: &Arc<Connection>, text: &str) -> Option<ServerMessage> {
        match Inbound::decode(text) {
            Inbound::Malformed => {
                tracing::debug!(connection_id = %conn.id(), "malformed frame");
                Some(ServerMessage::error("Invalid JSON"))
            }
            Inbound::Unrecognized => {
                tracing::trace!(connection_id = %conn.id(), "ignoring unrecognized frame");
                None
            }
            Inbound::Message(ClientMessage::Subscribe { match_id }) => {
                if !self.hub.registry().subscribe(&match_id, conn) {
                    return None;
                }
                tracing::debug!(connection_id = %conn.id(), match_id = %match_id, "subscribed");
                Some(ServerMessage::Subscribed { match_id })
            }
            Inbound::Message(ClientMessage::Unsubscribe { match_id }) => {
                self.hub.registry().unsubscribe(&match_id, conn);
                tracing::debug!(connection_id = %conn.id(), match_id = %match_id, "unsubscribed");
                Some(ServerMessage::Unsubscribed { match_id })
            }
        }
    }
}
