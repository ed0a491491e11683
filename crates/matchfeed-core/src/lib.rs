pub mod errors;
pub mod ids;
pub mod messages;
pub mod models;

pub use errors::ValidationError;
pub use ids::{CommentaryId, ConnectionId, MatchId};
pub use messages::{ClientMessage, Inbound, ServerMessage};
pub use models::{Commentary, Match, MatchStatus, NewCommentary, NewMatch, ValidMatch};
