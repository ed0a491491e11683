pub mod commentary;
pub mod database;
pub mod error;
pub mod matches;
pub mod row_helpers;
pub mod schema;

pub use commentary::{CommentaryRepo, CommentarySource, InsertedCommentary};
pub use database::Database;
pub use error::StoreError;
pub use matches::MatchRepo;
