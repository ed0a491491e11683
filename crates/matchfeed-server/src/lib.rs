pub mod broadcast;
pub mod connection;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod protocol;
pub mod registry;
pub mod replay;
pub mod routes;
pub mod server;
pub mod socket;

pub use broadcast::Broadcaster;
pub use connection::{Connection, ConnectionState};
pub use hub::ConnectionHub;
pub use registry::SubscriptionRegistry;
pub use replay::ReplayEngine;
pub use server::{start, ServerConfig, ServerHandle};
