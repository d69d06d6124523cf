//! Network Layer
//!
//! Subscriber-facing surface: the WebSocket push channel, the pull endpoint
//! and the camera endpoint, all on one listener. Nothing here mutates
//! leaderboard state; snapshots arrive through the [`SnapshotPublisher`].

pub mod http;
pub mod protocol;
pub mod publisher;
pub mod server;

pub use http::{HttpError, HttpRequest, HttpResponse};
pub use protocol::{CameraRequest, CameraResponse, ClientMessage, InfoMessage};
pub use publisher::{SnapshotPublisher, SubscriberFeed, SubscriberHub, SubscriberId, Throttle};
pub use server::{LeaderboardServer, ServerConfig, ServerError};
