//! Leaderboard Engine
//!
//! Everything between decoded telemetry and the published snapshot.
//! Deterministic given its inputs and the `now` values passed in: records
//! live in a `BTreeMap`, every ordering has a total tie-break, and no module
//! here reads a clock except [`runner`].

pub mod engine;
pub mod entity;
pub mod ranking;
pub mod reconcile;
pub mod registry;
pub mod runner;
pub mod session;
pub mod snapshot;

pub use engine::{EngineConfig, LeaderboardEngine, Refresh};
pub use entity::{EntityId, EntityPatch, EntityRecord, NameSource};
pub use ranking::{rank, Standing, Standings};
pub use reconcile::reconcile;
pub use registry::EntityRegistry;
pub use runner::LeaderboardRunner;
pub use session::{FinalResult, RaceSession, SessionKind};
pub use snapshot::{FocusedSnapshot, LeaderboardEntry, LeaderboardSnapshot};
