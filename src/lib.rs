//! # SRA Leaderboard Server
//!
//! Live race leaderboard for a driving simulation. Decoded telemetry comes
//! in over a relay connection; ranked, deduplicated snapshots go out to
//! overlay subscribers over WebSocket and a pull endpoint.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   SRA LEADERBOARD SERVER                     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Pure helpers                              │
//! │  ├── names.rs    - Color codes, placeholder/AI detection     │
//! │  └── timefmt.rs  - Gap formatting                            │
//! │                                                              │
//! │  leaderboard/    - Engine (single owner, deterministic)      │
//! │  ├── entity.rs   - Per-driver records and patches            │
//! │  ├── registry.rs - Record map, name debounce, staleness      │
//! │  ├── reconcile.rs- Shadow/duplicate collapse                 │
//! │  ├── ranking.rs  - Ordering, leader, gaps, fastest lap       │
//! │  ├── session.rs  - Live/finished state machine               │
//! │  ├── snapshot.rs - Wire view types                           │
//! │  ├── engine.rs   - Event handling and snapshot assembly      │
//! │  └── runner.rs   - Owning task: events, probe, publish       │
//! │                                                              │
//! │  enrichment/     - Vehicle metadata (cosmetic only)          │
//! │  telemetry/      - Relay client, packets, directives         │
//! │                                                              │
//! │  network/        - Subscriber surface                        │
//! │  ├── server.rs   - WebSocket + HTTP listener                 │
//! │  ├── publisher.rs- Throttle and subscriber hub               │
//! │  ├── protocol.rs - Message types                             │
//! │  └── http.rs     - Minimal HTTP/1.1                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ordering Guarantee
//!
//! The `core/` and `leaderboard/` modules iterate only ordered maps and read
//! no clocks, except `leaderboard::runner`, which stamps each event with the
//! wall clock before handing it to the engine. Given the same event sequence
//! and the same `now` values, the engine produces identical snapshots
//! regardless of insertion order.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod enrichment;
pub mod leaderboard;
pub mod network;
pub mod telemetry;

// Re-export commonly used types
pub use leaderboard::{EntityId, LeaderboardEngine, LeaderboardSnapshot, SessionKind};
pub use network::{LeaderboardServer, SubscriberHub};
pub use telemetry::{SessionControl, TelemetryEvent};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
