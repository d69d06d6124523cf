//! Session Control
//!
//! Outbound directives to the simulation. The engine and the subscriber
//! surface only see [`SessionControl`]; the relay is one implementation.

use async_trait::async_trait;
use serde::{Serialize, Deserialize};

use crate::leaderboard::entity::EntityId;

/// Simulation protocol version announced in the hello.
pub const PROTOCOL_VERSION: u8 = 9;

/// Small request subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TinyKind {
    /// Ask for every player's `NPL`
    Npl,
}

/// A directive written back to the simulation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Directive {
    /// Hello sent on every connect
    Isi {
        /// Client name
        #[serde(rename = "IName")]
        name: String,
        /// Telemetry interval (ms)
        #[serde(rename = "Interval")]
        interval_ms: u64,
        /// Protocol version
        #[serde(rename = "InSimVer")]
        version: u8,
        /// Request multi-car telemetry
        #[serde(rename = "MCI")]
        multi_car_info: bool,
    },
    /// Camera focus
    Scc {
        /// Player to view
        #[serde(rename = "ViewPLID")]
        view_plid: u8,
    },
    /// Small request
    Tiny {
        /// Request id echoed in the reply
        #[serde(rename = "ReqI")]
        request_id: u8,
        /// Request subtype
        #[serde(rename = "SubT")]
        kind: TinyKind,
    },
}

impl Directive {
    /// Serialize to one JSON line (without the newline).
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Directive delivery errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    /// No connection to the simulation right now.
    #[error("Telemetry source not connected")]
    NotConnected,

    /// The relay task is gone.
    #[error("Directive channel closed")]
    Closed,
}

/// Capability to steer the simulation.
#[async_trait]
pub trait SessionControl: Send + Sync {
    /// Deliver one directive.
    async fn send(&self, directive: Directive) -> Result<(), ControlError>;

    /// Point the simulation camera at a player.
    async fn set_camera_focus(&self, id: EntityId) -> Result<(), ControlError> {
        self.send(Directive::Scc { view_plid: id.0 }).await
    }

    /// Ask the simulation to re-announce all players.
    async fn request_player_list(&self, request_id: u8) -> Result<(), ControlError> {
        self.send(Directive::Tiny { request_id, kind: TinyKind::Npl }).await
    }
}
