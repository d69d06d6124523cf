//! Telemetry Packets
//!
//! Decoded simulation packets arrive as loosely-typed JSON objects using the
//! simulation's own field names. [`RawPacket`] tolerates missing fields and
//! name aliases; [`RawPacket::into_event`] is the only place that tolerance
//! lives, everything downstream sees [`TelemetryEvent`].

use serde::Deserialize;

use crate::leaderboard::entity::{EntityId, UNKNOWN_POSITION};

/// One car in a multi-car telemetry tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarUpdate {
    /// Player id
    pub id: EntityId,
    /// Raw name, if the packet carried one
    pub raw_name: Option<String>,
    /// Current lap
    pub laps: u16,
    /// Track progress node
    pub node: u16,
    /// Rank hint
    pub position: u16,
    /// Elapsed time (ms)
    pub total_time: Option<u64>,
    /// Vehicle model, if the packet carried one
    pub model_id: Option<String>,
}

/// Strongly-typed telemetry input to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelemetryEvent {
    /// Fixed-cadence multi-car update
    Tick {
        /// Cars in this tick
        cars: Vec<CarUpdate>,
        /// Lap configuration, if the packet carried it
        total_laps: Option<u16>,
    },
    /// A player joined the session
    Joined {
        /// Player id
        id: EntityId,
        /// Raw name (may be empty)
        raw_name: String,
        /// Vehicle model
        model_id: Option<String>,
    },
    /// A player left
    Left {
        /// Player id
        id: EntityId,
    },
    /// A player completed a lap
    LapCompleted {
        /// Player id
        id: EntityId,
        /// Laps completed so far
        laps_done: u16,
        /// Lap time (ms), positive only
        lap_time: Option<u64>,
        /// Elapsed race time (ms)
        elapsed: Option<u64>,
    },
    /// Lap configuration changed
    SessionConfigured {
        /// New lap count, `None` keeps the current one
        total_laps: Option<u16>,
    },
    /// Session restarted or started
    SessionReset {
        /// Lap count of the new session, `None` keeps the current one
        total_laps: Option<u16>,
    },
    /// Authoritative finishing order
    OfficialResults {
        /// Player ids, winner first
        order: Vec<EntityId>,
    },
    /// Simulation version handshake
    Version {
        /// Product name
        product: String,
        /// Version string
        version: String,
    },
}

/// Name fields as reported under their various aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NameFields {
    #[serde(rename = "PName", default)]
    p_name: Option<String>,
    #[serde(rename = "PNameLong", default)]
    p_name_long: Option<String>,
    #[serde(rename = "PNameShort", default)]
    p_name_short: Option<String>,
    #[serde(rename = "UName", default)]
    u_name: Option<String>,
    #[serde(rename = "PlayerName", default)]
    player_name: Option<String>,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "UserName", default)]
    user_name: Option<String>,
    #[serde(rename = "HName", default)]
    h_name: Option<String>,
}

impl NameFields {
    /// First non-empty alias, in precedence order.
    pub fn first(&self) -> Option<&str> {
        [
            &self.p_name,
            &self.p_name_long,
            &self.p_name_short,
            &self.u_name,
            &self.player_name,
            &self.name,
            &self.user_name,
            &self.h_name,
        ]
        .into_iter()
        .filter_map(|n| n.as_deref())
        .find(|n| !n.is_empty())
    }
}

/// Vehicle model fields as reported under their various aliases.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelFields {
    #[serde(rename = "Model", default)]
    model: Option<String>,
    #[serde(rename = "CarModel", default)]
    car_model: Option<String>,
    #[serde(rename = "CarType", default)]
    car_type: Option<String>,
    #[serde(rename = "CName", default)]
    c_name: Option<String>,
}

impl ModelFields {
    /// First non-empty alias.
    pub fn first(&self) -> Option<String> {
        [&self.model, &self.car_model, &self.car_type, &self.c_name]
            .into_iter()
            .filter_map(|m| m.as_deref())
            .map(str::trim)
            .find(|m| !m.is_empty())
            .map(str::to_string)
    }
}

/// Per-car block of an `MCI` packet.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCar {
    #[serde(rename = "PLID")]
    plid: u8,
    #[serde(rename = "Lap", default)]
    lap: Option<u16>,
    #[serde(rename = "Node", default)]
    node: Option<u16>,
    #[serde(rename = "Position", default)]
    position: Option<u16>,
    #[serde(rename = "TotalTime", default)]
    total_time: Option<u64>,
    #[serde(flatten)]
    names: NameFields,
    #[serde(flatten)]
    models: ModelFields,
}

/// `MCI`: multi-car info.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMci {
    #[serde(rename = "Info", default)]
    info: Vec<RawCar>,
    #[serde(rename = "TotalLaps", default)]
    total_laps: Option<u16>,
    #[serde(rename = "RaceLaps", default)]
    race_laps: Option<u16>,
}

/// `NPL`: new player.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlayer {
    #[serde(rename = "PLID")]
    plid: u8,
    #[serde(flatten)]
    names: NameFields,
    #[serde(flatten)]
    models: ModelFields,
}

/// `PLL`: player left.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPlayerLeave {
    #[serde(rename = "PLID")]
    plid: u8,
}

/// `LAP`: lap completed.
#[derive(Debug, Clone, Deserialize)]
pub struct RawLap {
    #[serde(rename = "PLID")]
    plid: u8,
    #[serde(rename = "LapsDone", default)]
    laps_done: Option<u16>,
    #[serde(rename = "LTime", default)]
    lap_time: Option<u64>,
    #[serde(rename = "ETime", default)]
    elapsed: Option<u64>,
}

/// `RACE` / `STA` / `RST`: lap configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawLapConfig {
    #[serde(rename = "RaceLaps", default)]
    race_laps: Option<u16>,
    #[serde(rename = "TotalLaps", default)]
    total_laps: Option<u16>,
}

impl RawLapConfig {
    fn laps(&self) -> Option<u16> {
        self.race_laps.or(self.total_laps)
    }
}

/// `REO`: official order.
#[derive(Debug, Clone, Deserialize)]
pub struct RawReorder {
    #[serde(rename = "PLID", default)]
    plids: Vec<u8>,
}

/// `VER`: version.
#[derive(Debug, Clone, Deserialize)]
pub struct RawVersion {
    #[serde(rename = "Product", default)]
    product: String,
    #[serde(rename = "Version", default)]
    version: String,
}

/// A decoded packet, tagged by kind.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum RawPacket {
    /// Multi-car info
    Mci(RawMci),
    /// New player
    Npl(RawPlayer),
    /// Player left
    Pll(RawPlayerLeave),
    /// Lap completed
    Lap(RawLap),
    /// Race start / configuration
    Race(RawLapConfig),
    /// State change
    Sta(RawLapConfig),
    /// Race restart
    Rst(RawLapConfig),
    /// Official order
    Reo(RawReorder),
    /// Version
    Ver(RawVersion),
    /// Any packet kind this server does not consume
    #[serde(other)]
    Other,
}

impl RawPacket {
    /// Parse one JSON packet.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Map to a typed event. `None` for packets that carry nothing useful.
    pub fn into_event(self) -> Option<TelemetryEvent> {
        let event = match self {
            RawPacket::Mci(mci) => {
                if mci.info.is_empty() {
                    return None;
                }
                let cars = mci.info.into_iter()
                    .map(|car| CarUpdate {
                        id: EntityId(car.plid),
                        raw_name: car.names.first().map(str::to_string),
                        laps: car.lap.unwrap_or(0),
                        node: car.node.unwrap_or(0),
                        position: car.position.unwrap_or(UNKNOWN_POSITION),
                        total_time: car.total_time,
                        model_id: car.models.first(),
                    })
                    .collect();
                TelemetryEvent::Tick {
                    cars,
                    total_laps: mci.total_laps.or(mci.race_laps),
                }
            }
            RawPacket::Npl(player) => TelemetryEvent::Joined {
                id: EntityId(player.plid),
                raw_name: player.names.first().unwrap_or_default().to_string(),
                model_id: player.models.first(),
            },
            RawPacket::Pll(leave) => TelemetryEvent::Left { id: EntityId(leave.plid) },
            RawPacket::Lap(lap) => TelemetryEvent::LapCompleted {
                id: EntityId(lap.plid),
                laps_done: lap.laps_done.unwrap_or(0),
                lap_time: lap.lap_time.filter(|&t| t > 0),
                elapsed: lap.elapsed,
            },
            RawPacket::Race(config) => TelemetryEvent::SessionConfigured {
                total_laps: config.laps(),
            },
            RawPacket::Sta(config) => TelemetryEvent::SessionReset {
                total_laps: config.laps(),
            },
            RawPacket::Rst(config) => TelemetryEvent::SessionReset {
                total_laps: Some(config.laps().unwrap_or(0)),
            },
            RawPacket::Reo(reorder) => TelemetryEvent::OfficialResults {
                order: reorder.plids.into_iter()
                    .filter(|&p| p != 0)
                    .map(EntityId)
                    .collect(),
            },
            RawPacket::Ver(ver) => TelemetryEvent::Version {
                product: ver.product,
                version: ver.version,
            },
            RawPacket::Other => return None,
        };
        Some(event)
    }
}

/// Parse one relay line straight to an event.
pub fn parse_line(line: &str) -> Result<Option<TelemetryEvent>, serde_json::Error> {
    Ok(RawPacket::from_json(line)?.into_event())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mci_mapping_with_defaults() {
        let line = r#"{"type":"MCI","Info":[
            {"PLID":3,"Lap":2,"Node":140,"Position":1,"TotalTime":65000,"PName":"^1Max"},
            {"PLID":4,"UName":"","HName":"host_name","extra":true}
        ],"RaceLaps":5}"#;
        let event = parse_line(line).unwrap().unwrap();

        let TelemetryEvent::Tick { cars, total_laps } = event else {
            panic!("expected tick");
        };
        assert_eq!(total_laps, Some(5));
        assert_eq!(cars[0].raw_name.as_deref(), Some("^1Max"));
        assert_eq!(cars[0].total_time, Some(65_000));
        assert_eq!(cars[1].raw_name.as_deref(), Some("host_name"));
        assert_eq!(cars[1].laps, 0);
        assert_eq!(cars[1].position, UNKNOWN_POSITION);
        assert_eq!(cars[1].total_time, None);
    }

    #[test]
    fn test_empty_mci_is_ignored() {
        assert_eq!(parse_line(r#"{"type":"MCI","Info":[]}"#).unwrap(), None);
        assert_eq!(parse_line(r#"{"type":"MCI"}"#).unwrap(), None);
    }

    #[test]
    fn test_npl_name_and_model_aliases() {
        let event = parse_line(r#"{"type":"NPL","PLID":7,"PlayerName":"Bob","CarType":"FZR"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, TelemetryEvent::Joined {
            id: EntityId(7),
            raw_name: "Bob".into(),
            model_id: Some("FZR".into()),
        });

        let event = parse_line(r#"{"type":"NPL","PLID":8}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::Joined {
            id: EntityId(8),
            raw_name: String::new(),
            model_id: None,
        });
    }

    #[test]
    fn test_lap_config_precedence() {
        let event = parse_line(r#"{"type":"RACE","RaceLaps":10,"TotalLaps":3}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::SessionConfigured { total_laps: Some(10) });

        let event = parse_line(r#"{"type":"STA","RaceLaps":2}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::SessionReset { total_laps: Some(2) });

        let event = parse_line(r#"{"type":"STA"}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::SessionReset { total_laps: None });

        let event = parse_line(r#"{"type":"RST"}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::SessionReset { total_laps: Some(0) });
    }

    #[test]
    fn test_lap_and_reorder() {
        let event = parse_line(r#"{"type":"LAP","PLID":2,"LapsDone":3,"LTime":0,"ETime":180000}"#)
            .unwrap()
            .unwrap();
        assert_eq!(event, TelemetryEvent::LapCompleted {
            id: EntityId(2),
            laps_done: 3,
            lap_time: None,
            elapsed: Some(180_000),
        });

        let event = parse_line(r#"{"type":"REO","PLID":[4,2,0,0]}"#).unwrap().unwrap();
        assert_eq!(event, TelemetryEvent::OfficialResults { order: vec![EntityId(4), EntityId(2)] });
    }

    #[test]
    fn test_unknown_and_malformed() {
        assert_eq!(parse_line(r#"{"type":"TOC","PLID":1}"#).unwrap(), None);
        assert!(parse_line("not json").is_err());
        assert!(parse_line(r#"{"type":"PLL"}"#).is_err());
    }
}
