//! Wire types exchanged with the simulation server.
//!
//! Only the fields the viewer needs are modelled; unknown fields are ignored.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{EntityId, Position};

/// Errors raised while decoding server payloads.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A message received on the streaming channel, discriminated by its `type` field.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    /// Informational; the viewer initializes from the HTTP query instead.
    Init(serde_json::Value),
    Step(StepMessage),
    Done { summary: SummaryPayload },
}

impl StreamMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Init(_) => "init",
            StreamMessage::Step(_) => "step",
            StreamMessage::Done { .. } => "done",
        }
    }
}

/// One unit of simulation advancement.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StepMessage {
    pub step_index: u64,
    pub coverage: f64,
    #[serde(default)]
    pub drones: Vec<DroneUpdate>,
    #[serde(default)]
    pub newly_seen: Vec<Position>,
    #[serde(default)]
    pub bandits_found: Vec<Position>,
}

impl StepMessage {
    pub fn total_reward(&self) -> f64 {
        self.drones.iter().map(|d| d.reward).sum()
    }

    pub fn total_fuel_cost(&self) -> f64 {
        self.drones.iter().map(|d| d.fuel_cost).sum()
    }
}

/// Per-drone entry of a [`StepMessage`].
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DroneUpdate {
    pub id: EntityId,
    pub pos: Position,
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub reward: f64,
    #[serde(default)]
    pub fuel_cost: f64,
}

/// Authoritative end-of-episode figures sent with the `done` message.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SummaryPayload {
    pub reward: f64,
    pub coverage: f64,
    pub bandits: usize,
    pub fuel_consumed: f64,
    #[serde(default)]
    pub fuel_efficiency: Option<f64>,
    #[serde(default)]
    pub unique_blocks: Option<usize>,
}

/// Starting placement of a drone in the initialization payload.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DroneStart {
    pub id: EntityId,
    pub pos: Position,
}

/// Response of the initialization query.
///
/// `terrain` holds one row per `y`; code `0` is empty, `1` an obstacle and
/// any other value (or a missing cell) is unknown.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InitPayload {
    pub grid_size: [usize; 2],
    #[serde(default)]
    pub terrain: Vec<Vec<i64>>,
    #[serde(default)]
    pub drones: Vec<DroneStart>,
    #[serde(default)]
    pub seen: Vec<Position>,
    #[serde(default)]
    pub bandits: Vec<Position>,
}

/// Episode identifier assigned by the server; accepts a JSON string or integer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "EpisodeIdRepr")]
pub struct EpisodeId(String);

#[derive(Deserialize)]
#[serde(untagged)]
enum EpisodeIdRepr {
    Text(String),
    Number(u64),
}

impl From<EpisodeIdRepr> for EpisodeId {
    fn from(repr: EpisodeIdRepr) -> Self {
        match repr {
            EpisodeIdRepr::Text(text) => EpisodeId(text),
            EpisodeIdRepr::Number(n) => EpisodeId(n.to_string()),
        }
    }
}

impl fmt::Display for EpisodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Response of the episode-start query.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EpisodeStart {
    pub episode_id: EpisodeId,
    #[serde(default)]
    pub num_drones: usize,
}

/// Decodes one complete streaming message.
pub fn decode(text: &str) -> Result<StreamMessage, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}
