//! WebSocket protocol message definitions
//! These are the wire types for client-server communication.
//!
//! Every frame is a JSON text message shaped `{"event": <name>, "data": <payload>}`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use crate::util::vec3::Vec3;

/// Server-assigned participant identifier, stable for one connection's lifetime
pub type ParticipantId = Uuid;

/// Opaque attribute bag supplied by the appearance/profile layer.
/// Carried verbatim, never inspected by the sync subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Profile(pub serde_json::Value);

impl Default for Profile {
    fn default() -> Self {
        Self(serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Facing angle about the vertical axis, in radians
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub y: f32,
}

impl Rotation {
    pub fn new(y: f32) -> Self {
        Self { y }
    }
}

/// Kind of a targeted social interaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InteractionKind {
    Observe,
    Greet,
    Avoid,
    Chat,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ClientMsg {
    /// Enter the world with an opaque profile
    Join {
        #[serde(default)]
        profile: Profile,
    },

    /// Latest local position and facing
    UpdatePosition { position: Vec3, rotation: Rotation },

    /// Play an emote for the surrounding neighbourhood
    Emote { emote_id: String },

    /// Address one participant directly
    SocialInteraction {
        target_player_id: ParticipantId,
        interaction_type: InteractionKind,
        #[serde(default)]
        message: Option<String>,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMsg {
    /// Reply to `join`: assigned id, spawn point and every active participant
    Initialize {
        id: ParticipantId,
        position: Vec3,
        players: HashMap<ParticipantId, ParticipantSnapshot>,
    },

    /// Someone else joined
    PlayerJoined(ParticipantSnapshot),

    /// Someone else moved (global, not proximity-gated)
    PlayerMoved {
        id: ParticipantId,
        position: Vec3,
        rotation: Rotation,
    },

    /// Full active-participant list after the receiver changed cell
    ProximityUpdate { players: Vec<ParticipantSnapshot> },

    /// A participant in the receiver's neighbourhood left
    PlayerLeft { id: ParticipantId },

    /// A neighbour played an emote
    PlayerEmote {
        player_id: ParticipantId,
        emote_id: String,
    },

    /// A participant addressed the receiver
    Interaction {
        source_player_id: ParticipantId,
        interaction_type: InteractionKind,
        message: Option<String>,
    },
}

/// Participant state as sent over the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantSnapshot {
    pub id: ParticipantId,
    pub position: Vec3,
    pub rotation: Rotation,
    pub profile: Profile,
}

impl ServerMsg {
    /// Event name as it appears on the wire, for logging
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMsg::Initialize { .. } => "initialize",
            ServerMsg::PlayerJoined(_) => "playerJoined",
            ServerMsg::PlayerMoved { .. } => "playerMoved",
            ServerMsg::ProximityUpdate { .. } => "proximityUpdate",
            ServerMsg::PlayerLeft { .. } => "playerLeft",
            ServerMsg::PlayerEmote { .. } => "playerEmote",
            ServerMsg::Interaction { .. } => "interaction",
        }
    }
}
