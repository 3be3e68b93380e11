//! Websocket wire format spoken with a Lavalink v3 node.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::GuildId;
use std::{num::NonZeroU64, time::Duration};

use super::track::{ExceptionSeverity, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqBand {
    pub band: usize,
    pub gain: f64,
}

/// Comandos enviados al nodo
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum OutgoingMessage {
    #[serde(rename_all = "camelCase")]
    VoiceUpdate {
        guild_id: String,
        session_id: String,
        event: Value,
    },
    #[serde(rename_all = "camelCase")]
    Play {
        guild_id: String,
        track: TrackId,
        start_time: u64,
        no_replace: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_time: Option<u64>,
    },
    #[serde(rename_all = "camelCase")]
    Stop { guild_id: String },
    #[serde(rename_all = "camelCase")]
    Pause { guild_id: String, pause: bool },
    #[serde(rename_all = "camelCase")]
    Seek { guild_id: String, position: u64 },
    #[serde(rename_all = "camelCase")]
    Volume { guild_id: String, volume: u16 },
    #[serde(rename_all = "camelCase")]
    Equalizer { guild_id: String, bands: Vec<EqBand> },
    #[serde(rename_all = "camelCase")]
    Destroy { guild_id: String },
}

impl OutgoingMessage {
    pub fn guild_id(&self) -> &str {
        match self {
            Self::VoiceUpdate { guild_id, .. }
            | Self::Play { guild_id, .. }
            | Self::Stop { guild_id }
            | Self::Pause { guild_id, .. }
            | Self::Seek { guild_id, .. }
            | Self::Volume { guild_id, .. }
            | Self::Equalizer { guild_id, .. }
            | Self::Destroy { guild_id } => guild_id,
        }
    }
}

/// Mensajes recibidos del nodo
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum IncomingMessage {
    Stats(NodeStats),
    PlayerUpdate(PlayerUpdate),
    Event(ServerEvent),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub guild_id: String,
    pub state: PlayerUpdateState,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct PlayerUpdateState {
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub position: Option<u64>,
    #[serde(default)]
    pub connected: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionPayload {
    pub message: Option<String>,
    pub severity: Option<ExceptionSeverity>,
    pub cause: Option<String>,
}

/// Payloads crudos `op: event`, según su campo `type`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "TrackStartEvent", rename_all = "camelCase")]
    TrackStart { guild_id: String, track: TrackId },
    #[serde(rename = "TrackEndEvent", rename_all = "camelCase")]
    TrackEnd {
        guild_id: String,
        track: TrackId,
        reason: TrackEndReason,
    },
    #[serde(rename = "TrackExceptionEvent", rename_all = "camelCase")]
    TrackException {
        guild_id: String,
        track: TrackId,
        exception: Option<ExceptionPayload>,
        error: Option<String>,
    },
    #[serde(rename = "TrackStuckEvent", rename_all = "camelCase")]
    TrackStuck {
        guild_id: String,
        track: TrackId,
        #[serde(default)]
        threshold_ms: u64,
    },
    #[serde(rename = "WebSocketClosedEvent", rename_all = "camelCase")]
    WebSocketClosed {
        guild_id: String,
        code: u16,
        #[serde(default)]
        reason: String,
        #[serde(default)]
        by_remote: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    pub fn guild_id(&self) -> Option<&str> {
        match self {
            Self::TrackStart { guild_id, .. }
            | Self::TrackEnd { guild_id, .. }
            | Self::TrackException { guild_id, .. }
            | Self::TrackStuck { guild_id, .. }
            | Self::WebSocketClosed { guild_id, .. } => Some(guild_id),
            Self::Unknown => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackEndReason {
    Finished,
    LoadFailed,
    Stopped,
    Replaced,
    Cleanup,
}

impl TrackEndReason {
    /// Solo los finales naturales arrancan el siguiente track
    pub fn may_start_next(self) -> bool {
        matches!(self, Self::Finished | Self::LoadFailed)
    }
}

/// Evento entregado a un player, en el orden en que lo recibió su nodo
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    TrackStart {
        track: TrackId,
    },
    TrackEnd {
        track: TrackId,
        reason: TrackEndReason,
    },
    /// Un `TrackEnd` visto con la cola del player vacía
    QueueEnd {
        track: TrackId,
        reason: TrackEndReason,
    },
    TrackException {
        track: TrackId,
        message: String,
        severity: ExceptionSeverity,
    },
    TrackStuck {
        track: TrackId,
        threshold: Duration,
    },
    WebSocketClosed {
        code: u16,
        reason: String,
        by_remote: bool,
    },
}

impl PlayerEvent {
    /// Convierte un evento crudo. `queue_empty` decide si un fin de track pasa a `QueueEnd`.
    pub fn from_server(event: ServerEvent, queue_empty: bool) -> Option<Self> {
        Some(match event {
            ServerEvent::TrackStart { track, .. } => Self::TrackStart { track },
            ServerEvent::TrackEnd { track, reason, .. } if queue_empty => {
                Self::QueueEnd { track, reason }
            }
            ServerEvent::TrackEnd { track, reason, .. } => Self::TrackEnd { track, reason },
            ServerEvent::TrackException {
                track,
                exception,
                error,
                ..
            } => {
                let (message, severity) = match exception {
                    Some(payload) => (
                        payload.message.or(payload.cause).unwrap_or_default(),
                        payload.severity.unwrap_or(ExceptionSeverity::Common),
                    ),
                    None => (error.unwrap_or_default(), ExceptionSeverity::Common),
                };
                Self::TrackException {
                    track,
                    message,
                    severity,
                }
            }
            ServerEvent::TrackStuck {
                track,
                threshold_ms,
                ..
            } => Self::TrackStuck {
                track,
                threshold: Duration::from_millis(threshold_ms),
            },
            ServerEvent::WebSocketClosed {
                code,
                reason,
                by_remote,
                ..
            } => Self::WebSocketClosed {
                code,
                reason,
                by_remote,
            },
            ServerEvent::Unknown => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CpuStats {
    pub cores: u32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i64,
    pub nulled: i64,
    pub deficit: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: u32,
    pub playing_players: u32,
    #[serde(default)]
    pub uptime: u64,
    #[serde(default)]
    pub memory: MemoryStats,
    #[serde(default)]
    pub cpu: CpuStats,
    pub frame_stats: Option<FrameStats>,
}

impl NodeStats {
    /// Puntuación de carga para ordenar nodos. Menor es mejor.
    pub fn penalty(&self) -> f64 {
        let cpu = 1.05f64.powf(100.0 * self.cpu.system_load) * 10.0 - 10.0;
        let frames = self
            .frame_stats
            .map(|frames| {
                let deficit = 1.03f64.powf(500.0 * (frames.deficit as f64 / 3000.0)) * 600.0 - 600.0;
                let nulled =
                    (1.03f64.powf(500.0 * (frames.nulled as f64 / 3000.0)) * 300.0 - 300.0) * 2.0;
                deficit + nulled
            })
            .unwrap_or(0.0);

        f64::from(self.playing_players) + cpu.round() + frames
    }
}

/// Serializa un `GuildId` como lo espera el nodo
pub fn guild_key(guild_id: GuildId) -> String {
    guild_id.get().to_string()
}

/// Lee el `guildId` textual de un mensaje del nodo
pub fn parse_guild_key(key: &str) -> Option<GuildId> {
    key.parse::<u64>()
        .ok()
        .and_then(NonZeroU64::new)
        .map(GuildId::from)
}

pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
