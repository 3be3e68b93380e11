//! # Audio Module
//!
//! Client side of playback delegated to external Lavalink nodes.
//!
//! ## Architecture
//!
//! ### [`registry`] - Node Registry
//! - Owns every node and every player
//! - Least-penalty node selection with region and shard preference
//! - Moves players off failing nodes
//!
//! ### [`node`] - Node Connection
//! - One websocket control channel plus the REST search/decode API
//! - Routes inbound events to the owning player, in arrival order
//!
//! ### [`player`] - Player
//! - Per-guild state machine: `Disconnected → Connected → Playing ⇄ Paused`
//! - Queue, history, votes, volume and equalizer
//! - Migrates between nodes keeping the track and its position
//!
//! ### [`version`] / [`managed`] / [`server_config`]
//! - Server version parsing across three output generations
//! - Bootstrap document and probes for a locally run jar

pub mod equalizer;
pub mod managed;
pub mod node;
pub mod player;
pub mod protocol;
pub mod query;
pub mod queue;
pub mod regions;
pub mod registry;
pub mod server_config;
pub mod track;
pub mod version;

pub use node::{ClientIdentity, Node, NodeConfig};
pub use player::{PlayOptions, Player, PlayerNotice, PlayerSettings, PlayerStatus, VoteKind};
pub use registry::{MigrationReport, NodeRegistry};
pub use track::{Track, TrackId, TrackPlaylist};
pub use version::{parse_version_output, LavalinkVersion, ServerVersion};
