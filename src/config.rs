use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serenity::model::id::UserId;
use std::{collections::HashSet, path::PathBuf, time::Duration};

use crate::audio::{ClientIdentity, NodeConfig, PlayerSettings};

/// Archivo opcional junto al binario
pub const CONFIG_FILE: &str = "open-music.toml";
/// Prefijo de variables de entorno (`OPEN_MUSIC__QUEUE_TIMEOUT_SECS=30`)
pub const ENV_PREFIX: &str = "OPEN_MUSIC";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // Identidad del cliente
    pub bot_user_id: u64,
    pub shard_count: u64,
    pub client_name: String,

    // Nodos
    pub nodes: Vec<NodeConfig>,

    // Reproductor
    pub queue_timeout_secs: u64,
    pub max_queue_size: usize,
    pub history_size: usize,
    pub default_volume: u16,

    // Caché de búsquedas
    pub data_dir: PathBuf,
    pub query_cache_file: String,
    pub sql_cache_path: Option<PathBuf>,
    pub cache_max_age_days: u64,
    pub youtube_api_key: Option<String>,

    // Regiones de voz
    pub voice_regions_endpoint: Option<String>,
    pub voice_regions_token: Option<String>,

    // Servidor gestionado
    pub java_path: PathBuf,
    pub server_jar: Option<PathBuf>,
}

impl Config {
    /// Carga `.env`, luego `open-music.toml`, luego las variables `OPEN_MUSIC__*`
    ///
    /// `LAVALINK_HOST`/`LAVALINK_PORT`/`LAVALINK_PASSWORD` añaden un único nodo
    /// llamado `main` cuando no se configuró ningún otro.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let mut config: Self = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if config.nodes.is_empty() {
            if let Some(node) = Self::node_from_env()? {
                config.nodes.push(node);
            }
        }

        std::fs::create_dir_all(&config.data_dir)
            .with_context(|| format!("Failed to create {}", config.data_dir.display()))?;

        config.validate()?;
        Ok(config)
    }

    fn node_from_env() -> Result<Option<NodeConfig>> {
        let Ok(host) = std::env::var("LAVALINK_HOST") else {
            return Ok(None);
        };
        let port = match std::env::var("LAVALINK_PORT") {
            Ok(port) if !port.trim().is_empty() => port.trim().parse().context("LAVALINK_PORT")?,
            _ => 2333,
        };
        let password = std::env::var("LAVALINK_PASSWORD").unwrap_or_else(|_| "youshallnotpass".to_string());
        Ok(Some(NodeConfig::new("main", host, port, password)))
    }

    /// Rechaza valores con los que el registro o los players no pueden trabajar
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            anyhow::bail!("Shard count must be greater than 0");
        }

        if self.client_name.trim().is_empty() {
            anyhow::bail!("Client name cannot be empty");
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if node.identifier.trim().is_empty() {
                anyhow::bail!("Node identifier cannot be empty");
            }
            if !seen.insert(node.identifier.as_str()) {
                anyhow::bail!("Duplicate node identifier: {}", node.identifier);
            }
            if node.port == 0 {
                anyhow::bail!("Node {} has port 0", node.identifier);
            }
            if let Some(shard) = node.shard_id {
                if shard >= self.shard_count {
                    anyhow::bail!(
                        "Node {} is pinned to shard {} but only {} shards exist",
                        node.identifier,
                        shard,
                        self.shard_count
                    );
                }
            }
        }

        if self.queue_timeout_secs == 0 {
            anyhow::bail!("Queue timeout must be greater than 0");
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.default_volume > crate::audio::player::MAX_VOLUME {
            anyhow::bail!(
                "Default volume must be between 0 and {}, got: {}",
                crate::audio::player::MAX_VOLUME,
                self.default_volume
            );
        }

        if self.cache_max_age_days == 0 {
            anyhow::bail!("Cache max age must be at least one day");
        }

        if self.query_cache_file.trim().is_empty() {
            anyhow::bail!("Query cache file name cannot be empty");
        }

        Ok(())
    }

    /// Resumen sin secretos para logs
    pub fn summary(&self) -> String {
        let nodes: Vec<String> = self
            .nodes
            .iter()
            .map(|node| {
                format!(
                    "{}@{}:{}{}",
                    node.identifier,
                    node.host,
                    node.port,
                    node.region.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
                )
            })
            .collect();

        format!(
            "Config Summary:\n  \
            Client: {} (user {}, {} shards)\n  \
            Nodes: {}\n  \
            Player: {}s queue timeout, {} max queue, {} history, {}% vol\n  \
            Cache: {} ({} days, YouTube API: {})",
            self.client_name,
            self.bot_user_id,
            self.shard_count,
            if nodes.is_empty() { "none".to_string() } else { nodes.join(", ") },
            self.queue_timeout_secs,
            self.max_queue_size,
            self.history_size,
            self.default_volume,
            self.query_cache_path().display(),
            self.cache_max_age_days,
            if self.youtube_api_key.is_some() { "yes" } else { "no" },
        )
    }

    pub fn query_cache_path(&self) -> PathBuf {
        self.data_dir.join(&self.query_cache_file)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_days * 24 * 60 * 60)
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            queue_timeout: Duration::from_secs(self.queue_timeout_secs),
            max_queue_size: self.max_queue_size,
            history_size: self.history_size,
            default_volume: self.default_volume,
        }
    }

    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity {
            user_id: UserId::new(self.bot_user_id.max(1)),
            shard_count: self.shard_count,
            client_name: self.client_name.clone(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_user_id: 1,
            shard_count: 1,
            client_name: "open-music".to_string(),

            nodes: Vec::new(),

            queue_timeout_secs: 20,
            max_queue_size: 1000,
            history_size: 50,
            default_volume: 100,

            data_dir: "data".into(),
            query_cache_file: "audio.cache".to_string(),
            sql_cache_path: None,
            cache_max_age_days: 30,
            youtube_api_key: None,

            voice_regions_endpoint: None,
            voice_regions_token: None,

            java_path: "java".into(),
            server_jar: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.player_settings().queue_timeout, Duration::from_secs(20));
        assert_eq!(config.player_settings().max_queue_size, 1000);
        assert_eq!(config.query_cache_path(), PathBuf::from("data/audio.cache"));
        assert_eq!(config.cache_max_age(), Duration::from_secs(30 * 86_400));
    }

    #[test]
    fn test_rejects_duplicate_nodes() {
        let mut config = Config::default();
        config.nodes = vec![
            NodeConfig::new("a", "localhost", 2333, "pw"),
            NodeConfig::new("a", "otherhost", 2333, "pw"),
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_shard() {
        let mut config = Config::default();
        let mut node = NodeConfig::new("a", "localhost", 2333, "pw");
        node.shard_id = Some(3);
        config.nodes = vec![node];
        config.shard_count = 2;
        assert!(config.validate().is_err());
        config.shard_count = 4;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_loud_default_volume() {
        let config = Config {
            default_volume: 400,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_summary_hides_secrets() {
        let config = Config {
            nodes: vec![NodeConfig::new("main", "lava.local", 2333, "super-secret")],
            youtube_api_key: Some("AIza-secret".into()),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(summary.contains("main@lava.local:2333"));
        assert!(!summary.contains("super-secret"));
        assert!(!summary.contains("AIza-secret"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let parsed: Config = config::Config::builder()
            .add_source(config::File::from_str(
                r#"
                client_name = "radio"
                [[nodes]]
                identifier = "eu"
                host = "eu.lava"
                port = 2333
                password = "pw"
                region = "europe"
                "#,
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(parsed.client_name, "radio");
        assert_eq!(parsed.max_queue_size, 1000);
        assert_eq!(parsed.nodes[0].region.as_deref(), Some("europe"));
        assert!(!parsed.nodes[0].search_only);
    }
}
