use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use serenity::model::id::{ChannelId, GuildId};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    node::{ClientIdentity, Node, NodeConfig, NodeSignal},
    player::{Player, PlayerNotice, PlayerSettings, PlayerStatus},
    query::search_query,
    regions::RegionMap,
    track::{Track, TrackId, TrackPlaylist},
};
use crate::error::{AudioError, AudioResult};

/// Resultado de [`NodeRegistry::migrate_away`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub moved: Vec<GuildId>,
    pub lost: Vec<GuildId>,
}

/// Dueño de todos los nodos conocidos y de todos los players vivos
///
/// Se pasa por referencia a quien necesite buscar nodos; no hay instancia
/// global.
pub struct NodeRegistry {
    nodes: DashMap<String, Arc<Node>>,
    players: DashMap<GuildId, Arc<Player>>,
    regions: RwLock<RegionMap>,
    identity: ClientIdentity,
    settings: PlayerSettings,
    http: reqwest::Client,
    signals_tx: flume::Sender<NodeSignal>,
    signals_rx: flume::Receiver<NodeSignal>,
    notices_tx: flume::Sender<PlayerNotice>,
    notices_rx: flume::Receiver<PlayerNotice>,
    creation: Mutex<()>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes.len())
            .field("players", &self.players.len())
            .finish()
    }
}

impl NodeRegistry {
    pub fn new(identity: ClientIdentity, settings: PlayerSettings) -> Self {
        let (signals_tx, signals_rx) = flume::unbounded();
        let (notices_tx, notices_rx) = flume::unbounded();
        Self {
            nodes: DashMap::new(),
            players: DashMap::new(),
            regions: RwLock::new(RegionMap::new()),
            identity,
            settings,
            http: reqwest::Client::new(),
            signals_tx,
            signals_rx,
            notices_tx,
            notices_rx,
            creation: Mutex::new(()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &PlayerSettings {
        &self.settings
    }

    /// Eventos, migraciones y players perdidos, para la capa de comandos
    pub fn notices(&self) -> flume::Receiver<PlayerNotice> {
        self.notices_rx.clone()
    }

    /// Conecta un nodo nuevo y lo registra
    pub async fn add_node(&self, config: NodeConfig) -> AudioResult<Arc<Node>> {
        if self.nodes.contains_key(&config.identifier) {
            return Err(AudioError::NodeAlreadyRegistered(config.identifier));
        }
        let node = Node::connect(config, &self.identity, self.signals_tx.clone()).await?;
        if let Err(e) = self.insert_node(Arc::clone(&node)) {
            node.destroy();
            return Err(e);
        }
        Ok(node)
    }

    /// Registra un nodo ya construido, p. ej. uno de [`Node::detached`]
    pub fn insert_node(&self, node: Arc<Node>) -> AudioResult<()> {
        match self.nodes.entry(node.identifier().to_string()) {
            Entry::Occupied(entry) => Err(AudioError::NodeAlreadyRegistered(entry.key().clone())),
            Entry::Vacant(entry) => {
                info!(
                    "➕ Nodo {} registrado (región: {:?}, shard: {:?})",
                    node.identifier(),
                    node.region(),
                    node.shard_id()
                );
                entry.insert(node);
                Ok(())
            }
        }
    }

    pub fn get_node(&self, identifier: &str) -> Option<Arc<Node>> {
        self.nodes.get(identifier).map(|node| Arc::clone(node.value()))
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|node| Arc::clone(node.value())).collect()
    }

    pub fn available_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .iter()
            .filter(|node| node.is_available())
            .map(|node| Arc::clone(node.value()))
            .collect()
    }

    /// Elige el nodo disponible con menos carga
    ///
    /// `search_only`, si se indica, debe coincidir con el del nodo. El filtro de
    /// shard se aplica sobre los nodos de la región si los hay, si no sobre todo
    /// el pool; gana el primer conjunto no vacío entre shard, región y pool.
    /// Los empates van al identificador menor.
    pub fn best_node(
        &self,
        region: Option<&str>,
        shard_id: Option<u64>,
        search_only: Option<bool>,
    ) -> Option<Arc<Node>> {
        self.select_node(region, shard_id, search_only, None)
    }

    /// Como [`NodeRegistry::best_node`], pero nunca devuelve `exclude`
    pub fn best_node_excluding(
        &self,
        region: Option<&str>,
        shard_id: Option<u64>,
        search_only: Option<bool>,
        exclude: &str,
    ) -> Option<Arc<Node>> {
        self.select_node(region, shard_id, search_only, Some(exclude))
    }

    fn select_node(
        &self,
        region: Option<&str>,
        shard_id: Option<u64>,
        search_only: Option<bool>,
        exclude: Option<&str>,
    ) -> Option<Arc<Node>> {
        let pool: Vec<Arc<Node>> = self
            .available_nodes()
            .into_iter()
            .filter(|node| search_only.map_or(true, |flag| node.search_only() == flag))
            .filter(|node| exclude != Some(node.identifier()))
            .collect();

        let bucket = region.and_then(|region| self.regions.read().aggregate(region));
        let region_set: Vec<Arc<Node>> = match &bucket {
            Some(bucket) => pool
                .iter()
                .filter(|node| node.region() == Some(bucket.as_str()))
                .cloned()
                .collect(),
            None => Vec::new(),
        };

        let shard_set: Vec<Arc<Node>> = match shard_id {
            Some(shard) => {
                let base = if region_set.is_empty() { &pool } else { &region_set };
                base.iter()
                    .filter(|node| node.shard_id() == Some(shard))
                    .cloned()
                    .collect()
            }
            None => Vec::new(),
        };

        let candidates = [shard_set, region_set, pool]
            .into_iter()
            .find(|set| !set.is_empty())?;

        candidates.into_iter().min_by(|a, b| {
            a.penalty()
                .total_cmp(&b.penalty())
                .then_with(|| a.identifier().cmp(b.identifier()))
        })
    }

    /// Devuelve el player de la guild, creándolo en el mejor nodo si no existe
    pub fn create_player(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        region: Option<&str>,
        shard_id: Option<u64>,
    ) -> AudioResult<Arc<Player>> {
        let _creation = self.creation.lock();
        if let Some(player) = self.get_player(guild_id) {
            player.connect(channel_id);
            return Ok(player);
        }

        let node = self
            .best_node(region, shard_id, Some(false))
            .ok_or(AudioError::NoNodesAvailable)?;
        let bucket = region.and_then(|region| self.regions.read().aggregate(region));
        let player = Player::new(
            guild_id,
            Arc::clone(&node),
            bucket,
            shard_id,
            self.settings.clone(),
            self.notices_tx.clone(),
        );
        node.register(&player);
        player.connect(channel_id);
        self.players.insert(guild_id, Arc::clone(&player));
        info!("🎶 Player creado para {} en el nodo {}", guild_id, node.identifier());
        Ok(player)
    }

    pub fn get_player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.get(&guild_id).map(|player| Arc::clone(player.value()))
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.iter().map(|player| Arc::clone(player.value())).collect()
    }

    /// Players reproduciendo o en pausa
    pub fn active_players(&self) -> Vec<Arc<Player>> {
        self.players()
            .into_iter()
            .filter(|player| matches!(player.status(), PlayerStatus::Playing | PlayerStatus::Paused))
            .collect()
    }

    pub fn idle_players(&self) -> Vec<Arc<Player>> {
        self.players()
            .into_iter()
            .filter(|player| !matches!(player.status(), PlayerStatus::Playing | PlayerStatus::Paused))
            .collect()
    }

    /// Termina la sesión de una guild. `false` si no había ninguna.
    pub async fn destroy_player(&self, guild_id: GuildId) -> bool {
        match self.players.remove(&guild_id) {
            Some((_, player)) => player.teardown().await,
            None => false,
        }
    }

    fn search_node(&self) -> AudioResult<Arc<Node>> {
        self.best_node(None, None, Some(true))
            .or_else(|| self.best_node(None, None, None))
            .ok_or(AudioError::NoNodesAvailable)
    }

    /// Busca o carga tracks; el texto libre se convierte en búsqueda de YouTube
    pub async fn load_tracks(&self, query: &str) -> AudioResult<TrackPlaylist> {
        let node = self.search_node()?;
        node.load(&search_query(query)).await
    }

    pub async fn build_track(&self, id: &TrackId) -> AudioResult<Track> {
        self.search_node()?.build_track(id).await
    }

    /// Refresca las regiones de voz válidas desde el directorio de regiones
    pub async fn refresh_regions(&self, endpoint: &str, authorization: Option<&str>) -> AudioResult<usize> {
        let mut regions = self.regions.read().clone();
        let count = regions.refresh(&self.http, endpoint, authorization).await?;
        *self.regions.write() = regions;
        Ok(count)
    }

    pub fn set_valid_regions<I, S>(&self, regions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.regions.write().set_valid_regions(regions);
    }

    /// Saca todos los players de `identifier` y después cierra y olvida el nodo
    ///
    /// Los players sin destino se cierran y se reportan como
    /// [`PlayerNotice::Lost`].
    pub async fn migrate_away(&self, identifier: &str) -> AudioResult<MigrationReport> {
        let node = self
            .get_node(identifier)
            .ok_or_else(|| AudioError::NodeNotFound(identifier.to_string()))?;
        node.mark_unavailable();
        info!("🚚 Migrando {} players fuera del nodo {}", node.player_count(), identifier);

        let mut report = MigrationReport::default();
        for player in node.players() {
            let guild_id = player.guild_id();
            match player.change_node(self, None).await {
                Ok(_) => report.moved.push(guild_id),
                Err(e) => {
                    error!("❌ No se pudo migrar el player {}: {}", guild_id, e);
                    self.players.remove(&guild_id);
                    player.teardown().await;
                    let _ = self.notices_tx.send(PlayerNotice::Lost {
                        guild_id,
                        node: identifier.to_string(),
                        reason: e.to_string(),
                    });
                    report.lost.push(guild_id);
                }
            }
        }

        node.destroy();
        self.nodes.remove(identifier);
        info!(
            "✅ Nodo {} retirado: {} movidos, {} perdidos",
            identifier,
            report.moved.len(),
            report.lost.len()
        );
        Ok(report)
    }

    /// Lanza la tarea que reacciona a las desconexiones de nodos
    pub fn spawn_supervisor(self: &Arc<Self>) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        let signals = self.signals_rx.clone();
        let cancel = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                let signal = tokio::select! {
                    _ = cancel.cancelled() => break,
                    signal = signals.recv_async() => match signal {
                        Ok(signal) => signal,
                        Err(_) => break,
                    },
                };
                let Some(registry) = registry.upgrade() else { break };
                match signal {
                    NodeSignal::Disconnected { identifier } => {
                        warn!("🔌 Nodo {} perdido, migrando players", identifier);
                        if let Err(e) = registry.migrate_away(&identifier).await {
                            debug!("Migración de {} omitida: {}", identifier, e);
                        }
                    }
                }
            }
            debug!("Supervisor de nodos detenido");
        })
    }

    /// Cierra todos los players y todos los nodos
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let players: Vec<Arc<Player>> = self.players.iter().map(|p| Arc::clone(p.value())).collect();
        self.players.clear();
        for player in players {
            player.teardown().await;
        }
        for node in self.nodes() {
            node.destroy();
        }
        self.nodes.clear();
        info!("👋 Registro de nodos cerrado");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        player::PlayOptions,
        protocol::{NodeStats, OutgoingMessage},
    };
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;
    use std::{num::NonZeroU64, time::Duration};

    fn guild(id: u64) -> GuildId {
        GuildId::from(NonZeroU64::new(id).unwrap())
    }

    fn channel(id: u64) -> ChannelId {
        ChannelId::from(NonZeroU64::new(id).unwrap())
    }

    fn registry() -> NodeRegistry {
        NodeRegistry::new(
            ClientIdentity {
                user_id: UserId::from(NonZeroU64::new(1).unwrap()),
                shard_count: 1,
                client_name: "test".to_string(),
            },
            PlayerSettings::default(),
        )
    }

    struct TestNode {
        identifier: &'static str,
        region: Option<&'static str>,
        shard_id: Option<u64>,
        penalty: u32,
        search_only: bool,
    }

    impl TestNode {
        fn new(identifier: &'static str, penalty: u32) -> Self {
            Self {
                identifier,
                region: None,
                shard_id: None,
                penalty,
                search_only: false,
            }
        }
    }

    fn add(registry: &NodeRegistry, test_node: TestNode) -> (Arc<Node>, flume::Receiver<OutgoingMessage>) {
        let mut config = NodeConfig::new(test_node.identifier, "localhost", 2333, "pw");
        config.region = test_node.region.map(str::to_string);
        config.shard_id = test_node.shard_id;
        config.search_only = test_node.search_only;
        let (node, rx) = Node::detached(config).unwrap();
        node.update_stats(NodeStats {
            playing_players: test_node.penalty,
            ..NodeStats::default()
        });
        registry.insert_node(Arc::clone(&node)).unwrap();
        (node, rx)
    }

    fn id(node: Option<Arc<Node>>) -> Option<String> {
        node.map(|node| node.identifier().to_string())
    }

    #[test]
    fn test_best_node_prefers_region_and_shard() {
        let registry = registry();
        for (identifier, region, penalty) in [("A", "europe", 5), ("B", "europe", 2), ("C", "asia", 1)] {
            add(
                &registry,
                TestNode {
                    region: Some(region),
                    shard_id: Some(3),
                    ..TestNode::new(identifier, penalty)
                },
            );
        }
        assert_eq!(id(registry.best_node(Some("europe"), Some(3), None)), Some("B".to_string()));
        assert_eq!(id(registry.best_node(Some("london"), None, None)), Some("B".to_string()));
        assert_eq!(id(registry.best_node(None, Some(3), None)), Some("C".to_string()));
    }

    #[test]
    fn test_best_node_falls_back_when_filters_match_nothing() {
        let registry = registry();
        add(
            &registry,
            TestNode {
                region: Some("europe"),
                shard_id: Some(1),
                ..TestNode::new("eu", 4)
            },
        );
        add(
            &registry,
            TestNode {
                region: Some("us-east"),
                shard_id: Some(2),
                ..TestNode::new("us", 1)
            },
        );
        assert_eq!(id(registry.best_node(Some("europe"), Some(9), None)), Some("eu".to_string()));
        assert_eq!(id(registry.best_node(Some("brazil"), None, None)), Some("us".to_string()));
        assert_eq!(id(registry.best_node(None, Some(1), None)), Some("eu".to_string()));
    }

    #[test]
    fn test_best_node_honours_search_only() {
        let registry = registry();
        add(
            &registry,
            TestNode {
                search_only: true,
                ..TestNode::new("search", 0)
            },
        );
        add(&registry, TestNode::new("play", 10));

        assert_eq!(id(registry.best_node(None, None, Some(false))), Some("play".to_string()));
        assert_eq!(id(registry.best_node(None, None, Some(true))), Some("search".to_string()));
        assert_eq!(id(registry.best_node(None, None, None)), Some("search".to_string()));
    }

    #[test]
    fn test_best_node_none_only_for_empty_pool() {
        let registry = registry();
        assert!(registry.best_node(None, None, None).is_none());

        let (node, _rx) = add(&registry, TestNode::new("a", 0));
        assert!(registry.best_node(Some("europe"), Some(7), None).is_some());
        node.mark_unavailable();
        assert!(registry.best_node(None, None, None).is_none());
    }

    #[test]
    fn test_best_node_ties_break_on_identifier() {
        let registry = registry();
        add(&registry, TestNode::new("zulu", 3));
        add(&registry, TestNode::new("alpha", 3));
        add(&registry, TestNode::new("mike", 3));
        for _ in 0..10 {
            assert_eq!(id(registry.best_node(None, None, None)), Some("alpha".to_string()));
        }
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        let registry = registry();
        add(&registry, TestNode::new("a", 0));
        let (other, _rx) = Node::detached(NodeConfig::new("a", "otherhost", 2333, "pw")).unwrap();
        assert!(matches!(
            registry.insert_node(other),
            Err(AudioError::NodeAlreadyRegistered(id)) if id == "a"
        ));
    }

    #[tokio::test]
    async fn test_create_player_reuses_session() {
        let registry = registry();
        assert!(matches!(
            registry.create_player(guild(1), channel(2), None, None),
            Err(AudioError::NoNodesAvailable)
        ));

        let (node, _rx) = add(&registry, TestNode::new("a", 0));
        let first = registry.create_player(guild(1), channel(2), None, None).unwrap();
        let second = registry.create_player(guild(1), channel(2), None, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(node.player_count(), 1);
        assert_eq!(registry.idle_players().len(), 1);
        assert!(registry.active_players().is_empty());
    }

    #[tokio::test]
    async fn test_migration_preserves_playback() {
        let registry = registry();
        let (a, rx_a) = add(&registry, TestNode::new("a", 0));
        let (b, rx_b) = add(&registry, TestNode::new("b", 1));
        let notices = registry.notices();

        let player = registry.create_player(guild(7), channel(8), None, None).unwrap();
        assert_eq!(player.node().identifier(), "a");
        let current = Track::new("QAAA1", "One", Duration::from_secs(200));
        player.play(Some(current.clone()), PlayOptions::default()).await.unwrap();
        player.add(Track::new("QAAA2", "Two", Duration::from_secs(100))).unwrap();
        player.set_volume(120).await.unwrap();
        player.set_gain(3, 0.5).await.unwrap();
        rx_a.drain();

        let report = registry.migrate_away("a").await.unwrap();
        assert_eq!(report.moved, vec![guild(7)]);
        assert!(report.lost.is_empty());

        assert_eq!(player.node().identifier(), "b");
        assert!(!a.has_player(guild(7)));
        assert!(b.has_player(guild(7)));
        assert!(registry.get_node("a").is_none());
        assert_eq!(player.current(), Some(current.clone()));
        assert_eq!(player.queue().len(), 1);

        assert_eq!(
            rx_a.drain().collect::<Vec<_>>(),
            vec![OutgoingMessage::Destroy { guild_id: "7".to_string() }]
        );
        let sent: Vec<OutgoingMessage> = rx_b.drain().collect();
        assert!(matches!(&sent[0], OutgoingMessage::Play { track, .. } if *track == current.id));
        assert_eq!(sent[1], OutgoingMessage::Volume { guild_id: "7".to_string(), volume: 120 });
        assert!(matches!(&sent[2], OutgoingMessage::Equalizer { bands, .. } if bands.len() == 1));

        assert_eq!(
            notices.try_recv().unwrap(),
            PlayerNotice::Migrated {
                guild_id: guild(7),
                from: "a".to_string(),
                to: "b".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_migration_without_alternative_loses_player() {
        let registry = registry();
        let (a, _rx) = add(&registry, TestNode::new("a", 0));
        add(
            &registry,
            TestNode {
                search_only: true,
                ..TestNode::new("search", 0)
            },
        );
        let notices = registry.notices();
        let player = registry.create_player(guild(3), channel(4), None, None).unwrap();

        let report = registry.migrate_away("a").await.unwrap();
        assert_eq!(report.lost, vec![guild(3)]);
        assert!(player.is_torn_down());
        assert!(!a.has_player(guild(3)));
        assert!(registry.get_player(guild(3)).is_none());
        assert!(matches!(notices.try_recv().unwrap(), PlayerNotice::Lost { node, .. } if node == "a"));
    }

    #[tokio::test]
    async fn test_player_is_never_on_two_nodes() {
        let registry = Arc::new(registry());
        let (a, _rx_a) = add(&registry, TestNode::new("a", 0));
        let (b, _rx_b) = add(&registry, TestNode::new("b", 5));
        let player = registry.create_player(guild(9), channel(1), None, None).unwrap();

        let observer = {
            let (a, b) = (Arc::clone(&a), Arc::clone(&b));
            tokio::spawn(async move {
                for _ in 0..1000 {
                    let placements = [a.has_player(guild(9)), b.has_player(guild(9))];
                    assert!(placements.iter().filter(|p| **p).count() <= 1);
                    tokio::task::yield_now().await;
                }
            })
        };
        player.change_node(&registry, Some("b")).await.unwrap();
        player.change_node(&registry, Some("a")).await.unwrap();
        observer.await.unwrap();

        assert!(matches!(
            player.change_node(&registry, Some("a")).await,
            Err(AudioError::SameNode(_))
        ));
        assert!(matches!(
            player.change_node(&registry, Some("nope")).await,
            Err(AudioError::NodeNotFound(_))
        ));
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_migrates_on_disconnect() {
        let registry = Arc::new(registry());
        let (a, _rx_a) = add(&registry, TestNode::new("a", 0));
        let (b, _rx_b) = add(&registry, TestNode::new("b", 1));
        let notices = registry.notices();
        let supervisor = registry.spawn_supervisor();

        let player = registry.create_player(guild(11), channel(12), None, None).unwrap();
        assert_eq!(player.node().identifier(), "a");

        registry
            .signals_tx
            .send(NodeSignal::Disconnected { identifier: "a".to_string() })
            .unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            notice,
            PlayerNotice::Migrated {
                guild_id: guild(11),
                from: "a".to_string(),
                to: "b".to_string(),
            }
        );
        wait_until(|| registry.get_node("a").is_none()).await;

        assert_eq!(player.node().identifier(), "b");
        assert!(b.has_player(guild(11)));
        assert!(a.is_destroyed());
        assert!(!player.is_torn_down());

        registry.shutdown().await;
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_supervisor_reports_lost_player_without_alternative() {
        let registry = Arc::new(registry());
        let (a, _rx) = add(&registry, TestNode::new("solo", 0));
        let notices = registry.notices();
        let supervisor = registry.spawn_supervisor();
        let player = registry.create_player(guild(13), channel(14), None, None).unwrap();

        registry
            .signals_tx
            .send(NodeSignal::Disconnected { identifier: "solo".to_string() })
            .unwrap();

        let notice = tokio::time::timeout(Duration::from_secs(5), notices.recv_async())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            notice,
            PlayerNotice::Lost { guild_id, node, .. } if guild_id == guild(13) && node == "solo"
        ));
        wait_until(|| registry.nodes().is_empty()).await;

        assert!(player.is_torn_down());
        assert!(a.is_destroyed());
        assert!(registry.get_player(guild(13)).is_none());

        registry.shutdown().await;
        supervisor.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_tears_everything_down() {
        let registry = registry();
        let (node, _rx) = add(&registry, TestNode::new("a", 0));
        let player = registry.create_player(guild(5), channel(6), None, None).unwrap();
        registry.shutdown().await;
        assert!(player.is_torn_down());
        assert!(node.is_destroyed());
        assert!(registry.nodes().is_empty());
        assert!(registry.players().is_empty());
    }
}
