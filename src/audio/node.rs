use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serenity::model::id::{GuildId, UserId};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, http::HeaderValue, protocol::Message,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    player::Player,
    protocol::{parse_guild_key, IncomingMessage, NodeStats, OutgoingMessage, PlayerEvent},
    query::normalize_query,
    track::{ExceptionSeverity, Track, TrackId, TrackPlaylist},
};
use crate::error::{AudioError, AudioResult};

/// Mensaje devuelto cuando el nodo se cae a mitad de una búsqueda
pub const LOAD_INTERRUPTED: &str = "Load tracks interrupted by player disconnect.";

const REST_TIMEOUT: Duration = Duration::from_secs(10);

/// Descripción estática de un nodo de audio
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub identifier: String,
    pub host: String,
    pub port: u16,
    pub password: String,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub shard_id: Option<u64>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub search_only: bool,
    /// Sobrescribe `http(s)://host:port` para la API REST
    #[serde(default)]
    pub rest_uri: Option<String>,
}

impl NodeConfig {
    pub fn new(identifier: impl Into<String>, host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            host: host.into(),
            port,
            password: password.into(),
            region: None,
            shard_id: None,
            secure: false,
            search_only: false,
            rest_uri: None,
        }
    }

    pub fn rest_uri(&self) -> String {
        match &self.rest_uri {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => {
                let scheme = if self.secure { "https" } else { "http" };
                format!("{scheme}://{}:{}", self.host, self.port)
            }
        }
    }

    pub fn websocket_uri(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Identidad del cliente, tal como se anuncia en el handshake del websocket
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub user_id: UserId,
    pub shard_count: u64,
    pub client_name: String,
}

/// Notificaciones del nodo hacia el registro
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSignal {
    Disconnected { identifier: String },
}

/// Una conexión a un nodo de audio
///
/// El nodo lo comparten el registro y cada player ubicado en él. Su mapa
/// de players solo cambia bajo el lock de ubicación del player dueño, ver
/// [`Node::hand_off`].
pub struct Node {
    config: NodeConfig,
    available: AtomicBool,
    stats: RwLock<Option<NodeStats>>,
    players: Mutex<HashMap<GuildId, Arc<Player>>>,
    outbound: flume::Sender<OutgoingMessage>,
    http: reqwest::Client,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identifier", &self.config.identifier)
            .field("available", &self.is_available())
            .field("players", &self.player_count())
            .finish()
    }
}

impl Node {
    fn with_sender(config: NodeConfig, outbound: flume::Sender<OutgoingMessage>) -> AudioResult<Self> {
        url::Url::parse(&config.rest_uri())?;
        let http = reqwest::Client::builder().timeout(REST_TIMEOUT).build()?;
        Ok(Self {
            config,
            available: AtomicBool::new(false),
            stats: RwLock::new(None),
            players: Mutex::new(HashMap::new()),
            outbound,
            http,
            shutdown: CancellationToken::new(),
        })
    }

    /// Nodo sin websocket. Los comandos salientes llegan al receptor devuelto,
    /// así la aplicación que lo embebe puede manejar el transporte por su cuenta.
    pub fn detached(config: NodeConfig) -> AudioResult<(Arc<Self>, flume::Receiver<OutgoingMessage>)> {
        let (tx, rx) = flume::unbounded();
        let node = Self::with_sender(config, tx)?;
        node.available.store(true, Ordering::SeqCst);
        Ok((Arc::new(node), rx))
    }

    /// Abre el canal de control y lanza las tareas de lectura y escritura
    ///
    /// Si el lector se detiene por algo distinto de [`Node::destroy`], el nodo
    /// se marca como no disponible y lo notifica por `signals`.
    pub async fn connect(
        config: NodeConfig,
        identity: &ClientIdentity,
        signals: flume::Sender<NodeSignal>,
    ) -> AudioResult<Arc<Self>> {
        let (tx, rx) = flume::unbounded::<OutgoingMessage>();
        let node = Arc::new(Self::with_sender(config, tx)?);

        let mut request = node.config.websocket_uri().into_client_request()?;
        let headers = request.headers_mut();
        headers.insert("Authorization", HeaderValue::from_str(&node.config.password)?);
        headers.insert("User-Id", HeaderValue::from_str(&identity.user_id.get().to_string())?);
        headers.insert("Num-Shards", HeaderValue::from_str(&identity.shard_count.to_string())?);
        headers.insert("Client-Name", HeaderValue::from_str(&identity.client_name)?);

        info!("🔌 Conectando al nodo {} en {}", node.identifier(), node.config.websocket_uri());
        let (ws_stream, _) = tokio_tungstenite::connect_async(request).await?;
        let (mut write, mut read) = ws_stream.split();

        let cancel = node.shutdown.clone();
        let identifier = node.identifier().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        let _ = write.send(Message::Close(None)).await;
                        break;
                    }
                    msg = rx.recv_async() => {
                        let Ok(msg) = msg else { break };
                        let json = match serde_json::to_string(&msg) {
                            Ok(json) => json,
                            Err(e) => {
                                error!("❌ [{}] No se pudo serializar {:?}: {}", identifier, msg, e);
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            warn!("⚠️ [{}] Error de escritura WS: {}", identifier, e);
                            break;
                        }
                    }
                }
            }
        });

        let weak = Arc::downgrade(&node);
        let cancel = node.shutdown.clone();
        let identifier = node.identifier().to_string();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    msg = read.next() => {
                        let msg = match msg {
                            Some(Ok(msg)) => msg,
                            Some(Err(e)) => {
                                warn!("⚠️ [{}] Error de lectura WS: {}", identifier, e);
                                break;
                            }
                            None => {
                                debug!("[{}] Stream WS terminado", identifier);
                                break;
                            }
                        };

                        match msg {
                            Message::Text(text) => {
                                let Some(node) = weak.upgrade() else { break };
                                node.handle_message(text.as_str());
                            }
                            Message::Close(frame) => {
                                let (code, reason) = frame
                                    .map(|cf| (u16::from(cf.code), cf.reason.to_string()))
                                    .unwrap_or((1000, "No reason".into()));
                                warn!("🔌 [{}] WS cerrado: code={}, reason='{}'", identifier, code, reason);
                                break;
                            }
                            _ => {}
                        }
                    }
                }
            }

            if let Some(node) = weak.upgrade() {
                node.available.store(false, Ordering::SeqCst);
                if !node.shutdown.is_cancelled() {
                    warn!("❌ Nodo {} desconectado", identifier);
                    let _ = signals.send(NodeSignal::Disconnected { identifier });
                }
                node.shutdown.cancel();
            }
        });

        node.available.store(true, Ordering::SeqCst);
        info!("✅ Nodo {} conectado", node.identifier());
        Ok(node)
    }

    pub fn identifier(&self) -> &str {
        &self.config.identifier
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn region(&self) -> Option<&str> {
        self.config.region.as_deref()
    }

    pub fn shard_id(&self) -> Option<u64> {
        self.config.shard_id
    }

    pub fn search_only(&self) -> bool {
        self.config.search_only
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Excluye el nodo de la selección sin cerrar la conexión
    pub fn mark_unavailable(&self) {
        self.available.store(false, Ordering::SeqCst);
    }

    pub fn stats(&self) -> Option<NodeStats> {
        *self.stats.read()
    }

    pub fn update_stats(&self, stats: NodeStats) {
        *self.stats.write() = Some(stats);
    }

    /// Penalización de carga; 0 si el nodo nunca reportó estadísticas
    pub fn penalty(&self) -> f64 {
        self.stats().map(|stats| stats.penalty()).unwrap_or(0.0)
    }

    /// Encola un comando para la tarea de escritura
    pub fn send(&self, message: OutgoingMessage) -> AudioResult<()> {
        debug!("📤 [{}] {:?}", self.identifier(), message);
        self.outbound
            .send(message)
            .map_err(|_| AudioError::NodeUnavailable(self.identifier().to_string()))
    }

    pub fn player(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.lock().get(&guild_id).cloned()
    }

    pub fn players(&self) -> Vec<Arc<Player>> {
        self.players.lock().values().cloned().collect()
    }

    pub fn player_count(&self) -> usize {
        self.players.lock().len()
    }

    pub fn has_player(&self, guild_id: GuildId) -> bool {
        self.players.lock().contains_key(&guild_id)
    }

    pub(crate) fn register(&self, player: &Arc<Player>) {
        self.players.lock().insert(player.guild_id(), Arc::clone(player));
    }

    pub(crate) fn unregister(&self, guild_id: GuildId) -> Option<Arc<Player>> {
        self.players.lock().remove(&guild_id)
    }

    /// Mueve `player` del mapa de un nodo al del otro en un solo paso
    ///
    /// Ambos mapas se bloquean juntos, en orden de identificador: nadie ve
    /// el player en los dos nodos ni en ninguno.
    pub(crate) fn hand_off(player: &Arc<Player>, from: &Node, to: &Node) {
        let guild_id = player.guild_id();
        let (first, second) = if from.identifier() <= to.identifier() {
            (from, to)
        } else {
            (to, from)
        };
        let mut first_map = first.players.lock();
        let mut second_map = second.players.lock();
        let (from_map, to_map) = if std::ptr::eq(first, from) {
            (&mut *first_map, &mut *second_map)
        } else {
            (&mut *second_map, &mut *first_map)
        };
        from_map.remove(&guild_id);
        to_map.insert(guild_id, Arc::clone(player));
    }

    /// Decodifica un frame de texto entrante y lo enruta
    ///
    /// Los eventos llegan al consumidor del player en orden de llegada. Un fin
    /// de track con la cola del player vacía se convierte en `QueueEnd`.
    pub fn handle_message(&self, text: &str) {
        let message: IncomingMessage = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!("⚠️ [{}] Mensaje inválido del nodo: {}", self.identifier(), e);
                return;
            }
        };

        match message {
            IncomingMessage::Stats(stats) => self.update_stats(stats),
            IncomingMessage::PlayerUpdate(update) => {
                if let Some(player) = parse_guild_key(&update.guild_id).and_then(|g| self.player(g)) {
                    player.update_position(update.state);
                }
            }
            IncomingMessage::Event(event) => {
                let Some(guild_id) = event.guild_id().and_then(parse_guild_key) else {
                    debug!("[{}] Evento sin guild: {:?}", self.identifier(), event);
                    return;
                };
                let Some(player) = self.player(guild_id) else {
                    debug!("[{}] Evento para guild {} sin player", self.identifier(), guild_id);
                    return;
                };
                if let Some(event) = PlayerEvent::from_server(event, player.queue().is_empty()) {
                    player.deliver(event);
                }
            }
            IncomingMessage::Unknown => {
                debug!("[{}] Operación desconocida ignorada", self.identifier());
            }
        }
    }

    /// Resuelve una búsqueda en tracks mediante `/loadtracks`
    ///
    /// Si la petición falla con el nodo no disponible, el fallo se devuelve
    /// como un resultado `LoadFailed` común en vez de un error.
    pub async fn load(&self, query: &str) -> AudioResult<TrackPlaylist> {
        let normalized = normalize_query(query);
        debug!("🔍 [{}] Cargando: {}", self.identifier(), normalized.query);

        let body = self
            .http
            .get(format!("{}/loadtracks", self.config.rest_uri()))
            .query(&[("identifier", normalized.query.as_str())])
            .header("Authorization", &self.config.password)
            .send()
            .await;
        let body: Result<Value, reqwest::Error> = match body {
            Ok(response) => response.json().await,
            Err(e) => Err(e),
        };

        match body {
            Ok(body) => Ok(TrackPlaylist::from_response(body).with_start_offset(normalized.start_offset)),
            Err(e) if !self.is_available() => {
                warn!("⚠️ [{}] Búsqueda interrumpida: {}", self.identifier(), e);
                Ok(TrackPlaylist::load_failed(LOAD_INTERRUPTED, ExceptionSeverity::Common))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Rellena un track desde su id opaco mediante `/decodetrack`
    pub async fn build_track(&self, id: &TrackId) -> AudioResult<Track> {
        let body: Value = self
            .http
            .get(format!("{}/decodetrack", self.config.rest_uri()))
            .query(&[("track", id.as_str())])
            .header("Authorization", &self.config.password)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let info = match body {
            Value::Object(mut object) if object.contains_key("info") => {
                object.remove("info").unwrap_or(Value::Null)
            }
            other => other,
        };
        Ok(Track::from_info(id.clone(), info)?)
    }

    /// Versión reportada por `/version`
    pub async fn server_version(&self) -> AudioResult<String> {
        let version = self
            .http
            .get(format!("{}/version", self.config.rest_uri()))
            .header("Authorization", &self.config.password)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(version.trim().to_string())
    }

    /// Cierra la conexión. Los players que sigan en el nodo no se tocan;
    /// usar antes la migración del registro para moverlos.
    pub fn destroy(&self) {
        self.available.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
        info!("🛑 Nodo {} cerrado", self.identifier());
    }

    pub fn is_destroyed(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::player::{PlayOptions, PlayerSettings};
    use crate::audio::protocol::{guild_key, TrackEndReason};
    use pretty_assertions::assert_eq;
    use std::num::NonZeroU64;

    fn guild(id: u64) -> GuildId {
        GuildId::from(NonZeroU64::new(id).unwrap())
    }

    fn settings() -> PlayerSettings {
        PlayerSettings {
            queue_timeout: Duration::from_millis(50),
            ..PlayerSettings::default()
        }
    }

    #[test]
    fn test_uris() {
        let mut config = NodeConfig::new("main", "lavalink.local", 2333, "youshallnotpass");
        assert_eq!(config.rest_uri(), "http://lavalink.local:2333");
        assert_eq!(config.websocket_uri(), "ws://lavalink.local:2333");
        config.secure = true;
        assert_eq!(config.websocket_uri(), "wss://lavalink.local:2333");
        config.rest_uri = Some("https://proxy.example/lavalink/".to_string());
        assert_eq!(config.rest_uri(), "https://proxy.example/lavalink");
    }

    #[tokio::test]
    async fn test_stats_update_penalty() {
        let (node, _rx) = Node::detached(NodeConfig::new("a", "localhost", 2333, "pw")).unwrap();
        assert_eq!(node.penalty(), 0.0);
        node.handle_message(
            r#"{"op":"stats","players":4,"playingPlayers":2,"uptime":1000,
                "memory":{"free":1,"used":1,"allocated":1,"reservable":1},
                "cpu":{"cores":4,"systemLoad":0.0,"lavalinkLoad":0.0}}"#,
        );
        assert_eq!(node.penalty(), 2.0);
    }

    #[tokio::test]
    async fn test_track_end_with_empty_queue_becomes_queue_end() {
        let (node, rx) = Node::detached(NodeConfig::new("a", "localhost", 2333, "pw")).unwrap();
        let (notices_tx, notices) = flume::unbounded();
        let player = Player::new(guild(42), Arc::clone(&node), None, None, settings(), notices_tx);
        node.register(&player);

        let track = Track::new("QAAA1", "One", Duration::from_secs(60));
        player.play(Some(track), PlayOptions::default()).await.unwrap();
        assert!(matches!(rx.try_recv(), Ok(OutgoingMessage::Play { .. })));

        node.handle_message(&format!(
            r#"{{"op":"event","type":"TrackEndEvent","guildId":"{}","track":"QAAA1","reason":"FINISHED"}}"#,
            guild_key(guild(42))
        ));

        let notice = notices.recv_async().await.unwrap();
        assert_eq!(
            notice.event(),
            Some(&PlayerEvent::QueueEnd {
                track: TrackId::new("QAAA1"),
                reason: TrackEndReason::Finished
            })
        );
    }

    #[tokio::test]
    async fn test_events_for_unknown_guilds_are_dropped() {
        let (node, _rx) = Node::detached(NodeConfig::new("a", "localhost", 2333, "pw")).unwrap();
        node.handle_message(r#"{"op":"event","type":"TrackStartEvent","guildId":"7","track":"QAAA"}"#);
        node.handle_message("not json");
        assert_eq!(node.player_count(), 0);
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped_fails() {
        let (node, rx) = Node::detached(NodeConfig::new("a", "localhost", 2333, "pw")).unwrap();
        drop(rx);
        let result = node.send(OutgoingMessage::Destroy {
            guild_id: "1".to_string(),
        });
        assert!(matches!(result, Err(AudioError::NodeUnavailable(id)) if id == "a"));
    }

    #[tokio::test]
    async fn test_load_on_unreachable_unavailable_node_is_data() {
        let (node, _rx) = Node::detached(NodeConfig::new("a", "127.0.0.1", 1, "pw")).unwrap();
        node.mark_unavailable();
        let result = node.load("ytsearch:anything").await.unwrap();
        assert_eq!(
            result,
            TrackPlaylist::load_failed(LOAD_INTERRUPTED, ExceptionSeverity::Common)
        );
    }
}
