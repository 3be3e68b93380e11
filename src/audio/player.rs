use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use serenity::model::id::{ChannelId, GuildId, UserId};
use std::{
    collections::HashSet,
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{
    equalizer::Equalizer,
    node::Node,
    protocol::{guild_key, millis, EqBand, OutgoingMessage, PlayerEvent, PlayerUpdateState, TrackEndReason},
    queue::TrackQueue,
    registry::NodeRegistry,
    track::Track,
};
use crate::error::{AudioError, AudioResult};

/// Volumen máximo aceptado
pub const MAX_VOLUME: u16 = 150;

/// Volumen por defecto del nodo
pub const DEFAULT_VOLUME: u16 = 100;

/// Límites por player, compartidos por todos los players de un registro
#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub queue_timeout: Duration,
    pub max_queue_size: usize,
    pub history_size: usize,
    pub default_volume: u16,
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            queue_timeout: Duration::from_secs(20),
            max_queue_size: 1000,
            history_size: 50,
            default_volume: DEFAULT_VOLUME,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerStatus {
    Disconnected,
    Connected,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VoteKind {
    Pause,
    Resume,
    Skip,
    Shuffle,
    Stop,
}

impl VoteKind {
    pub const ALL: [VoteKind; 5] = [Self::Pause, Self::Resume, Self::Skip, Self::Shuffle, Self::Stop];

    fn index(self) -> usize {
        match self {
            Self::Pause => 0,
            Self::Resume => 1,
            Self::Skip => 2,
            Self::Shuffle => 3,
            Self::Stop => 4,
        }
    }
}

/// Votos por acción; se vacían al empezar cada track
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Votes {
    sets: [HashSet<UserId>; 5],
}

impl Votes {
    /// Registra un voto; `false` si el usuario ya había votado
    pub fn add(&mut self, kind: VoteKind, user: UserId) -> bool {
        self.sets[kind.index()].insert(user)
    }

    pub fn remove(&mut self, kind: VoteKind, user: UserId) -> bool {
        self.sets[kind.index()].remove(&user)
    }

    pub fn count(&self, kind: VoteKind) -> usize {
        self.sets[kind.index()].len()
    }

    pub fn has_voted(&self, kind: VoteKind, user: UserId) -> bool {
        self.sets[kind.index()].contains(&user)
    }

    pub fn clear(&mut self) {
        self.sets.iter_mut().for_each(HashSet::clear);
    }

    pub fn is_empty(&self) -> bool {
        self.sets.iter().all(HashSet::is_empty)
    }
}

/// Opciones de [`Player::play`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayOptions {
    /// `false` encola el track en vez de cortar el actual
    pub replace: bool,
    /// Sustituye el offset de inicio propio del track
    pub start: Option<Duration>,
    pub end: Option<Duration>,
}

impl Default for PlayOptions {
    fn default() -> Self {
        Self {
            replace: true,
            start: None,
            end: None,
        }
    }
}

/// Algo que la capa de comandos debe saber
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerNotice {
    /// Un evento del nodo, después de que el player lo aplicara
    Event {
        guild_id: GuildId,
        node: String,
        event: PlayerEvent,
    },
    Migrated {
        guild_id: GuildId,
        from: String,
        to: String,
    },
    /// No se pudo sacar el player de un nodo caído y se cerró
    Lost {
        guild_id: GuildId,
        node: String,
        reason: String,
    },
}

impl PlayerNotice {
    pub fn guild_id(&self) -> GuildId {
        match self {
            Self::Event { guild_id, .. } | Self::Migrated { guild_id, .. } | Self::Lost { guild_id, .. } => *guild_id,
        }
    }

    pub fn event(&self) -> Option<&PlayerEvent> {
        match self {
            Self::Event { event, .. } => Some(event),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct VoiceSession {
    session_id: String,
    event: Value,
}

#[derive(Debug)]
struct PlayerState {
    status: PlayerStatus,
    current: Option<Track>,
    position: Duration,
    position_at: Option<Instant>,
    paused: bool,
    shuffle: bool,
    shuffle_bumped: bool,
    repeat: bool,
    volume: u16,
    equalizer: Equalizer,
    votes: Votes,
    channel_id: Option<ChannelId>,
    voice: Option<VoiceSession>,
    members: HashSet<UserId>,
    torn_down: bool,
}

impl PlayerState {
    fn position(&self) -> Duration {
        let elapsed = match (self.status, self.position_at) {
            (PlayerStatus::Playing, Some(at)) => at.elapsed(),
            _ => Duration::ZERO,
        };
        let position = self.position + elapsed;
        match &self.current {
            Some(track) if !track.is_stream && !track.length.is_zero() => position.min(track.length),
            _ => position,
        }
    }

    fn set_position(&mut self, position: Duration) {
        self.position = position;
        self.position_at = Some(Instant::now());
    }
}

/// Vista de solo lectura de un player, para mostrar su estado
#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub guild_id: GuildId,
    pub node: String,
    pub status: PlayerStatus,
    pub current: Option<Track>,
    pub position: Duration,
    pub queue_len: usize,
    pub volume: u16,
    pub repeat: bool,
    pub shuffle: bool,
    pub shuffle_bumped: bool,
    pub channel_id: Option<ChannelId>,
}

/// Sesión de reproducción de una guild
///
/// Orden de locks: `transition` (async, se mantiene durante comandos y traspasos),
/// luego `placement` (mientras cambian los mapas de nodos), luego `state`.
pub struct Player {
    guild_id: GuildId,
    region: Option<String>,
    shard_id: Option<u64>,
    node: RwLock<Arc<Node>>,
    placement: Mutex<()>,
    transition: tokio::sync::Mutex<()>,
    queue: TrackQueue,
    state: Mutex<PlayerState>,
    settings: PlayerSettings,
    events: flume::Sender<PlayerEvent>,
    notices: flume::Sender<PlayerNotice>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Player {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Player")
            .field("guild_id", &self.guild_id)
            .field("node", &self.node.read().identifier())
            .field("status", &self.status())
            .finish()
    }
}

impl Player {
    /// Crea el player y lanza su consumidor de eventos
    ///
    /// El player no se coloca en el mapa de `node`; de eso se encarga el registro.
    pub fn new(
        guild_id: GuildId,
        node: Arc<Node>,
        region: Option<String>,
        shard_id: Option<u64>,
        settings: PlayerSettings,
        notices: flume::Sender<PlayerNotice>,
    ) -> Arc<Self> {
        let (events_tx, events_rx) = flume::unbounded();
        let player = Arc::new(Self {
            guild_id,
            region,
            shard_id,
            node: RwLock::new(node),
            placement: Mutex::new(()),
            transition: tokio::sync::Mutex::new(()),
            queue: TrackQueue::new(settings.max_queue_size, settings.history_size),
            state: Mutex::new(PlayerState {
                status: PlayerStatus::Disconnected,
                current: None,
                position: Duration::ZERO,
                position_at: None,
                paused: false,
                shuffle: false,
                shuffle_bumped: true,
                repeat: false,
                volume: settings.default_volume.min(MAX_VOLUME),
                equalizer: Equalizer::new(),
                votes: Votes::default(),
                channel_id: None,
                voice: None,
                members: HashSet::new(),
                torn_down: false,
            }),
            settings,
            events: events_tx,
            notices,
            shutdown: CancellationToken::new(),
        });
        Self::spawn_consumer(Arc::downgrade(&player), events_rx, player.shutdown.clone());
        player
    }

    fn spawn_consumer(player: Weak<Self>, events: flume::Receiver<PlayerEvent>, cancel: CancellationToken) {
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv_async() => match event {
                        Ok(event) => event,
                        Err(_) => break,
                    },
                };
                let Some(player) = player.upgrade() else { break };
                player.handle_event(event).await;
            }
        });
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn node(&self) -> Arc<Node> {
        self.node.read().clone()
    }

    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    pub fn shard_id(&self) -> Option<u64> {
        self.shard_id
    }

    pub fn queue(&self) -> &TrackQueue {
        &self.queue
    }

    pub fn status(&self) -> PlayerStatus {
        self.state.lock().status
    }

    pub fn current(&self) -> Option<Track> {
        self.state.lock().current.clone()
    }

    pub fn position(&self) -> Duration {
        self.state.lock().position()
    }

    pub fn is_playing(&self) -> bool {
        self.status() == PlayerStatus::Playing
    }

    pub fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    pub fn volume(&self) -> u16 {
        self.state.lock().volume
    }

    pub fn repeat(&self) -> bool {
        self.state.lock().repeat
    }

    pub fn shuffle(&self) -> bool {
        self.state.lock().shuffle
    }

    pub fn shuffle_bumped(&self) -> bool {
        self.state.lock().shuffle_bumped
    }

    pub fn equalizer(&self) -> Equalizer {
        self.state.lock().equalizer.clone()
    }

    pub fn votes(&self) -> Votes {
        self.state.lock().votes.clone()
    }

    pub fn channel_id(&self) -> Option<ChannelId> {
        self.state.lock().channel_id
    }

    pub fn is_torn_down(&self) -> bool {
        self.state.lock().torn_down
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        let node = self.node().identifier().to_string();
        let state = self.state.lock();
        PlayerSnapshot {
            guild_id: self.guild_id,
            node,
            status: state.status,
            current: state.current.clone(),
            position: state.position(),
            queue_len: self.queue.len(),
            volume: state.volume,
            repeat: state.repeat,
            shuffle: state.shuffle,
            shuffle_bumped: state.shuffle_bumped,
            channel_id: state.channel_id,
        }
    }

    fn ensure_alive(&self) -> AudioResult<()> {
        if self.is_torn_down() {
            Err(AudioError::InvalidSession(self.guild_id))
        } else {
            Ok(())
        }
    }

    fn command(&self, message: OutgoingMessage) -> AudioResult<()> {
        self.node().send(message)
    }

    fn key(&self) -> String {
        guild_key(self.guild_id)
    }

    /// Marca el player como conectado al canal de voz
    pub fn connect(&self, channel_id: ChannelId) {
        let mut state = self.state.lock();
        state.channel_id = Some(channel_id);
        if state.status == PlayerStatus::Disconnected && !state.torn_down {
            state.status = PlayerStatus::Connected;
        }
        info!("🔊 Player {} conectado al canal {}", self.guild_id, channel_id);
    }

    /// Reenvía el voice server update que el nodo necesita para unirse a la llamada
    pub fn update_voice_state(&self, session_id: impl Into<String>, event: Value) -> AudioResult<()> {
        self.ensure_alive()?;
        let voice = VoiceSession {
            session_id: session_id.into(),
            event,
        };
        self.command(OutgoingMessage::VoiceUpdate {
            guild_id: self.key(),
            session_id: voice.session_id.clone(),
            event: voice.event.clone(),
        })?;
        let mut state = self.state.lock();
        state.voice = Some(voice);
        if state.status == PlayerStatus::Disconnected {
            state.status = PlayerStatus::Connected;
        }
        Ok(())
    }

    pub fn add_member(&self, user: UserId) -> bool {
        self.state.lock().members.insert(user)
    }

    pub fn remove_member(&self, user: UserId) -> bool {
        let mut state = self.state.lock();
        let removed = state.members.remove(&user);
        if removed {
            for kind in VoteKind::ALL {
                state.votes.remove(kind, user);
            }
        }
        removed
    }

    pub fn members(&self) -> HashSet<UserId> {
        self.state.lock().members.clone()
    }

    /// Agrega un track a la cola
    pub fn add(&self, track: Track) -> AudioResult<()> {
        self.ensure_alive()?;
        self.queue.push(track).map_err(|e| {
            warn!("⚠️ {}", e);
            AudioError::QueueFull(self.queue.max_size())
        })
    }

    /// Agrega varios tracks; devuelve cuántos cupieron
    pub fn add_many(&self, tracks: Vec<Track>) -> AudioResult<usize> {
        self.ensure_alive()?;
        Ok(self.queue.extend(tracks))
    }

    /// Pone un track al frente de la cola
    pub fn bump(&self, track: Track) -> AudioResult<()> {
        self.ensure_alive()?;
        self.queue.bump(track);
        Ok(())
    }

    /// Reproduce `track`, o el siguiente de la cola si es `None`
    ///
    /// Sin track espera como mucho el timeout de la cola y devuelve
    /// `Ok(None)` si no llega nada, sin tocar el track actual.
    /// Cuando arranca uno nuevo, el anterior pasa al historial y,
    /// con repetición activa, vuelve al final de la cola.
    pub async fn play(&self, track: Option<Track>, options: PlayOptions) -> AudioResult<Option<Track>> {
        self.ensure_alive()?;
        self.advance(track, options, true).await
    }

    /// Salta al siguiente track sin re-encolar el actual
    ///
    /// Con la cola vacía no espera el timeout: detiene la reproducción con
    /// [`Player::stop`] y devuelve `Ok(None)`.
    pub async fn skip(&self) -> AudioResult<Option<Track>> {
        self.ensure_alive()?;
        if self.queue.is_empty() {
            info!("⏭️ Cola vacía al saltar en {}, deteniendo", self.guild_id);
            self.stop().await?;
            return Ok(None);
        }
        self.advance(None, PlayOptions::default(), false).await
    }

    async fn advance(
        &self,
        explicit: Option<Track>,
        options: PlayOptions,
        requeue: bool,
    ) -> AudioResult<Option<Track>> {
        if let Some(track) = &explicit {
            if !options.replace && self.is_playing() {
                self.add(track.clone())?;
                return Ok(None);
            }
        }

        if requeue {
            self.requeue_current();
        }

        let track = match explicit {
            Some(track) => track,
            None => {
                let next = tokio::select! {
                    _ = self.shutdown.cancelled() => return Err(AudioError::InvalidSession(self.guild_id)),
                    next = self.queue.next_within(self.settings.queue_timeout) => next,
                };
                match next {
                    Some(track) => track,
                    None => {
                        // El track actual sigue sonando en el nodo
                        debug!("⌛ Cola vacía en {}, sin cambios", self.guild_id);
                        return Ok(None);
                    }
                }
            }
        };

        self.retire_current();

        let _transition = self.transition.lock().await;
        if self.is_torn_down() {
            return Err(AudioError::InvalidSession(self.guild_id));
        }

        let start = options.start.unwrap_or(track.start_offset);
        let sent = self.command(OutgoingMessage::Play {
            guild_id: self.key(),
            track: track.id.clone(),
            start_time: millis(start),
            no_replace: !options.replace,
            end_time: options.end.map(millis).filter(|end| *end > 0),
        });
        if let Err(e) = sent {
            self.queue.restore_front(track);
            self.go_idle();
            return Err(e);
        }

        {
            let mut state = self.state.lock();
            state.current = Some(track.clone());
            state.status = PlayerStatus::Playing;
            state.paused = false;
            state.set_position(start);
            state.votes.clear();
        }
        info!(
            "▶️ Reproduciendo en {}: {} [{}]",
            self.guild_id,
            track.title,
            humantime::format_duration(track.length)
        );
        Ok(Some(track))
    }

    /// Con repetición activa, el track actual vuelve al final de la cola
    fn requeue_current(&self) {
        let current = {
            let state = self.state.lock();
            state.current.clone().filter(|_| state.repeat)
        };
        if let Some(track) = current {
            debug!("🔁 Re-encolado por repetición: {}", track.title);
            self.queue.requeue(track);
        }
    }

    fn retire_current(&self) {
        let previous = {
            let mut state = self.state.lock();
            state.set_position(Duration::ZERO);
            state.current.take()
        };
        if let Some(track) = previous {
            self.queue.record_history(track);
        }
    }

    fn go_idle(&self) {
        let mut state = self.state.lock();
        state.current = None;
        state.paused = false;
        state.set_position(Duration::ZERO);
        if !state.torn_down {
            state.status = PlayerStatus::Connected;
        }
    }

    /// Pausa (`Some(true)`), reanuda (`Some(false)`) o alterna (`None`)
    pub async fn pause(&self, pause: Option<bool>) -> AudioResult<bool> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let target = pause.unwrap_or_else(|| !self.is_paused());
        self.command(OutgoingMessage::Pause {
            guild_id: self.key(),
            pause: target,
        })?;

        let mut state = self.state.lock();
        let position = state.position();
        state.paused = target;
        if state.current.is_some() {
            state.status = if target {
                PlayerStatus::Paused
            } else {
                PlayerStatus::Playing
            };
        }
        state.set_position(position);
        info!("{} Player {}", if target { "⏸️ Pausado" } else { "▶️ Reanudado" }, self.guild_id);
        Ok(target)
    }

    pub async fn resume(&self) -> AudioResult<bool> {
        self.pause(Some(false)).await
    }

    /// Detiene la reproducción y vacía la cola
    pub async fn stop(&self) -> AudioResult<()> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        self.command(OutgoingMessage::Stop { guild_id: self.key() })?;
        self.queue.clear();
        self.retire_current();
        self.go_idle();
        self.state.lock().votes.clear();
        info!("⏹️ Player {} detenido", self.guild_id);
        Ok(())
    }

    /// Fija el volumen (0-150); devuelve el valor aplicado
    pub async fn set_volume(&self, volume: u16) -> AudioResult<u16> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let volume = volume.min(MAX_VOLUME);
        self.command(OutgoingMessage::Volume {
            guild_id: self.key(),
            volume,
        })?;
        self.state.lock().volume = volume;
        debug!("🔊 Volumen de {} en {}", self.guild_id, volume);
        Ok(volume)
    }

    /// Salta dentro del track actual, recortado a su duración
    pub async fn seek(&self, position: Duration) -> AudioResult<Duration> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let track = self.current().ok_or(AudioError::InvalidSession(self.guild_id))?;
        if !track.is_seekable {
            return Ok(self.position());
        }
        let position = if track.length.is_zero() {
            position
        } else {
            position.min(track.length)
        };
        self.command(OutgoingMessage::Seek {
            guild_id: self.key(),
            position: millis(position),
        })?;
        self.state.lock().set_position(position);
        Ok(position)
    }

    pub async fn set_gain(&self, band: usize, gain: f64) -> AudioResult<f64> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let mut equalizer = self.equalizer();
        let gain = equalizer.set_gain(band, gain)?;
        self.apply_equalizer(equalizer, vec![EqBand { band, gain }])?;
        Ok(gain)
    }

    pub async fn set_gains(&self, bands: &[EqBand]) -> AudioResult<()> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let mut equalizer = self.equalizer();
        equalizer.set_gains(bands)?;
        let changed = bands
            .iter()
            .filter_map(|b| equalizer.gain(b.band).map(|gain| EqBand { band: b.band, gain }))
            .collect();
        self.apply_equalizer(equalizer, changed)
    }

    pub async fn apply_equalizer_preset(&self, name: &str) -> anyhow::Result<()> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let mut equalizer = self.equalizer();
        equalizer.apply_preset(name)?;
        let bands = equalizer.bands();
        self.apply_equalizer(equalizer, bands)?;
        Ok(())
    }

    pub async fn reset_equalizer(&self) -> AudioResult<()> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let mut equalizer = self.equalizer();
        equalizer.reset();
        let bands = equalizer.bands();
        self.apply_equalizer(equalizer, bands)
    }

    fn apply_equalizer(&self, equalizer: Equalizer, bands: Vec<EqBand>) -> AudioResult<()> {
        self.command(OutgoingMessage::Equalizer {
            guild_id: self.key(),
            bands,
        })?;
        self.state.lock().equalizer = equalizer;
        Ok(())
    }

    pub fn set_repeat(&self, repeat: bool) {
        self.state.lock().repeat = repeat;
        info!("🔁 Repetición {} en {}", if repeat { "activada" } else { "desactivada" }, self.guild_id);
    }

    pub fn set_shuffle(&self, shuffle: bool) {
        self.state.lock().shuffle = shuffle;
        info!("🔀 Modo aleatorio {} en {}", if shuffle { "activado" } else { "desactivado" }, self.guild_id);
    }

    pub fn set_shuffle_bumped(&self, shuffle_bumped: bool) {
        self.state.lock().shuffle_bumped = shuffle_bumped;
    }

    /// Mezcla la cola pendiente, dejando en su sitio las primeras `sticky` entradas
    ///
    /// Espera a cualquier cambio de nodo en curso, así la cola que reordena es
    /// la que el player seguirá reproduciendo.
    pub async fn shuffle_queue(&self, sticky: usize) -> AudioResult<()> {
        self.ensure_alive()?;
        let _transition = self.transition.lock().await;
        let shuffle_bumped = self.shuffle_bumped();
        self.queue.shuffle(sticky, shuffle_bumped);
        Ok(())
    }

    /// Mezcla solo si el modo aleatorio está activo y hay algo en cola
    pub async fn maybe_shuffle(&self, sticky: usize) -> AudioResult<bool> {
        if self.shuffle() && !self.queue.is_empty() {
            self.shuffle_queue(sticky).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Registra un voto y devuelve el total para esa acción
    pub fn vote(&self, kind: VoteKind, user: UserId) -> usize {
        let mut state = self.state.lock();
        state.votes.add(kind, user);
        state.votes.count(kind)
    }

    pub fn unvote(&self, kind: VoteKind, user: UserId) -> usize {
        let mut state = self.state.lock();
        state.votes.remove(kind, user);
        state.votes.count(kind)
    }

    pub fn clear_votes(&self) {
        self.state.lock().votes.clear();
    }

    /// Mueve este player a otro nodo
    ///
    /// Sin destino, el registro elige el mejor nodo distinto del actual. El
    /// cambio de mapas ocurre en un paso; después el nodo viejo recibe un
    /// `destroy` y el nuevo recibe el estado de voz, el track actual en su
    /// última posición, la pausa, el volumen y cada banda no plana del ecualizador.
    pub async fn change_node(self: &Arc<Self>, registry: &NodeRegistry, target: Option<&str>) -> AudioResult<Arc<Node>> {
        let _transition = self.transition.lock().await;
        self.ensure_alive()?;
        let old = self.node();

        let new = match target {
            Some(identifier) => {
                let node = registry
                    .get_node(identifier)
                    .ok_or_else(|| AudioError::NodeNotFound(identifier.to_string()))?;
                if node.identifier() == old.identifier() {
                    return Err(AudioError::SameNode(identifier.to_string()));
                }
                if !node.is_available() {
                    return Err(AudioError::NodeUnavailable(identifier.to_string()));
                }
                node
            }
            None => registry
                .best_node_excluding(self.region(), self.shard_id, Some(false), old.identifier())
                .ok_or(AudioError::NoNodesAvailable)?,
        };

        let position = {
            let _placement = self.placement.lock();
            let position = self.position();
            Node::hand_off(self, &old, &new);
            *self.node.write() = Arc::clone(&new);
            position
        };
        info!(
            "🔀 Player {} movido de {} a {}",
            self.guild_id,
            old.identifier(),
            new.identifier()
        );

        if let Err(e) = old.send(OutgoingMessage::Destroy { guild_id: self.key() }) {
            debug!("Nodo anterior ya cerrado: {}", e);
        }

        let (voice, current, paused, volume, bands) = {
            let state = self.state.lock();
            (
                state.voice.clone(),
                state.current.clone(),
                state.paused,
                state.volume,
                state.equalizer.non_default_bands(),
            )
        };

        if let Some(voice) = voice {
            new.send(OutgoingMessage::VoiceUpdate {
                guild_id: self.key(),
                session_id: voice.session_id,
                event: voice.event,
            })?;
        }
        if let Some(track) = current {
            new.send(OutgoingMessage::Play {
                guild_id: self.key(),
                track: track.id,
                start_time: millis(position),
                no_replace: false,
                end_time: None,
            })?;
            if paused {
                new.send(OutgoingMessage::Pause {
                    guild_id: self.key(),
                    pause: true,
                })?;
            }
            self.state.lock().set_position(position);
        }
        if volume != DEFAULT_VOLUME {
            new.send(OutgoingMessage::Volume {
                guild_id: self.key(),
                volume,
            })?;
        }
        if !bands.is_empty() {
            new.send(OutgoingMessage::Equalizer {
                guild_id: self.key(),
                bands,
            })?;
        }

        let _ = self.notices.send(PlayerNotice::Migrated {
            guild_id: self.guild_id,
            from: old.identifier().to_string(),
            to: new.identifier().to_string(),
        });
        Ok(new)
    }

    /// Detiene la reproducción, abandona el nodo y termina la sesión
    ///
    /// Devuelve `false` si el player ya estaba cerrado.
    pub async fn teardown(&self) -> bool {
        if self.is_torn_down() {
            return false;
        }
        self.shutdown.cancel();
        let _transition = self.transition.lock().await;

        let node = {
            let _placement = self.placement.lock();
            let mut state = self.state.lock();
            if state.torn_down {
                return false;
            }
            state.torn_down = true;
            state.status = PlayerStatus::Disconnected;
            state.current = None;
            state.paused = false;
            state.votes.clear();
            drop(state);

            let node = self.node();
            node.unregister(self.guild_id);
            node
        };

        if let Err(e) = node.send(OutgoingMessage::Destroy { guild_id: self.key() }) {
            debug!("No se pudo enviar destroy a {}: {}", node.identifier(), e);
        }
        self.queue.clear();
        info!("👋 Player {} finalizado", self.guild_id);
        true
    }

    /// Entrega un evento al consumidor del player, en orden de llegada
    pub(crate) fn deliver(&self, event: PlayerEvent) {
        if self.events.send(event).is_err() {
            debug!("Player {} ya no consume eventos", self.guild_id);
        }
    }

    pub(crate) fn update_position(&self, update: PlayerUpdateState) {
        if let Some(position) = update.position {
            self.state.lock().set_position(Duration::from_millis(position));
        }
    }

    async fn handle_event(&self, event: PlayerEvent) {
        let node = self.node().identifier().to_string();
        match &event {
            PlayerEvent::TrackStart { .. } => {
                let mut state = self.state.lock();
                if state.current.is_some() && !state.paused {
                    state.status = PlayerStatus::Playing;
                }
            }
            PlayerEvent::TrackEnd { reason, .. } if reason.may_start_next() => {
                if let Err(e) = self.advance(None, PlayOptions::default(), true).await {
                    error!("❌ No se pudo continuar la cola de {}: {}", self.guild_id, e);
                }
            }
            PlayerEvent::QueueEnd { reason, .. } if reason.may_start_next() => {
                self.finish_queue(*reason).await;
            }
            PlayerEvent::TrackException { message, severity, .. } => {
                warn!("⚠️ Error de reproducción en {} ({:?}): {}", self.guild_id, severity, message);
            }
            PlayerEvent::TrackStuck { threshold, .. } => {
                warn!("⚠️ Track atascado en {} ({:?})", self.guild_id, threshold);
            }
            PlayerEvent::WebSocketClosed { code, reason, by_remote } => {
                warn!(
                    "🔌 Voz cerrada en {}: code={} reason='{}' remoto={}",
                    self.guild_id, code, reason, by_remote
                );
            }
            PlayerEvent::TrackEnd { .. } | PlayerEvent::QueueEnd { .. } => {}
        }

        let _ = self.notices.send(PlayerNotice::Event {
            guild_id: self.guild_id,
            node,
            event,
        });
    }

    async fn finish_queue(&self, reason: TrackEndReason) {
        if self.repeat() && self.current().is_some() {
            if let Err(e) = self.advance(None, PlayOptions::default(), true).await {
                error!("❌ No se pudo repetir en {}: {}", self.guild_id, e);
            }
            return;
        }
        debug!("📭 Cola terminada en {} ({:?})", self.guild_id, reason);
        self.retire_current();
        self.go_idle();
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::node::NodeConfig;
    use pretty_assertions::assert_eq;
    use std::num::NonZeroU64;

    fn guild(id: u64) -> GuildId {
        GuildId::from(NonZeroU64::new(id).unwrap())
    }

    fn user(id: u64) -> UserId {
        UserId::from(NonZeroU64::new(id).unwrap())
    }

    fn track(n: usize) -> Track {
        Track::new(format!("QAAA{n}").as_str(), format!("Song {n}"), Duration::from_secs(180))
    }

    fn setup() -> (Arc<Player>, flume::Receiver<OutgoingMessage>, flume::Receiver<PlayerNotice>) {
        let (node, rx) = Node::detached(NodeConfig::new("main", "localhost", 2333, "pw")).unwrap();
        let (notices_tx, notices) = flume::unbounded();
        let settings = PlayerSettings {
            queue_timeout: Duration::from_secs(20),
            ..PlayerSettings::default()
        };
        let player = Player::new(guild(1), Arc::clone(&node), None, None, settings, notices_tx);
        node.register(&player);
        player.connect(ChannelId::from(NonZeroU64::new(5).unwrap()));
        (player, rx, notices)
    }

    fn drain(rx: &flume::Receiver<OutgoingMessage>) -> Vec<OutgoingMessage> {
        rx.try_iter().collect()
    }

    #[tokio::test]
    async fn test_play_sends_offset_and_clears_votes() {
        let (player, rx, _) = setup();
        assert_eq!(player.status(), PlayerStatus::Connected);
        player.vote(VoteKind::Skip, user(9));

        let started = player
            .play(Some(track(1).with_start_offset(Duration::from_secs(30))), PlayOptions::default())
            .await
            .unwrap();
        assert_eq!(started, Some(track(1)));
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert!(player.votes().is_empty());
        assert_eq!(
            drain(&rx),
            vec![OutgoingMessage::Play {
                guild_id: "1".to_string(),
                track: track(1).id,
                start_time: 30_000,
                no_replace: false,
                end_time: None,
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_times_out_on_empty_queue() {
        let (player, rx, _) = setup();
        let started = player.play(None, PlayOptions::default()).await.unwrap();
        assert_eq!(started, None);
        assert_eq!(player.status(), PlayerStatus::Connected);
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_keeps_current_track() {
        let (player, rx, _) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        drain(&rx);

        let started = player.play(None, PlayOptions::default()).await.unwrap();
        assert_eq!(started, None);
        assert_eq!(player.current(), Some(track(1)));
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert!(player.queue().history().is_empty());
        assert!(drain(&rx).is_empty());
    }

    #[tokio::test]
    async fn test_repeat_requeues_finished_track() {
        let (player, _rx, _) = setup();
        player.set_repeat(true);
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        player.add(track(2)).unwrap();

        let next = player.play(None, PlayOptions::default()).await.unwrap();
        assert_eq!(next, Some(track(2)));
        assert_eq!(player.queue().snapshot(), vec![track(1)]);
        assert_eq!(player.queue().history(), vec![track(1)]);
    }

    #[tokio::test]
    async fn test_skip_never_requeues() {
        let (player, _rx, _) = setup();
        player.set_repeat(true);
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        player.add(track(2)).unwrap();

        assert_eq!(player.skip().await.unwrap(), Some(track(2)));
        assert!(player.queue().is_empty());
    }

    #[tokio::test]
    async fn test_skip_on_empty_queue_stops() {
        let (player, rx, _) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        drain(&rx);
        assert_eq!(player.skip().await.unwrap(), None);
        assert_eq!(player.current(), None);
        assert_eq!(drain(&rx), vec![OutgoingMessage::Stop { guild_id: "1".to_string() }]);
    }

    #[tokio::test]
    async fn test_no_replace_enqueues_while_playing() {
        let (player, _rx, _) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        let options = PlayOptions {
            replace: false,
            ..PlayOptions::default()
        };
        assert_eq!(player.play(Some(track(2)), options).await.unwrap(), None);
        assert_eq!(player.current(), Some(track(1)));
        assert_eq!(player.queue().snapshot(), vec![track(2)]);
    }

    #[tokio::test]
    async fn test_pause_toggles() {
        let (player, rx, _) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        drain(&rx);

        assert!(player.pause(None).await.unwrap());
        assert_eq!(player.status(), PlayerStatus::Paused);
        assert!(!player.pause(None).await.unwrap());
        assert_eq!(player.status(), PlayerStatus::Playing);
        assert_eq!(
            drain(&rx),
            vec![
                OutgoingMessage::Pause { guild_id: "1".to_string(), pause: true },
                OutgoingMessage::Pause { guild_id: "1".to_string(), pause: false },
            ]
        );
    }

    #[tokio::test]
    async fn test_volume_and_seek_are_clamped() {
        let (player, _rx, _) = setup();
        assert_eq!(player.set_volume(500).await.unwrap(), MAX_VOLUME);
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        assert_eq!(
            player.seek(Duration::from_secs(999)).await.unwrap(),
            Duration::from_secs(180)
        );
    }

    #[tokio::test]
    async fn test_equalizer_band_validation() {
        let (player, rx, _) = setup();
        assert!(matches!(player.set_gain(15, 0.1).await, Err(AudioError::InvalidBand(15))));
        assert_eq!(player.set_gain(2, 5.0).await.unwrap(), 1.0);
        assert_eq!(
            drain(&rx),
            vec![OutgoingMessage::Equalizer {
                guild_id: "1".to_string(),
                bands: vec![EqBand { band: 2, gain: 1.0 }],
            }]
        );
    }

    #[tokio::test]
    async fn test_votes_and_members() {
        let (player, _rx, _) = setup();
        player.add_member(user(1));
        assert_eq!(player.vote(VoteKind::Skip, user(1)), 1);
        assert_eq!(player.vote(VoteKind::Skip, user(1)), 1);
        assert_eq!(player.vote(VoteKind::Stop, user(2)), 1);
        player.remove_member(user(1));
        assert_eq!(player.votes().count(VoteKind::Skip), 0);
        assert_eq!(player.votes().count(VoteKind::Stop), 1);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (player, rx, _) = setup();
        let node = player.node();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        drain(&rx);

        assert!(player.teardown().await);
        assert!(!player.teardown().await);
        assert_eq!(player.status(), PlayerStatus::Disconnected);
        assert!(!node.has_player(guild(1)));
        assert_eq!(drain(&rx), vec![OutgoingMessage::Destroy { guild_id: "1".to_string() }]);
        assert!(matches!(
            player.play(Some(track(2)), PlayOptions::default()).await,
            Err(AudioError::InvalidSession(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_interrupts_waiting_play() {
        let (player, _rx, _) = setup();
        let waiting = {
            let player = Arc::clone(&player);
            tokio::spawn(async move { player.play(None, PlayOptions::default()).await })
        };
        tokio::task::yield_now().await;
        player.teardown().await;
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(AudioError::InvalidSession(_))));
    }

    #[tokio::test]
    async fn test_natural_end_starts_next_track() {
        let (player, rx, notices) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        player.add(track(2)).unwrap();
        drain(&rx);

        player.deliver(PlayerEvent::TrackEnd {
            track: track(1).id,
            reason: TrackEndReason::Finished,
        });
        let notice = notices.recv_async().await.unwrap();
        assert!(matches!(notice.event(), Some(PlayerEvent::TrackEnd { .. })));
        assert_eq!(player.current(), Some(track(2)));
        assert!(matches!(drain(&rx).as_slice(), [OutgoingMessage::Play { .. }]));
    }

    #[tokio::test]
    async fn test_replaced_end_keeps_current() {
        let (player, _rx, notices) = setup();
        player.play(Some(track(1)), PlayOptions::default()).await.unwrap();
        player.deliver(PlayerEvent::TrackEnd {
            track: track(0).id,
            reason: TrackEndReason::Replaced,
        });
        notices.recv_async().await.unwrap();
        assert_eq!(player.current(), Some(track(1)));
    }
}
