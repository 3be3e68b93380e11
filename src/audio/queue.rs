use anyhow::Result;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::{collections::VecDeque, time::Duration};
use tokio::{sync::Notify, time::Instant};
use tracing::{debug, info};

use super::track::Track;

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Track>,
    history: VecDeque<Track>,
}

/// Tracks pendientes de un player más su historial acotado
///
/// Los comandos encolan mientras el consumidor del player espera en
/// [`TrackQueue::next_within`]; cada mutación pasa por un único lock corto.
#[derive(Debug)]
pub struct TrackQueue {
    state: Mutex<QueueState>,
    available: Notify,
    max_size: usize,
    max_history: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize, max_history: usize) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            max_size,
            max_history,
        }
    }

    /// Agrega un track a la cola
    pub fn push(&self, track: Track) -> Result<()> {
        {
            let mut state = self.state.lock();
            if state.items.len() >= self.max_size {
                anyhow::bail!("La cola está llena (máximo {} canciones)", self.max_size);
            }
            info!("➕ Agregado a la cola: {}", track.title);
            state.items.push_back(track);
        }
        self.available.notify_one();
        Ok(())
    }

    /// Agrega múltiples tracks (playlist); devuelve cuántos cupieron
    pub fn extend(&self, tracks: Vec<Track>) -> usize {
        let added = {
            let mut state = self.state.lock();
            let space = self.max_size.saturating_sub(state.items.len());
            let added = tracks.len().min(space);
            state.items.extend(tracks.into_iter().take(added));
            added
        };
        if added > 0 {
            info!("➕ Agregadas {} canciones a la cola", added);
            self.available.notify_one();
        }
        added
    }

    /// Adelanta un track al frente de la cola y lo marca como "bumped"
    pub fn bump(&self, mut track: Track) {
        track.set_bumped(true);
        debug!("⏫ Adelantado: {}", track.title);
        self.state.lock().items.push_front(track);
        self.available.notify_one();
    }

    /// Re-encola al final aunque la cola esté llena
    pub(crate) fn requeue(&self, track: Track) {
        self.state.lock().items.push_back(track);
        self.available.notify_one();
    }

    /// Devuelve al frente un track cuyo comando de reproducción no llegó al nodo
    pub(crate) fn restore_front(&self, track: Track) {
        self.state.lock().items.push_front(track);
        self.available.notify_one();
    }

    /// Obtiene el siguiente track (FIFO)
    pub fn pop(&self) -> Option<Track> {
        self.state.lock().items.pop_front()
    }

    /// Espera el siguiente track hasta que venza `timeout`
    ///
    /// Devuelve `None` al vencer. Soltar el future no pierde ningún track, así que
    /// puede competir con una cancelación.
    pub async fn next_within(&self, timeout: Duration) -> Option<Track> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(track) = self.pop() {
                debug!("➡️ Siguiente en cola (FIFO): {}", track.title);
                return Some(track);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                info!("📭 Cola vacía, tiempo de espera agotado");
                return None;
            }
        }
    }

    /// Guarda un track en el historial, descartando el más antiguo si está lleno
    pub fn record_history(&self, track: Track) {
        let mut state = self.state.lock();
        state.history.push_back(track);
        while state.history.len() > self.max_history {
            state.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<Track> {
        self.state.lock().history.iter().cloned().collect()
    }

    /// Mezcla la cola.
    ///
    /// Las primeras `sticky` entradas conservan su orden. Con `shuffle_bumped` desactivado,
    /// las entradas adelantadas se apartan y se colocan justo después de esa cabecera.
    pub fn shuffle(&self, sticky: usize, shuffle_bumped: bool) {
        let mut state = self.state.lock();
        let sticky = sticky.min(state.items.len());
        let mut rest: Vec<Track> = state.items.drain(sticky..).collect();

        let bumped: Vec<Track> = if shuffle_bumped {
            Vec::new()
        } else {
            let (bumped, others): (Vec<_>, Vec<_>) = rest.into_iter().partition(Track::is_bumped);
            rest = others;
            bumped
        };

        rest.shuffle(&mut rand::thread_rng());
        state.items.extend(bumped);
        state.items.extend(rest);
        info!("🔀 Cola mezclada");
    }

    /// Limpia la cola
    pub fn clear(&self) {
        self.state.lock().items.clear();
        info!("🗑️ Cola limpiada");
    }

    /// Limpia duplicados
    pub fn clear_duplicates(&self) -> usize {
        let mut seen = std::collections::HashSet::new();
        let mut state = self.state.lock();
        let original_len = state.items.len();

        state.items.retain(|track| seen.insert(track.id.clone()));

        let removed = original_len - state.items.len();
        if removed > 0 {
            info!("🗑️ Eliminados {} duplicados", removed);
        }
        removed
    }

    /// Limpia tracks de un usuario específico
    pub fn clear_user_tracks(&self, user_id: UserId) -> usize {
        let mut state = self.state.lock();
        let original_len = state.items.len();
        state.items.retain(|track| track.requester != Some(user_id));

        let removed = original_len - state.items.len();
        if removed > 0 {
            info!("🗑️ Eliminadas {} canciones del usuario", removed);
        }
        removed
    }

    /// Mueve un track a una nueva posición
    pub fn move_track(&self, from: usize, to: usize) -> Result<()> {
        let mut state = self.state.lock();
        if from >= state.items.len() || to >= state.items.len() {
            anyhow::bail!("Índice fuera de rango");
        }

        if from != to {
            let track = state
                .items
                .remove(from)
                .ok_or_else(|| anyhow::anyhow!("No se pudo remover el item"))?;
            state.items.insert(to, track);
            debug!("📍 Track movido de posición {} a {}", from, to);
        }

        Ok(())
    }

    /// Elimina un track específico
    pub fn remove(&self, index: usize) -> Result<Track> {
        let track = self
            .state
            .lock()
            .items
            .remove(index)
            .ok_or_else(|| anyhow::anyhow!("Índice fuera de rango"))?;
        debug!("❌ Track eliminado en posición {}", index);
        Ok(track)
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Copia de los tracks pendientes, en orden
    pub fn snapshot(&self) -> Vec<Track> {
        self.state.lock().items.iter().cloned().collect()
    }

    pub fn total_duration(&self) -> Duration {
        self.state
            .lock()
            .items
            .iter()
            .filter(|track| !track.is_stream)
            .map(|track| track.length)
            .sum()
    }

    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let state = self.state.lock();
        let total_items = state.items.len();
        let safe_page = page.max(1);
        let start = (safe_page - 1) * items_per_page;
        let total_pages = if total_items == 0 {
            1
        } else {
            total_items.div_ceil(items_per_page)
        };

        QueuePage {
            items: state.items.iter().skip(start).take(items_per_page).cloned().collect(),
            current_page: safe_page,
            total_pages,
            total_items,
        }
    }
}

#[derive(Debug, Clone)]
pub struct QueuePage {
    pub items: Vec<Track>,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}
