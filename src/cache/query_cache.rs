use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{QueryResolver, QueryStore};

/// Caché de lectura delante de un [`QueryResolver`]
pub struct QueryCache {
    store: Arc<dyn QueryStore>,
    resolver: Arc<dyn QueryResolver>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("in_flight", &self.in_flight.len())
            .finish_non_exhaustive()
    }
}

impl QueryCache {
    pub fn new(store: Arc<dyn QueryStore>, resolver: Arc<dyn QueryResolver>) -> Self {
        Self {
            store,
            resolver,
            in_flight: DashMap::new(),
        }
    }

    /// Devuelve la referencia guardada, o la resuelve y la guarda
    ///
    /// Las llamadas concurrentes para la misma búsqueda comparten una consulta.
    pub async fn resolve(&self, query: &str) -> Result<Option<String>> {
        if let Some(hit) = self.store.get(query).await? {
            debug!("✅ Cache hit: {}", query);
            return Ok(Some(hit));
        }

        let gate = self
            .in_flight
            .entry(query.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = gate.lock().await;

        // Otro llamador pudo haberlo resuelto mientras esperábamos
        if let Some(hit) = self.store.get(query).await? {
            return Ok(Some(hit));
        }

        let result = self.lookup(query).await;
        self.in_flight.remove(query);
        result
    }

    async fn lookup(&self, query: &str) -> Result<Option<String>> {
        debug!("❌ Cache miss: {}", query);
        let resolved = self.resolver.resolve(query).await?;
        match &resolved {
            Some(reference) => self.store.put(query, reference).await?,
            None => debug!("Sin resultados para '{}', no se guarda", query),
        }
        Ok(resolved)
    }

    /// Vuelve a resolver las entradas que el almacén marca para refrescar
    ///
    /// Devuelve cuántas se actualizaron. Los fallos se registran y se omiten.
    pub async fn refresh_stale(&self, limit: usize) -> Result<usize> {
        let candidates = self.store.refresh_candidates(limit).await?;
        let mut refreshed = 0;
        for query in candidates {
            match self.resolver.resolve(&query).await {
                Ok(Some(reference)) => {
                    self.store.put(&query, &reference).await?;
                    refreshed += 1;
                }
                Ok(None) => debug!("Refresco sin resultados: {}", query),
                Err(e) => warn!("⚠️ Error refrescando '{}': {}", query, e),
            }
        }
        if refreshed > 0 {
            info!("🔄 {} entradas de caché refrescadas", refreshed);
        }
        Ok(refreshed)
    }

    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await?;
        Ok(())
    }
}
