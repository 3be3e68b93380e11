use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::fs;
use tracing::{debug, info, warn};

use super::CacheError;

/// Almacenamiento detrás de [`QueryCache`](super::QueryCache)
#[async_trait]
pub trait QueryStore: Send + Sync {
    async fn get(&self, query: &str) -> Result<Option<String>, CacheError>;

    async fn put(&self, query: &str, reference: &str) -> Result<(), CacheError>;

    /// Búsquedas que conviene resolver de nuevo antes de que caduquen
    async fn refresh_candidates(&self, _limit: usize) -> Result<Vec<String>, CacheError> {
        Ok(Vec::new())
    }

    /// Persiste lo pendiente
    async fn flush(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

/// Caché en memoria respaldada por un archivo JSON
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: DashMap<String, String>,
    path: Option<PathBuf>,
    dirty: AtomicBool,
}

impl MemoryStore {
    /// Almacén que nunca toca el disco
    pub fn new() -> Self {
        Self::default()
    }

    /// Carga `path` si existe. Un archivo corrupto arranca una caché vacía.
    pub async fn load(path: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let entries = match fs::read_to_string(&path).await {
            Ok(content) => match serde_json::from_str::<HashMap<String, String>>(&content) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!("⚠️ Caché {} corrupta, se descarta: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };

        info!("📂 Caché de búsquedas cargada: {} entradas", entries.len());
        Ok(Self {
            entries: entries.into_iter().collect(),
            path: Some(path),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl QueryStore for MemoryStore {
    async fn get(&self, query: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(query).map(|entry| entry.value().clone()))
    }

    async fn put(&self, query: &str, reference: &str) -> Result<(), CacheError> {
        self.entries.insert(query.to_string(), reference.to_string());
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else { return Ok(()) };
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot: HashMap<String, String> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        let content = serde_json::to_string(&snapshot)?;

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, content).await?;
        fs::rename(&tmp, path).await?;
        info!("💾 Caché de búsquedas guardada: {} entradas", snapshot.len());
        Ok(())
    }
}

/// Una fila de la caché SQL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub query: String,
    pub reference: String,
    pub last_updated: DateTime<Utc>,
    pub last_fetched: DateTime<Utc>,
}

/// Almacén SQLite con edad máxima
///
/// Las lecturas ignoran filas más viejas que la edad máxima y marcan `last_fetched`;
/// las filas que se siguen leyendo pero se resolvieron hace más de media edad
/// máxima se ofrecen en [`QueryStore::refresh_candidates`].
#[derive(Debug, Clone)]
pub struct SqlStore {
    conn: Arc<Mutex<Connection>>,
    max_age: ChronoDuration,
}

impl SqlStore {
    pub fn open(path: &Path, max_age: Duration) -> Result<Self, CacheError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        Self::init(Connection::open(path)?, max_age)
    }

    pub fn open_in_memory(max_age: Duration) -> Result<Self, CacheError> {
        Self::init(Connection::open_in_memory()?, max_age)
    }

    fn init(conn: Connection, max_age: Duration) -> Result<Self, CacheError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             CREATE TABLE IF NOT EXISTS query_cache (
                 query TEXT PRIMARY KEY,
                 reference TEXT NOT NULL,
                 last_updated INTEGER NOT NULL,
                 last_fetched INTEGER NOT NULL
             );
             CREATE INDEX IF NOT EXISTS idx_query_cache_fetched
             ON query_cache (last_fetched DESC, last_updated);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            max_age: ChronoDuration::from_std(max_age)
                .unwrap_or(ChronoDuration::days(365 * 100))
                .min(ChronoDuration::days(365 * 100)),
        })
    }

    pub fn max_age(&self) -> ChronoDuration {
        self.max_age
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection, ChronoDuration) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let max_age = self.max_age;
        let result = tokio::task::spawn_blocking(move || f(&conn.lock(), max_age)).await?;
        Ok(result?)
    }

    /// Escribe una fila tal cual, conservando sus marcas de tiempo
    pub fn insert_entry(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        self.conn.lock().execute(
            "INSERT INTO query_cache (query, reference, last_updated, last_fetched)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(query) DO UPDATE SET
                 reference = excluded.reference,
                 last_updated = excluded.last_updated,
                 last_fetched = excluded.last_fetched",
            params![
                entry.query,
                entry.reference,
                entry.last_updated.timestamp(),
                entry.last_fetched.timestamp()
            ],
        )?;
        Ok(())
    }

    pub fn entry(&self, query: &str) -> Result<Option<CacheEntry>, CacheError> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT query, reference, last_updated, last_fetched FROM query_cache WHERE query = ?1",
                [query],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;
        Ok(row.map(|(query, reference, updated, fetched)| CacheEntry {
            query,
            reference,
            last_updated: DateTime::from_timestamp(updated, 0).unwrap_or_default(),
            last_fetched: DateTime::from_timestamp(fetched, 0).unwrap_or_default(),
        }))
    }

    /// Borra las entradas más viejas que la edad máxima
    pub async fn delete_expired(&self) -> Result<usize, CacheError> {
        let deleted = self
            .blocking(|conn, max_age| {
                let cutoff = (Utc::now() - max_age).timestamp();
                conn.execute("DELETE FROM query_cache WHERE last_updated < ?1", [cutoff])
            })
            .await?;
        if deleted > 0 {
            info!("🗑️ {} entradas expiradas eliminadas de la caché", deleted);
        }
        Ok(deleted)
    }

    pub async fn count(&self) -> Result<usize, CacheError> {
        self.blocking(|conn, _| {
            conn.query_row("SELECT COUNT(*) FROM query_cache", [], |row| row.get::<_, i64>(0))
                .map(|count| usize::try_from(count).unwrap_or(0))
        })
        .await
    }
}

#[async_trait]
impl QueryStore for SqlStore {
    async fn get(&self, query: &str) -> Result<Option<String>, CacheError> {
        let query = query.to_string();
        self.blocking(move |conn, max_age| {
            let now = Utc::now();
            let cutoff = (now - max_age).timestamp();
            let reference: Option<String> = conn
                .query_row(
                    "SELECT reference FROM query_cache WHERE query = ?1 AND last_updated > ?2",
                    params![query, cutoff],
                    |row| row.get(0),
                )
                .optional()?;
            if reference.is_some() {
                conn.execute(
                    "UPDATE query_cache SET last_fetched = ?1 WHERE query = ?2",
                    params![now.timestamp(), query],
                )?;
            }
            Ok(reference)
        })
        .await
    }

    async fn put(&self, query: &str, reference: &str) -> Result<(), CacheError> {
        let (query, reference) = (query.to_string(), reference.to_string());
        self.blocking(move |conn, _| {
            let now = Utc::now().timestamp();
            conn.execute(
                "INSERT INTO query_cache (query, reference, last_updated, last_fetched)
                 VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(query) DO UPDATE SET
                     reference = excluded.reference,
                     last_updated = excluded.last_updated",
                params![query, reference, now],
            )
            .map(|_| ())
        })
        .await
    }

    async fn refresh_candidates(&self, limit: usize) -> Result<Vec<String>, CacheError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let candidates = self
            .blocking(move |conn, max_age| {
                let now = Utc::now();
                let fetched_after = (now - max_age).timestamp();
                let updated_before = (now - max_age / 2).timestamp();
                let mut stmt = conn.prepare(
                    "SELECT query FROM query_cache
                     WHERE last_fetched > ?1 AND last_updated < ?2
                     ORDER BY last_fetched DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![fetched_after, updated_before, limit], |row| row.get(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await?;
        debug!("🔄 {} entradas candidatas a refresco", candidates.len());
        Ok(candidates)
    }
}
