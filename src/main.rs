use anyhow::{Context, Result};
use std::{path::PathBuf, sync::Arc, time::Duration};
use tracing::{error, info, warn};

use open_music_lavalink::{
    audio::{managed, server_config, Node, NodeRegistry},
    cache::{MemoryStore, QueryCache, QueryStore, SqlStore, YouTubeSearchResolver},
    config::Config,
};

const CACHE_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60 * 60);
const CACHE_REFRESH_BATCH: usize = 50;

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_lavalink=debug".parse()?)
                .add_directive("reqwest=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Lavalink v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--print-server-config") {
        print!("{}", server_config::default_server_config().to_yaml()?);
        return Ok(());
    }

    // Cargar configuración
    let config = Config::load()?;
    info!("{}", config.summary());

    if std::env::args().any(|arg| arg == "--health-check") {
        return health_check(&config).await;
    }

    if std::env::args().any(|arg| arg == "--version-probe") {
        return version_probe(&config).await;
    }

    // Registro de nodos
    let registry = Arc::new(NodeRegistry::new(config.identity(), config.player_settings()));
    for node in &config.nodes {
        match registry.add_node(node.clone()).await {
            Ok(_) => info!("✅ Nodo {} conectado", node.identifier),
            Err(e) => error!("❌ No se pudo conectar al nodo {}: {}", node.identifier, e),
        }
    }
    if registry.available_nodes().is_empty() {
        warn!("⚠️ Ningún nodo disponible; los reproductores no podrán crearse");
    }

    if let Some(endpoint) = &config.voice_regions_endpoint {
        match registry
            .refresh_regions(endpoint, config.voice_regions_token.as_deref())
            .await
        {
            Ok(count) => info!("🌍 {} regiones de voz válidas", count),
            Err(e) => warn!("⚠️ No se pudieron cargar las regiones de voz: {}", e),
        }
    }

    let supervisor = registry.spawn_supervisor();

    // Caché de búsquedas
    let cache = match open_cache(&config).await? {
        Some((cache, sql)) => {
            let cache = Arc::new(cache);
            spawn_cache_maintenance(Arc::clone(&cache), sql);
            Some(cache)
        }
        None => {
            info!("🔍 Sin clave de YouTube API, caché de búsquedas desactivada");
            None
        }
    };

    info!("🚀 Orquestador iniciado");

    tokio::signal::ctrl_c()
        .await
        .context("Error al registrar Ctrl+C")?;
    info!("⚠️ Señal de shutdown recibida, cerrando...");

    if let Some(cache) = cache {
        if let Err(e) = cache.flush().await {
            error!("❌ Error guardando la caché: {:?}", e);
        }
    }
    registry.shutdown().await;
    supervisor.abort();

    Ok(())
}

async fn open_cache(config: &Config) -> Result<Option<(QueryCache, Option<SqlStore>)>> {
    let Some(api_key) = config.youtube_api_key.clone() else {
        return Ok(None);
    };
    let resolver = Arc::new(YouTubeSearchResolver::new(api_key)?);

    let (store, sql): (Arc<dyn QueryStore>, Option<SqlStore>) = match &config.sql_cache_path {
        Some(path) => {
            let store = SqlStore::open(path, config.cache_max_age())?;
            (Arc::new(store.clone()), Some(store))
        }
        None => (Arc::new(MemoryStore::load(config.query_cache_path()).await?), None),
    };

    Ok(Some((QueryCache::new(store, resolver), sql)))
}

fn spawn_cache_maintenance(cache: Arc<QueryCache>, sql: Option<SqlStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_MAINTENANCE_INTERVAL);
        loop {
            interval.tick().await;
            if let Some(sql) = &sql {
                if let Err(e) = sql.delete_expired().await {
                    warn!("⚠️ Error limpiando la caché: {}", e);
                }
            }
            if let Err(e) = cache.refresh_stale(CACHE_REFRESH_BATCH).await {
                warn!("⚠️ Error refrescando la caché: {}", e);
            }
            if let Err(e) = cache.flush().await {
                warn!("⚠️ Error guardando la caché: {}", e);
            }
        }
    });
}

/// Consulta `/version` en cada nodo configurado
async fn health_check(config: &Config) -> Result<()> {
    if config.nodes.is_empty() {
        anyhow::bail!("No hay nodos configurados");
    }

    let mut healthy = 0;
    for node_config in &config.nodes {
        let (node, _outgoing) = Node::detached(node_config.clone())?;
        match node.server_version().await {
            Ok(version) => {
                println!("{}: {}", node_config.identifier, version);
                healthy += 1;
            }
            Err(e) => println!("{}: ERROR {}", node_config.identifier, e),
        }
    }

    if healthy == config.nodes.len() {
        println!("OK");
        Ok(())
    } else {
        anyhow::bail!("{} de {} nodos sin responder", config.nodes.len() - healthy, config.nodes.len());
    }
}

/// Verifica java y el jar del servidor gestionado
async fn version_probe(config: &Config) -> Result<()> {
    let (major, minor) = managed::probe_java(&config.java_path).await?;
    println!("java: {major}.{minor}");

    let jar: PathBuf = config
        .server_jar
        .clone()
        .context("server_jar no está configurado")?;
    let info = managed::probe_server_version(&config.java_path, &jar).await?;
    println!("lavalink: {}", info.version);
    if let Some(branch) = info.branch {
        println!("branch: {branch}");
    }
    if let Some(jvm) = info.jvm {
        println!("jvm: {jvm}");
    }
    if let Some(lavaplayer) = info.lavaplayer {
        println!("lavaplayer: {lavaplayer}");
    }
    if let Some(build_time) = info.build_time {
        println!("build time: {build_time}");
    }
    Ok(())
}
