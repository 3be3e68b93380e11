//! Bootstrap `application.yml` for a locally managed Lavalink server.
//!
//! Defaults are kept as flat `section__key` paths, the same shape used for
//! overrides, and unfolded into a nested YAML document on demand.

use anyhow::{bail, Result};
use serde_yaml::{Mapping, Value};
use tracing::debug;

/// Versión fijada del plugin de YouTube
pub const YOUTUBE_PLUGIN_VERSION: &str = "1.13.3";

pub const YOUTUBE_PLUGIN_REPOSITORY: &str = "https://maven.lavalink.dev/releases";

const PATH_SEPARATOR: &str = "__";

const YOUTUBE_CLIENTS: &[&str] = &[
    "MUSIC",
    "WEB",
    "ANDROID_TESTSUITE",
    "TVHTML5EMBEDDED",
    "ANDROID_LITE",
    "MEDIA_CONNECT",
    "IOS",
];

fn default_settings() -> Vec<(&'static str, Value)> {
    vec![
        ("server__address", "localhost".into()),
        ("server__port", 2333.into()),
        ("lavalink__server__password", "youshallnotpass".into()),
        ("lavalink__server__sources__http", true.into()),
        ("lavalink__server__sources__bandcamp", true.into()),
        ("lavalink__server__sources__local", true.into()),
        ("lavalink__server__sources__soundcloud", true.into()),
        ("lavalink__server__sources__youtube", true.into()),
        ("lavalink__server__sources__twitch", true.into()),
        ("lavalink__server__sources__vimeo", true.into()),
        ("lavalink__server__bufferDurationMs", 400.into()),
        ("lavalink__server__frameBufferDurationMs", 1000.into()),
        // 100 páginas de 100 entradas
        ("lavalink__server__youtubePlaylistLoadLimit", 100.into()),
        ("lavalink__server__playerUpdateInterval", 1.into()),
        ("lavalink__server__youtubeSearchEnabled", true.into()),
        ("lavalink__server__soundcloudSearchEnabled", true.into()),
        ("lavalink__server__gc_warnings", true.into()),
        ("metrics__prometheus__enabled", false.into()),
        ("metrics__prometheus__endpoint", "/metrics".into()),
        ("sentry__dsn", "".into()),
        ("sentry__environment", "".into()),
        ("logging__file__path", "./logs/".into()),
        ("logging__level__root", "INFO".into()),
        ("logging__level__lavalink", "INFO".into()),
        ("logging__logback__rollingpolicy__max_history", 15.into()),
        ("logging__logback__rollingpolicy__max_size", "10MB".into()),
        ("plugins__youtube__enabled", true.into()),
        ("plugins__youtube__allowSearch", true.into()),
        ("plugins__youtube__allowDirectVideoIds", true.into()),
        ("plugins__youtube__allowDirectPlaylistIds", true.into()),
        (
            "plugins__youtube__clients",
            Value::Sequence(YOUTUBE_CLIENTS.iter().map(|c| (*c).into()).collect()),
        ),
        ("plugins__youtube__WEB__playback", true.into()),
        ("plugins__youtube__TVHTML5EMBEDDED__playlistLoading", false.into()),
        ("plugins__youtube__TVHTML5EMBEDDED__videoLoading", false.into()),
        ("plugins__youtube__TVHTML5EMBEDDED__searching", false.into()),
    ]
}

/// Documento anidado de configuración del servidor
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    root: Mapping,
}

/// Documento por defecto con el plugin de YouTube ya aplicado
pub fn default_server_config() -> ServerConfig {
    let mut config = ServerConfig::from_flat(default_settings());
    config.apply_youtube_plugin();
    config
}

impl ServerConfig {
    /// Despliega rutas planas `a__b__c`. Los guiones bajos dentro de una clave pasan a ser guiones.
    pub fn from_flat<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut config = Self { root: Mapping::new() };
        for (path, value) in entries {
            // Ninguna ruta por defecto choca con un valor escalar
            let _ = config.set(path.as_ref(), value);
        }
        config
    }

    /// Sobrescribe un ajuste por ruta plana, creando las secciones intermedias
    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        let keys: Vec<String> = path.split(PATH_SEPARATOR).map(kebab_key).collect();
        let Some((last, sections)) = keys.split_last() else {
            bail!("Ruta de configuración vacía");
        };
        if last.is_empty() {
            bail!("Ruta de configuración inválida: {}", path);
        }

        let mut current = &mut self.root;
        for section in sections {
            let entry = current
                .entry(Value::String(section.clone()))
                .or_insert_with(|| Value::Mapping(Mapping::new()));
            current = match entry {
                Value::Mapping(mapping) => mapping,
                _ => bail!("'{}' no es una sección en {}", section, path),
            };
        }
        current.insert(Value::String(last.clone()), kebab_values(value));
        Ok(())
    }

    /// Lee un valor por ruta plana
    pub fn get(&self, path: &str) -> Option<&Value> {
        let mut current = &self.root;
        let keys: Vec<String> = path.split(PATH_SEPARATOR).map(kebab_key).collect();
        let (last, sections) = keys.split_last()?;
        for section in sections {
            current = current.get(section.as_str())?.as_mapping()?;
        }
        current.get(last.as_str())
    }

    pub fn youtube_source_enabled(&self) -> bool {
        self.get("lavalink__server__sources__youtube")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Cambia la fuente de YouTube integrada por la dependencia del plugin
    ///
    /// Devuelve `false` si la fuente ya estaba desactivada.
    pub fn apply_youtube_plugin(&mut self) -> bool {
        if !self.youtube_source_enabled() {
            return false;
        }
        let _ = self.set("lavalink__server__sources__youtube", false.into());

        let mut plugin = Mapping::new();
        plugin.insert(
            "dependency".into(),
            format!("dev.lavalink.youtube:youtube-plugin:{YOUTUBE_PLUGIN_VERSION}").into(),
        );
        plugin.insert("repository".into(), YOUTUBE_PLUGIN_REPOSITORY.into());

        let mut plugins = match self.get("lavalink__plugins") {
            Some(Value::Sequence(plugins)) => plugins.clone(),
            _ => Vec::new(),
        };
        plugins.push(Value::Mapping(plugin));
        let _ = self.set("lavalink__plugins", Value::Sequence(plugins));
        debug!("🔌 Plugin de YouTube {} habilitado", YOUTUBE_PLUGIN_VERSION);
        true
    }

    pub fn port(&self) -> Option<u16> {
        self.get("server__port")
            .and_then(Value::as_u64)
            .and_then(|port| u16::try_from(port).ok())
    }

    pub fn password(&self) -> Option<&str> {
        self.get("lavalink__server__password").and_then(Value::as_str)
    }

    pub fn as_value(&self) -> Value {
        Value::Mapping(self.root.clone())
    }

    /// Renderiza el documento como `application.yml`
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.root)?)
    }
}

fn kebab_key(key: &str) -> String {
    key.replace('_', "-")
}

fn kebab_values(value: Value) -> Value {
    match value {
        Value::Mapping(mapping) => Value::Mapping(
            mapping
                .into_iter()
                .map(|(key, value)| {
                    let key = match key {
                        Value::String(key) => Value::String(kebab_key(&key)),
                        other => other,
                    };
                    (key, kebab_values(value))
                })
                .collect(),
        ),
        Value::Sequence(items) => Value::Sequence(items.into_iter().map(kebab_values).collect()),
        other => other,
    }
}
