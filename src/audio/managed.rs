//! Helpers for a Lavalink jar run on the same host.

use anyhow::{bail, Context, Result};
use regex::Regex;
use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
};
use tracing::{debug, info};

use super::{
    server_config::ServerConfig,
    version::{parse_version_output, ServerVersion},
};

static BRANCH_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Branch\s+(?P<branch>[\w\-.]+)").expect("static regex"));
static JVM_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"JVM:\s+(?P<jvm>\d+[.\d]*)").expect("static regex"));
static LAVAPLAYER_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Lavaplayer\s+(?P<lavaplayer>\d+[.\d]*)").expect("static regex"));
static BUILD_TIME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Build time:\s+(?P<time>\d+[.\d]*)").expect("static regex"));

// `1.8.0_275`, `1.8.0_272-b10` (Java 8 y anteriores)
static JAVA_LEGACY_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"version "1\.(?P<major>[0-8])\.(?P<minor>0)(?:_\d+)?(?:-.*)?""#).expect("static regex")
});
// `11`, `11.0.9`, `17.0.2-ea`
static JAVA_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"version "(?P<major>\d+)(?:\.(?P<minor>\d+))?(?:\.\d+)*(?:-[a-zA-Z0-9]+)?""#)
        .expect("static regex")
});

/// Java más antiguo capaz de ejecutar el servidor
pub const MIN_JAVA_MAJOR: u32 = 11;

/// Lo que reporta `java -jar Lavalink.jar --version`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerBuildInfo {
    pub version: ServerVersion,
    pub branch: Option<String>,
    pub jvm: Option<String>,
    pub lavaplayer: Option<String>,
    /// `dd/mm/yyyy` tal como lo imprime el jar
    pub build_time: Option<String>,
}

impl ServerBuildInfo {
    pub fn parse(output: &str) -> Result<Self> {
        let version = parse_version_output(output)?;
        let capture = |re: &Regex, name: &str| re.captures(output).map(|caps| caps[name].to_string());
        Ok(Self {
            version,
            branch: capture(&BRANCH_LINE, "branch"),
            jvm: capture(&JVM_LINE, "jvm"),
            lavaplayer: capture(&LAVAPLAYER_LINE, "lavaplayer"),
            build_time: capture(&BUILD_TIME_LINE, "time").map(|time| time.replace('.', "/")),
        })
    }
}

/// Ejecuta `<java> -jar <jar> --version` y analiza lo que imprime
pub async fn probe_server_version(java: &Path, jar: &Path) -> Result<ServerBuildInfo> {
    let output = async_process::Command::new(java)
        .arg("-jar")
        .arg(jar)
        .arg("--version")
        .output()
        .await
        .with_context(|| format!("No se pudo ejecutar {}", java.display()))?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    text.push_str(&String::from_utf8_lossy(&output.stderr));
    if !output.status.success() {
        bail!("{} --version terminó con {}", jar.display(), output.status);
    }

    let info = ServerBuildInfo::parse(&text)?;
    info!("🔎 Servidor gestionado: {} (jvm {:?})", info.version, info.jvm);
    Ok(info)
}

/// Extrae `(major, minor)` de la salida de `java -version`
pub fn parse_java_version(output: &str) -> Option<(u32, u32)> {
    output.lines().find_map(|line| {
        let caps = JAVA_LEGACY_VERSION
            .captures(line)
            .or_else(|| JAVA_VERSION.captures(line))?;
        let major = caps["major"].parse().ok()?;
        let minor = caps
            .name("minor")
            .and_then(|minor| minor.as_str().parse().ok())
            .unwrap_or(0);
        Some((major, minor))
    })
}

/// Comprueba que el ejecutable de Java sea utilizable
pub async fn probe_java(java: &Path) -> Result<(u32, u32)> {
    let output = async_process::Command::new(java)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("No se encontró Java en {}", java.display()))?;

    // `java -version` escribe en stderr
    let text = String::from_utf8_lossy(&output.stderr);
    let version = parse_java_version(&text)
        .with_context(|| format!("Salida inesperada de `{} -version`: {}", java.display(), text.trim()))?;
    if version.0 < MIN_JAVA_MAJOR {
        bail!("Se requiere Java {}+, encontrado {}.{}", MIN_JAVA_MAJOR, version.0, version.1);
    }
    debug!("☕ Java {}.{} en {}", version.0, version.1, java.display());
    Ok(version)
}

/// Escribe `application.yml` en `dir` y devuelve su ruta
pub async fn write_server_config(dir: &Path, config: &ServerConfig) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join("application.yml");
    tokio::fs::write(&path, config.to_yaml()?)
        .await
        .with_context(|| format!("No se pudo escribir {}", path.display()))?;
    info!("📝 Configuración del servidor escrita en {}", path.display());
    Ok(path)
}
