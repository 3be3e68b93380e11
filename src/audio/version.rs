//! Parsing of the version block printed by `Lavalink.jar --version`.
//!
//! Three generations of the server print three different shapes:
//!
//! - current builds: `Version: 3.7.5-rc.1+red.2`
//! - pre-3.6 builds: `Version: 3.5-rc4` (patch may be elided, rc has no dot)
//! - the oldest builds: a free-form `Version:` line plus a `Build: 1350` line
//!
//! All of them collapse into [`ServerVersion`], which is totally ordered.
//! Build-number values sort before every structured value.

use regex::Regex;
use std::{cmp::Ordering, fmt, sync::LazyLock};

use crate::error::{AudioError, AudioResult};

static CURRENT_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^Version:\s+(?P<major>0|[1-9]\d*)\.(?P<minor>0|[1-9]\d*)\.(?P<patch>0|[1-9]\d*)(?:-rc\.(?P<rc>[1-9]\d*))?(?:\+red\.(?P<red>[1-9]\d*))?\s*$",
    )
    .expect("static regex")
});

static PRE_STABLE_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)^Version:\s+(?P<major>3)\.(?P<minor>[0-5])(?:\.(?P<patch>[1-9]\d*))?(?:-rc\.?(?P<rc>[1-9]\d*))?(?:\+red\.(?P<red>[1-9]\d*))?\s*$",
    )
    .expect("static regex")
});

static BUILD_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Build:\s+(?P<build>\d+)\s*$").expect("static regex"));

static RAW_VERSION_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^Version:\s+(?P<version>\S+)\s*$").expect("static regex"));

/// Versión estructurada del servidor
///
/// El orden compara `(major, minor, patch, stable, rc, red)`: una release
/// candidate va antes de su versión estable y las revisiones downstream van
/// después del build upstream que parchean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LavalinkVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub release_candidate: Option<u32>,
    pub downstream_revision: u32,
}

impl LavalinkVersion {
    fn sort_key(&self) -> (u32, u32, u32, bool, u32, u32) {
        (
            self.major,
            self.minor,
            self.patch,
            self.release_candidate.is_none(),
            self.release_candidate.unwrap_or(0),
            self.downstream_revision,
        )
    }

    /// Versión estable sin sufijos
    pub fn stable(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            release_candidate: None,
            downstream_revision: 0,
        }
    }

    pub fn is_release_candidate(&self) -> bool {
        self.release_candidate.is_some()
    }
}

impl Ord for LavalinkVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for LavalinkVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LavalinkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(rc) = self.release_candidate {
            write!(f, "-rc.{rc}")?;
        }
        if self.downstream_revision > 0 {
            write!(f, "+red.{}", self.downstream_revision)?;
        }
        Ok(())
    }
}

/// Versión con solo número de build, de los servidores más antiguos
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LavalinkOldVersion {
    pub raw_version: String,
    pub build_number: u32,
}

impl Ord for LavalinkOldVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.build_number
            .cmp(&other.build_number)
            .then_with(|| self.raw_version.cmp(&other.raw_version))
    }
}

impl PartialOrd for LavalinkOldVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for LavalinkOldVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.raw_version, self.build_number)
    }
}

/// Cualquier versión que un servidor pueda reportar. El orden de variantes es el de comparación.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ServerVersion {
    Legacy(LavalinkOldVersion),
    Semantic(LavalinkVersion),
}

impl ServerVersion {
    /// Devuelve la versión estructurada si existe
    pub fn semantic(&self) -> Option<&LavalinkVersion> {
        match self {
            Self::Semantic(version) => Some(version),
            Self::Legacy(_) => None,
        }
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Legacy(version) => version.fmt(f),
            Self::Semantic(version) => version.fmt(f),
        }
    }
}

impl From<LavalinkVersion> for ServerVersion {
    fn from(version: LavalinkVersion) -> Self {
        Self::Semantic(version)
    }
}

impl std::str::FromStr for ServerVersion {
    type Err = AudioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_version_output(s)
    }
}

/// Analiza la salida del comando `--version` del servidor
///
/// Una línea `Build:` marca la generación más antigua, cuya línea `Version:` no
/// tiene estructura fiable. Sin ella se prueba primero la gramática actual
/// y después la anterior a 3.6. Cualquier otra cosa es un build no soportado.
///
/// # Ejemplo
///
/// ```rust
/// # use open_music_lavalink::audio::version::parse_version_output;
/// let version = parse_version_output("Version: 3.7.5-rc.1+red.2\n").unwrap();
/// assert_eq!(version.to_string(), "3.7.5-rc.1+red.2");
/// ```
pub fn parse_version_output(output: &str) -> AudioResult<ServerVersion> {
    let text = output.replace("\r\n", "\n");

    if let Some(build) = BUILD_LINE.captures(&text) {
        let raw = RAW_VERSION_LINE
            .captures(&text)
            .ok_or_else(|| AudioError::VersionParse(output.to_string()))?;
        let build_number = build["build"]
            .parse()
            .map_err(|_| AudioError::VersionParse(output.to_string()))?;
        return Ok(ServerVersion::Legacy(LavalinkOldVersion {
            raw_version: raw["version"].to_string(),
            build_number,
        }));
    }

    for grammar in [&*CURRENT_GRAMMAR, &*PRE_STABLE_GRAMMAR] {
        if let Some(caps) = grammar.captures(&text) {
            let number = |name: &str| -> AudioResult<Option<u32>> {
                caps.name(name)
                    .map(|m| m.as_str().parse::<u32>())
                    .transpose()
                    .map_err(|_| AudioError::VersionParse(output.to_string()))
            };
            return Ok(ServerVersion::Semantic(LavalinkVersion {
                major: number("major")?.unwrap_or(0),
                minor: number("minor")?.unwrap_or(0),
                patch: number("patch")?.unwrap_or(0),
                release_candidate: number("rc")?,
                downstream_revision: number("red")?.unwrap_or(0),
            }));
        }
    }

    Err(AudioError::VersionParse(output.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn version(text: &str) -> ServerVersion {
        parse_version_output(&format!("Version: {text}\n")).unwrap()
    }

    fn semver(major: u32, minor: u32, patch: u32, rc: Option<u32>, red: u32) -> ServerVersion {
        ServerVersion::Semantic(LavalinkVersion {
            major,
            minor,
            patch,
            release_candidate: rc,
            downstream_revision: red,
        })
    }

    fn old(raw: &str, build: u32) -> ServerVersion {
        ServerVersion::Legacy(LavalinkOldVersion {
            raw_version: raw.to_string(),
            build_number: build,
        })
    }

    #[test]
    fn test_canonical_strings_round_trip() {
        for text in [
            "3.6.0-rc.1",
            "3.7.5-rc.1+red.1",
            "3.7.5-rc.1+red.123",
            "3.7.5",
            "3.7.5+red.1",
            "4.0.0",
        ] {
            assert_eq!(version(text).to_string(), text);
        }
    }

    #[test]
    fn test_parses_fields() {
        assert_eq!(version("3.7.5-rc.1+red.2"), semver(3, 7, 5, Some(1), 2));
    }

    #[test]
    fn test_pre_stable_grammar() {
        assert_eq!(version("3.5-rc4").to_string(), "3.5.0-rc.4");
        assert_eq!(version("3.5").to_string(), "3.5.0");
        assert_eq!(version("3.5-rc.5"), semver(3, 5, 0, Some(5), 0));
        assert_eq!(version("3.5.5"), semver(3, 5, 5, None, 0));
        assert_eq!(version("3.5.5-rc1"), semver(3, 5, 5, Some(1), 0));
    }

    #[test]
    fn test_rejects_unsupported_builds() {
        for text in [
            "3.5.0-rc4",
            "3.6.0-rc4",
            "3.6",
            "3.7",
            "3.11.3-rc1",
            "4.0.0-rc5",
            "11.0.0-rc5",
        ] {
            let result = parse_version_output(&format!("Version: {text}\n"));
            assert!(
                matches!(result, Err(AudioError::VersionParse(_))),
                "{text} should be rejected"
            );
        }
    }

    #[test]
    fn test_legacy_build_lines() {
        let parsed = parse_version_output("Version: 3.4.0\nBuild: 1350\nJVM: 11\n").unwrap();
        assert_eq!(parsed, old("3.4.0", 1350));
        assert_eq!(parsed.to_string(), "3.4.0_1350");

        let parsed = parse_version_output("Version: 3.3.2.3\r\nBuild: 1239\r\n").unwrap();
        assert_eq!(parsed.to_string(), "3.3.2.3_1239");
    }

    #[test]
    fn test_total_order() {
        let ordered = vec![
            old("3.3.2.3", 1239),
            old("3.3.2.3", 1275),
            old("3.4.0", 1350),
            semver(3, 3, 0, None, 0),
            semver(3, 4, 0, None, 0),
            semver(3, 5, 0, Some(1), 0),
            semver(3, 5, 0, Some(2), 0),
            semver(3, 5, 0, Some(3), 0),
            semver(3, 5, 0, Some(3), 1),
            semver(3, 5, 0, Some(3), 2),
            semver(3, 5, 0, None, 0),
            semver(3, 5, 0, None, 1),
            semver(3, 5, 0, None, 2),
            semver(3, 5, 1, None, 0),
        ];

        for (i, left) in ordered.iter().enumerate() {
            for (j, right) in ordered.iter().enumerate() {
                assert_eq!(left.cmp(right), i.cmp(&j), "{left} vs {right}");
            }
        }
    }

    #[test]
    fn test_legacy_is_older_than_any_structured_value() {
        assert!(old("9.9.9", u32::MAX) < semver(0, 0, 0, Some(1), 0));
    }
}
