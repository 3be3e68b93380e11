use serde::Deserialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::error::AudioResult;

/// Regiones finas que se agrupan en el bucket en el que viven los nodos
const REGION_AGGREGATION: &[(&str, &str)] = &[
    ("dubai", "singapore"),
    ("amsterdam", "europe"),
    ("london", "europe"),
    ("frankfurt", "europe"),
    ("rotterdam", "europe"),
    ("eu-central", "europe"),
    ("eu-west", "europe"),
];

/// Se añade siempre que el directorio de regiones no esté vacío
const ALWAYS_VALID: &str = "south-korea";

#[derive(Debug, Deserialize)]
struct VoiceRegion {
    id: String,
    #[serde(default)]
    deprecated: bool,
}

/// Traduce regiones de voz a los buckets gruesos con los que se indexan los nodos
#[derive(Debug, Clone, Default)]
pub struct RegionMap {
    valid: HashSet<String>,
}

impl RegionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Crea el mapa a partir de un conjunto de regiones conocidas
    pub fn with_valid_regions<I, S>(regions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut map = Self::new();
        map.set_valid_regions(regions);
        map
    }

    /// Reemplaza el conjunto de regiones válidas
    pub fn set_valid_regions<I, S>(&mut self, regions: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.valid = regions.into_iter().map(Into::into).collect();
        if !self.valid.is_empty() {
            self.valid.insert(ALWAYS_VALID.to_string());
        }
    }

    pub fn valid_regions(&self) -> &HashSet<String> {
        &self.valid
    }

    /// Traduce una región de voz a su bucket
    ///
    /// Las regiones `vip-` se pliegan a su región base antes de agrupar. Con un
    /// directorio cargado, los buckets fuera de él dan `None`, que los
    /// llamadores tratan como "sin preferencia de región".
    pub fn aggregate(&self, region: &str) -> Option<String> {
        let region = region.trim().to_lowercase();
        if region.is_empty() {
            return None;
        }
        let base = region.strip_prefix("vip-").unwrap_or(&region);
        let bucket = REGION_AGGREGATION
            .iter()
            .find(|(fine, _)| *fine == base)
            .map(|(_, coarse)| *coarse)
            .unwrap_or(base);

        if self.valid.is_empty() || self.valid.contains(bucket) || self.valid.contains(base) {
            Some(bucket.to_string())
        } else {
            debug!("🌍 Región desconocida ignorada: {}", region);
            None
        }
    }

    /// Refresca las regiones válidas desde el directorio de regiones de voz
    pub async fn refresh(
        &mut self,
        client: &reqwest::Client,
        endpoint: &str,
        authorization: Option<&str>,
    ) -> AudioResult<usize> {
        let mut request = client.get(endpoint);
        if let Some(token) = authorization {
            request = request.header("Authorization", token);
        }
        let regions: Vec<VoiceRegion> = request.send().await?.error_for_status()?.json().await?;

        self.set_valid_regions(
            regions
                .into_iter()
                .filter(|region| !region.deprecated)
                .map(|region| region.id),
        );
        info!("🌍 {} regiones de voz cargadas", self.valid.len());
        Ok(self.valid.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_aggregates_fine_regions() {
        let map = RegionMap::new();
        assert_eq!(map.aggregate("London").as_deref(), Some("europe"));
        assert_eq!(map.aggregate("dubai").as_deref(), Some("singapore"));
        assert_eq!(map.aggregate("vip-amsterdam").as_deref(), Some("europe"));
        assert_eq!(map.aggregate("us-east").as_deref(), Some("us-east"));
        assert_eq!(map.aggregate("  "), None);
    }

    #[test]
    fn test_valid_regions_filter_unknown() {
        let map = RegionMap::with_valid_regions(["europe", "us-east"]);
        assert!(map.valid_regions().contains("south-korea"));
        assert_eq!(map.aggregate("frankfurt").as_deref(), Some("europe"));
        assert_eq!(map.aggregate("south-korea").as_deref(), Some("south-korea"));
        assert_eq!(map.aggregate("atlantis"), None);
    }

    #[test]
    fn test_empty_directory_stays_empty() {
        let map = RegionMap::with_valid_regions(Vec::<String>::new());
        assert!(map.valid_regions().is_empty());
    }
}
