use anyhow::Result;
use std::fmt::Write;
use tracing::info;

use super::protocol::EqBand;
use crate::error::{AudioError, AudioResult};

/// Número de bandas que expone el nodo (25 Hz a 16 kHz)
pub const BAND_COUNT: usize = 15;

/// Rango de ganancia aceptado por el nodo
pub const MIN_GAIN: f64 = -0.25;
pub const MAX_GAIN: f64 = 1.0;

/// Filas del gráfico de `visualise`
const VISUAL_ROWS: [f64; 14] = [
    1.0, 0.9, 0.8, 0.7, 0.6, 0.5, 0.4, 0.3, 0.2, 0.1, 0.0, -0.1, -0.2, -0.25,
];

/// Preset de ecualizador
#[derive(Debug, Clone, PartialEq)]
pub struct EqPreset {
    pub name: String,
    pub gains: [f64; BAND_COUNT],
}

/// Presets predefinidos
pub struct EqPresets;

impl EqPresets {
    pub fn flat() -> EqPreset {
        EqPreset {
            name: "Flat".to_string(),
            gains: [0.0; BAND_COUNT],
        }
    }

    /// Graves con pegada y medios-agudos nítidos
    pub fn boost() -> EqPreset {
        EqPreset {
            name: "Boost".to_string(),
            gains: [
                -0.075, 0.125, 0.125, 0.1, 0.1, 0.05, 0.075, 0.0, 0.0, 0.0, 0.0, 0.0, 0.125, 0.15,
                0.05,
            ],
        }
    }

    pub fn metal() -> EqPreset {
        EqPreset {
            name: "Metal".to_string(),
            gains: [
                0.0, 0.1, 0.1, 0.15, 0.13, 0.1, 0.0, 0.125, 0.175, 0.175, 0.125, 0.125, 0.1, 0.075,
                0.0,
            ],
        }
    }

    /// También sirve como corte de graves
    pub fn piano() -> EqPreset {
        EqPreset {
            name: "Piano".to_string(),
            gains: [
                -0.25, -0.25, -0.125, 0.0, 0.25, 0.25, 0.0, -0.25, -0.25, 0.0, 0.0, 0.5, 0.25,
                -0.025, 0.0,
            ],
        }
    }

    /// Obtiene un preset por nombre
    pub fn get(name: &str) -> Option<EqPreset> {
        match name.to_lowercase().as_str() {
            "flat" => Some(Self::flat()),
            "boost" => Some(Self::boost()),
            "metal" => Some(Self::metal()),
            "piano" => Some(Self::piano()),
            _ => None,
        }
    }

    /// Lista todos los presets disponibles
    pub fn list() -> Vec<&'static str> {
        vec!["flat", "boost", "metal", "piano"]
    }
}

/// Estado del ecualizador de 15 bandas de un player
#[derive(Debug, Clone, PartialEq)]
pub struct Equalizer {
    gains: [f64; BAND_COUNT],
}

impl Equalizer {
    pub fn new() -> Self {
        Self {
            gains: [0.0; BAND_COUNT],
        }
    }

    /// Fija la ganancia de una banda; devuelve el valor recortado al rango válido
    pub fn set_gain(&mut self, band: usize, gain: f64) -> AudioResult<f64> {
        let slot = self
            .gains
            .get_mut(band)
            .ok_or(AudioError::InvalidBand(band))?;
        *slot = gain.clamp(MIN_GAIN, MAX_GAIN);
        Ok(*slot)
    }

    /// Fija varias bandas; falla sin modificar nada si alguna banda es inválida
    pub fn set_gains(&mut self, bands: &[EqBand]) -> AudioResult<()> {
        if let Some(bad) = bands.iter().find(|b| b.band >= BAND_COUNT) {
            return Err(AudioError::InvalidBand(bad.band));
        }
        for band in bands {
            self.gains[band.band] = band.gain.clamp(MIN_GAIN, MAX_GAIN);
        }
        Ok(())
    }

    /// Aplica un preset
    pub fn apply_preset(&mut self, preset_name: &str) -> Result<()> {
        let preset = EqPresets::get(preset_name)
            .ok_or_else(|| anyhow::anyhow!("Preset '{}' no encontrado", preset_name))?;
        self.gains = preset.gains;
        info!("🎛️ Preset '{}' aplicado", preset.name);
        Ok(())
    }

    pub fn gain(&self, band: usize) -> Option<f64> {
        self.gains.get(band).copied()
    }

    /// Obtiene las ganancias actuales
    pub fn gains(&self) -> [f64; BAND_COUNT] {
        self.gains
    }

    /// Todas las bandas, con la forma que espera la op `equalizer` del nodo
    pub fn bands(&self) -> Vec<EqBand> {
        self.gains
            .iter()
            .enumerate()
            .map(|(band, &gain)| EqBand { band, gain })
            .collect()
    }

    /// Bandas distintas de plano, lo único que un nodo nuevo necesita recibir
    pub fn non_default_bands(&self) -> Vec<EqBand> {
        self.bands().into_iter().filter(|b| b.gain != 0.0).collect()
    }

    pub fn is_flat(&self) -> bool {
        self.gains.iter().all(|gain| *gain == 0.0)
    }

    /// Resetea a valores por defecto
    pub fn reset(&mut self) {
        self.gains = [0.0; BAND_COUNT];
        info!("🔄 Ecualizador reseteado");
    }

    /// Dibuja la curva como un bloque de texto de ancho fijo
    pub fn visualise(&self) -> String {
        let mut block = String::new();
        for row in VISUAL_ROWS {
            let prefix = if row > 0.0 {
                "+"
            } else if row == 0.0 {
                " "
            } else {
                ""
            };
            let _ = write!(block, "{prefix}{row:.2} | ");
            for gain in self.gains {
                block.push_str(if gain >= row { "[] " } else { "   " });
            }
            block.push('\n');
        }

        block.push_str(&" ".repeat(8));
        let labels: Vec<String> = (0..BAND_COUNT).map(|band| format!("{band:02}")).collect();
        block.push_str(&labels.join(" "));
        block
    }

    /// Parsea una cadena de configuración de ecualizador
    /// Formato: "0:0.1 1:0.05 14:-0.2" (banda:ganancia)
    pub fn parse_config(config: &str) -> Result<Vec<EqBand>> {
        config
            .split_whitespace()
            .map(|part| {
                let (band, gain) = part.split_once(':').ok_or_else(|| {
                    anyhow::anyhow!("Formato inválido en '{}', use 'banda:ganancia'", part)
                })?;
                let band: usize = band
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Banda inválida en '{}'", part))?;
                let gain: f64 = gain
                    .parse()
                    .map_err(|_| anyhow::anyhow!("Ganancia inválida en '{}'", part))?;
                if band >= BAND_COUNT {
                    anyhow::bail!("Banda fuera de rango: {} (debe estar entre 0 y 14)", band);
                }
                Ok(EqBand { band, gain })
            })
            .collect()
    }
}

impl Default for Equalizer {
    fn default() -> Self {
        Self::new()
    }
}
