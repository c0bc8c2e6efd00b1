//! Pipeline configuration.
//!
//! Defaults suit the reference model. A config can also be read from a flat
//! INI file:
//!
//! ```ini
//! [denoise]
//! max_in_flight = 4
//! warmup_ms = 250
//! ring_seconds = 1.0
//! backends = cuda, cpu
//! atten_lim_db = 0
//! engine_warmup_runs = 2
//! intra_threads = 2
//! ```

use crate::engine::Backend;
use crate::{DfError, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;
pub const DEFAULT_WARMUP_MS: u32 = 250;
pub const DEFAULT_RING_SECONDS: f32 = 1.0;

#[derive(Debug, Clone, PartialEq)]
pub struct DenoiseConfig {
    /// Frames that may be awaiting inference at once.
    pub max_in_flight: usize,
    /// Forced silence after enabling, masking pipeline start-up latency.
    pub warmup_ms: u32,
    /// Length of each ring buffer in seconds of audio.
    pub ring_seconds: f32,
    /// Backends to try, most preferred first.
    pub backends: Vec<Backend>,
    /// Value fed to the model's attenuation-limit input, if it has one.
    /// `0` leaves suppression unlimited.
    pub atten_lim_db: f32,
    /// Throwaway inferences run at init to wake up the backend.
    pub engine_warmup_runs: usize,
    /// Intra-op threads for the engine; `None` lets the engine decide.
    /// Real-time use wants 1-2 to keep latency jitter low.
    pub intra_threads: Option<usize>,
}

impl Default for DenoiseConfig {
    fn default() -> Self {
        Self {
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            warmup_ms: DEFAULT_WARMUP_MS,
            ring_seconds: DEFAULT_RING_SECONDS,
            backends: Backend::DEFAULT_ORDER.to_vec(),
            atten_lim_db: 0.0,
            engine_warmup_runs: 2,
            intra_threads: Some(2),
        }
    }
}

impl DenoiseConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_in_flight == 0 {
            return Err(DfError::Config("max_in_flight must be at least 1".to_string()));
        }
        if !(self.ring_seconds.is_finite() && self.ring_seconds > 0.0) {
            return Err(DfError::Config(format!(
                "ring_seconds must be positive, got {}",
                self.ring_seconds
            )));
        }
        if self.backends.is_empty() {
            return Err(DfError::Config("at least one backend is required".to_string()));
        }
        if !self.atten_lim_db.is_finite() {
            return Err(DfError::Config("atten_lim_db must be finite".to_string()));
        }
        Ok(())
    }

    /// Ring capacity for a stream: `ring_seconds` of audio, never below four frames.
    pub fn ring_capacity(&self, sample_rate: u32, frame_size: usize) -> usize {
        let samples = (self.ring_seconds as f64 * sample_rate as f64) as usize;
        samples.max(frame_size * 4)
    }

    /// Parse INI text on top of the defaults.
    pub fn from_ini_str(content: &str) -> Result<Self> {
        let params = parse_ini(content);
        let mut config = Self::default();
        for (key, value) in &params {
            match key.as_str() {
                "max_in_flight" => config.max_in_flight = parse_value(key, value)?,
                "warmup_ms" => config.warmup_ms = parse_value(key, value)?,
                "ring_seconds" => config.ring_seconds = parse_value(key, value)?,
                "atten_lim_db" => config.atten_lim_db = parse_value(key, value)?,
                "engine_warmup_runs" => config.engine_warmup_runs = parse_value(key, value)?,
                "intra_threads" => {
                    config.intra_threads = match value.as_str() {
                        "" | "auto" => None,
                        v => Some(parse_value(key, v)?),
                    }
                }
                "backends" => {
                    config.backends = value
                        .split(',')
                        .filter(|s| !s.trim().is_empty())
                        .map(Backend::from_str)
                        .collect::<Result<Vec<_>>>()?;
                }
                other => log::debug!("Ignoring unknown config key '{}'", other),
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_ini_str(&content)
    }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse::<T>()
        .map_err(|_| DfError::Config(format!("invalid value '{}' for '{}'", value, key)))
}

/// Simple INI parser: flat `key = value`, sections and comments skipped.
fn parse_ini(content: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') || line.starts_with('#') || line.starts_with(';') || line.is_empty() {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DenoiseConfig::default();
        config.validate().unwrap();
        assert_eq!(config.backends.last(), Some(&Backend::Cpu));
    }

    #[test]
    fn test_ring_capacity_is_about_one_second() {
        let config = DenoiseConfig::default();
        assert_eq!(config.ring_capacity(48_000, 480), 48_000);
        let tiny = DenoiseConfig {
            ring_seconds: 0.001,
            ..DenoiseConfig::default()
        };
        assert_eq!(tiny.ring_capacity(48_000, 480), 1920);
    }

    #[test]
    fn test_from_ini() {
        let config = DenoiseConfig::from_ini_str(
            "[denoise]\n# comment\nmax_in_flight = 2\nwarmup_ms=100\nbackends = coreml, cpu\nintra_threads = auto\nunknown = 1\n",
        )
        .unwrap();
        assert_eq!(config.max_in_flight, 2);
        assert_eq!(config.warmup_ms, 100);
        assert_eq!(config.backends, vec![Backend::CoreMl, Backend::Cpu]);
        assert_eq!(config.intra_threads, None);
        assert_eq!(config.ring_seconds, DEFAULT_RING_SECONDS);
    }

    #[test]
    fn test_from_ini_rejects_bad_values() {
        assert!(DenoiseConfig::from_ini_str("max_in_flight = many").is_err());
        assert!(DenoiseConfig::from_ini_str("max_in_flight = 0").is_err());
        assert!(DenoiseConfig::from_ini_str("backends = tpu").is_err());
        assert!(DenoiseConfig::from_ini_str("backends = ").is_err());
    }
}
