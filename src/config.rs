//! Pool configuration, spawn parameters and the TOML config file.
//!
//! # Config file
//!
//! ```toml
//! [pool]
//! capacity = 4096
//! workgroup_size = 128
//!
//! [spawn]
//! frequency = 200.0
//! minimum_life_length = 1.0
//! maximum_life_length = 3.0
//! source_position = [0.0, 2.0, 0.0]
//! source_radius = [1.0, 0.2, 1.0]
//! gravity = true
//!
//! [run]
//! ticks = 600
//! dt = 0.016
//! backend = "host"
//! ```
//!
//! Every key is optional; missing keys take the defaults below.

use std::path::{Path, PathBuf};

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Workgroup size used when none is configured.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 128;

/// Immutable sizing of one particle pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of slots (N).
    pub capacity: u32,
    /// Invocations per workgroup for every compute pass.
    pub workgroup_size: u32,
}

impl PoolConfig {
    /// A pool of `capacity` slots with the default workgroup size.
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
        }
    }

    pub fn with_workgroup_size(mut self, workgroup_size: u32) -> Self {
        self.workgroup_size = workgroup_size;
        self
    }

    /// Reject sizes no pool can be built with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid("pool capacity must be at least 1".into()));
        }
        if self.workgroup_size == 0 {
            return Err(ConfigError::Invalid("workgroup size must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new(1024)
    }
}

/// Editable spawn and simulation properties of a particle system.
///
/// Values are not validated: a negative life length or an inverted range is
/// a caller error and simply produces odd particles.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnParams {
    /// Longest life a new particle can get.
    pub maximum_life_length: f32,
    /// Shortest life a new particle can get.
    pub minimum_life_length: f32,
    /// Tint at birth.
    pub start_color: Vec4,
    /// Tint at the end of life.
    pub end_color: Vec4,
    /// Particles spawned per second in rate-driven ticks.
    pub frequency: f32,
    /// Speed of a freshly spawned particle.
    pub start_velocity_strength: f32,
    pub maximum_start_size: f32,
    pub minimum_start_size: f32,
    /// Size lost per second.
    pub size_falloff: f32,
    /// Centre of the spawn ellipsoid.
    pub source_position: Vec3,
    /// Semi-axes of the spawn ellipsoid.
    pub source_radius: Vec3,
    /// Whether gravity pulls particles along -Y.
    pub gravity: bool,
}

impl Default for SpawnParams {
    fn default() -> Self {
        Self {
            maximum_life_length: 1.0,
            minimum_life_length: 0.0,
            start_color: Vec4::ONE,
            end_color: Vec4::ONE,
            frequency: 1.0,
            start_velocity_strength: 1.0,
            maximum_start_size: 1.0,
            minimum_start_size: 0.0,
            size_falloff: 1.0,
            source_position: Vec3::ZERO,
            source_radius: Vec3::ONE,
            gravity: true,
        }
    }
}

impl SpawnParams {
    /// Slow, large, grey puffs drifting high above the origin.
    pub fn clouds() -> Self {
        Self {
            maximum_life_length: 16.0,
            minimum_life_length: 8.0,
            start_color: Vec4::new(0.7, 0.7, 0.7, 0.8),
            end_color: Vec4::new(0.5, 0.5, 0.5, 0.4),
            frequency: 10.0,
            source_position: Vec3::new(0.0, 10.0, 1.0),
            source_radius: Vec3::new(5.0, 2.0, 2.0),
            maximum_start_size: 18.0,
            minimum_start_size: 10.0,
            gravity: false,
            size_falloff: 0.0,
            ..Self::default()
        }
    }

    /// Long-lived motionless points spread over a wide flat disc.
    pub fn stars() -> Self {
        Self {
            maximum_life_length: 1000.0,
            minimum_life_length: 100.0,
            start_color: Vec4::new(1.0, 1.0, 1.0, 0.8),
            end_color: Vec4::new(1.0, 1.0, 1.0, 0.8),
            frequency: 10.0,
            source_position: Vec3::new(0.0, 50.0, 0.0),
            source_radius: Vec3::new(100.0, 0.0, 100.0),
            maximum_start_size: 2.0,
            gravity: false,
            size_falloff: 0.1,
            start_velocity_strength: 0.0,
            ..Self::default()
        }
    }

    /// Small flakes falling under gravity.
    pub fn snow() -> Self {
        Self {
            maximum_life_length: 8.0,
            minimum_life_length: 4.0,
            start_color: Vec4::new(1.0, 1.0, 1.0, 0.9),
            end_color: Vec4::new(1.0, 1.0, 1.0, 0.5),
            frequency: 10.0,
            source_position: Vec3::new(0.0, 12.0, 1.0),
            source_radius: Vec3::new(5.0, 0.5, 5.0),
            maximum_start_size: 0.2,
            minimum_start_size: 0.1,
            gravity: true,
            start_velocity_strength: 0.9,
            size_falloff: 0.0,
            ..Self::default()
        }
    }

    /// Look up a preset by name.
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "clouds" => Some(Self::clouds()),
            "stars" => Some(Self::stars()),
            "snow" => Some(Self::snow()),
            _ => None,
        }
    }
}

/// Which compute device the runner drives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// CPU reference device.
    #[default]
    Host,
    /// wgpu device.
    Gpu,
}

/// Settings for the headless runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Number of simulation ticks.
    pub ticks: u32,
    /// Seconds per tick.
    pub dt: f32,
    pub backend: BackendKind,
    /// Write one rendered frame here after the last tick (gpu backend only).
    pub frame: Option<PathBuf>,
    /// Image applied to every particle quad.
    pub texture: Option<PathBuf>,
    /// Log the alive count every this many ticks (0 disables).
    pub report_every: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: 300,
            dt: 1.0 / 60.0,
            backend: BackendKind::Host,
            frame: None,
            texture: None,
            report_every: 60,
        }
    }
}

/// Top-level config file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmberConfig {
    pub pool: PoolConfig,
    pub spawn: SpawnParams,
    pub run: RunConfig,
}

impl EmberConfig {
    /// Parse from TOML text and validate.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.pool.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = EmberConfig::from_toml_str("").unwrap();
        assert_eq!(config, EmberConfig::default());
        assert_eq!(config.pool.workgroup_size, DEFAULT_WORKGROUP_SIZE);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = EmberConfig::from_toml_str(
            r#"
            [pool]
            capacity = 64

            [spawn]
            frequency = 25.0
            source_radius = [2.0, 0.5, 2.0]
            gravity = false

            [run]
            backend = "gpu"
            ticks = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.pool.capacity, 64);
        assert_eq!(config.pool.workgroup_size, DEFAULT_WORKGROUP_SIZE);
        assert_eq!(config.spawn.frequency, 25.0);
        assert_eq!(config.spawn.source_radius, Vec3::new(2.0, 0.5, 2.0));
        assert!(!config.spawn.gravity);
        assert_eq!(config.spawn.maximum_life_length, 1.0);
        assert_eq!(config.run.backend, BackendKind::Gpu);
        assert_eq!(config.run.ticks, 10);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let err = EmberConfig::from_toml_str("[pool]\ncapacity = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zero_workgroup_is_rejected() {
        assert!(PoolConfig::new(8).with_workgroup_size(0).validate().is_err());
        assert!(PoolConfig::new(8).validate().is_ok());
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = EmberConfig::from_toml_str("[pool\ncapacity = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn presets_by_name() {
        assert_eq!(SpawnParams::preset("snow"), Some(SpawnParams::snow()));
        assert!(!SpawnParams::clouds().gravity);
        assert_eq!(SpawnParams::stars().start_velocity_strength, 0.0);
        assert!(SpawnParams::preset("rain").is_none());
    }
}
