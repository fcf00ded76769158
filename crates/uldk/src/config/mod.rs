use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uldk_registry::RegistryConfig;

use crate::{
    collector::DedupKey,
    error::{Result, UldkError},
    record::ParcelField,
};

/// Parameters of the grid/fishnet coverage search.
///
/// Distances are in map units of the registry's coordinate system (metres for
/// EPSG:2180).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    /// Spacing of polygon probe candidates
    pub grid_step: f64,
    /// Radius removed around a probe that found nothing
    pub skip_radius: f64,
    /// Buffer applied to a found parcel before it is subtracted
    pub parcel_buffer: f64,
    /// Remaining area below which the search counts as exhausted
    pub min_area: f64,
    /// Leftover fragments smaller than this are not probed in the cleanup pass
    pub min_fragment_area: f64,
    /// Remaining line length below which a line search counts as exhausted
    pub min_line_length: f64,
    /// Maximum number of registry probes per run
    pub max_probes: usize,
    /// Optional wall-clock budget in milliseconds
    pub time_budget_ms: Option<u64>,
    /// Vertex spacing used to densify line inputs
    pub line_spacing: f64,
    /// Maximum number of probes along a line
    pub max_line_attempts: usize,
    /// Vertices used to approximate skip disks
    pub disk_segments: usize,
    /// SRID sent with every probe point
    pub srid: u32,
    /// How found parcels are deduplicated within a run
    pub dedup_key: DedupKey,
}

impl Default for CoverageConfig {
    fn default() -> Self {
        Self {
            grid_step: 1.0,
            skip_radius: 10.0,
            parcel_buffer: 0.01,
            min_area: 1.0,
            min_fragment_area: 1.0,
            min_line_length: 0.01,
            max_probes: 10_000,
            time_budget_ms: None,
            line_spacing: 1.0,
            max_line_attempts: 2_000,
            disk_segments: 32,
            srid: 2180,
            dedup_key: DedupKey::default(),
        }
    }
}

impl CoverageConfig {
    pub fn builder() -> CoverageConfigBuilder {
        CoverageConfigBuilder::new()
    }

    pub fn time_budget(&self) -> Option<Duration> {
        self.time_budget_ms.map(Duration::from_millis)
    }

    /// Reject parameters the search cannot make progress with.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("grid_step", self.grid_step),
            ("skip_radius", self.skip_radius),
            ("line_spacing", self.line_spacing),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(UldkError::ConfigError(format!(
                    "{name} must be a positive number, got {value}"
                )));
            }
        }
        let non_negative = [
            ("parcel_buffer", self.parcel_buffer),
            ("min_area", self.min_area),
            ("min_fragment_area", self.min_fragment_area),
            ("min_line_length", self.min_line_length),
        ];
        for (name, value) in non_negative {
            if !(value.is_finite() && value >= 0.0) {
                return Err(UldkError::ConfigError(format!(
                    "{name} must not be negative, got {value}"
                )));
            }
        }
        if self.disk_segments < 3 {
            return Err(UldkError::ConfigError(format!(
                "disk_segments must be at least 3, got {}",
                self.disk_segments
            )));
        }
        Ok(())
    }
}

/// Builder for [`CoverageConfig`] with presets.
#[derive(Debug, Clone, Default)]
pub struct CoverageConfigBuilder {
    config: CoverageConfig,
}

impl CoverageConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: CoverageConfig::default(),
        }
    }

    /// Denser probing for small, fragmented areas
    pub fn fine() -> Self {
        let mut builder = Self::new();
        builder.config.grid_step = 0.5;
        builder.config.skip_radius = 2.0;
        builder.config.min_area = 0.25;
        builder.config.min_fragment_area = 0.25;
        builder.config.line_spacing = 0.5;
        builder
    }

    /// Sparser probing for large areas of big parcels
    pub fn coarse() -> Self {
        let mut builder = Self::new();
        builder.config.grid_step = 5.0;
        builder.config.skip_radius = 25.0;
        builder.config.min_area = 10.0;
        builder.config.min_fragment_area = 10.0;
        builder.config.line_spacing = 5.0;
        builder
    }

    pub fn grid_step(mut self, step: f64) -> Self {
        self.config.grid_step = step;
        self
    }

    pub fn skip_radius(mut self, radius: f64) -> Self {
        self.config.skip_radius = radius;
        self
    }

    pub fn parcel_buffer(mut self, buffer: f64) -> Self {
        self.config.parcel_buffer = buffer;
        self
    }

    pub fn min_area(mut self, area: f64) -> Self {
        self.config.min_area = area;
        self
    }

    pub fn min_fragment_area(mut self, area: f64) -> Self {
        self.config.min_fragment_area = area;
        self
    }

    pub fn max_probes(mut self, probes: usize) -> Self {
        self.config.max_probes = probes;
        self
    }

    pub fn time_budget(mut self, budget: Duration) -> Self {
        self.config.time_budget_ms = Some(budget.as_millis() as u64);
        self
    }

    pub fn line_spacing(mut self, spacing: f64) -> Self {
        self.config.line_spacing = spacing;
        self
    }

    pub fn max_line_attempts(mut self, attempts: usize) -> Self {
        self.config.max_line_attempts = attempts;
        self
    }

    pub fn srid(mut self, srid: u32) -> Self {
        self.config.srid = srid;
        self
    }

    pub fn dedup_key(mut self, key: DedupKey) -> Self {
        self.config.dedup_key = key;
        self
    }

    pub fn build(self) -> CoverageConfig {
        self.config
    }
}

/// How the result collector writes into its layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Features committed per edit session
    pub batch_size: usize,
    pub dedup_key: DedupKey,
    /// Target field names overriding the defaults when mapping by name
    pub field_names: HashMap<ParcelField, String>,
    /// Target field names for a record's extra attributes, by position
    pub extra_fields: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            dedup_key: DedupKey::default(),
            field_names: HashMap::new(),
            extra_fields: Vec::new(),
        }
    }
}

/// All settings, loadable from one JSON document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UldkConfig {
    pub registry: RegistryConfig,
    pub coverage: CoverageConfig,
    pub collector: CollectorConfig,
}

impl UldkConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.registry = config.registry.with_env_overrides();
        config.coverage.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
