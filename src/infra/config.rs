//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml
//!
//! Loading only parses. `Config::validate` must pass before any task is started.

use crate::domain::geometry::{CrossingLine, EntryTransition, Region, Zone};
use crate::domain::types::Point;
use anyhow::Context;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

/// Rejected configuration, reported before the tick loop starts
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("crossing line endpoints must be finite")]
    LineNotFinite,
    #[error("crossing line endpoints coincide")]
    DegenerateLine,
    #[error("zone name must not be empty")]
    EmptyZoneName,
    #[error("zone '{0}' is declared more than once")]
    DuplicateZone(String),
    #[error("zone '{0}' must set exactly one of `rect` or `polygon`")]
    ZoneShape(String),
    #[error("zone '{zone}' polygon has {points} points, need at least 3")]
    PolygonTooFewPoints { zone: String, points: usize },
    #[error("zone '{0}' has zero area")]
    ZeroAreaZone(String),
    #[error("zone '{0}' extends outside the 0-100 frame")]
    ZoneOutOfFrame(String),
    #[error("frame size must be non-zero")]
    ZeroFrameSize,
    #[error("capacity must be greater than zero")]
    ZeroCapacity,
    #[error("density thresholds must increase within 0-100 (medium={medium}, high={high}, very_high={very_high})")]
    DensityThresholds { medium: f64, high: f64, very_high: f64 },
    #[error("max_match_distance must be within (0, 1], got {0}")]
    InvalidMatchDistance(f64),
    #[error("min_confidence must be within [0, 1], got {0}")]
    InvalidMinConfidence(f64),
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
    #[error("base_delay_ms ({base_ms}) exceeds max_delay_ms ({max_ms})")]
    BackoffRange { base_ms: u64, max_ms: u64 },
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique site identifier, used in egress payloads and metrics labels
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "crowd-flow".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default = "default_camera_url")]
    pub base_url: String,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_frame_timeout_ms")]
    pub frame_timeout_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            base_url: default_camera_url(),
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            probe_timeout_ms: default_probe_timeout_ms(),
            frame_timeout_ms: default_frame_timeout_ms(),
        }
    }
}

fn default_camera_url() -> String {
    "http://192.168.4.1".to_string()
}

fn default_frame_width() -> u32 {
    640
}

fn default_frame_height() -> u32 {
    480
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_frame_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_url")]
    pub url: String,
    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
    /// Detections scored below this are ignored before tracking
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url: default_detector_url(),
            timeout_ms: default_detector_timeout_ms(),
            min_confidence: default_min_confidence(),
        }
    }
}

fn default_detector_url() -> String {
    "http://localhost:8500/detect".to_string()
}

fn default_detector_timeout_ms() -> u64 {
    4000
}

fn default_min_confidence() -> f64 {
    0.5
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerSection {
    /// Fraction of the frame diagonal
    #[serde(default = "default_max_match_distance")]
    pub max_match_distance: f64,
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,
}

impl Default for TrackerSection {
    fn default() -> Self {
        Self { max_match_distance: default_max_match_distance(), ttl_ms: default_ttl_ms() }
    }
}

fn default_max_match_distance() -> f64 {
    0.25
}

fn default_ttl_ms() -> u64 {
    10_000
}

/// `[line]` section. `entry_transition` has no default.
#[derive(Debug, Clone, Deserialize)]
pub struct LineConfig {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub entry_transition: EntryTransition,
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,
}

fn default_cooldown_ms() -> u64 {
    3000
}

/// `[[zones]]` entry: `rect = [x, y, w, h]` or `polygon = [[x, y], ...]`
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub name: String,
    #[serde(default)]
    pub rect: Option<[f64; 4]>,
    #[serde(default)]
    pub polygon: Option<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DensityConfig {
    #[serde(default = "default_capacity")]
    pub capacity: u32,
    #[serde(default = "default_medium_above")]
    pub medium_above: f64,
    #[serde(default = "default_high_above")]
    pub high_above: f64,
    #[serde(default = "default_very_high_above")]
    pub very_high_above: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            medium_above: default_medium_above(),
            high_above: default_high_above(),
            very_high_above: default_very_high_above(),
        }
    }
}

fn default_capacity() -> u32 {
    50
}

fn default_medium_above() -> f64 {
    25.0
}

fn default_high_above() -> f64 {
    50.0
}

fn default_very_high_above() -> f64 {
    80.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Number of recent evictions averaged for the dwell estimate
    #[serde(default = "default_dwell_window")]
    pub dwell_window: usize,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self { tick_interval_ms: default_tick_interval_ms(), dwell_window: default_dwell_window() }
    }
}

fn default_tick_interval_ms() -> u64 {
    5000
}

fn default_dwell_window() -> usize {
    50
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_probe_interval_ms() -> u64 {
    30_000
}

fn default_base_delay_ms() -> u64 {
    2000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttConfig {
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self { host: default_mqtt_host(), port: default_mqtt_port(), username: None, password: None }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttEgressConfig {
    /// Enable MQTT egress publishing
    #[serde(default = "default_mqtt_egress_enabled")]
    pub enabled: bool,
    /// Topic for per-tick snapshots (QoS 0)
    #[serde(default = "default_snapshots_topic")]
    pub snapshots_topic: String,
    /// Topic for counted crossings (QoS 1)
    #[serde(default = "default_crossings_topic")]
    pub crossings_topic: String,
    /// Topic for connection state changes (QoS 0, retained)
    #[serde(default = "default_connection_topic")]
    pub connection_topic: String,
}

impl Default for MqttEgressConfig {
    fn default() -> Self {
        Self {
            enabled: default_mqtt_egress_enabled(),
            snapshots_topic: default_snapshots_topic(),
            crossings_topic: default_crossings_topic(),
            connection_topic: default_connection_topic(),
        }
    }
}

fn default_mqtt_egress_enabled() -> bool {
    true
}

fn default_snapshots_topic() -> String {
    "crowd/snapshots".to_string()
}

fn default_crossings_topic() -> String {
    "crowd/crossings".to_string()
}

fn default_connection_topic() -> String {
    "crowd/connection".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
    /// Prometheus metrics HTTP port (0 to disable)
    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_metrics_interval_secs(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_prometheus_port() -> u16 {
    9090
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerSection,
    #[serde(default)]
    pub line: Option<LineConfig>,
    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
    #[serde(default)]
    pub density: DensityConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub supervisor: SupervisorSection,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub mqtt_egress: MqttEgressConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    camera_url: String,
    frame_width: u32,
    frame_height: u32,
    probe_timeout_ms: u64,
    frame_timeout_ms: u64,
    detector_url: String,
    detector_timeout_ms: u64,
    min_confidence: f64,
    max_match_distance: f64,
    ttl_ms: u64,
    line: Option<CrossingLine>,
    cooldown_ms: u64,
    zones: Vec<ZoneConfig>,
    capacity: u32,
    medium_above: f64,
    high_above: f64,
    very_high_above: f64,
    tick_interval_ms: u64,
    dwell_window: usize,
    probe_interval_ms: u64,
    base_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    mqtt_host: String,
    mqtt_port: u16,
    mqtt_username: Option<String>,
    mqtt_password: Option<String>,
    mqtt_egress_enabled: bool,
    mqtt_egress_snapshots_topic: String,
    mqtt_egress_crossings_topic: String,
    mqtt_egress_connection_topic: String,
    metrics_interval_secs: u64,
    prometheus_port: u16,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    /// Determine config file path: explicit argument, then CONFIG_FILE, then dev.toml
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        let line = toml_config.line.as_ref().map(|l| {
            CrossingLine::new(Point::new(l.x1, l.y1), Point::new(l.x2, l.y2), l.entry_transition)
        });
        let cooldown_ms = toml_config.line.as_ref().map_or_else(default_cooldown_ms, |l| l.cooldown_ms);

        Self {
            site_id: toml_config.site.id,
            camera_url: toml_config.camera.base_url,
            frame_width: toml_config.camera.frame_width,
            frame_height: toml_config.camera.frame_height,
            probe_timeout_ms: toml_config.camera.probe_timeout_ms,
            frame_timeout_ms: toml_config.camera.frame_timeout_ms,
            detector_url: toml_config.detector.url,
            detector_timeout_ms: toml_config.detector.timeout_ms,
            min_confidence: toml_config.detector.min_confidence,
            max_match_distance: toml_config.tracker.max_match_distance,
            ttl_ms: toml_config.tracker.ttl_ms,
            line,
            cooldown_ms,
            zones: toml_config.zones,
            capacity: toml_config.density.capacity,
            medium_above: toml_config.density.medium_above,
            high_above: toml_config.density.high_above,
            very_high_above: toml_config.density.very_high_above,
            tick_interval_ms: toml_config.analysis.tick_interval_ms,
            dwell_window: toml_config.analysis.dwell_window,
            probe_interval_ms: toml_config.supervisor.probe_interval_ms,
            base_delay_ms: toml_config.supervisor.base_delay_ms,
            max_delay_ms: toml_config.supervisor.max_delay_ms,
            max_attempts: toml_config.supervisor.max_attempts,
            mqtt_host: toml_config.mqtt.host,
            mqtt_port: toml_config.mqtt.port,
            mqtt_username: toml_config.mqtt.username,
            mqtt_password: toml_config.mqtt.password,
            mqtt_egress_enabled: toml_config.mqtt_egress.enabled,
            mqtt_egress_snapshots_topic: toml_config.mqtt_egress.snapshots_topic,
            mqtt_egress_crossings_topic: toml_config.mqtt_egress.crossings_topic,
            mqtt_egress_connection_topic: toml_config.mqtt_egress.connection_topic,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            prometheus_port: toml_config.metrics.prometheus_port,
            config_file,
        }
    }

    /// Parse configuration from TOML text (no validation)
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content).context("Failed to parse config")?;
        Ok(Self::from_toml(toml_config, "inline".to_string()))
    }

    /// Load configuration from a TOML file (no validation)
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration from a path, falling back to defaults if it cannot be read
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, path = %path, "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    /// Check every value the pipeline depends on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(ConfigError::ZeroFrameSize);
        }

        if let Some(line) = &self.line {
            if !line.start.is_finite() || !line.end.is_finite() {
                return Err(ConfigError::LineNotFinite);
            }
            if line.length() == 0.0 {
                return Err(ConfigError::DegenerateLine);
            }
        }

        // Converting also checks shapes, areas and bounds
        self.zones()?;

        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        let (medium, high, very_high) = (self.medium_above, self.high_above, self.very_high_above);
        if !(0.0 <= medium && medium < high && high < very_high && very_high <= 100.0) {
            return Err(ConfigError::DensityThresholds { medium, high, very_high });
        }

        if !(self.max_match_distance > 0.0 && self.max_match_distance <= 1.0) {
            return Err(ConfigError::InvalidMatchDistance(self.max_match_distance));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence(self.min_confidence));
        }

        for (name, value) in [
            ("tracker.ttl_ms", self.ttl_ms),
            ("analysis.tick_interval_ms", self.tick_interval_ms),
            ("supervisor.probe_interval_ms", self.probe_interval_ms),
            ("supervisor.base_delay_ms", self.base_delay_ms),
            ("camera.probe_timeout_ms", self.probe_timeout_ms),
            ("camera.frame_timeout_ms", self.frame_timeout_ms),
            ("detector.timeout_ms", self.detector_timeout_ms),
            ("analysis.dwell_window", self.dwell_window as u64),
            ("metrics.interval_secs", self.metrics_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroValue(name));
            }
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::ZeroValue("supervisor.max_attempts"));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::BackoffRange {
                base_ms: self.base_delay_ms,
                max_ms: self.max_delay_ms,
            });
        }

        Ok(())
    }

    /// Zones in declaration order
    pub fn zones(&self) -> Result<Vec<Zone>, ConfigError> {
        let mut seen = FxHashSet::default();
        let mut zones = Vec::with_capacity(self.zones.len());

        for zc in &self.zones {
            let name = zc.name.trim();
            if name.is_empty() {
                return Err(ConfigError::EmptyZoneName);
            }
            if !seen.insert(name.to_string()) {
                return Err(ConfigError::DuplicateZone(name.to_string()));
            }

            let region = match (&zc.rect, &zc.polygon) {
                (Some([x, y, width, height]), None) => {
                    Region::Rect { x: *x, y: *y, width: *width, height: *height }
                }
                (None, Some(points)) => {
                    if points.len() < 3 {
                        return Err(ConfigError::PolygonTooFewPoints {
                            zone: name.to_string(),
                            points: points.len(),
                        });
                    }
                    Region::Polygon { points: points.iter().map(|[x, y]| Point::new(*x, *y)).collect() }
                }
                _ => return Err(ConfigError::ZoneShape(name.to_string())),
            };

            if !region.within_frame() {
                return Err(ConfigError::ZoneOutOfFrame(name.to_string()));
            }
            if !(region.area() > 0.0) {
                return Err(ConfigError::ZeroAreaZone(name.to_string()));
            }

            zones.push(Zone::new(name, region));
        }

        Ok(zones)
    }

    // Getters for all config fields
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn camera_url(&self) -> &str {
        &self.camera_url
    }

    pub fn frame_width(&self) -> u32 {
        self.frame_width
    }

    pub fn frame_height(&self) -> u32 {
        self.frame_height
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn frame_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_timeout_ms)
    }

    pub fn detector_url(&self) -> &str {
        &self.detector_url
    }

    pub fn detector_timeout(&self) -> Duration {
        Duration::from_millis(self.detector_timeout_ms)
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn max_match_distance(&self) -> f64 {
        self.max_match_distance
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn line(&self) -> Option<CrossingLine> {
        self.line
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn medium_above(&self) -> f64 {
        self.medium_above
    }

    pub fn high_above(&self) -> f64 {
        self.high_above
    }

    pub fn very_high_above(&self) -> f64 {
        self.very_high_above
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn dwell_window(&self) -> usize {
        self.dwell_window
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn mqtt_username(&self) -> Option<&str> {
        self.mqtt_username.as_deref()
    }

    pub fn mqtt_password(&self) -> Option<&str> {
        self.mqtt_password.as_deref()
    }

    // MQTT Egress getters
    pub fn mqtt_egress_enabled(&self) -> bool {
        self.mqtt_egress_enabled
    }

    pub fn mqtt_egress_snapshots_topic(&self) -> &str {
        &self.mqtt_egress_snapshots_topic
    }

    pub fn mqtt_egress_crossings_topic(&self) -> &str {
        &self.mqtt_egress_crossings_topic
    }

    pub fn mqtt_egress_connection_topic(&self) -> &str {
        &self.mqtt_egress_connection_topic
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn prometheus_port(&self) -> u16 {
        self.prometheus_port
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method for tests to set the crossing line
    #[cfg(test)]
    pub fn with_line(mut self, line: Option<CrossingLine>) -> Self {
        self.line = line;
        self
    }

    /// Builder method for tests to set the capacity
    #[cfg(test)]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Builder method for tests to set the backoff range
    #[cfg(test)]
    pub fn with_backoff_ms(mut self, base_ms: u64, max_ms: u64) -> Self {
        self.base_delay_ms = base_ms;
        self.max_delay_ms = max_ms;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zone_config(name: &str, rect: Option<[f64; 4]>, polygon: Option<Vec<[f64; 2]>>) -> ZoneConfig {
        ZoneConfig { name: name.to_string(), rect, polygon }
    }

    fn with_zones(zones: Vec<ZoneConfig>) -> Config {
        Config { zones, ..Config::default() }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.frame_width(), 640);
        assert_eq!(config.frame_height(), 480);
        assert_eq!(config.max_match_distance(), 0.25);
        assert_eq!(config.ttl(), Duration::from_secs(10));
        assert_eq!(config.cooldown(), Duration::from_secs(3));
        assert_eq!(config.probe_interval(), Duration::from_secs(30));
        assert_eq!(config.base_delay(), Duration::from_secs(2));
        assert_eq!(config.max_delay(), Duration::from_secs(30));
        assert_eq!(config.max_attempts(), 10);
        assert_eq!(config.capacity(), 50);
        assert!(config.line().is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resolve_config_path_default() {
        if env::var("CONFIG_FILE").is_err() {
            assert_eq!(Config::resolve_config_path(None), "config/dev.toml");
        }
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/cafe.toml")), "config/cafe.toml");
    }

    #[test]
    fn test_degenerate_line_rejected() {
        let p = Point::new(10.0, 10.0);
        let config = Config::default()
            .with_line(Some(CrossingLine::new(p, p, EntryTransition::NegativeToPositive)));
        assert_eq!(config.validate(), Err(ConfigError::DegenerateLine));
    }

    #[test]
    fn test_zone_validation() {
        let zero_area = with_zones(vec![zone_config("a", Some([10.0, 10.0, 0.0, 20.0]), None)]);
        assert_eq!(zero_area.validate(), Err(ConfigError::ZeroAreaZone("a".to_string())));

        let outside = with_zones(vec![zone_config("b", Some([90.0, 0.0, 20.0, 20.0]), None)]);
        assert_eq!(outside.validate(), Err(ConfigError::ZoneOutOfFrame("b".to_string())));

        let both = with_zones(vec![zone_config(
            "c",
            Some([0.0, 0.0, 10.0, 10.0]),
            Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
        )]);
        assert_eq!(both.validate(), Err(ConfigError::ZoneShape("c".to_string())));

        let thin = with_zones(vec![zone_config("d", None, Some(vec![[0.0, 0.0], [5.0, 5.0]]))]);
        assert_eq!(
            thin.validate(),
            Err(ConfigError::PolygonTooFewPoints { zone: "d".to_string(), points: 2 })
        );

        let collinear = with_zones(vec![zone_config(
            "e",
            None,
            Some(vec![[0.0, 0.0], [5.0, 5.0], [10.0, 10.0]]),
        )]);
        assert_eq!(collinear.validate(), Err(ConfigError::ZeroAreaZone("e".to_string())));

        let dup = with_zones(vec![
            zone_config("f", Some([0.0, 0.0, 10.0, 10.0]), None),
            zone_config("f", Some([20.0, 0.0, 10.0, 10.0]), None),
        ]);
        assert_eq!(dup.validate(), Err(ConfigError::DuplicateZone("f".to_string())));
    }

    #[test]
    fn test_zones_keep_declaration_order() {
        let config = with_zones(vec![
            zone_config("window", Some([0.0, 0.0, 50.0, 100.0]), None),
            zone_config("counter", None, Some(vec![[50.0, 0.0], [100.0, 0.0], [100.0, 100.0]])),
        ]);
        let zones = config.zones().unwrap();
        assert_eq!(zones[0].name, "window");
        assert_eq!(zones[1].name, "counter");
    }

    #[test]
    fn test_capacity_and_thresholds() {
        assert_eq!(Config::default().with_capacity(0).validate(), Err(ConfigError::ZeroCapacity));

        let config = Config { high_above: 20.0, ..Config::default() };
        assert!(matches!(config.validate(), Err(ConfigError::DensityThresholds { .. })));
    }

    #[test]
    fn test_backoff_validation() {
        let config = Config::default().with_backoff_ms(40_000, 30_000);
        assert_eq!(
            config.validate(),
            Err(ConfigError::BackoffRange { base_ms: 40_000, max_ms: 30_000 })
        );

        let config = Config { max_attempts: 0, ..Config::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("supervisor.max_attempts")));
    }

    #[test]
    fn test_tracker_thresholds() {
        let config = Config { max_match_distance: 0.0, ..Config::default() };
        assert_eq!(config.validate(), Err(ConfigError::InvalidMatchDistance(0.0)));

        let config = Config { ttl_ms: 0, ..Config::default() };
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("tracker.ttl_ms")));
    }

    #[test]
    fn test_zero_metrics_interval_rejected() {
        let config = Config::from_toml_str("[metrics]\ninterval_secs = 0\n").unwrap();
        assert_eq!(config.validate(), Err(ConfigError::ZeroValue("metrics.interval_secs")));
    }

    #[test]
    fn test_line_requires_entry_transition() {
        let toml = r#"
[line]
x1 = 0.0
y1 = 120.0
x2 = 640.0
y2 = 120.0
"#;
        assert!(Config::from_toml_str(toml).is_err());
    }
}
