//! Node configuration – reads/writes `~/.strata/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use strata_fusion::GridFusionConfig;
use strata_middleware::{NodeConfig, TopicNames};
use strata_types::StrataError;

/// Startup configuration. Immutable once the node is running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Fuse `/static_map_slice2` into `/static_map_slice`.
    #[serde(default)]
    pub enable_grid_fusion: bool,

    /// Fuse `/static_esdf_pointcloud2` into `/static_esdf_pointcloud`.
    #[serde(default)]
    pub enable_point_fusion: bool,

    /// Reflect and squash below-ground distances instead of denoising.
    #[serde(default)]
    pub invert_below_ground: bool,

    /// Above-ground distances at or above this level are clamped when not
    /// inverting.
    #[serde(default = "default_denoise_level")]
    pub above_ground_denoise_level: f32,

    /// rosbridge WebSocket listen address.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Per-topic event bus buffer.
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// ROS topic names.
    #[serde(default)]
    pub topics: TopicNames,
}

fn default_denoise_level() -> f32 {
    0.5
}
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9090))
}
fn default_bus_capacity() -> usize {
    strata_middleware::bus::DEFAULT_CAPACITY
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enable_grid_fusion: false,
            enable_point_fusion: false,
            invert_below_ground: false,
            above_ground_denoise_level: default_denoise_level(),
            listen_addr: default_listen_addr(),
            bus_capacity: default_bus_capacity(),
            topics: TopicNames::default(),
        }
    }
}

impl Config {
    /// Reject values the node cannot start with.
    pub fn validate(&self) -> Result<(), StrataError> {
        if self.bus_capacity == 0 {
            return Err(StrataError::Config("bus_capacity must be at least 1".to_string()));
        }
        if self.above_ground_denoise_level.is_nan() {
            return Err(StrataError::Config(
                "above_ground_denoise_level must be a number".to_string(),
            ));
        }
        Ok(())
    }

    /// Stage selection handed to the combine node.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            enable_grid_fusion: self.enable_grid_fusion,
            enable_point_fusion: self.enable_point_fusion,
            grid: GridFusionConfig {
                invert_below_ground: self.invert_below_ground,
                above_ground_denoise_level: self.above_ground_denoise_level,
            },
        }
    }

    /// Effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, StrataError> {
        toml::to_string_pretty(self)
            .map_err(|e| StrataError::Serialization(format!("Failed to serialize config: {e}")))
    }
}

/// Return the path to `~/.strata/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".strata").join("config.toml")
}

/// Load the config from `path` (or the default location), falling back to
/// defaults when the file is absent. Environment overrides are applied either
/// way.
pub fn load(path: Option<&Path>) -> Result<Config, StrataError> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);
    let mut cfg = load_from(&path)?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Load the config from a specific path. Returns `None` if the file does not
/// exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, StrataError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| StrataError::Io(format!("Failed to read config at {}: {e}", path.display())))?;
    let cfg: Config = toml::from_str(&raw)
        .map_err(|e| StrataError::Config(format!("Failed to parse {}: {e}", path.display())))?;
    Ok(Some(cfg))
}

/// Apply `STRATA_*` environment variable overrides to `cfg`.
///
/// Unparseable values are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `STRATA_ENABLE_GRID_FUSION` | `enable_grid_fusion` |
/// | `STRATA_ENABLE_POINT_FUSION` | `enable_point_fusion` |
/// | `STRATA_INVERT_BELOW_GROUND` | `invert_below_ground` |
/// | `STRATA_DENOISE_LEVEL` | `above_ground_denoise_level` |
/// | `STRATA_LISTEN_ADDR` | `listen_addr` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Some(v) = env_flag("STRATA_ENABLE_GRID_FUSION") {
        cfg.enable_grid_fusion = v;
    }
    if let Some(v) = env_flag("STRATA_ENABLE_POINT_FUSION") {
        cfg.enable_point_fusion = v;
    }
    if let Some(v) = env_flag("STRATA_INVERT_BELOW_GROUND") {
        cfg.invert_below_ground = v;
    }
    if let Ok(v) = std::env::var("STRATA_DENOISE_LEVEL")
        && let Ok(level) = v.parse::<f32>()
    {
        cfg.above_ground_denoise_level = level;
    }
    if let Ok(v) = std::env::var("STRATA_LISTEN_ADDR")
        && let Ok(addr) = v.parse::<SocketAddr>()
    {
        cfg.listen_addr = addr;
    }
}

fn env_flag(name: &str) -> Option<bool> {
    parse_flag(&std::env::var(name).ok()?)
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Save the config to a specific path, creating parent directories.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), StrataError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| StrataError::Io(format!("Failed to create config directory: {e}")))?;
    }
    fs::write(path, cfg.to_toml()?)
        .map_err(|e| StrataError::Io(format!("Failed to write config at {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert!(!cfg.enable_grid_fusion);
        assert!(!cfg.enable_point_fusion);
        assert!(!cfg.invert_below_ground);
        assert_eq!(cfg.above_ground_denoise_level, 0.5);
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:9090");
        assert_eq!(cfg.bus_capacity, 256);
        assert_eq!(cfg.topics.combined_slice, "/nvblox_node/combined_esdf");
    }

    #[test]
    fn roundtrip_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let cfg = Config {
            enable_grid_fusion: true,
            invert_below_ground: true,
            above_ground_denoise_level: 0.75,
            ..Config::default()
        };
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("strata.toml");
        std::fs::write(
            &path,
            "enable_point_fusion = true\n\n[topics]\nbelow_cloud = \"/lower/cloud\"\n",
        )
        .expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert!(loaded.enable_point_fusion);
        assert!(!loaded.enable_grid_fusion);
        assert_eq!(loaded.above_ground_denoise_level, 0.5);
        assert_eq!(loaded.topics.below_cloud, "/lower/cloud");
        assert_eq!(loaded.topics.above_cloud, "/nvblox_node/static_esdf_pointcloud");
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "enable_grid_fusion = \"sometimes\"").expect("write");
        assert!(matches!(load_from(&path), Err(StrataError::Config(_))));
    }

    #[test]
    fn config_path_points_to_strata_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".strata"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        let result = load_from(&path).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn validate_rejects_zero_capacity_and_nan_level() {
        let zero = Config {
            bus_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(zero.validate(), Err(StrataError::Config(_))));

        let nan = Config {
            above_ground_denoise_level: f32::NAN,
            ..Config::default()
        };
        assert!(matches!(nan.validate(), Err(StrataError::Config(_))));
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn node_config_carries_grid_policy() {
        let cfg = Config {
            enable_grid_fusion: true,
            invert_below_ground: true,
            above_ground_denoise_level: 1.25,
            ..Config::default()
        };
        let node = cfg.node_config();
        assert!(node.enable_grid_fusion);
        assert!(!node.enable_point_fusion);
        assert!(node.grid.invert_below_ground);
        assert_eq!(node.grid.above_ground_denoise_level, 1.25);
    }

    #[test]
    fn parse_flag_accepts_common_spellings() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn apply_env_overrides_enables_grid_fusion() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("STRATA_ENABLE_GRID_FUSION", "true") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(cfg.enable_grid_fusion);
        unsafe { std::env::remove_var("STRATA_ENABLE_GRID_FUSION") };
    }

    #[test]
    fn apply_env_overrides_changes_denoise_level() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("STRATA_DENOISE_LEVEL", "1.5") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.above_ground_denoise_level, 1.5);
        unsafe { std::env::remove_var("STRATA_DENOISE_LEVEL") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_listen_addr() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("STRATA_LISTEN_ADDR", "not-an-addr") };
        let mut cfg = Config::default();
        let original = cfg.listen_addr;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.listen_addr, original);
        unsafe { std::env::remove_var("STRATA_LISTEN_ADDR") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_flag() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("STRATA_INVERT_BELOW_GROUND", "sometimes") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert!(!cfg.invert_below_ground);
        unsafe { std::env::remove_var("STRATA_INVERT_BELOW_GROUND") };
    }
}
