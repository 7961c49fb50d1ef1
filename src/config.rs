//! Harness configuration from environment variables and an optional TOML file.
//!
//! Values are layered: built-in defaults, then the config file, then
//! `MLOS_TEST_*` environment variables; CLI flags are applied last by the
//! caller. Invalid environment values fall back without failing.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `MLOS_TEST_CONFIG` | unset | Path of a TOML config file |
//! | `MLOS_TEST_AXON_VERSION` | v3.0.0 | Install tool release under test |
//! | `MLOS_TEST_CORE_VERSION` | v2.3.0-alpha | Core server release under test |
//! | `MLOS_TEST_OUTPUT_DIR` | e2e-results-{unix time} | Download and results directory |
//! | `MLOS_TEST_PORT` | 18080 | Core server HTTP port |
//! | `MLOS_TEST_CACHE_ROOT` | ~/.axon/cache/models | Model cache root |
//! | `MLOS_TEST_TOOL_PATH` | ~/.local/bin/axon | Install tool binary |
//! | `MLOS_TEST_ALL_MODELS` | false | Include vision and multimodal models |
//! | `MLOS_TEST_MINIMAL` | false | Single small model only |
//! | `MLOS_TEST_SKIP_INSTALL` | false | Reuse a previously fetched release |
//! | `MLOS_TEST_HEARTBEAT_SECS` | 3 | Install heartbeat period |
//! | `MLOS_TEST_HEALTH_ATTEMPTS` | 30 | Readiness poll attempts |
//! | `MLOS_TEST_HEALTH_INTERVAL_MS` | 500 | Delay between readiness attempts |
//! | `MLOS_TEST_GITHUB_REPO` | mlOS-foundation/core | Core release repository |
//! | `MLOS_TEST_STDERR_PATTERN` | unset | Regex replacing the default failure markers |
//! | `MLOS_TEST_PLATFORM` | detected | `{os}-{arch}` release platform |
//! | `MLOS_TEST_PREFLIGHT` | true | Docker checks before installs |
//! | `GITHUB_TOKEN` / `GH_TOKEN` | unset | Enables the release API download path |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::release::Platform;

pub const CONFIG_ENV: &str = "MLOS_TEST_CONFIG";

const DEFAULT_AXON_VERSION: &str = "v3.0.0";
const DEFAULT_CORE_VERSION: &str = "v2.3.0-alpha";
const DEFAULT_PORT: u16 = 18080;
const DEFAULT_REPO: &str = "mlOS-foundation/core";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Home directory could not be determined")]
    NoHome,
}

/// Keys accepted in the TOML file. Everything is optional.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub axon_version: Option<String>,
    pub core_version: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub port: Option<u16>,
    pub cache_root: Option<PathBuf>,
    pub tool_path: Option<PathBuf>,
    pub test_all_models: Option<bool>,
    pub minimal: Option<bool>,
    pub skip_install: Option<bool>,
    pub heartbeat_secs: Option<u64>,
    pub health_attempts: Option<u32>,
    pub health_interval_ms: Option<u64>,
    pub resource_window_ms: Option<u64>,
    pub github_repo: Option<String>,
    pub github_token: Option<String>,
    pub stderr_pattern: Option<String>,
    pub platform: Option<String>,
    pub preflight: Option<bool>,
}

impl FileConfig {
    pub fn from_toml(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }
}

/// Fully resolved harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub axon_version: String,
    pub core_version: String,
    pub output_dir: PathBuf,
    pub port: u16,
    pub home_dir: PathBuf,
    pub cache_root: PathBuf,
    pub tool_path: PathBuf,
    pub test_all_models: bool,
    pub minimal: bool,
    pub skip_install: bool,
    pub heartbeat: Duration,
    pub health_attempts: u32,
    pub health_interval: Duration,
    /// Span over which server CPU and memory are averaged, idle and under load.
    pub resource_window: Duration,
    pub github_repo: String,
    pub github_token: Option<String>,
    pub stderr_pattern: Option<String>,
    pub platform: Platform,
    pub preflight: bool,
    /// Config file the values were read from, if any.
    pub source_file: Option<PathBuf>,
}

impl HarnessConfig {
    /// Built-in defaults rooted at `home`.
    pub fn defaults(home: &Path) -> Self {
        Self {
            axon_version: DEFAULT_AXON_VERSION.to_string(),
            core_version: DEFAULT_CORE_VERSION.to_string(),
            output_dir: default_output_dir(),
            port: DEFAULT_PORT,
            home_dir: home.to_path_buf(),
            cache_root: home.join(".axon").join("cache").join("models"),
            tool_path: home.join(".local").join("bin").join("axon"),
            test_all_models: false,
            minimal: false,
            skip_install: false,
            heartbeat: Duration::from_secs(3),
            health_attempts: 30,
            health_interval: Duration::from_millis(500),
            resource_window: Duration::from_secs(5),
            github_repo: DEFAULT_REPO.to_string(),
            github_token: None,
            stderr_pattern: None,
            platform: Platform::current(),
            preflight: true,
            source_file: None,
        }
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(v) = file.axon_version {
            self.axon_version = v;
        }
        if let Some(v) = file.core_version {
            self.core_version = v;
        }
        if let Some(v) = file.output_dir {
            self.output_dir = v;
        }
        if let Some(v) = file.port {
            self.port = v;
        }
        if let Some(v) = file.cache_root {
            self.cache_root = v;
        }
        if let Some(v) = file.tool_path {
            self.tool_path = v;
        }
        if let Some(v) = file.test_all_models {
            self.test_all_models = v;
        }
        if let Some(v) = file.minimal {
            self.minimal = v;
        }
        if let Some(v) = file.skip_install {
            self.skip_install = v;
        }
        if let Some(v) = file.heartbeat_secs {
            self.heartbeat = Duration::from_secs(v.max(1));
        }
        if let Some(v) = file.health_attempts {
            self.health_attempts = v.max(1);
        }
        if let Some(v) = file.health_interval_ms {
            self.health_interval = Duration::from_millis(v.max(10));
        }
        if let Some(v) = file.resource_window_ms {
            self.resource_window = Duration::from_millis(v.min(60_000));
        }
        if let Some(v) = file.github_repo {
            self.github_repo = v;
        }
        if let Some(v) = file.github_token {
            self.github_token = Some(v);
        }
        if let Some(v) = file.stderr_pattern {
            self.stderr_pattern = Some(v);
        }
        if let Some(p) = file.platform.as_deref().and_then(Platform::parse) {
            self.platform = p;
        }
        if let Some(v) = file.preflight {
            self.preflight = v;
        }
    }

    fn apply_env(&mut self) {
        if let Some(v) = parse_string("MLOS_TEST_AXON_VERSION") {
            self.axon_version = v;
        }
        if let Some(v) = parse_string("MLOS_TEST_CORE_VERSION") {
            self.core_version = v;
        }
        if let Some(v) = parse_string("MLOS_TEST_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        self.port = parse_u16("MLOS_TEST_PORT", self.port).max(1);
        if let Some(v) = parse_string("MLOS_TEST_CACHE_ROOT") {
            self.cache_root = PathBuf::from(v);
        }
        if let Some(v) = parse_string("MLOS_TEST_TOOL_PATH") {
            self.tool_path = PathBuf::from(v);
        }
        self.test_all_models = parse_bool("MLOS_TEST_ALL_MODELS", self.test_all_models);
        self.minimal = parse_bool("MLOS_TEST_MINIMAL", self.minimal);
        self.skip_install = parse_bool("MLOS_TEST_SKIP_INSTALL", self.skip_install);

        let heartbeat = parse_u64("MLOS_TEST_HEARTBEAT_SECS", self.heartbeat.as_secs());
        self.heartbeat = Duration::from_secs(heartbeat.clamp(1, 300));
        self.health_attempts = parse_u32("MLOS_TEST_HEALTH_ATTEMPTS", self.health_attempts).clamp(1, 10_000);
        let interval = parse_u64("MLOS_TEST_HEALTH_INTERVAL_MS", self.health_interval.as_millis() as u64);
        self.health_interval = Duration::from_millis(interval.clamp(10, 60_000));
        let window = parse_u64("MLOS_TEST_RESOURCE_WINDOW_MS", self.resource_window.as_millis() as u64);
        self.resource_window = Duration::from_millis(window.min(60_000));

        if let Some(v) = parse_string("MLOS_TEST_GITHUB_REPO") {
            self.github_repo = v;
        }
        if let Some(v) = parse_string("GITHUB_TOKEN").or_else(|| parse_string("GH_TOKEN")) {
            self.github_token = Some(v);
        }
        if let Some(v) = parse_string("MLOS_TEST_STDERR_PATTERN") {
            self.stderr_pattern = Some(v);
        }
        if let Some(p) = parse_string("MLOS_TEST_PLATFORM").as_deref().and_then(Platform::parse) {
            self.platform = p;
        }
        self.preflight = parse_bool("MLOS_TEST_PREFLIGHT", self.preflight);
    }

    /// Checks that cannot be expressed as fallbacks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.axon_version.trim().is_empty() {
            return Err(ConfigError::Invalid("axon version is required".into()));
        }
        if self.core_version.trim().is_empty() {
            return Err(ConfigError::Invalid("core version is required".into()));
        }
        if !self.github_repo.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "github repo must be owner/name, got '{}'",
                self.github_repo
            )));
        }
        if self.minimal && self.test_all_models {
            return Err(ConfigError::Invalid("minimal and all-models are mutually exclusive".into()));
        }
        if let Some(pattern) = &self.stderr_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| ConfigError::Invalid(format!("stderr pattern: {}", e)))?;
        }
        Ok(())
    }

    pub fn results_path(&self) -> PathBuf {
        self.output_dir.join(crate::results::RESULTS_FILE)
    }

    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        EffectiveConfig {
            axon_version: self.axon_version.clone(),
            core_version: self.core_version.clone(),
            output_dir: self.output_dir.display().to_string(),
            port: self.port,
            cache_root: self.cache_root.display().to_string(),
            tool_path: self.tool_path.display().to_string(),
            test_all_models: self.test_all_models,
            minimal: self.minimal,
            skip_install: self.skip_install,
            heartbeat_secs: self.heartbeat.as_secs(),
            health_attempts: self.health_attempts,
            health_interval_ms: self.health_interval.as_millis() as u64,
            resource_window_ms: self.resource_window.as_millis() as u64,
            github_repo: self.github_repo.clone(),
            github_token_set: self.github_token.is_some(),
            stderr_pattern: self.stderr_pattern.clone(),
            platform: self.platform.to_string(),
            preflight: self.preflight,
            source_file: self.source_file.as_ref().map(|p| p.display().to_string()),
        }
    }
}

/// Effective configuration summary (serializable). The token is never shown.
#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub axon_version: String,
    pub core_version: String,
    pub output_dir: String,
    pub port: u16,
    pub cache_root: String,
    pub tool_path: String,
    pub test_all_models: bool,
    pub minimal: bool,
    pub skip_install: bool,
    pub heartbeat_secs: u64,
    pub health_attempts: u32,
    pub health_interval_ms: u64,
    pub resource_window_ms: u64,
    pub github_repo: String,
    pub github_token_set: bool,
    pub stderr_pattern: Option<String>,
    pub platform: String,
    pub preflight: bool,
    pub source_file: Option<String>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(format!("e2e-results-{}", chrono::Utc::now().timestamp()))
}

/// The user's home directory.
pub fn home_dir() -> Result<PathBuf, ConfigError> {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHome)
}

/// Non-empty env var value.
fn parse_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean env var (`1/true/yes/on`, `0/false/no/off`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).map(|v| v.trim().to_ascii_lowercase()) {
        Ok(v) if matches!(v.as_str(), "1" | "true" | "yes" | "on") => true,
        Ok(v) if matches!(v.as_str(), "0" | "false" | "no" | "off") => false,
        _ => default,
    }
}

/// Parse a `u16` env var, returning `default` on missing or invalid.
fn parse_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u16>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u32` env var, returning `default` on missing or invalid.
fn parse_u32(key: &str, default: u32) -> u32 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u32>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `u64` env var, returning `default` on missing or invalid.
fn parse_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(val) => val.parse::<u64>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Load configuration rooted at `home`, reading `file` when given or the
/// file named by `MLOS_TEST_CONFIG` otherwise.
pub fn load_from(home: &Path, file: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    let mut config = HarnessConfig::defaults(home);
    let file = file
        .map(Path::to_path_buf)
        .or_else(|| parse_string(CONFIG_ENV).map(PathBuf::from));
    if let Some(path) = file {
        config.apply_file(FileConfig::read(&path)?);
        config.source_file = Some(path);
    }
    config.apply_env();
    Ok(config)
}

/// Load configuration for the current user.
pub fn load(file: Option<&Path>) -> Result<HarnessConfig, ConfigError> {
    load_from(&home_dir()?, file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Serialize env-mutating tests to avoid cross-test pollution.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: &[&str] = &[
        CONFIG_ENV,
        "MLOS_TEST_AXON_VERSION",
        "MLOS_TEST_CORE_VERSION",
        "MLOS_TEST_OUTPUT_DIR",
        "MLOS_TEST_PORT",
        "MLOS_TEST_CACHE_ROOT",
        "MLOS_TEST_TOOL_PATH",
        "MLOS_TEST_ALL_MODELS",
        "MLOS_TEST_MINIMAL",
        "MLOS_TEST_SKIP_INSTALL",
        "MLOS_TEST_HEARTBEAT_SECS",
        "MLOS_TEST_HEALTH_ATTEMPTS",
        "MLOS_TEST_HEALTH_INTERVAL_MS",
        "MLOS_TEST_RESOURCE_WINDOW_MS",
        "MLOS_TEST_GITHUB_REPO",
        "MLOS_TEST_STDERR_PATTERN",
        "MLOS_TEST_PLATFORM",
        "MLOS_TEST_PREFLIGHT",
        "GITHUB_TOKEN",
        "GH_TOKEN",
    ];

    fn clear_env_vars() {
        for k in ENV_KEYS {
            std::env::remove_var(k);
        }
    }

    #[test]
    fn test_defaults_are_sensible() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let cfg = load_from(Path::new("/home/ci"), None).unwrap();
        assert_eq!(cfg.port, 18080);
        assert_eq!(cfg.cache_root, PathBuf::from("/home/ci/.axon/cache/models"));
        assert_eq!(cfg.tool_path, PathBuf::from("/home/ci/.local/bin/axon"));
        assert_eq!(cfg.heartbeat, Duration::from_secs(3));
        assert_eq!(cfg.health_attempts, 30);
        assert_eq!(cfg.health_interval, Duration::from_millis(500));
        assert_eq!(cfg.resource_window, Duration::from_secs(5));
        assert!(cfg.output_dir.to_string_lossy().starts_with("e2e-results-"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_env_vars_override_defaults() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MLOS_TEST_PORT", "19090");
        std::env::set_var("MLOS_TEST_ALL_MODELS", "yes");
        std::env::set_var("MLOS_TEST_PLATFORM", "darwin-arm64");
        std::env::set_var("GH_TOKEN", "ghp_x");
        let cfg = load_from(Path::new("/home/ci"), None).unwrap();
        assert_eq!(cfg.port, 19090);
        assert!(cfg.test_all_models);
        assert_eq!(cfg.platform, Platform::new("darwin", "arm64"));
        assert_eq!(cfg.github_token.as_deref(), Some("ghp_x"));
        clear_env_vars();
    }

    #[test]
    fn test_invalid_env_falls_back_to_default() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MLOS_TEST_PORT", "not_a_port");
        std::env::set_var("MLOS_TEST_HEALTH_ATTEMPTS", "abc");
        std::env::set_var("MLOS_TEST_MINIMAL", "maybe");
        let cfg = load_from(Path::new("/home/ci"), None).unwrap();
        assert_eq!(cfg.port, 18080);
        assert_eq!(cfg.health_attempts, 30);
        assert!(!cfg.minimal);
        clear_env_vars();
    }

    #[test]
    fn test_values_are_clamped() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        std::env::set_var("MLOS_TEST_HEARTBEAT_SECS", "0");
        std::env::set_var("MLOS_TEST_HEALTH_INTERVAL_MS", "999999999");
        std::env::set_var("MLOS_TEST_RESOURCE_WINDOW_MS", "999999999");
        let cfg = load_from(Path::new("/home/ci"), None).unwrap();
        assert_eq!(cfg.heartbeat, Duration::from_secs(1));
        assert_eq!(cfg.health_interval, Duration::from_millis(60_000));
        assert_eq!(cfg.resource_window, Duration::from_millis(60_000));
        clear_env_vars();
    }

    #[test]
    fn test_file_then_env_precedence() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env_vars();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("harness.toml");
        std::fs::write(
            &path,
            "core_version = \"v9.0.0\"\nport = 20000\nminimal = true\nstderr_pattern = \"(?i)fatal\"\n",
        )
        .unwrap();
        std::env::set_var("MLOS_TEST_PORT", "20001");

        let cfg = load_from(Path::new("/home/ci"), Some(&path)).unwrap();
        assert_eq!(cfg.core_version, "v9.0.0");
        assert_eq!(cfg.port, 20001);
        assert!(cfg.minimal);
        assert_eq!(cfg.stderr_pattern.as_deref(), Some("(?i)fatal"));
        assert_eq!(cfg.source_file.as_deref(), Some(path.as_path()));
        clear_env_vars();
    }

    #[test]
    fn test_unknown_file_key_is_rejected() {
        let err = FileConfig::from_toml("prot = 1\n", Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_combinations() {
        let mut cfg = HarnessConfig::defaults(Path::new("/home/ci"));
        cfg.minimal = true;
        cfg.test_all_models = true;
        assert!(cfg.validate().is_err());

        let mut cfg = HarnessConfig::defaults(Path::new("/home/ci"));
        cfg.stderr_pattern = Some("(".into());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_effective_config_hides_token() {
        let mut cfg = HarnessConfig::defaults(Path::new("/home/ci"));
        cfg.github_token = Some("secret".into());
        let eff = cfg.effective_config();
        assert!(eff.github_token_set);
        let json = serde_json::to_string(&eff).unwrap();
        assert!(!json.contains("secret"));
    }
}
