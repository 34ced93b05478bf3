//! Application configuration management.
//!
//! Settings are layered with figment, lowest priority first:
//! 1. Built-in defaults
//! 2. The TOML configuration file (platform config dir, or `--config PATH`)
//! 3. The selected `[profile.NAME]` table of that file
//! 4. `CODESCAN_*` environment variables
//! 5. CLI flags, applied by [`Config::merge_scan_args`]
//!
//! Unknown keys are reported with a "did you mean" suggestion. A file that
//! cannot be read into [`Config`] is reported and replaced by the defaults.

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{OutputFormat, ScanArgs};
use crate::scanner::frames::DEFAULT_FRAME_INTERVAL;
use crate::scanner::{ScanMode, SessionConfig, Symbology, Toggle, DEFAULT_SCAN_INTERVAL};

/// Prefix of environment variables read into the configuration.
pub const ENV_PREFIX: &str = "CODESCAN_";

/// Keys accepted at the top level of the file and in profile tables.
const KNOWN_KEYS: [&str; 8] = [
    "mode",
    "scan_interval",
    "symbologies",
    "show_viewfinder",
    "front_camera",
    "simulated_data",
    "output",
    "frame_interval_ms",
];

/// Errors from reading or writing the configuration file.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// The platform configuration directory could not be determined.
    #[error("Failed to determine the configuration directory")]
    NoConfigDir,

    /// The layered configuration could not be extracted.
    #[error("Invalid configuration: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// The configuration could not be serialized.
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The configuration file could not be written.
    #[error("Failed to write {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),
}

/// Overrides carried by a `[profile.NAME]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<ScanMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_interval: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbologies: Option<Vec<Symbology>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_viewfinder: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub front_camera: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulated_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frame_interval_ms: Option<u64>,
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Delivery mode.
    pub mode: ScanMode,
    /// Seconds between continuous deliveries. Finite and non-negative.
    pub scan_interval: f64,
    /// Symbologies to recognize.
    pub symbologies: Vec<Symbology>,
    /// Draw the viewfinder overlay.
    pub show_viewfinder: bool,
    /// Start on the front camera.
    pub front_camera: bool,
    /// Payload the fallback pipeline delivers on a tap.
    pub simulated_data: String,
    /// Output format for delivered results.
    pub output: OutputFormat,
    /// Milliseconds between replayed frames.
    pub frame_interval_ms: u64,
    /// Named profiles.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub profile: BTreeMap<String, ProfileConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: ScanMode::default(),
            scan_interval: DEFAULT_SCAN_INTERVAL.as_secs_f64(),
            symbologies: vec![Symbology::Qr],
            show_viewfinder: false,
            front_camera: false,
            simulated_data: String::new(),
            output: OutputFormat::default(),
            frame_interval_ms: DEFAULT_FRAME_INTERVAL.as_millis() as u64,
            profile: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load from the platform configuration file, falling back to defaults.
    #[must_use]
    pub fn load(profile: Option<&str>) -> Self {
        match Self::default_path() {
            Ok(path) => Self::load_from_path(path, profile),
            Err(e) => {
                log::debug!("{}, using defaults", e);
                Self::extract(Self::figment(None), profile).unwrap_or_else(|e| {
                    log::warn!("{}; using defaults", e);
                    Self::default()
                })
            }
        }
    }

    /// Load from `path`, falling back to defaults on any error.
    ///
    /// A missing file is not an error.
    #[must_use]
    pub fn load_from_path(path: impl AsRef<Path>, profile: Option<&str>) -> Self {
        let path = path.as_ref();
        match Self::try_load_from_path(path, profile) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("{} in {}; using defaults", e, path.display());
                Self::default()
            }
        }
    }

    /// Load from `path`, reporting values that do not fit [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Figment`] for unparsable TOML or mistyped values.
    pub fn try_load_from_path(path: &Path, profile: Option<&str>) -> Result<Self, ConfigError> {
        if path.exists() {
            warn_unknown_keys(path);
            Self::extract(Self::figment(Some(path)), profile)
        } else {
            log::debug!("No configuration file at {}", path.display());
            Self::extract(Self::figment(None), profile)
        }
    }

    /// Default platform-specific configuration path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoConfigDir`] when the home directory is unknown.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dirs =
            ProjectDirs::from("org", "codescan", "codescan").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    fn figment(path: Option<&Path>) -> Figment {
        let figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => figment.merge(Toml::file(path)),
            None => figment,
        }
    }

    fn extract(base: Figment, profile: Option<&str>) -> Result<Self, ConfigError> {
        let mut figment = base.clone();
        if let Some(name) = profile {
            match base.find_value(&format!("profile.{name}")) {
                Ok(table) => {
                    log::debug!("Using configuration profile '{}'", name);
                    figment = figment.merge(Serialized::defaults(table));
                }
                Err(_) => log::warn!("Profile '{}' not found in configuration", name),
            }
        }

        let mut config: Config = figment.merge(Env::prefixed(ENV_PREFIX)).extract()?;
        config.validate();
        Ok(config)
    }

    fn validate(&mut self) {
        if !self.scan_interval.is_finite() || self.scan_interval < 0.0 {
            log::warn!(
                "scan_interval must be a non-negative number of seconds, got {}; using {}",
                self.scan_interval,
                DEFAULT_SCAN_INTERVAL.as_secs_f64()
            );
            self.scan_interval = DEFAULT_SCAN_INTERVAL.as_secs_f64();
        }
        if self.symbologies.is_empty() {
            log::warn!("No symbologies configured, nothing can be recognized");
        }
    }

    /// Apply flags from `codescan scan`.
    pub fn merge_scan_args(&mut self, args: &ScanArgs) {
        if let Some(mode) = args.mode {
            self.mode = mode;
        }
        if let Some(interval) = args.interval {
            self.scan_interval = interval.as_secs_f64();
        }
        if !args.symbologies.is_empty() {
            self.symbologies = args.symbologies.clone();
        }
        if args.front {
            self.front_camera = true;
        } else if args.back {
            self.front_camera = false;
        }
        if args.viewfinder {
            self.show_viewfinder = true;
        } else if args.no_viewfinder {
            self.show_viewfinder = false;
        }
        if let Some(data) = &args.simulate {
            self.simulated_data = data.clone();
        }
        if let Some(output) = args.output {
            self.output = output;
        }
        if let Some(interval) = args.frame_interval {
            self.frame_interval_ms = interval.as_millis() as u64;
        }
    }

    /// Continuous-mode interval as a [`Duration`].
    #[must_use]
    pub fn scan_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.scan_interval).unwrap_or(DEFAULT_SCAN_INTERVAL)
    }

    /// Spacing between replayed frames.
    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    /// Build the session configuration, binding the given toggles.
    #[must_use]
    pub fn session_config(&self, paused: Toggle, front_camera: Toggle) -> SessionConfig {
        front_camera.set(self.front_camera);
        SessionConfig::new(self.mode)
            .with_symbologies(self.symbologies.iter().copied())
            .with_scan_interval(self.scan_interval())
            .with_viewfinder(self.show_viewfinder)
            .with_pause_toggle(paused)
            .with_camera_toggle(front_camera)
    }

    /// Serialize to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if a value has no TOML representation.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write this configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_to_path(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| ConfigError::Io(parent.to_path_buf(), e))?;
        }
        fs::write(path, self.to_toml()?).map_err(|e| ConfigError::Io(path.to_path_buf(), e))
    }
}

/// The closest known key to `key`, if any is close enough to suggest.
#[must_use]
pub fn suggest_key(key: &str) -> Option<&'static str> {
    KNOWN_KEYS
        .iter()
        .map(|known| (*known, strsim::jaro_winkler(key, known)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(known, _)| known)
}

fn warn_unknown_key(key: &str, table: &str) {
    match suggest_key(key) {
        Some(suggestion) => log::warn!(
            "Unknown configuration key '{}'{}; did you mean '{}'?",
            key,
            table,
            suggestion
        ),
        None => log::warn!("Unknown configuration key '{}'{}", key, table),
    }
}

fn warn_unknown_keys(path: &Path) {
    let Ok(content) = fs::read_to_string(path) else {
        return;
    };
    // Syntax errors surface when figment extracts the file.
    let Ok(table) = content.parse::<toml::Table>() else {
        return;
    };

    for (key, value) in &table {
        if key == "profile" {
            let Some(profiles) = value.as_table() else {
                continue;
            };
            for (name, profile) in profiles {
                let Some(profile) = profile.as_table() else {
                    continue;
                };
                for key in profile.keys().filter(|k| !KNOWN_KEYS.contains(&k.as_str())) {
                    warn_unknown_key(key, &format!(" in profile '{name}'"));
                }
            }
        } else if !KNOWN_KEYS.contains(&key.as_str()) {
            warn_unknown_key(key, "");
        }
    }
}

impl From<figment::Error> for ConfigError {
    fn from(e: figment::Error) -> Self {
        Self::Figment(Box::new(e))
    }
}
