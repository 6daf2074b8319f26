use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `MOODLENS_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path; `None` picks the first user-facing capture device.
    pub camera_device: Option<String>,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub face_model: String,
    pub hand_model: String,
    /// Per-model load timeout.
    pub model_load_timeout_secs: u64,
    /// Detection tick period.
    pub tick_interval_ms: u64,
    /// Path to the SQLite mood store.
    pub db_path: PathBuf,
}

/// Optional keys accepted in `config.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    camera_device: Option<String>,
    capture_width: Option<u32>,
    capture_height: Option<u32>,
    model_dir: Option<PathBuf>,
    face_model: Option<String>,
    hand_model: Option<String>,
    model_load_timeout_secs: Option<u64>,
    tick_interval_ms: Option<u64>,
    db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: None,
            capture_width: 640,
            capture_height: 480,
            model_dir: moodlens_core::default_model_dir(),
            face_model: "face_landmark.onnx".to_string(),
            hand_model: "hand_landmark.onnx".to_string(),
            model_load_timeout_secs: 10,
            tick_interval_ms: 50,
            db_path: data_dir().join("moods.db"),
        }
    }
}

impl Config {
    /// Load the config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let path = std::env::var("MOODLENS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"));
        if path.exists() {
            config.apply_file(&path)?;
            tracing::info!(path = %path.display(), "loaded config file");
        }
        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file = Self::parse_file(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        self.merge(file);
        Ok(())
    }

    fn parse_file(text: &str) -> Result<ConfigFile, toml::de::Error> {
        toml::from_str(text)
    }

    fn merge(&mut self, file: ConfigFile) {
        if file.camera_device.is_some() {
            self.camera_device = file.camera_device;
        }
        self.capture_width = file.capture_width.unwrap_or(self.capture_width);
        self.capture_height = file.capture_height.unwrap_or(self.capture_height);
        self.model_dir = file.model_dir.unwrap_or_else(|| self.model_dir.clone());
        self.face_model = file.face_model.unwrap_or_else(|| self.face_model.clone());
        self.hand_model = file.hand_model.unwrap_or_else(|| self.hand_model.clone());
        self.model_load_timeout_secs = file
            .model_load_timeout_secs
            .unwrap_or(self.model_load_timeout_secs);
        self.tick_interval_ms = file.tick_interval_ms.unwrap_or(self.tick_interval_ms);
        self.db_path = file.db_path.unwrap_or_else(|| self.db_path.clone());
    }

    fn apply_env(&mut self) {
        if let Ok(device) = std::env::var("MOODLENS_CAMERA_DEVICE") {
            self.camera_device = Some(device);
        }
        if let Ok(dir) = std::env::var("MOODLENS_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("MOODLENS_DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        self.capture_width = env_u32("MOODLENS_CAPTURE_WIDTH", self.capture_width);
        self.capture_height = env_u32("MOODLENS_CAPTURE_HEIGHT", self.capture_height);
        self.model_load_timeout_secs =
            env_u64("MOODLENS_MODEL_LOAD_TIMEOUT_SECS", self.model_load_timeout_secs);
        self.tick_interval_ms = env_u64("MOODLENS_TICK_INTERVAL_MS", self.tick_interval_ms);
    }

    /// Path to the face landmark model.
    pub fn face_model_path(&self) -> String {
        self.model_dir
            .join(&self.face_model)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the hand landmark model.
    pub fn hand_model_path(&self) -> String {
        self.model_dir
            .join(&self.hand_model)
            .to_string_lossy()
            .into_owned()
    }

    pub fn model_load_timeout(&self) -> Duration {
        Duration::from_secs(self.model_load_timeout_secs)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn capture_constraints(&self) -> moodlens_hw::CaptureConstraints {
        moodlens_hw::CaptureConstraints {
            device: self.camera_device.clone(),
            ideal_width: self.capture_width,
            ideal_height: self.capture_height,
            facing: moodlens_hw::FacingMode::User,
        }
    }
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    std::env::var(var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(home).join(fallback)
    })
}

fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share").join("moodlens")
}

fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("moodlens")
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.model_load_timeout(), Duration::from_secs(10));
        assert_eq!(c.tick_interval(), Duration::from_millis(50));
        let constraints = c.capture_constraints();
        assert_eq!((constraints.ideal_width, constraints.ideal_height), (640, 480));
        assert!(c.face_model_path().ends_with("face_landmark.onnx"));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = Config::parse_file(
            r#"
            camera_device = "/dev/video4"
            tick_interval_ms = 100
            hand_model = "hands.onnx"
            "#,
        )
        .unwrap();
        let mut c = Config::default();
        c.merge(file);
        assert_eq!(c.camera_device.as_deref(), Some("/dev/video4"));
        assert_eq!(c.tick_interval(), Duration::from_millis(100));
        assert!(c.hand_model_path().ends_with("hands.onnx"));
        assert_eq!(c.capture_width, 640);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Config::parse_file("tick_interval = 5").is_err());
    }

    #[test]
    fn test_zero_interval_clamped() {
        let c = Config {
            tick_interval_ms: 0,
            ..Config::default()
        };
        assert_eq!(c.tick_interval(), Duration::from_millis(1));
    }
}
