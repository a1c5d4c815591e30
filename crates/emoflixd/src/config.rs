use emoflix_core::classifier::TensorLayout;
use emoflix_core::genre::GenreMapError;
use emoflix_core::{ClaheParams, FusionPolicy, GenreMap, ModelPaths};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
    #[error("{0}")]
    Validation(String),
    #[error("failed to read {key}: {source}")]
    SecretFile {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{0}")]
    GenreMap(#[from] GenreMapError),
}

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Interface to bind (default: 0.0.0.0).
    pub bind_addr: String,
    /// HTTP port (default: 5000).
    pub port: u16,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// UltraFace model file name, relative to `model_dir`.
    pub detector_model: String,
    /// Expression classifier model file name, relative to `model_dir`.
    pub classifier_model: String,
    pub classifier_layout: TensorLayout,
    /// Minimum face confidence, in (0, 1).
    pub detection_threshold: f32,
    pub clahe: ClaheParams,
    pub policy: FusionPolicy,
    /// Upper bound on request body size.
    pub max_body_bytes: usize,
    /// TMDB v3 API key; carried for the recommendation frontend, never logged.
    pub tmdb_api_key: Option<String>,
    pub genre_map: GenreMap,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("port", &self.port)
            .field("model_dir", &self.model_dir)
            .field("detector_model", &self.detector_model)
            .field("classifier_model", &self.classifier_model)
            .field("classifier_layout", &self.classifier_layout)
            .field("detection_threshold", &self.detection_threshold)
            .field("clahe", &self.clahe)
            .field("policy", &self.policy)
            .field("max_body_bytes", &self.max_body_bytes)
            .field("tmdb_api_key", &self.tmdb_api_key.as_ref().map(|_| "<redacted>"))
            .field("genre_map", &self.genre_map)
            .finish()
    }
}

impl Config {
    /// Load configuration from `EMOFLIX_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let model_dir = lookup("EMOFLIX_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(emoflix_core::default_model_dir);

        let defaults = ModelPaths::in_dir(&model_dir);
        let file_name = |path: &PathBuf| {
            path.file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default()
        };

        let policy_defaults = FusionPolicy::default();
        let clahe_defaults = ClaheParams::default();

        let genre_map = match lookup("EMOFLIX_GENRE_MAP") {
            Some(spec) => GenreMap::default().with_overrides(&spec)?,
            None => GenreMap::default(),
        };

        let config = Self {
            bind_addr: lookup("EMOFLIX_BIND_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "EMOFLIX_PORT", 5000)?,
            detector_model: lookup("EMOFLIX_DETECTOR_MODEL").unwrap_or_else(|| file_name(&defaults.detector)),
            classifier_model: lookup("EMOFLIX_CLASSIFIER_MODEL")
                .unwrap_or_else(|| file_name(&defaults.classifier)),
            classifier_layout: parse_or(&lookup, "EMOFLIX_CLASSIFIER_LAYOUT", defaults.layout)?,
            detection_threshold: parse_or(&lookup, "EMOFLIX_DETECTION_THRESHOLD", defaults.detection_threshold)?,
            clahe: ClaheParams {
                clip_limit: parse_or(&lookup, "EMOFLIX_CLAHE_CLIP_LIMIT", clahe_defaults.clip_limit)?,
                tiles: parse_or(&lookup, "EMOFLIX_CLAHE_TILES", clahe_defaults.tiles)?,
            },
            policy: FusionPolicy {
                neutral_ceiling: parse_or(&lookup, "EMOFLIX_NEUTRAL_CEILING", policy_defaults.neutral_ceiling)?,
                runner_up_floor: parse_or(&lookup, "EMOFLIX_RUNNER_UP_FLOOR", policy_defaults.runner_up_floor)?,
                average_override_floor: parse_or(
                    &lookup,
                    "EMOFLIX_AVERAGE_OVERRIDE_FLOOR",
                    policy_defaults.average_override_floor,
                )?,
            },
            max_body_bytes: parse_or(&lookup, "EMOFLIX_MAX_BODY_BYTES", DEFAULT_MAX_BODY_BYTES)?,
            tmdb_api_key: env_or_file(&lookup, "EMOFLIX_TMDB_API_KEY")?,
            genre_map,
            model_dir,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the settings and returns an error if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::Validation("bind address cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(ConfigError::Validation("port cannot be 0".into()));
        }
        if !(self.detection_threshold > 0.0 && self.detection_threshold < 1.0) {
            return Err(ConfigError::Validation(format!(
                "detection threshold must be in (0, 1), got {}",
                self.detection_threshold
            )));
        }
        if !(self.clahe.clip_limit > 0.0) {
            return Err(ConfigError::Validation(format!(
                "CLAHE clip limit must be positive, got {}",
                self.clahe.clip_limit
            )));
        }
        if self.clahe.tiles == 0 {
            return Err(ConfigError::Validation("CLAHE tile count cannot be 0".into()));
        }
        for (name, value) in [
            ("neutral ceiling", self.policy.neutral_ceiling),
            ("runner-up floor", self.policy.runner_up_floor),
            ("average override floor", self.policy.average_override_floor),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "{name} must be within [0, 100], got {value}"
                )));
            }
        }
        if self.max_body_bytes == 0 {
            return Err(ConfigError::Validation("max body size cannot be 0".into()));
        }
        Ok(())
    }

    /// `host:port` to bind.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.model_dir.join(&self.detector_model),
            classifier: self.model_dir.join(&self.classifier_model),
            layout: self.classifier_layout,
            detection_threshold: self.detection_threshold,
        }
    }
}

fn parse_or<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Read a value directly or from the file named by `<key>_FILE` (Docker secrets).
fn env_or_file<F>(lookup: &F, key: &str) -> Result<Option<String>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let file_key = format!("{key}_FILE");
    if let Some(path) = lookup(&file_key) {
        let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::SecretFile {
            key: file_key.clone(),
            source,
        })?;
        return Ok(Some(content.trim().to_string()).filter(|v| !v.is_empty()));
    }
    Ok(lookup(key).filter(|v| !v.trim().is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use emoflix_core::Emotion;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[("EMOFLIX_MODEL_DIR", "/opt/models")]).unwrap();
        assert_eq!(config.listen_addr(), "0.0.0.0:5000");
        assert_eq!(config.detection_threshold, 0.7);
        assert_eq!(config.clahe, ClaheParams::default());
        assert_eq!(config.policy, FusionPolicy::default());
        assert_eq!(config.max_body_bytes, 32 * 1024 * 1024);
        assert_eq!(config.classifier_layout, TensorLayout::Nchw);
        assert!(config.tmdb_api_key.is_none());

        let paths = config.model_paths();
        assert_eq!(paths.detector, PathBuf::from("/opt/models/version-RFB-320.onnx"));
        assert_eq!(paths.classifier, PathBuf::from("/opt/models/emotion-fer7.onnx"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("EMOFLIX_PORT", "8080"),
            ("EMOFLIX_BIND_ADDR", "127.0.0.1"),
            ("EMOFLIX_CLASSIFIER_LAYOUT", "nhwc"),
            ("EMOFLIX_CLASSIFIER_MODEL", "fer-keras.onnx"),
            ("EMOFLIX_NEUTRAL_CEILING", "60"),
            ("EMOFLIX_CLAHE_TILES", "4"),
            ("EMOFLIX_GENRE_MAP", "disgust=53"),
            ("EMOFLIX_TMDB_API_KEY", "abc123"),
        ])
        .unwrap();
        assert_eq!(config.listen_addr(), "127.0.0.1:8080");
        assert_eq!(config.classifier_layout, TensorLayout::Nhwc);
        assert_eq!(config.classifier_model, "fer-keras.onnx");
        assert_eq!(config.policy.neutral_ceiling, 60.0);
        assert_eq!(config.clahe.tiles, 4);
        assert_eq!(config.genre_map.genre_for(Emotion::Disgust), 53);
        assert_eq!(config.tmdb_api_key.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_unparseable_value() {
        let err = load(&[("EMOFLIX_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "EMOFLIX_PORT", .. }));
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let err = load(&[("EMOFLIX_PORT", "0")]).unwrap_err();
        assert!(err.to_string().contains("port cannot be 0"));
    }

    #[test]
    fn test_validate_thresholds() {
        assert!(load(&[("EMOFLIX_DETECTION_THRESHOLD", "1.5")]).is_err());
        assert!(load(&[("EMOFLIX_DETECTION_THRESHOLD", "0")]).is_err());
        assert!(load(&[("EMOFLIX_CLAHE_CLIP_LIMIT", "-1")]).is_err());
        assert!(load(&[("EMOFLIX_CLAHE_TILES", "0")]).is_err());
        assert!(load(&[("EMOFLIX_RUNNER_UP_FLOOR", "120")]).is_err());
        assert!(load(&[("EMOFLIX_AVERAGE_OVERRIDE_FLOOR", "NaN")]).is_err());
    }

    #[test]
    fn test_bad_genre_map() {
        let err = load(&[("EMOFLIX_GENRE_MAP", "bored=1")]).unwrap_err();
        assert!(matches!(err, ConfigError::GenreMap(_)));
    }

    #[test]
    fn test_api_key_from_file() {
        let path = std::env::temp_dir().join(format!("emoflix-tmdb-key-{}", std::process::id()));
        std::fs::write(&path, "secret-key\n").unwrap();
        let config = load(&[("EMOFLIX_TMDB_API_KEY_FILE", path.to_str().unwrap())]).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(config.tmdb_api_key.as_deref(), Some("secret-key"));
        assert!(!format!("{config:?}").contains("secret-key"));
    }

    #[test]
    fn test_api_key_file_missing() {
        let err = load(&[("EMOFLIX_TMDB_API_KEY_FILE", "/nonexistent/emoflix/key")]).unwrap_err();
        assert!(matches!(err, ConfigError::SecretFile { .. }));
    }
}
