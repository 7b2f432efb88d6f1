use facewatch_core::{ReferenceSpec, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_REFERENCE_LABEL: &str = "Suman";
const DEFAULT_REFERENCE_IMAGE: &str = "labeled_images/suman/1.png";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read references file {path}: {source}")]
    ReadReferences {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid references file {path}: {source}")]
    ParseReferences {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// What to do when a reference image cannot be turned into a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferencePolicy {
    /// Warn, drop the reference and keep going (possibly with no references).
    Degrade,
    /// Treat it like a model failure.
    Fail,
}

impl FromStr for ReferencePolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "degrade" => Ok(ReferencePolicy::Degrade),
            "fail" => Ok(ReferencePolicy::Fail),
            _ => Err(()),
        }
    }
}

/// `[[reference]]` entries of a references TOML file.
#[derive(Debug, Deserialize)]
struct ReferencesFile {
    #[serde(default)]
    reference: Vec<ReferenceSpec>,
}

/// Daemon configuration, loaded from `FACEWATCH_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Requested capture size; the driver may negotiate another.
    pub capture_width: u32,
    pub capture_height: u32,
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub references: Vec<ReferenceSpec>,
    pub reference_policy: ReferencePolicy,
    /// Maximum descriptor distance for a match.
    pub match_threshold: f32,
    pub display_width: u32,
    pub display_height: u32,
    /// Frames discarded after the camera starts (AGC/AE stabilisation).
    pub warmup_frames: usize,
    /// Bound on model + reference loading; 0 disables.
    pub load_timeout_secs: u64,
    /// Bound on opening the camera; 0 disables.
    pub camera_timeout_secs: u64,
    /// Where to write composited frames, if anywhere.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
    /// Whether to serve the D-Bus host interface.
    pub dbus_enabled: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; missing keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let model_dir = lookup("FACEWATCH_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facewatch_core::default_model_dir);

        let references = match lookup("FACEWATCH_REFERENCES_FILE") {
            Some(path) => load_references_file(Path::new(&path))?,
            None => vec![ReferenceSpec::new(
                lookup("FACEWATCH_REFERENCE_LABEL")
                    .unwrap_or_else(|| DEFAULT_REFERENCE_LABEL.to_string()),
                lookup("FACEWATCH_REFERENCE_IMAGE")
                    .unwrap_or_else(|| DEFAULT_REFERENCE_IMAGE.to_string()),
            )],
        };

        let reference_policy = match lookup("FACEWATCH_REFERENCE_POLICY") {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "FACEWATCH_REFERENCE_POLICY",
                value: v,
            })?,
            None => ReferencePolicy::Degrade,
        };

        Ok(Self {
            camera_device: lookup("FACEWATCH_CAMERA_DEVICE")
                .unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: dimension(&lookup, "FACEWATCH_CAPTURE_WIDTH", 640)?,
            capture_height: dimension(&lookup, "FACEWATCH_CAPTURE_HEIGHT", 480)?,
            model_dir,
            references,
            reference_policy,
            match_threshold: parsed(&lookup, "FACEWATCH_MATCH_THRESHOLD", DEFAULT_MATCH_THRESHOLD)?,
            display_width: dimension(&lookup, "FACEWATCH_DISPLAY_WIDTH", 640)?,
            display_height: dimension(&lookup, "FACEWATCH_DISPLAY_HEIGHT", 480)?,
            warmup_frames: parsed(&lookup, "FACEWATCH_WARMUP_FRAMES", 4)?,
            load_timeout_secs: parsed(&lookup, "FACEWATCH_LOAD_TIMEOUT_SECS", 0)?,
            camera_timeout_secs: parsed(&lookup, "FACEWATCH_CAMERA_TIMEOUT_SECS", 10)?,
            snapshot_path: lookup("FACEWATCH_SNAPSHOT_PATH")
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
            snapshot_every: parsed(&lookup, "FACEWATCH_SNAPSHOT_EVERY", 30)?.max(1),
            dbus_enabled: lookup("FACEWATCH_DBUS").map(|v| v != "0").unwrap_or(true),
        })
    }
}

/// Parse `key` if set; unset keys take `default`, unparseable ones are an error.
fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

/// Like [`parsed`], but a zero-sized frame or surface is an error.
fn dimension(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u32,
) -> Result<u32, ConfigError> {
    match parsed(lookup, key, default)? {
        0 => Err(ConfigError::InvalidValue {
            key,
            value: "0".to_string(),
        }),
        n => Ok(n),
    }
}

/// Read `[[reference]]` entries; relative image paths resolve against the file's directory.
fn load_references_file(path: &Path) -> Result<Vec<ReferenceSpec>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadReferences {
        path: path.to_path_buf(),
        source,
    })?;
    let file: ReferencesFile =
        toml::from_str(&text).map_err(|source| ConfigError::ParseReferences {
            path: path.to_path_buf(),
            source,
        })?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(file
        .reference
        .into_iter()
        .map(|mut spec| {
            if spec.image.is_relative() {
                spec.image = base.join(&spec.image);
            }
            spec
        })
        .collect())
}
