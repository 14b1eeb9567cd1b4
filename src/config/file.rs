//! TOML configuration file loading
//!
//! Reads `<config_dir>/rover/config.toml` (or an explicit path). Every field
//! is optional; the file is a partial overlay on top of defaults.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct RoverConfigFile {
    #[serde(default)]
    pub vehicle: VehicleFileConfig,

    #[serde(default)]
    pub voice: VoiceFileConfig,

    #[serde(default)]
    pub assistant: AssistantFileConfig,

    #[serde(default)]
    pub server: ServerFileConfig,

    /// Extra local rules, phrase = reply
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
}

/// Vehicle link configuration
#[derive(Debug, Default, Deserialize)]
pub struct VehicleFileConfig {
    /// "usb" or "bluetooth"
    pub transport: Option<String>,
    pub usb_port: Option<String>,
    pub bluetooth_port: Option<String>,
    pub baud_rate: Option<u32>,
    /// Answer permission requests by probing the port path
    pub auto_grant: Option<bool>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    pub enabled: Option<bool>,

    /// STT model (e.g. "whisper-1")
    pub stt_model: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    pub tts_speed: Option<f32>,

    /// Seconds before a silent listening session is restarted
    pub listen_timeout_secs: Option<u64>,

    /// Spoken once at startup
    pub greeting: Option<String>,
}

/// Remote assistant configuration (the key is never read from the file)
#[derive(Debug, Default, Deserialize)]
pub struct AssistantFileConfig {
    /// Chat-completion endpoint URL
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub timeout_secs: Option<u64>,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// API server port
    pub port: Option<u16>,
}

/// Load the TOML config file from `path`, or the standard path if `None`
///
/// Returns `RoverConfigFile::default()` if the file doesn't exist or can't be parsed.
#[must_use]
pub fn load_config_file(path: Option<&Path>) -> RoverConfigFile {
    let Some(path) = path.map(Path::to_path_buf).or_else(config_file_path) else {
        return RoverConfigFile::default();
    };

    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file");
        return RoverConfigFile::default();
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match parse_config(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                RoverConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            RoverConfigFile::default()
        }
    }
}

/// Parse config file contents
///
/// # Errors
///
/// Returns error if `content` is not valid TOML for the schema
pub fn parse_config(content: &str) -> crate::Result<RoverConfigFile> {
    Ok(toml::from_str(content)?)
}

/// Return the config file path: `~/.config/rover/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("rover").join("config.toml"))
}
