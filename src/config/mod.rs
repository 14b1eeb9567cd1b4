//! Configuration management for the rover gateway

pub mod file;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;

use crate::vehicle::{DEFAULT_BAUD_RATE, TransportKind};
use crate::{Error, Result};

/// Default chat-completion endpoint
pub const DEFAULT_ASSISTANT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";

/// Default API server port
pub const DEFAULT_PORT: u16 = 8787;

/// Rover gateway configuration
#[derive(Debug)]
pub struct Config {
    pub vehicle: VehicleConfig,

    pub voice: VoiceConfig,

    pub assistant: AssistantConfig,

    /// HTTP API server configuration
    pub api_server: ApiServerConfig,

    /// Extra local rules from `[commands]`, phrase = reply
    pub commands: BTreeMap<String, String>,
}

/// Vehicle link configuration
#[derive(Debug, Clone)]
pub struct VehicleConfig {
    /// Transport selected for this session
    pub transport: TransportKind,

    /// USB serial adaptor path
    pub usb_port: String,

    /// Bluetooth SPP/RFCOMM port path
    pub bluetooth_port: String,

    pub baud_rate: u32,

    /// Answer permission requests by probing the port path
    pub auto_grant: bool,
}

impl VehicleConfig {
    /// Port path for the configured transport
    #[must_use]
    pub fn endpoint(&self) -> &str {
        match self.transport {
            TransportKind::Usb => &self.usb_port,
            TransportKind::Bluetooth => &self.bluetooth_port,
        }
    }
}

impl Default for VehicleConfig {
    fn default() -> Self {
        Self {
            transport: TransportKind::Usb,
            usb_port: "/dev/ttyUSB0".to_string(),
            bluetooth_port: "/dev/rfcomm0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            auto_grant: true,
        }
    }
}

/// Voice processing configuration
#[derive(Debug)]
pub struct VoiceConfig {
    /// Enable the voice command loop
    pub enabled: bool,

    /// STT model (e.g. "whisper-1")
    pub stt_model: String,

    /// TTS model (e.g. "tts-1")
    pub tts_model: String,

    /// TTS voice identifier
    pub tts_voice: String,

    /// TTS speed multiplier (0.25 to 4.0)
    pub tts_speed: f32,

    /// How long one listening session waits for a complete utterance
    pub listen_timeout: Duration,

    /// Spoken once at startup
    pub greeting: String,

    /// `OpenAI` key for Whisper and TTS
    pub openai_api_key: Option<SecretString>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            stt_model: "whisper-1".to_string(),
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            listen_timeout: Duration::from_secs(10),
            greeting: "Welcome to OpenBot.".to_string(),
            openai_api_key: None,
        }
    }
}

/// Remote assistant configuration
#[derive(Debug)]
pub struct AssistantConfig {
    /// Chat-completion endpoint URL
    pub endpoint: String,

    pub model: String,

    /// Bearer credential, supplied from the environment only
    pub api_key: Option<SecretString>,

    /// Whole-request timeout
    pub timeout: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ASSISTANT_ENDPOINT.to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP API server configuration
#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port to listen on
    pub port: u16,
}

impl Default for ApiServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Command-line overrides applied on top of env/file/defaults
#[derive(Debug, Default, Clone)]
pub struct LoadOptions<'a> {
    /// Explicit config file instead of the standard path
    pub config_path: Option<&'a Path>,
    pub port: Option<u16>,
    pub disable_voice: bool,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if an environment override cannot be parsed
    pub fn load(options: &LoadOptions<'_>) -> Result<Self> {
        let fc = file::load_config_file(options.config_path);
        let mut config = Self::from_sources(fc, |key| std::env::var(key).ok())?;

        if let Some(port) = options.port {
            config.api_server.port = port;
        }
        if options.disable_voice {
            tracing::info!("voice explicitly disabled via --disable-voice");
            config.voice.enabled = false;
        }

        Ok(config)
    }

    /// Assemble configuration from a parsed file and an environment lookup
    ///
    /// # Errors
    ///
    /// Returns error if an environment override cannot be parsed
    pub fn from_sources(
        fc: file::RoverConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = VehicleConfig::default();

        let transport = match env("ROVER_TRANSPORT").or(fc.vehicle.transport) {
            Some(kind) => kind.parse()?,
            None => defaults.transport,
        };

        let baud_rate = match env("ROVER_BAUD_RATE") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid ROVER_BAUD_RATE: {raw}")))?,
            None => fc.vehicle.baud_rate.unwrap_or(defaults.baud_rate),
        };

        let vehicle = VehicleConfig {
            transport,
            usb_port: env("ROVER_USB_PORT")
                .or(fc.vehicle.usb_port)
                .unwrap_or(defaults.usb_port),
            bluetooth_port: env("ROVER_BLUETOOTH_PORT")
                .or(fc.vehicle.bluetooth_port)
                .unwrap_or(defaults.bluetooth_port),
            baud_rate,
            auto_grant: fc.vehicle.auto_grant.unwrap_or(defaults.auto_grant),
        };

        let openai_key = env("OPENAI_API_KEY").filter(|k| !k.is_empty());

        let voice_defaults = VoiceConfig::default();
        let voice_disabled = env("ROVER_DISABLE_VOICE").is_some_and(|v| is_truthy(&v));
        let voice = VoiceConfig {
            enabled: !voice_disabled && fc.voice.enabled.unwrap_or(voice_defaults.enabled),
            stt_model: fc.voice.stt_model.unwrap_or(voice_defaults.stt_model),
            tts_model: fc.voice.tts_model.unwrap_or(voice_defaults.tts_model),
            tts_voice: fc.voice.tts_voice.unwrap_or(voice_defaults.tts_voice),
            tts_speed: fc.voice.tts_speed.unwrap_or(voice_defaults.tts_speed),
            listen_timeout: fc
                .voice
                .listen_timeout_secs
                .map_or(voice_defaults.listen_timeout, Duration::from_secs),
            greeting: fc.voice.greeting.unwrap_or(voice_defaults.greeting),
            openai_api_key: openai_key.clone().map(SecretString::from),
        };

        let assistant_defaults = AssistantConfig::default();
        let assistant = AssistantConfig {
            endpoint: env("ROVER_ASSISTANT_URL")
                .or(fc.assistant.endpoint)
                .unwrap_or(assistant_defaults.endpoint),
            model: env("ROVER_ASSISTANT_MODEL")
                .or(fc.assistant.model)
                .unwrap_or(assistant_defaults.model),
            api_key: env("ROVER_ASSISTANT_API_KEY")
                .filter(|k| !k.is_empty())
                .or(openai_key)
                .map(SecretString::from),
            timeout: fc
                .assistant
                .timeout_secs
                .map_or(assistant_defaults.timeout, Duration::from_secs),
        };

        let port = match env("ROVER_PORT") {
            Some(raw) => raw
                .parse()
                .map_err(|_| Error::Config(format!("invalid ROVER_PORT: {raw}")))?,
            None => fc.server.port.unwrap_or(DEFAULT_PORT),
        };

        tracing::debug!(
            transport = %vehicle.transport,
            endpoint = vehicle.endpoint(),
            voice = voice.enabled,
            assistant = assistant.api_key.is_some(),
            "configuration assembled"
        );

        Ok(Self {
            vehicle,
            voice,
            assistant,
            api_server: ApiServerConfig { port },
            commands: fc.commands,
        })
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
