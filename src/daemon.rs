//! Gateway daemon
//!
//! Wires the vehicle connection, command dispatcher, voice loop and API
//! server together and owns their lifetimes.

use std::path::Path;
use std::sync::Arc;

use secrecy::ExposeSecret;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiServer, ApiState};
use crate::assistant::{Assistant, CommandDispatcher, RemoteAssistantClient, RuleTable};
use crate::config::{VehicleConfig, VoiceConfig};
use crate::vehicle::{ConnectionEvent, ConnectionManager, SerialTransport};
use crate::voice::{
    CloudRecognizer, CloudSynthesizer, SpeechService, SpeechSynthesizer, TextToSpeech,
    VoiceCommandLoop, WhisperTranscriber,
};
use crate::{Config, Result};

/// The rover gateway daemon
pub struct Daemon {
    config: Config,
    connection: Arc<ConnectionManager>,
    dispatcher: Arc<CommandDispatcher>,
    synthesizer: Option<Arc<dyn SpeechSynthesizer>>,
    voice_loop: Option<Arc<VoiceCommandLoop>>,
}

impl Daemon {
    /// Create a daemon from configuration
    ///
    /// Voice is left out, with a warning, when its services cannot be built.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let connection = Arc::new(build_connection(&config.vehicle));
        let dispatcher = Arc::new(build_dispatcher(&config));

        let (synthesizer, voice_loop) = if config.voice.enabled {
            match build_voice(&config.voice) {
                Ok((recognizer, synthesizer)) => {
                    let voice_loop = VoiceCommandLoop::new(
                        recognizer,
                        Arc::clone(&dispatcher),
                        Arc::clone(&synthesizer),
                    );
                    (Some(synthesizer), Some(Arc::new(voice_loop)))
                }
                Err(e) => {
                    tracing::warn!(error = %e, "voice unavailable, continuing without it");
                    (None, None)
                }
            }
        } else {
            tracing::info!("voice disabled");
            (None, None)
        };

        Self {
            config,
            connection,
            dispatcher,
            synthesizer,
            voice_loop,
        }
    }

    /// Run until Ctrl-C or the API server fails
    ///
    /// # Errors
    ///
    /// Returns error if the API server fails
    pub async fn run(self) -> Result<()> {
        let shutdown = CancellationToken::new();

        let state = ApiState {
            connection: Arc::clone(&self.connection),
            dispatcher: Arc::clone(&self.dispatcher),
            voice: self.voice_loop.clone(),
        };
        let mut api = ApiServer::new(state, self.config.api_server.port).spawn(shutdown.clone());

        let broker = self.config.vehicle.auto_grant.then(|| {
            spawn_permission_broker(
                Arc::clone(&self.connection),
                self.connection.subscribe(),
                shutdown.clone(),
            )
        });

        if let Some(synthesizer) = &self.synthesizer {
            synthesizer.speak(&self.config.voice.greeting);
        }

        if let Err(e) = self
            .connection
            .request_connect(self.config.vehicle.transport)
            .await
        {
            tracing::error!(error = %e, "initial connection request failed");
        }

        if let Some(voice_loop) = &self.voice_loop {
            voice_loop.start().await;
        }

        tracing::info!(
            transport = %self.config.vehicle.transport,
            port = self.config.api_server.port,
            voice = self.voice_loop.is_some(),
            "rover gateway ready"
        );

        let api_result = tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    tracing::error!(error = %e, "failed to listen for Ctrl-C");
                }
                tracing::info!("shutdown requested");
                None
            }
            finished = &mut api => Some(finished),
        };

        self.teardown(&shutdown).await;

        if let Some(handle) = broker {
            let _ = handle.await;
        }

        let api_result = match api_result {
            Some(finished) => finished,
            None => api.await,
        };

        match api_result {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(error = %e, "API server task failed");
                Ok(())
            }
        }
    }

    /// Stop voice, silence speech, close the vehicle link, stop the API
    async fn teardown(&self, shutdown: &CancellationToken) {
        if let Some(voice_loop) = &self.voice_loop {
            voice_loop.stop().await;
        }
        if let Some(synthesizer) = &self.synthesizer {
            synthesizer.shutdown();
        }
        self.connection.disconnect().await;
        shutdown.cancel();
        tracing::info!("rover gateway stopped");
    }
}

/// Build the connection manager for the configured transport
#[must_use]
pub fn build_connection(vehicle: &VehicleConfig) -> ConnectionManager {
    let transport = SerialTransport::new(vehicle.transport, vehicle.baud_rate);
    ConnectionManager::new(Box::new(transport)).with_endpoint(vehicle.endpoint())
}

/// Build the dispatcher: built-in rules, `[commands]` overlay, remote assistant
#[must_use]
pub fn build_dispatcher(config: &Config) -> CommandDispatcher {
    let rules = RuleTable::builtin().with_rules(config.commands.clone());
    tracing::debug!(rules = rules.len(), "rule table built");

    let assistant = match RemoteAssistantClient::new(&config.assistant) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn Assistant>),
        Err(e) => {
            tracing::warn!(error = %e, "remote assistant disabled");
            None
        }
    };

    CommandDispatcher::new(Arc::new(rules), assistant)
}

/// Build the cloud synthesizer
///
/// # Errors
///
/// Returns error if no `OpenAI` key is configured
pub fn build_synthesizer(voice: &VoiceConfig) -> Result<CloudSynthesizer> {
    let tts = TextToSpeech::new(
        openai_key(voice),
        voice.tts_model.clone(),
        voice.tts_voice.clone(),
        voice.tts_speed,
    )?;
    Ok(CloudSynthesizer::new(tts))
}

fn build_voice(
    voice: &VoiceConfig,
) -> Result<(Arc<dyn SpeechService>, Arc<dyn SpeechSynthesizer>)> {
    let transcriber = WhisperTranscriber::new(openai_key(voice), voice.stt_model.clone())?;
    let recognizer: Arc<dyn SpeechService> =
        Arc::new(CloudRecognizer::new(transcriber, voice.listen_timeout));
    let synthesizer: Arc<dyn SpeechSynthesizer> = Arc::new(build_synthesizer(voice)?);

    Ok((recognizer, synthesizer))
}

fn openai_key(voice: &VoiceConfig) -> String {
    voice
        .openai_api_key
        .as_ref()
        .map(|k| k.expose_secret().to_owned())
        .unwrap_or_default()
}

/// Answer permission requests by checking that the port path exists
///
/// Stands in for the platform permission dialog on hosts where access to a
/// serial device is governed by file permissions rather than a prompt.
pub fn spawn_permission_broker(
    connection: Arc<ConnectionManager>,
    mut events: broadcast::Receiver<ConnectionEvent>,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                () = shutdown.cancelled() => break,
                event = events.recv() => event,
            };

            match event {
                Ok(ConnectionEvent::PermissionRequested { kind, device }) => {
                    let Some(device) = device.or_else(|| connection.device()) else {
                        tracing::warn!(transport = %kind, "permission requested without a device");
                        continue;
                    };

                    let granted = Path::new(&device.id).exists();
                    tracing::info!(device = %device.id, granted, "answering permission request");
                    connection.on_permission_result(granted, Some(device)).await;
                }
                Ok(ConnectionEvent::StateChanged { .. } | ConnectionEvent::DataReceived { .. }) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "permission broker lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
        tracing::debug!("permission broker stopped");
    })
}
