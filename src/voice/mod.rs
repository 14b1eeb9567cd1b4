//! Voice command channel
//!
//! [`VoiceCommandLoop`] supervises listening sessions on a [`SpeechService`],
//! resolves each utterance through the command dispatcher and hands replies
//! to a [`SpeechSynthesizer`]. The cloud implementations capture from the
//! default microphone, transcribe with Whisper and speak with the `OpenAI`
//! speech API.

mod capture;
mod command_loop;
mod playback;
mod recognizer;
mod segmenter;
mod stt;
mod synthesizer;
mod tts;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

pub use capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
pub use command_loop::VoiceCommandLoop;
pub use playback::AudioPlayback;
pub use recognizer::CloudRecognizer;
pub use segmenter::{SegmenterState, SpeechSegmenter, rms};
pub use stt::WhisperTranscriber;
pub use synthesizer::CloudSynthesizer;
pub use tts::TextToSpeech;

/// Voice loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSessionState {
    /// Between sessions, or stopped
    Idle,
    /// A recognition session is open
    Listening,
    /// Resolving an utterance
    Processing,
    /// Handing a reply to the synthesizer
    Speaking,
}

impl fmt::Display for VoiceSessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Listening => write!(f, "listening"),
            Self::Processing => write!(f, "processing"),
            Self::Speaking => write!(f, "speaking"),
        }
    }
}

/// Why a listening session ended without an utterance
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RecognitionError {
    /// Nothing but silence before the session timed out
    #[error("no speech")]
    NoSpeech,

    /// Speech started but did not end before the session timed out
    #[error("speech timeout")]
    Timeout,

    /// Speech was heard but produced no text
    #[error("no match")]
    NoMatch,

    /// Session canceled
    #[error("canceled")]
    Canceled,

    /// Audio device or recognition engine fault
    #[error("engine error: {0}")]
    Engine(String),
}

/// Produces one utterance per listening session
#[async_trait]
pub trait SpeechService: Send + Sync {
    /// Run one listening session
    async fn listen(&self) -> Result<String, RecognitionError>;

    /// Cancel the active session, if any; returns immediately
    fn cancel(&self);

    /// Release recognizer resources
    fn release(&self);
}

/// Speaks text
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking `text`, interrupting anything in progress; does not wait
    fn speak(&self, text: &str);

    /// Stop speaking and release the synthesizer
    fn shutdown(&self);
}
