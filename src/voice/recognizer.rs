//! Microphone + Whisper speech recognizer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Semaphore;

use super::capture::{AudioCapture, SAMPLE_RATE, samples_to_wav};
use super::segmenter::{SegmenterState, SpeechSegmenter};
use super::stt::WhisperTranscriber;
use super::{RecognitionError, SpeechService};

/// How often the capture thread drains the microphone buffer (100ms)
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Pause before reporting an unavailable input device
const DEVICE_RETRY_PAUSE: Duration = Duration::from_secs(1);

/// Listens on the default microphone and transcribes each segment with Whisper
///
/// Each session captures on a blocking thread that holds the single session
/// permit until the microphone is closed, so a new session cannot open the
/// device while the previous one is still winding down.
pub struct CloudRecognizer {
    transcriber: Arc<WhisperTranscriber>,
    listen_timeout: Duration,
    session_slot: Arc<Semaphore>,
    active: Mutex<Option<Arc<AtomicBool>>>,
}

impl CloudRecognizer {
    /// Create a recognizer; sessions give up after `listen_timeout`
    #[must_use]
    pub fn new(transcriber: WhisperTranscriber, listen_timeout: Duration) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            listen_timeout,
            session_slot: Arc::new(Semaphore::new(1)),
            active: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpeechService for CloudRecognizer {
    async fn listen(&self) -> Result<String, RecognitionError> {
        let permit = Arc::clone(&self.session_slot)
            .acquire_owned()
            .await
            .map_err(|_| RecognitionError::Engine("recognizer closed".to_string()))?;

        let canceled = Arc::new(AtomicBool::new(false));
        *self.active.lock() = Some(Arc::clone(&canceled));

        let flag = Arc::clone(&canceled);
        let timeout = self.listen_timeout;
        let captured = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            capture_segment(&flag, timeout)
        })
        .await
        .map_err(|e| RecognitionError::Engine(format!("capture task failed: {e}")))?;

        let samples = captured?;
        if canceled.load(Ordering::Acquire) {
            return Err(RecognitionError::Canceled);
        }

        let wav = samples_to_wav(&samples, SAMPLE_RATE)
            .map_err(|e| RecognitionError::Engine(e.to_string()))?;

        let text = self
            .transcriber
            .transcribe(&wav)
            .await
            .map_err(|e| RecognitionError::Engine(e.to_string()))?;

        if text.trim().is_empty() {
            return Err(RecognitionError::NoMatch);
        }

        Ok(text)
    }

    fn cancel(&self) {
        if let Some(flag) = self.active.lock().take() {
            flag.store(true, Ordering::Release);
        }
    }

    fn release(&self) {
        self.cancel();
        tracing::debug!("recognizer released");
    }
}

/// Capture one spoken segment from the microphone (blocking)
fn capture_segment(
    canceled: &AtomicBool,
    timeout: Duration,
) -> Result<Vec<f32>, RecognitionError> {
    let mut capture = AudioCapture::new()
        .and_then(|mut capture| capture.start().map(|()| capture))
        .map_err(|e| {
            tracing::warn!(error = %e, "microphone unavailable");
            std::thread::sleep(DEVICE_RETRY_PAUSE);
            RecognitionError::Engine(e.to_string())
        })?;

    let mut segmenter = SpeechSegmenter::new();
    let started = Instant::now();

    loop {
        if canceled.load(Ordering::Acquire) {
            return Err(RecognitionError::Canceled);
        }

        if started.elapsed() > timeout {
            return Err(match segmenter.state() {
                SegmenterState::Waiting => RecognitionError::NoSpeech,
                _ => RecognitionError::Timeout,
            });
        }

        std::thread::sleep(POLL_INTERVAL);

        let samples = capture.take_buffer();
        if samples.is_empty() {
            continue;
        }

        if segmenter.process(&samples) == SegmenterState::Complete {
            capture.stop();
            return Ok(segmenter.take_segment());
        }
    }
}
