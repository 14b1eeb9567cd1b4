//! Cloud TTS + speaker playback synthesizer

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::task::JoinHandle;

use super::SpeechSynthesizer;
use super::playback::AudioPlayback;
use super::tts::TextToSpeech;

struct Utterance {
    task: JoinHandle<()>,
    stop: Arc<AtomicBool>,
}

/// Speaks replies through the `OpenAI` speech API and the default speaker
///
/// Speaking flushes any utterance still in progress.
pub struct CloudSynthesizer {
    tts: Arc<TextToSpeech>,
    current: Mutex<Option<Utterance>>,
    shut_down: AtomicBool,
}

impl CloudSynthesizer {
    #[must_use]
    pub fn new(tts: TextToSpeech) -> Self {
        Self {
            tts: Arc::new(tts),
            current: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Wait for the current utterance to finish playing
    pub async fn wait(&self) {
        let current = self.current.lock().take();
        if let Some(utterance) = current {
            let _ = utterance.task.await;
        }
    }

    fn interrupt(&self) {
        if let Some(previous) = self.current.lock().take() {
            previous.stop.store(true, Ordering::Release);
            previous.task.abort();
        }
    }
}

impl SpeechSynthesizer for CloudSynthesizer {
    fn speak(&self, text: &str) {
        if self.shut_down.load(Ordering::Acquire) {
            tracing::debug!("synthesizer shut down, dropping utterance");
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime, cannot speak");
            return;
        };

        self.interrupt();

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let tts = Arc::clone(&self.tts);
        let input = text.to_string();

        let task = runtime.spawn(async move {
            let audio = match tts.synthesize(&input).await {
                Ok(audio) => audio,
                Err(e) => {
                    tracing::error!(error = %e, "speech synthesis failed");
                    return;
                }
            };

            if flag.load(Ordering::Acquire) {
                return;
            }

            let played = tokio::task::spawn_blocking(move || {
                AudioPlayback::new()?.play_mp3(&audio, &flag)
            })
            .await;

            match played {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "playback failed"),
                Err(e) => tracing::error!(error = %e, "playback task failed"),
            }
        });

        *self.current.lock() = Some(Utterance { task, stop });
        tracing::info!(text, "speaking");
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::Release);
        self.interrupt();
        tracing::debug!("synthesizer shut down");
    }
}
