//! End-of-utterance detection
//!
//! Splits a 16 kHz mono sample stream into one spoken segment using RMS
//! energy: capture starts on the first loud chunk and completes after enough
//! speech followed by trailing silence.

/// Minimum RMS energy to count a chunk as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum segment length to accept (0.3 s at 16 kHz)
const MIN_SPEECH_SAMPLES: usize = 4800;

/// Trailing silence that ends a segment (0.5 s at 16 kHz)
const TRAILING_SILENCE_SAMPLES: usize = 8000;

/// Segmenter progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmenterState {
    /// No speech yet
    Waiting,
    /// Speech started, accumulating
    Capturing,
    /// A full segment is buffered
    Complete,
}

/// Accumulates one spoken segment
pub struct SpeechSegmenter {
    state: SegmenterState,
    buffer: Vec<f32>,
    silence_counter: usize,
}

impl Default for SpeechSegmenter {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechSegmenter {
    /// Create an empty segmenter
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: SegmenterState::Waiting,
            buffer: Vec::new(),
            silence_counter: 0,
        }
    }

    /// Feed a chunk of samples and return the resulting state
    pub fn process(&mut self, samples: &[f32]) -> SegmenterState {
        let energy = rms(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        match self.state {
            SegmenterState::Waiting => {
                if is_speech {
                    self.state = SegmenterState::Capturing;
                    self.buffer.clear();
                    self.buffer.extend_from_slice(samples);
                    self.silence_counter = 0;
                    tracing::trace!(energy, "speech started");
                }
            }
            SegmenterState::Capturing => {
                self.buffer.extend_from_slice(samples);

                if is_speech {
                    self.silence_counter = 0;
                } else {
                    self.silence_counter += samples.len();
                }

                if self.silence_counter > TRAILING_SILENCE_SAMPLES
                    && self.buffer.len() > MIN_SPEECH_SAMPLES + self.silence_counter
                {
                    tracing::debug!(samples = self.buffer.len(), "speech segment complete");
                    self.state = SegmenterState::Complete;
                } else if self.silence_counter > TRAILING_SILENCE_SAMPLES {
                    // A click or cough, not speech
                    tracing::trace!("speech too short, discarding");
                    self.reset();
                }
            }
            SegmenterState::Complete => {}
        }

        self.state
    }

    /// Take the buffered segment and reset
    pub fn take_segment(&mut self) -> Vec<f32> {
        let segment = std::mem::take(&mut self.buffer);
        self.reset();
        segment
    }

    /// Buffered samples so far
    #[must_use]
    pub fn buffer(&self) -> &[f32] {
        &self.buffer
    }

    /// Discard any partial segment
    pub fn reset(&mut self) {
        self.state = SegmenterState::Waiting;
        self.buffer.clear();
        self.silence_counter = 0;
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> SegmenterState {
        self.state
    }
}

/// RMS energy of a chunk
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
