//! Voice loop integration tests
//!
//! Runs the command loop against scripted recognizers and assistants, so no
//! audio hardware or network is needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rover_gateway::assistant::{Assistant, AssistantFailure};
use rover_gateway::voice::{
    RecognitionError, SAMPLE_RATE, SegmenterState, SpeechSegmenter, SpeechService,
    VoiceCommandLoop, VoiceSessionState, rms,
};
use rover_gateway::{CommandDispatcher, FALLBACK_REPLY, RuleTable};

mod common;
use common::{Heard, RecordingSynthesizer, ScriptedAssistant, ScriptedRecognizer};

fn dispatcher(assistant: Option<Arc<ScriptedAssistant>>) -> Arc<CommandDispatcher> {
    let assistant = assistant.map(|a| a as Arc<dyn Assistant>);
    Arc::new(CommandDispatcher::new(Arc::new(RuleTable::builtin()), assistant))
}

fn voice_loop(
    recognizer: &Arc<ScriptedRecognizer>,
    dispatcher: Arc<CommandDispatcher>,
    synthesizer: &Arc<RecordingSynthesizer>,
) -> VoiceCommandLoop {
    VoiceCommandLoop::new(
        Arc::clone(recognizer) as _,
        dispatcher,
        Arc::clone(synthesizer) as _,
    )
}

/// Poll `check` until it holds or a second passes
async fn eventually(check: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

#[tokio::test]
async fn test_rule_reply_is_spoken_without_remote_call() {
    let assistant = ScriptedAssistant::replying("should not be used");
    let recognizer = ScriptedRecognizer::new([Heard::Text("Turn Left")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(Some(Arc::clone(&assistant))), &synthesizer);

    voice.start().await;
    let spoken = synthesizer.wait_for(1).await;
    voice.stop().await;

    assert_eq!(spoken, vec!["Turning left.".to_string()]);
    assert_eq!(assistant.calls(), 0);
}

#[tokio::test]
async fn test_unmatched_utterance_speaks_remote_reply() {
    let assistant = ScriptedAssistant::replying("Why did the robot cross the road?");
    let recognizer = ScriptedRecognizer::new([Heard::Text("tell me a joke")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(Some(Arc::clone(&assistant))), &synthesizer);

    voice.start().await;
    let spoken = synthesizer.wait_for(1).await;
    voice.stop().await;

    assert_eq!(spoken, vec!["Why did the robot cross the road?".to_string()]);
    assert_eq!(assistant.calls(), 1);
    // The verbatim utterance is forwarded
    assert_eq!(assistant.prompts.lock().as_slice(), &["tell me a joke".to_string()]);
}

#[tokio::test]
async fn test_remote_failure_speaks_fallback() {
    let assistant = ScriptedAssistant::failing(AssistantFailure::Status(500));
    let recognizer = ScriptedRecognizer::new([Heard::Text("what is the weather")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(Some(assistant)), &synthesizer);

    voice.start().await;
    let spoken = synthesizer.wait_for(1).await;
    voice.stop().await;

    assert_eq!(spoken, vec![FALLBACK_REPLY.to_string()]);
}

#[tokio::test]
async fn test_recognition_errors_restart_listening() {
    let recognizer = ScriptedRecognizer::new([
        Heard::Fail(RecognitionError::NoSpeech),
        Heard::Fail(RecognitionError::Engine("mic busy".to_string())),
        Heard::Text("   "),
        Heard::Text("hello"),
    ]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(None), &synthesizer);

    voice.start().await;
    let spoken = synthesizer.wait_for(1).await;
    voice.stop().await;

    assert_eq!(spoken, vec!["Hi there!".to_string()]);
    assert!(recognizer.sessions() >= 4);
    // Each failed or empty session resets the recognizer
    assert!(recognizer.cancels.load(Ordering::SeqCst) >= 3);
}

#[tokio::test]
async fn test_loop_keeps_listening_after_reply() {
    let recognizer = ScriptedRecognizer::new([Heard::Text("move forward"), Heard::Text("stop")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(None), &synthesizer);

    voice.start().await;
    let spoken = synthesizer.wait_for(2).await;

    assert_eq!(spoken, vec!["Moving forward now.".to_string(), "Stopping now.".to_string()]);
    assert!(eventually(|| voice.state() == VoiceSessionState::Listening).await);

    voice.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_starts_keep_one_listening_session() {
    let recognizer = ScriptedRecognizer::new([Heard::Hang]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = Arc::new(voice_loop(&recognizer, dispatcher(None), &synthesizer));

    let starts: Vec<_> = (0..8)
        .map(|_| {
            let voice = Arc::clone(&voice);
            tokio::spawn(async move { voice.start().await })
        })
        .collect();
    for start in starts {
        start.await.unwrap();
    }

    assert!(eventually(|| recognizer.active.load(Ordering::SeqCst) == 1).await);
    assert_eq!(recognizer.max_active.load(Ordering::SeqCst), 1);
    assert!(voice.is_running().await);

    voice.stop().await;
    assert!(!voice.is_running().await);
}

#[tokio::test]
async fn test_stop_discards_late_reply_and_releases() {
    let assistant = ScriptedAssistant::slow("too late", Duration::from_millis(300));
    let recognizer = ScriptedRecognizer::new([Heard::Text("tell me a story")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(Some(Arc::clone(&assistant))), &synthesizer);

    voice.start().await;
    assert!(eventually(|| voice.state() == VoiceSessionState::Processing).await);

    voice.stop().await;
    tokio::time::sleep(Duration::from_millis(400)).await;

    assert!(synthesizer.spoken().is_empty());
    assert_eq!(voice.state(), VoiceSessionState::Idle);
    assert_eq!(recognizer.releases.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_restart_after_stop() {
    let recognizer = ScriptedRecognizer::new([Heard::Hang, Heard::Text("what is your name")]);
    let synthesizer = RecordingSynthesizer::new();
    let voice = voice_loop(&recognizer, dispatcher(None), &synthesizer);

    voice.start().await;
    assert!(eventually(|| recognizer.sessions() == 1).await);
    voice.stop().await;

    voice.start().await;
    let spoken = synthesizer.wait_for(1).await;
    voice.stop().await;

    assert_eq!(spoken, vec!["My name is Neo, your assistant.".to_string()]);
}

/// Recognizer whose first session registers its capture late
///
/// The first `listen` blocks its worker before recording the cancel flag and
/// starting a detached capture, the way a session that just won the
/// microphone does while a restart is already cancelling it.
#[derive(Default)]
struct LateRegisteringRecognizer {
    listens: AtomicUsize,
    entered: AtomicBool,
    active: Mutex<Option<Arc<AtomicBool>>>,
    captures_ended: Arc<AtomicUsize>,
}

#[async_trait]
impl SpeechService for LateRegisteringRecognizer {
    async fn listen(&self) -> Result<String, RecognitionError> {
        if self.listens.fetch_add(1, Ordering::SeqCst) == 0 {
            self.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(100));
        }

        let flag = Arc::new(AtomicBool::new(false));
        *self.active.lock() = Some(Arc::clone(&flag));

        let ended = Arc::clone(&self.captures_ended);
        tokio::task::spawn_blocking(move || {
            while !flag.load(Ordering::SeqCst) {
                std::thread::sleep(Duration::from_millis(5));
            }
            ended.fetch_add(1, Ordering::SeqCst);
        });

        std::future::pending().await
    }

    fn cancel(&self) {
        if let Some(flag) = self.active.lock().take() {
            flag.store(true, Ordering::SeqCst);
        }
    }

    fn release(&self) {
        self.cancel();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_restart_cancels_session_registered_during_cancel() {
    let recognizer = Arc::new(LateRegisteringRecognizer::default());
    let synthesizer = RecordingSynthesizer::new();
    let voice = VoiceCommandLoop::new(
        Arc::clone(&recognizer) as _,
        dispatcher(None),
        Arc::clone(&synthesizer) as _,
    );

    voice.start().await;
    assert!(eventually(|| recognizer.entered.load(Ordering::SeqCst)).await);

    // Restart while the first session is still registering
    voice.start().await;

    assert!(eventually(|| recognizer.captures_ended.load(Ordering::SeqCst) >= 1).await);
    assert!(eventually(|| recognizer.listens.load(Ordering::SeqCst) >= 2).await);

    voice.stop().await;
    assert!(eventually(|| recognizer.captures_ended.load(Ordering::SeqCst) >= 2).await);
}

/// Generate sine wave audio samples
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn sine(frequency: f32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (SAMPLE_RATE as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            amplitude * (2.0 * std::f32::consts::PI * frequency * t).sin()
        })
        .collect()
}

/// Generate silence
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn silence(duration_secs: f32) -> Vec<f32> {
    vec![0.0; (SAMPLE_RATE as f32 * duration_secs) as usize]
}

#[test]
fn test_segmenter_completes_after_trailing_silence() {
    let mut segmenter = SpeechSegmenter::new();

    assert_eq!(segmenter.process(&silence(0.2)), SegmenterState::Waiting);
    assert_eq!(segmenter.process(&sine(440.0, 0.6, 0.5)), SegmenterState::Capturing);
    assert_eq!(segmenter.process(&silence(0.6)), SegmenterState::Complete);

    let segment = segmenter.take_segment();
    assert!(segment.len() >= (SAMPLE_RATE as usize * 6) / 10);
    assert_eq!(segmenter.state(), SegmenterState::Waiting);
}

#[test]
fn test_segmenter_ignores_silence() {
    let mut segmenter = SpeechSegmenter::new();

    for _ in 0..10 {
        assert_eq!(segmenter.process(&silence(0.5)), SegmenterState::Waiting);
    }
    assert!(segmenter.buffer().is_empty());
}

#[test]
fn test_rms_reports_sine_level() {
    let level = rms(&sine(440.0, 1.0, 0.5));
    assert!((level - 0.5 / 2f32.sqrt()).abs() < 0.01, "level was {level}");
    assert!(rms(&silence(0.5)).abs() < f32::EPSILON);
}
