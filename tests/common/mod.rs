//! Shared test fakes

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use rover_gateway::assistant::{Assistant, AssistantFailure};
use rover_gateway::vehicle::{DataSink, Transport};
use rover_gateway::voice::{RecognitionError, SpeechService, SpeechSynthesizer};
use rover_gateway::{Device, Error, Result, TransportKind};

/// Counters shared between a [`MockTransport`] and the test
#[derive(Default)]
pub struct TransportLog {
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub sent: Mutex<Vec<Vec<u8>>>,
    pub last_device: Mutex<Option<Device>>,
    sink: Mutex<Option<DataSink>>,
}

impl TransportLog {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver bytes as if the vehicle wrote them; dropped unless the link is open
    pub fn receive(&self, data: &[u8]) -> bool {
        match self.sink.lock().as_ref() {
            Some(sink) => {
                sink.publish(data.to_vec());
                true
            }
            None => false,
        }
    }
}

/// In-memory transport that records every call
pub struct MockTransport {
    kind: TransportKind,
    open: bool,
    connect_delay: Duration,
    log: Arc<TransportLog>,
}

impl MockTransport {
    pub fn new(kind: TransportKind) -> (Self, Arc<TransportLog>) {
        let log = Arc::new(TransportLog::default());
        (
            Self {
                kind,
                open: false,
                connect_delay: Duration::ZERO,
                log: Arc::clone(&log),
            },
            log,
        )
    }

    /// Make every connect take `delay`, widening race windows
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn connect(&mut self, device: &Device, sink: DataSink) -> Result<()> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        self.log.connects.fetch_add(1, Ordering::SeqCst);
        *self.log.last_device.lock() = Some(device.clone());

        if self.log.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Transport("device vanished".to_string()));
        }

        self.open = true;
        *self.log.sink.lock() = Some(sink);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.log.disconnects.fetch_add(1, Ordering::SeqCst);
        self.open = false;
        *self.log.sink.lock() = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.open
    }

    async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.log.sent.lock().push(payload.to_vec());
        Ok(())
    }
}

/// One scripted listening session
pub enum Heard {
    Text(&'static str),
    Fail(RecognitionError),
    /// Block until cancelled
    Hang,
}

/// Recognizer that replays a script, then hangs until cancelled
pub struct ScriptedRecognizer {
    script: Mutex<VecDeque<Heard>>,
    cancelled: Notify,
    pub sessions: AtomicUsize,
    pub active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub cancels: AtomicUsize,
    pub releases: AtomicUsize,
}

impl ScriptedRecognizer {
    pub fn new(script: impl IntoIterator<Item = Heard>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            cancelled: Notify::new(),
            sessions: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancels: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    pub fn sessions(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }
}

struct ActiveSession<'a>(&'a AtomicUsize);

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechService for ScriptedRecognizer {
    async fn listen(&self) -> std::result::Result<String, RecognitionError> {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveSession(&self.active);

        // Yield so overlapping sessions would be observable
        tokio::task::yield_now().await;

        let next = self.script.lock().pop_front();
        match next {
            Some(Heard::Text(text)) => Ok(text.to_string()),
            Some(Heard::Fail(e)) => Err(e),
            Some(Heard::Hang) | None => {
                self.cancelled.notified().await;
                Err(RecognitionError::Canceled)
            }
        }
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        self.cancelled.notify_waiters();
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Synthesizer that records what it was asked to say
#[derive(Default)]
pub struct RecordingSynthesizer {
    pub spoken: Mutex<Vec<String>>,
    pub shut_down: AtomicBool,
    spoke: Notify,
}

impl RecordingSynthesizer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().clone()
    }

    /// Wait until at least `count` utterances were spoken
    pub async fn wait_for(&self, count: usize) -> Vec<String> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.spoke.notified();
                if self.spoken.lock().len() >= count {
                    return;
                }
                notified.await;
            }
        })
        .await
        .expect("synthesizer was not asked to speak in time");
        self.spoken()
    }
}

impl SpeechSynthesizer for RecordingSynthesizer {
    fn speak(&self, text: &str) {
        self.spoken.lock().push(text.to_string());
        self.spoke.notify_waiters();
    }

    fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

/// Assistant with a fixed answer, an optional delay and a call counter
pub struct ScriptedAssistant {
    answer: std::result::Result<String, AssistantFailure>,
    delay: Duration,
    pub calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedAssistant {
    pub fn replying(answer: &str) -> Arc<Self> {
        Self::build(Ok(answer.to_string()), Duration::ZERO)
    }

    pub fn failing(failure: AssistantFailure) -> Arc<Self> {
        Self::build(Err(failure), Duration::ZERO)
    }

    pub fn slow(answer: &str, delay: Duration) -> Arc<Self> {
        Self::build(Ok(answer.to_string()), delay)
    }

    fn build(
        answer: std::result::Result<String, AssistantFailure>,
        delay: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            answer,
            delay,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Assistant for ScriptedAssistant {
    async fn ask(&self, prompt: &str) -> std::result::Result<String, AssistantFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(prompt.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.answer.clone()
    }
}
