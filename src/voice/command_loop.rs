//! Continuous voice command loop
//!
//! ```text
//! Idle -> Listening --utterance--> Processing -> Speaking -> Idle -> Listening ...
//!            |
//!            +--error / empty--> Idle -> Listening
//! ```
//!
//! One supervisor task runs the cycle. Starting always cancels and joins the
//! previous supervisor first, so two sessions are never listening at once.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{RecognitionError, SpeechService, SpeechSynthesizer, VoiceSessionState};
use crate::assistant::CommandDispatcher;

/// Supervises listening sessions and speaks resolved replies
pub struct VoiceCommandLoop {
    shared: Arc<Shared>,
    supervisor: Mutex<Option<Supervisor>>,
}

struct Supervisor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct Shared {
    recognizer: Arc<dyn SpeechService>,
    dispatcher: Arc<CommandDispatcher>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    state: RwLock<VoiceSessionState>,
    listening: AtomicBool,
}

/// Marks a listening session as active for as long as it lives
struct ListeningGuard<'a>(&'a AtomicBool);

impl Drop for ListeningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl VoiceCommandLoop {
    /// Create a stopped loop
    #[must_use]
    pub fn new(
        recognizer: Arc<dyn SpeechService>,
        dispatcher: Arc<CommandDispatcher>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                recognizer,
                dispatcher,
                synthesizer,
                state: RwLock::new(VoiceSessionState::Idle),
                listening: AtomicBool::new(false),
            }),
            supervisor: Mutex::new(None),
        }
    }

    /// Current loop state
    #[must_use]
    pub fn state(&self) -> VoiceSessionState {
        *self.shared.state.read()
    }

    /// Whether the loop has been started and not stopped
    pub async fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .await
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Start listening; a running loop is stopped and restarted
    pub async fn start(&self) {
        let mut supervisor = self.supervisor.lock().await;

        if let Some(previous) = supervisor.take() {
            tracing::debug!("voice loop already running, restarting");
            self.shared.terminate(previous).await;
        }

        let cancel = CancellationToken::new();
        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let handle = tokio::spawn(async move { shared.run(token).await });

        *supervisor = Some(Supervisor { cancel, handle });
        tracing::info!("voice loop started");
    }

    /// Cancel the active session and release the recognizer
    ///
    /// The loop stays stopped until [`Self::start`] is called again. A reply
    /// still being resolved is discarded.
    pub async fn stop(&self) {
        let mut supervisor = self.supervisor.lock().await;

        if let Some(current) = supervisor.take() {
            self.shared.terminate(current).await;
        }

        self.shared.recognizer.release();
        self.shared.set_state(VoiceSessionState::Idle);
        tracing::info!("voice loop stopped");
    }
}

impl Shared {
    async fn run(&self, cancel: CancellationToken) {
        while !cancel.is_cancelled() {
            self.set_state(VoiceSessionState::Listening);

            let heard = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                heard = self.listen_once() => Some(heard),
            };
            let Some(heard) = heard else { break };

            let utterance = match heard {
                Ok(text) if !text.trim().is_empty() => text,
                Ok(_) => {
                    tracing::debug!("empty recognition result, listening again");
                    self.restart_session();
                    continue;
                }
                Err(e) => {
                    tracing::debug!(error = %e, "recognition ended without utterance, listening again");
                    self.restart_session();
                    continue;
                }
            };

            tracing::info!(utterance = %utterance, "heard utterance");
            self.set_state(VoiceSessionState::Processing);

            let reply = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                reply = self.dispatcher.resolve(&utterance) => Some(reply),
            };
            let Some(reply) = reply.filter(|_| !cancel.is_cancelled()) else {
                tracing::debug!("voice loop stopped while resolving, discarding reply");
                break;
            };

            self.set_state(VoiceSessionState::Speaking);
            tracing::info!(reply = %reply, "speaking reply");
            self.synthesizer.speak(&reply);

            self.set_state(VoiceSessionState::Idle);
        }

        self.set_state(VoiceSessionState::Idle);
    }

    async fn listen_once(&self) -> Result<String, RecognitionError> {
        let already_listening = self.listening.swap(true, Ordering::AcqRel);
        if already_listening {
            tracing::error!("listening session already active");
        }
        debug_assert!(!already_listening, "two listening sessions active");
        let _guard = ListeningGuard(&self.listening);

        self.recognizer.listen().await
    }

    /// Reset the recognizer before the next session
    fn restart_session(&self) {
        self.recognizer.cancel();
        self.set_state(VoiceSessionState::Idle);
    }

    async fn terminate(&self, supervisor: Supervisor) {
        supervisor.cancel.cancel();
        self.recognizer.cancel();

        if let Err(e) = supervisor.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "voice loop task panicked");
            }
        }

        // A session that registered with the recognizer after the first cancel
        self.recognizer.cancel();
    }

    fn set_state(&self, to: VoiceSessionState) {
        let mut state = self.state.write();
        if *state != to {
            tracing::trace!(from = %*state, %to, "voice state changed");
            *state = to;
        }
    }
}
