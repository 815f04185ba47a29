//! Token drain buffer
//!
//! Answer fragments arrive in bursts. They are queued character by character
//! and an emitter task moves at most one character per tick into the
//! assistant message, so rendering speed does not depend on network timing.
//!
//! Phases: `Idle -> Streaming -> Draining -> Done`, with `Error` reachable
//! from any non-final phase on network failure and `Cancelled` on teardown.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::chat::record::{RecordDecoder, StreamRecord};
use crate::chat::types::{step_label, ChatState, MessageId};
use crate::config::DrainConfig;

/// Chat state shared between the drain emitter and the presentation layer
pub type SharedChatState = Arc<RwLock<ChatState>>;

/// Lifecycle of one streamed assistant response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPhase {
    /// Created, emitter not started
    Idle,
    /// Network still delivering chunks
    Streaming,
    /// Network done, queued characters remain
    Draining,
    /// Network done and every character rendered
    Done,
    /// Network failure; rendering stopped
    Error(String),
    /// Torn down by its owner
    Cancelled,
}

impl StreamPhase {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            StreamPhase::Done | StreamPhase::Error(_) | StreamPhase::Cancelled
        )
    }
}

#[derive(Debug, Default)]
struct DrainQueue {
    chars: VecDeque<char>,
    network_done: bool,
}

/// State shared with the emitter task
struct Shared {
    message_id: MessageId,
    state: SharedChatState,
    queue: Mutex<DrainQueue>,
    phase: watch::Sender<StreamPhase>,
    cancel: CancellationToken,
}

impl Shared {
    /// Move to `to` unless a final phase was already reached
    fn transition(&self, to: StreamPhase) -> bool {
        self.phase.send_if_modified(|phase| {
            if phase.is_final() || *phase == to {
                return false;
            }
            *phase = to.clone();
            true
        })
    }

    fn pop_char(&self) -> Option<char> {
        self.queue.lock().ok()?.chars.pop_front()
    }

    fn has_pending(&self) -> bool {
        self.queue
            .lock()
            .map(|q| !q.chars.is_empty())
            .unwrap_or(false)
    }

    fn is_drained(&self) -> bool {
        self.queue
            .lock()
            .map(|q| q.network_done && q.chars.is_empty())
            .unwrap_or(false)
    }

    /// Mark the session done and end the processing state
    async fn complete(&self) {
        if !self.transition(StreamPhase::Done) {
            return;
        }
        self.cancel.cancel();
        self.state.write().await.is_processing = false;
        log::info!("Stream {} finished rendering", self.message_id);
    }
}

/// One in-flight assistant response
pub struct StreamSession {
    shared: Arc<Shared>,
    decoder: Mutex<RecordDecoder>,
    config: DrainConfig,
    emitter: Mutex<Option<JoinHandle<()>>>,
}

impl StreamSession {
    /// Create an idle session rendering into the assistant message `message_id`
    pub fn new(message_id: MessageId, state: SharedChatState, config: DrainConfig) -> Self {
        let (phase, _) = watch::channel(StreamPhase::Idle);
        Self {
            shared: Arc::new(Shared {
                message_id,
                state,
                queue: Mutex::new(DrainQueue::default()),
                phase,
                cancel: CancellationToken::new(),
            }),
            decoder: Mutex::new(RecordDecoder::new()),
            config,
            emitter: Mutex::new(None),
        }
    }

    pub fn message_id(&self) -> MessageId {
        self.shared.message_id
    }

    pub fn phase(&self) -> StreamPhase {
        self.shared.phase.borrow().clone()
    }

    /// Token that stops the emitter when cancelled
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// Characters received but not yet rendered
    pub fn pending_len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|q| q.chars.len())
            .unwrap_or(0)
    }

    /// Start the emitter. Must be called from within a tokio runtime.
    /// Calling it again is a no-op.
    pub fn start(&self) {
        if !self.shared.transition(StreamPhase::Streaming) {
            return;
        }

        let shared = self.shared.clone();
        let tick = self.config.effective_tick();
        let check = self.config.effective_completion_check();
        let handle = tokio::spawn(run_emitter(shared, tick, check));

        if let Ok(mut slot) = self.emitter.lock() {
            *slot = Some(handle);
        }
        log::debug!("Stream {} started (tick {:?})", self.shared.message_id, tick);
    }

    /// Feed one raw network chunk
    pub async fn on_chunk(&self, chunk: &[u8]) {
        if self.phase().is_final() {
            log::warn!(
                "Ignoring chunk for finished stream {}",
                self.shared.message_id
            );
            return;
        }

        let records = match self.decoder.lock() {
            Ok(mut decoder) => decoder.push(chunk),
            Err(e) => {
                log::error!("Decoder lock poisoned: {}", e);
                return;
            }
        };
        self.apply_records(records).await;
    }

    /// The response body has ended. Remaining characters keep draining; the
    /// completion check finishes the session once the queue is empty.
    pub async fn on_network_done(&self) {
        if self.phase().is_final() {
            return;
        }

        let records = match self.decoder.lock() {
            Ok(mut decoder) => decoder.finish(),
            Err(_) => Vec::new(),
        };
        self.apply_records(records).await;

        let remaining = match self.shared.queue.lock() {
            Ok(mut queue) => {
                queue.network_done = true;
                queue.chars.len()
            }
            Err(_) => 0,
        };

        if remaining == 0 {
            self.shared.complete().await;
        } else {
            self.shared.transition(StreamPhase::Draining);
            log::debug!(
                "Stream {} network done, {} characters left to render",
                self.shared.message_id,
                remaining
            );
        }
    }

    /// Abort on network failure: stop rendering immediately and surface the
    /// error in the chat state.
    pub async fn fail(&self, error: impl Into<String>) {
        let error = error.into();
        if !self.shared.transition(StreamPhase::Error(error.clone())) {
            return;
        }
        self.shared.cancel.cancel();
        self.abort_emitter();

        log::error!("Stream {} failed: {}", self.shared.message_id, error);
        let mut state = self.shared.state.write().await;
        state.error = Some(error);
        state.is_processing = false;
    }

    /// Tear the session down without touching the chat state again
    pub fn cancel(&self) {
        if self.shared.transition(StreamPhase::Cancelled) {
            log::info!("Stream {} cancelled", self.shared.message_id);
        }
        self.shared.cancel.cancel();
        self.abort_emitter();
    }

    /// Wait until the session reaches a final phase
    pub async fn wait(&self) -> StreamPhase {
        let mut rx = self.shared.phase.subscribe();
        let result = rx.wait_for(|phase| phase.is_final()).await;
        match result {
            Ok(phase) => phase.clone(),
            Err(_) => StreamPhase::Cancelled,
        }
    }

    fn abort_emitter(&self) {
        if let Ok(mut slot) = self.emitter.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }

    async fn apply_records(&self, records: Vec<StreamRecord>) {
        for record in records {
            if let Some(step) = record.step {
                tick_debug!(
                    "Stream {} step {} ({})",
                    self.shared.message_id,
                    step,
                    record.status.as_deref().or(step_label(step)).unwrap_or("?")
                );
                self.shared.state.write().await.current_step = step;
            }

            if let Some(error) = record.error {
                log::warn!("Backend reported error for {}: {}", self.shared.message_id, error);
                self.shared.state.write().await.error = Some(error);
            }

            if let Some(answer) = record.answer {
                if let Ok(mut queue) = self.shared.queue.lock() {
                    queue.chars.extend(answer.chars());
                }
            }
        }
    }
}

/// Emitter loop: one character per drain tick, completion check on its own
/// slower tick, both stopped by the session's cancel token.
async fn run_emitter(shared: Arc<Shared>, tick: Duration, check_every: Duration) {
    let mut drain = tokio::time::interval(tick);
    drain.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut check = tokio::time::interval(check_every);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            _ = drain.tick() => {
                if !shared.has_pending() {
                    continue;
                }
                // A character leaves the queue only under the state lock, so
                // completion can never observe it as neither queued nor rendered
                let mut state = shared.state.write().await;
                if shared.cancel.is_cancelled() {
                    break;
                }
                let Some(ch) = shared.pop_char() else {
                    continue;
                };
                if !state.append_to(shared.message_id, ch) {
                    log::warn!("Assistant message {} no longer exists", shared.message_id);
                }
                tick_trace!("Stream {} rendered {:?}", shared.message_id, ch);
            }
            _ = check.tick() => {
                if shared.is_drained() {
                    shared.complete().await;
                    break;
                }
            }
        }
    }
    tick_debug!("Emitter for {} stopped", shared.message_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::types::ChatMessage;
    use uuid::Uuid;

    fn session_with(tick_ms: u64) -> (StreamSession, SharedChatState, MessageId) {
        let id = Uuid::new_v4();
        let state: SharedChatState = Arc::new(RwLock::new(ChatState {
            messages: vec![ChatMessage::user("q"), ChatMessage::pending_assistant(id)],
            is_processing: true,
            ..Default::default()
        }));
        let config = DrainConfig {
            tick: Duration::from_millis(tick_ms),
            completion_check: Duration::from_millis(100),
        };
        (StreamSession::new(id, state.clone(), config), state, id)
    }

    async fn content(state: &SharedChatState, id: MessageId) -> String {
        state
            .read()
            .await
            .assistant_content(id)
            .unwrap_or_default()
            .to_string()
    }

    #[tokio::test(start_paused = true)]
    async fn test_renders_concatenated_answers_in_order() {
        let (session, state, id) = session_with(1);
        session.start();

        session.on_chunk(b"{\"step\": 1}\n{\"answer\": \"The 10-K \"}\n{\"ans").await;
        session.on_chunk(b"wer\": \"lists \"}\n").await;
        session.on_chunk(b"{\"answer\": \"liquidity risk.\"}\n{\"step\": 5}\n").await;
        session.on_network_done().await;

        assert_eq!(session.wait().await, StreamPhase::Done);
        assert_eq!(content(&state, id).await, "The 10-K lists liquidity risk.");
        assert!(!state.read().await.is_processing);
        assert_eq!(state.read().await.current_step, 5);
    }

    /// Multi-record body with multibyte characters and an unterminated last
    /// record
    const BODY: &str = concat!(
        "{\"status\": \"Analyzing Query\", \"step\": 1}\n",
        "{\"answer\": \"Net € \"}\n",
        "{\"answer\": \"exposure\"}\n",
        "{\"step\": 5}\n",
        "{\"answer\": \" café.\"}",
    );
    const BODY_ANSWER: &str = "Net € exposure café.";

    #[tokio::test(start_paused = true)]
    async fn test_any_single_split_renders_full_answer() {
        let body = BODY.as_bytes();
        for offset in 0..=body.len() {
            let (session, state, id) = session_with(1);
            session.start();
            session.on_chunk(&body[..offset]).await;
            session.on_chunk(&body[offset..]).await;
            session.on_network_done().await;

            assert_eq!(session.wait().await, StreamPhase::Done, "split at {}", offset);
            assert_eq!(content(&state, id).await, BODY_ANSWER, "split at {}", offset);
            assert_eq!(state.read().await.current_step, 5);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_chunk_size_and_tick_timing_do_not_change_answer() {
        let body = BODY.as_bytes();
        for tick_ms in [1, 3, 7] {
            for size in 1..=9 {
                let (session, state, id) = session_with(tick_ms);
                session.start();
                for chunk in body.chunks(size) {
                    session.on_chunk(chunk).await;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }

                // Network ends while a reader holds the state
                let reader = state.read().await;
                tokio::time::sleep(Duration::from_millis(tick_ms * 2)).await;
                tokio::join!(session.on_network_done(), async move { drop(reader) });

                assert_eq!(session.wait().await, StreamPhase::Done);
                assert_eq!(
                    content(&state, id).await,
                    BODY_ANSWER,
                    "chunk size {}, tick {}ms",
                    size,
                    tick_ms
                );
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_character_survives_busy_state_lock() {
        let (session, state, id) = session_with(1);
        session.start();
        session.on_chunk(b"{\"answer\": \"a\"}\n").await;

        // The emitter's tick fires while the state is being read
        let reader = state.read().await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(session.pending_len(), 1);

        tokio::join!(session.on_network_done(), async move { drop(reader) });

        assert_eq!(session.wait().await, StreamPhase::Done);
        assert_eq!(content(&state, id).await, "a");
        assert_eq!(session.pending_len(), 0);
        assert!(!state.read().await.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draining_until_queue_is_empty() {
        let (session, state, id) = session_with(10);
        session.start();

        session.on_chunk(b"{\"answer\": \"abcdef\"}\n").await;
        session.on_network_done().await;

        assert_eq!(session.phase(), StreamPhase::Draining);
        assert!(session.pending_len() > 0);
        assert!(state.read().await.is_processing);

        assert_eq!(session.wait().await, StreamPhase::Done);
        assert_eq!(session.pending_len(), 0);
        assert_eq!(content(&state, id).await, "abcdef");
    }

    #[tokio::test(start_paused = true)]
    async fn test_at_most_one_character_per_tick() {
        let (session, state, id) = session_with(10);
        session.start();
        session.on_chunk(b"{\"answer\": \"abcdefgh\"}\n").await;

        tokio::time::sleep(Duration::from_millis(25)).await;

        let rendered = content(&state, id).await;
        assert!(!rendered.is_empty());
        assert!(rendered.len() <= 4, "rendered too fast: {:?}", rendered);
        assert!("abcdefgh".starts_with(&rendered));
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_done_with_empty_queue_completes() {
        let (session, state, _) = session_with(1);
        session.start();
        session.on_chunk(b"{\"step\": 2}\n").await;
        session.on_network_done().await;

        assert_eq!(session.phase(), StreamPhase::Done);
        assert!(!state.read().await.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_record_does_not_abort() {
        let (session, state, id) = session_with(1);
        session.start();
        session.on_chunk(b"{\"answer\": \"good\"}\n{not json}\n").await;
        session.on_network_done().await;

        assert_eq!(session.wait().await, StreamPhase::Done);
        assert_eq!(content(&state, id).await, "good");
        assert!(state.read().await.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_step_updates_are_not_buffered() {
        let (session, state, _) = session_with(50);
        session.start();
        session.on_chunk(b"{\"answer\": \"long answer text\"}\n{\"step\": 4}\n").await;

        assert_eq!(state.read().await.current_step, 4);
        assert!(session.pending_len() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_stops_rendering() {
        let (session, state, id) = session_with(10);
        session.start();
        session.on_chunk(b"{\"answer\": \"abcdefghij\"}\n").await;
        tokio::time::sleep(Duration::from_millis(15)).await;

        session.fail("connection reset").await;
        let before = content(&state, id).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(session.phase(), StreamPhase::Error("connection reset".to_string()));
        assert_eq!(content(&state, id).await, before);
        let state = state.read().await;
        assert_eq!(state.error.as_deref(), Some("connection reset"));
        assert!(!state.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_before_start() {
        let (session, state, _) = session_with(1);
        session.fail("refused").await;
        assert_eq!(session.phase(), StreamPhase::Error("refused".to_string()));
        assert!(!state.read().await.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_leaves_state_untouched() {
        let (session, state, id) = session_with(10);
        session.start();
        session.on_chunk(b"{\"answer\": \"abcdefghij\"}\n").await;
        session.cancel();

        tokio::time::sleep(Duration::from_millis(200)).await;
        session.on_chunk(b"{\"answer\": \"more\"}\n").await;

        assert_eq!(session.wait().await, StreamPhase::Cancelled);
        assert!(content(&state, id).await.len() <= 1);
        assert!(state.read().await.is_processing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_error_record_is_recorded() {
        let (session, state, _) = session_with(1);
        session.start();
        session
            .on_chunk(b"{\"status\": \"Error\", \"step\": 5, \"error\": \"MCP unavailable\"}\n")
            .await;
        session.on_network_done().await;

        assert_eq!(session.wait().await, StreamPhase::Done);
        assert_eq!(state.read().await.error.as_deref(), Some("MCP unavailable"));
    }
}
