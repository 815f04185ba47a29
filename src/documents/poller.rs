//! Document status poller
//!
//! Keeps the displayed document list in step with the backend while
//! documents are being processed. Only documents in a non-terminal status
//! are polled; the poller stops by itself once none are left.

use std::sync::{Arc, Mutex, RwLock as StdRwLock};

use futures_util::future::join_all;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::api::backend::DocumentBackend;
use crate::config::{PollConfig, RetryPolicy};
use crate::documents::types::DocumentStatus;
use crate::error::Result;

/// Document list shared with the presentation layer
pub type SharedDocuments = Arc<RwLock<Vec<DocumentStatus>>>;

/// A document still being polled
#[derive(Debug, Clone, PartialEq)]
struct WorkingEntry {
    /// Position in the displayed list when polling started
    index: usize,
    id: String,
    /// Failed status queries in a row
    failures: u32,
    /// Non-terminal responses received
    polls: u32,
}

struct PollTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PollTask {
    fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && !self.handle.is_finished()
    }
}

/// Polls `/uploads/is-processed/{id}` for every unfinished document
pub struct DocumentPoller {
    backend: Arc<dyn DocumentBackend>,
    documents: SharedDocuments,
    working: Arc<Mutex<Vec<WorkingEntry>>>,
    config: PollConfig,
    task: Mutex<Option<PollTask>>,
    current: StdRwLock<Option<String>>,
}

impl DocumentPoller {
    pub fn new(backend: Arc<dyn DocumentBackend>, config: PollConfig) -> Self {
        Self {
            backend,
            documents: Arc::new(RwLock::new(Vec::new())),
            working: Arc::new(Mutex::new(Vec::new())),
            config,
            task: Mutex::new(None),
            current: StdRwLock::new(None),
        }
    }

    /// Shared handle to the displayed document list
    pub fn shared_documents(&self) -> SharedDocuments {
        self.documents.clone()
    }

    /// Copy of the displayed document list
    pub async fn documents(&self) -> Vec<DocumentStatus> {
        self.documents.read().await.clone()
    }

    /// Ids of the documents still being polled
    pub fn working_set(&self) -> Vec<String> {
        self.working
            .lock()
            .map(|w| w.iter().map(|e| e.id.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .map(|slot| slot.as_ref().map_or(false, PollTask::is_running))
            .unwrap_or(false)
    }

    /// Show `initial` and start polling its unfinished documents.
    ///
    /// Returns true if a poll timer was started. Nothing happens while a
    /// timer is already running, and no timer is created when every
    /// document is already terminal.
    pub async fn start(&self, initial: Vec<DocumentStatus>) -> bool {
        if self.is_running() {
            log::debug!("Document poller already running, ignoring start");
            return false;
        }

        let working: Vec<WorkingEntry> = initial
            .iter()
            .enumerate()
            .filter(|(_, doc)| !doc.is_terminal())
            .map(|(index, doc)| WorkingEntry {
                index,
                id: doc.id.clone(),
                failures: 0,
                polls: 0,
            })
            .collect();

        let total = initial.len();
        *self.documents.write().await = initial;

        if working.is_empty() {
            log::debug!("All {} documents already processed, not polling", total);
            return false;
        }

        let mut slot = match self.task.lock() {
            Ok(slot) => slot,
            Err(e) => {
                log::error!("Poller lock poisoned: {}", e);
                return false;
            }
        };
        if slot.as_ref().map_or(false, PollTask::is_running) {
            return false;
        }

        log::info!(
            "Polling {} of {} documents every {:?}",
            working.len(),
            total,
            self.config.effective_interval()
        );
        if let Ok(mut set) = self.working.lock() {
            *set = working;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_poller(
            self.backend.clone(),
            self.documents.clone(),
            self.working.clone(),
            self.config.clone(),
            cancel.clone(),
        ));
        *slot = Some(PollTask { cancel, handle });
        true
    }

    /// Fetch the user's documents and poll the unfinished ones. Restarts the
    /// timer if one is running.
    pub async fn refresh(&self) -> Result<Vec<DocumentStatus>> {
        let documents = self.backend.list_documents().await?;
        self.stop();
        self.start(documents.clone()).await;
        Ok(documents)
    }

    /// Stop polling immediately. Responses still in flight are discarded.
    pub fn stop(&self) {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if task.is_running() {
                log::info!("Document poller stopped");
            }
            task.cancel.cancel();
            task.handle.abort();
        }
    }

    /// Select the document chat questions refer to. Returns false for an
    /// unknown id.
    pub async fn select_document(&self, id: Option<&str>) -> bool {
        if let Some(id) = id {
            if !self.documents.read().await.iter().any(|d| d.id == id) {
                return false;
            }
        }
        if let Ok(mut current) = self.current.write() {
            *current = id.map(str::to_string);
        }
        true
    }

    /// The selected document, as currently displayed
    pub async fn current_document(&self) -> Option<DocumentStatus> {
        let id = self.current.read().ok()?.clone()?;
        self.documents
            .read()
            .await
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }
}

impl Drop for DocumentPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_poller(
    backend: Arc<dyn DocumentBackend>,
    documents: SharedDocuments,
    working: Arc<Mutex<Vec<WorkingEntry>>>,
    config: PollConfig,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.effective_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick completes immediately; the first poll waits a full period
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {}
        }

        let targets: Vec<String> = match working.lock() {
            Ok(set) => set.iter().map(|e| e.id.clone()).collect(),
            Err(_) => break,
        };
        if targets.is_empty() {
            break;
        }

        let queries = targets.iter().map(|id| backend.document_status(id));
        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            results = join_all(queries) => results,
        };

        let mut docs = documents.write().await;
        if cancel.is_cancelled() {
            break;
        }
        let remaining = match working.lock() {
            Ok(mut set) => {
                apply_results(&mut set, &mut docs, targets.into_iter().zip(results), &config.retry);
                set.len()
            }
            Err(_) => break,
        };
        drop(docs);

        tick_debug!("Poll tick done, {} documents still processing", remaining);
        if remaining == 0 {
            log::info!("All documents reached a terminal status, poller stopping");
            cancel.cancel();
            break;
        }
    }
}

/// Merge one tick's responses into the displayed list and shrink the
/// working set
fn apply_results<I>(
    working: &mut Vec<WorkingEntry>,
    docs: &mut [DocumentStatus],
    results: I,
    retry: &RetryPolicy,
) where
    I: IntoIterator<Item = (String, Result<DocumentStatus>)>,
{
    for (id, result) in results {
        let Some(pos) = working.iter().position(|e| e.id == id) else {
            continue;
        };

        let keep = match result {
            Ok(record) => {
                let terminal = record.is_terminal();
                let entry = &mut working[pos];
                entry.failures = 0;
                entry.polls += 1;

                let slot = match docs.get(entry.index) {
                    Some(doc) if doc.id == id => Some(entry.index),
                    _ => docs.iter().position(|d| d.id == id),
                };
                match slot {
                    Some(index) => {
                        entry.index = index;
                        docs[index] = record;
                    }
                    None => {
                        log::warn!("Document {} is no longer listed, dropping it", id);
                        working.remove(pos);
                        continue;
                    }
                }

                if terminal {
                    log::info!("Document {} finished processing", id);
                    false
                } else if retry.max_polls.map_or(false, |max| entry.polls >= max) {
                    log::warn!(
                        "Document {} still not processed after {} polls, giving up",
                        id,
                        entry.polls
                    );
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                let entry = &mut working[pos];
                entry.failures += 1;
                let level = if e.is_transient() {
                    log::Level::Warn
                } else {
                    log::Level::Error
                };
                log::log!(
                    level,
                    "Status query for document {} failed ({} in a row): {}",
                    id,
                    entry.failures,
                    e
                );
                match retry.max_consecutive_failures {
                    Some(max) if entry.failures >= max => {
                        log::error!("Giving up on document {} after {} failures", id, entry.failures);
                        false
                    }
                    _ => true,
                }
            }
        };

        if !keep {
            working.remove(pos);
        }
    }
}
