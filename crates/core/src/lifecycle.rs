use crate::Notice;
use crate::chat::ChatApi;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub const EMPTY_INPUT_ALERT: &str = "Please insert your input";
pub const FETCH_ERROR_ALERT: &str = "Error fetching data";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Loading,
    Displayed,
    Errored,
}

/// What the form shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewState {
    pub phase: Phase,
    pub loading: bool,
    pub message: Option<String>,
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            phase: Phase::Idle,
            loading: false,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Empty input, nothing was sent.
    Rejected,
    /// The response was rendered. `None` when it had no readable content.
    Displayed(Option<String>),
    /// The request failed and the user was alerted.
    Failed,
    /// A newer submission was made while this one was in flight.
    Superseded,
}

/// Drives `Idle -> Loading -> {Displayed, Errored}` for each submission.
///
/// Every submission takes a generation number. Only the completion carrying
/// the latest generation may touch the view; older ones are dropped.
pub struct RequestLifecycle<C: ChatApi> {
    api: Arc<C>,
    state: Arc<Mutex<ViewState>>,
    generation: Arc<AtomicU64>,
    notice_tx: tokio::sync::mpsc::Sender<Notice>,
}

impl<C: ChatApi> Clone for RequestLifecycle<C> {
    fn clone(&self) -> Self {
        Self {
            api: self.api.clone(),
            state: self.state.clone(),
            generation: self.generation.clone(),
            notice_tx: self.notice_tx.clone(),
        }
    }
}

impl<C: ChatApi> RequestLifecycle<C> {
    pub fn new(api: Arc<C>, notice_tx: tokio::sync::mpsc::Sender<Notice>) -> Self {
        Self {
            api,
            state: Arc::new(Mutex::new(ViewState::default())),
            generation: Arc::new(AtomicU64::new(0)),
            notice_tx,
        }
    }

    /// A snapshot of the current view.
    pub fn view(&self) -> ViewState {
        self.lock_state().clone()
    }

    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        if input.is_empty() {
            tracing::debug!("Rejected empty submission");
            self.notify(Notice::Alert(EMPTY_INPUT_ALERT.to_string()))
                .await;
            return SubmitOutcome::Rejected;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.lock_state();
            state.phase = Phase::Loading;
            state.loading = true;
        }
        tracing::info!("Submitting request #{}", generation);
        self.notify(Notice::Loading).await;

        let result = self.api.complete(input).await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Dropping stale response for request #{}", generation);
            return SubmitOutcome::Superseded;
        }

        match result {
            Ok(content) => {
                {
                    let mut state = self.lock_state();
                    state.message = content.clone();
                    state.loading = false;
                    state.phase = Phase::Displayed;
                }
                tracing::info!("Request #{} answered", generation);
                self.notify(Notice::Message(content.clone())).await;
                SubmitOutcome::Displayed(content)
            }
            Err(e) => {
                tracing::error!("Error fetching data: {:?}", e);
                {
                    let mut state = self.lock_state();
                    state.loading = false;
                    state.phase = Phase::Errored;
                }
                self.notify(Notice::Alert(FETCH_ERROR_ALERT.to_string()))
                    .await;
                SubmitOutcome::Failed
            }
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ViewState> {
        // The view stays readable even if a holder panicked.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn notify(&self, notice: Notice) {
        if let Err(e) = self.notice_tx.send(notice).await {
            tracing::warn!("Notice receiver dropped: {:?}", e);
        }
    }
}
