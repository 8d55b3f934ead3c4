use crate::Notice;
use crate::chat::ChatApi;
use crate::lifecycle::{RequestLifecycle, SubmitOutcome, ViewState};
use crate::playback::{SpeechPlayback, SpeechSettings};
use crate::speech::SpeechEngine;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The form: a request lifecycle whose answers are handed to speech playback.
pub struct Companion<C: ChatApi, E: SpeechEngine> {
    lifecycle: RequestLifecycle<C>,
    playback: Arc<Mutex<SpeechPlayback<E>>>,
    engine: Arc<E>,
}

impl<C: ChatApi, E: SpeechEngine> Clone for Companion<C, E> {
    fn clone(&self) -> Self {
        Self {
            lifecycle: self.lifecycle.clone(),
            playback: self.playback.clone(),
            engine: self.engine.clone(),
        }
    }
}

impl<C: ChatApi, E: SpeechEngine> Companion<C, E> {
    pub fn new(
        api: Arc<C>,
        engine: Arc<E>,
        settings: SpeechSettings,
        notice_tx: tokio::sync::mpsc::Sender<Notice>,
    ) -> Self {
        Self {
            lifecycle: RequestLifecycle::new(api, notice_tx),
            playback: Arc::new(Mutex::new(SpeechPlayback::new(engine.clone(), settings))),
            engine,
        }
    }

    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        let outcome = self.lifecycle.submit(input).await;

        // The only place speech is started for new text.
        if let SubmitOutcome::Displayed(Some(text)) = &outcome {
            if let Err(e) = self.playback.lock().await.on_response(text).await {
                tracing::warn!("Speech failed: {:?}", e);
            }
        }
        outcome
    }

    pub fn view(&self) -> ViewState {
        self.lifecycle.view()
    }

    pub fn playback(&self) -> &Arc<Mutex<SpeechPlayback<E>>> {
        &self.playback
    }

    /// Silences the engine without taking the playback lock, which an
    /// in-flight `on_response` may hold until synthesis finishes.
    pub fn interrupt(&self) -> anyhow::Result<()> {
        self.engine.cancel()
    }
}
