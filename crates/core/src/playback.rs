//! Speech playback control over an injected [`SpeechEngine`].
//!
//! The controller keeps one "current" utterance and a paused flag. New
//! response text goes through [`SpeechPlayback::on_response`]; changing the
//! voice or the pitch/rate/volume only affects the next utterance.

use crate::speech::{
    DEFAULT_PITCH, DEFAULT_RATE, DEFAULT_VOLUME, SpeechEngine, Utterance, VoicePreference,
    select_voice,
};
use anyhow::{Context, Result};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechSettings {
    pub voice: VoicePreference,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            voice: VoicePreference::default(),
            pitch: DEFAULT_PITCH,
            rate: DEFAULT_RATE,
            volume: DEFAULT_VOLUME,
        }
    }
}

pub struct SpeechPlayback<E: SpeechEngine> {
    engine: Arc<E>,
    settings: SpeechSettings,
    current: Option<Utterance>,
    paused: bool,
}

impl<E: SpeechEngine> SpeechPlayback<E> {
    pub fn new(engine: Arc<E>, settings: SpeechSettings) -> Self {
        Self {
            engine,
            settings,
            current: None,
            paused: false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn current(&self) -> Option<&Utterance> {
        self.current.as_ref()
    }

    pub fn settings(&self) -> &SpeechSettings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Speaks freshly arrived response text, replacing whatever was playing.
    pub async fn on_response(&mut self, text: &str) -> Result<()> {
        self.engine
            .cancel()
            .context("Failed to cancel previous speech")?;
        self.paused = false;

        let mut utterance = Utterance::new(text);
        self.apply_settings(&mut utterance).await;
        tracing::debug!(
            "Speaking response with voice {:?}",
            utterance.voice.as_ref().map(|v| v.name.as_str())
        );

        let result = self.engine.speak(&utterance).await;
        self.current = Some(utterance);
        result.context("Failed to start speech")
    }

    /// Resumes paused speech, or restarts the stored utterance with the
    /// current settings.
    pub async fn play(&mut self) -> Result<()> {
        if self.paused {
            self.engine.resume().context("Failed to resume speech")?;
            self.paused = false;
            return Ok(());
        }

        let Some(mut utterance) = self.current.take() else {
            tracing::debug!("Nothing to play yet");
            return Ok(());
        };
        self.apply_settings(&mut utterance).await;

        let result = match self.engine.cancel() {
            Ok(()) => self.engine.speak(&utterance).await,
            Err(e) => Err(e),
        };
        self.current = Some(utterance);
        result.context("Failed to replay speech")
    }

    pub fn pause(&mut self) -> Result<()> {
        self.engine.pause().context("Failed to pause speech")?;
        self.paused = true;
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        self.engine.cancel().context("Failed to stop speech")?;
        self.paused = false;
        Ok(())
    }

    pub fn set_voice(&mut self, voice: VoicePreference) {
        self.settings.voice = voice;
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.settings.pitch = pitch;
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.settings.rate = rate;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.settings.volume = volume;
    }

    async fn apply_settings(&self, utterance: &mut Utterance) {
        // The host may not have populated its voice list yet.
        let voices = match self.engine.voices().await {
            Ok(voices) => voices,
            Err(e) => {
                tracing::warn!("Could not list voices: {:?}", e);
                Vec::new()
            }
        };
        utterance.voice = select_voice(&voices, &self.settings.voice);
        utterance.pitch = self.settings.pitch;
        utterance.rate = self.settings.rate;
        utterance.volume = self.settings.volume;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::{MockSpeechEngine, Voice};
    use mockall::Sequence;

    fn english() -> Vec<Voice> {
        vec![Voice::new("English (America)", "en-us")]
    }

    #[tokio::test]
    async fn response_cancels_then_speaks_once_with_text() {
        let mut engine = MockSpeechEngine::new();
        let mut seq = Sequence::new();
        engine
            .expect_cancel()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(()));
        engine.expect_voices().returning(|| Ok(english()));
        engine
            .expect_speak()
            .withf(|u: &Utterance| {
                u.text == "Try deep breathing."
                    && u.voice.as_ref().is_some_and(|v| v.lang == "en-us")
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("Try deep breathing.").await.unwrap();

        assert_eq!(playback.current().unwrap().text, "Try deep breathing.");
        assert!(!playback.is_paused());
    }

    #[tokio::test]
    async fn missing_voices_still_speak_without_voice() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_cancel().returning(|| Ok(()));
        engine.expect_voices().returning(|| Ok(Vec::new()));
        engine
            .expect_speak()
            .withf(|u: &Utterance| u.voice.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("hello").await.unwrap();
    }

    #[tokio::test]
    async fn pause_then_play_resumes_instead_of_restarting() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_cancel().times(1).returning(|| Ok(()));
        engine.expect_voices().returning(|| Ok(english()));
        engine.expect_speak().times(1).returning(|_| Ok(()));
        engine.expect_pause().times(1).returning(|| Ok(()));
        engine.expect_resume().times(1).returning(|| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("hello").await.unwrap();

        playback.pause().unwrap();
        assert!(playback.is_paused());

        playback.play().await.unwrap();
        assert!(!playback.is_paused());
    }

    #[tokio::test]
    async fn play_after_stop_restarts_with_new_settings() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_cancel().times(3).returning(|| Ok(()));
        engine.expect_voices().returning(|| Ok(english()));
        engine
            .expect_speak()
            .withf(|u: &Utterance| u.pitch == 1.0)
            .times(1)
            .returning(|_| Ok(()));
        engine
            .expect_speak()
            .withf(|u: &Utterance| u.pitch == 1.5 && u.text == "hello")
            .times(1)
            .returning(|_| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("hello").await.unwrap();
        playback.stop().unwrap();
        playback.set_pitch(1.5);
        playback.play().await.unwrap();

        assert_eq!(playback.current().unwrap().pitch, 1.5);
    }

    #[tokio::test]
    async fn stop_after_replay_cancels_last() {
        let mut engine = MockSpeechEngine::new();
        let mut seq = Sequence::new();
        engine.expect_voices().returning(|| Ok(english()));
        // on_response
        engine.expect_cancel().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        engine.expect_speak().times(1).in_sequence(&mut seq).returning(|_| Ok(()));
        // play
        engine.expect_cancel().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        engine
            .expect_speak()
            .withf(|u: &Utterance| u.text == "hello")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        // stop
        engine.expect_cancel().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("hello").await.unwrap();
        playback.play().await.unwrap();
        playback.stop().unwrap();

        assert!(!playback.is_paused());
        assert_eq!(playback.current().unwrap().text, "hello");
    }

    #[tokio::test]
    async fn stop_while_paused_cancels_and_clears_pause() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_cancel().times(2).returning(|| Ok(()));
        engine.expect_voices().returning(|| Ok(english()));
        engine.expect_speak().times(1).returning(|_| Ok(()));
        engine.expect_pause().times(1).returning(|| Ok(()));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        playback.on_response("hello").await.unwrap();
        playback.pause().unwrap();
        playback.stop().unwrap();

        assert!(!playback.is_paused());
    }

    #[tokio::test]
    async fn setters_do_not_touch_the_engine() {
        // No expectations: any engine call would panic.
        let engine = MockSpeechEngine::new();
        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());

        playback.set_pitch(7.0);
        playback.set_rate(-1.0);
        playback.set_volume(3.0);
        playback.set_voice(VoicePreference {
            name: Some("French".to_string()),
            lang: None,
            fallback_to_first: false,
        });

        assert_eq!(playback.settings().pitch, 7.0);
        assert_eq!(playback.settings().rate, -1.0);
        assert_eq!(playback.settings().volume, 3.0);
        assert_eq!(playback.settings().voice.name.as_deref(), Some("French"));
    }

    #[tokio::test]
    async fn play_without_utterance_is_a_no_op() {
        let engine = MockSpeechEngine::new();
        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());

        playback.play().await.unwrap();
        assert!(playback.current().is_none());
    }

    #[tokio::test]
    async fn failed_speak_keeps_the_utterance() {
        let mut engine = MockSpeechEngine::new();
        engine.expect_cancel().returning(|| Ok(()));
        engine.expect_voices().returning(|| Err(anyhow::anyhow!("no voices yet")));
        engine
            .expect_speak()
            .returning(|_| Err(anyhow::anyhow!("device busy")));

        let mut playback = SpeechPlayback::new(Arc::new(engine), SpeechSettings::default());
        let result = playback.on_response("hello").await;

        assert!(result.is_err());
        assert_eq!(playback.current().unwrap().text, "hello");
    }
}
