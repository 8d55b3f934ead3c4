use anyhow::Result;
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

pub const DEFAULT_PITCH: f32 = 1.0;
pub const DEFAULT_RATE: f32 = 1.0;
pub const DEFAULT_VOLUME: f32 = 1.0;

/// A voice offered by the host speech service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Voice {
    pub name: String,
    /// Locale tag, e.g. `en-us`.
    pub lang: String,
    pub default: bool,
}

impl Voice {
    pub fn new(name: &str, lang: &str) -> Self {
        Self {
            name: name.to_string(),
            lang: lang.to_string(),
            default: false,
        }
    }
}

/// A unit of text plus the parameters it is spoken with.
///
/// Pitch, rate and volume use the conventional scale where `1.0` is the
/// engine's normal value. Nothing here clamps them.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub voice: Option<Voice>,
    pub pitch: f32,
    pub rate: f32,
    pub volume: f32,
}

impl Utterance {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            voice: None,
            pitch: DEFAULT_PITCH,
            rate: DEFAULT_RATE,
            volume: DEFAULT_VOLUME,
        }
    }
}

// The host's speech capability, reduced to the operations the playback
// controller needs. There is a single queue behind it: `speak` replaces
// nothing by itself, callers `cancel` first when they want a clean start.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Lists the voices currently known to the host. May be empty while the
    /// host is still populating its list.
    async fn voices(&self) -> Result<Vec<Voice>>;

    /// Queues an utterance. Returns once it is queued, not once it is heard.
    async fn speak(&self, utterance: &Utterance) -> Result<()>;

    fn pause(&self) -> Result<()>;

    fn resume(&self) -> Result<()>;

    /// Drops everything queued or playing and leaves the engine unpaused.
    fn cancel(&self) -> Result<()>;
}

/// How a voice is picked out of the host's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePreference {
    pub name: Option<String>,
    pub lang: Option<String>,
    /// Take the first listed voice when nothing matches.
    pub fallback_to_first: bool,
}

impl Default for VoicePreference {
    fn default() -> Self {
        Self {
            name: None,
            lang: Some("en-us".to_string()),
            fallback_to_first: true,
        }
    }
}

fn normalize_lang(lang: &str) -> String {
    lang.trim().to_lowercase().replace('_', "-")
}

fn lang_matches(voice_lang: &str, wanted: &str) -> bool {
    let voice_lang = normalize_lang(voice_lang);
    let wanted = normalize_lang(wanted);
    if voice_lang == wanted {
        return true;
    }
    // "en" accepts "en-us", and "en-us" accepts a bare "en" voice.
    voice_lang.starts_with(&format!("{wanted}-")) || wanted.starts_with(&format!("{voice_lang}-"))
}

/// Picks a voice by exact name, then partial name, then locale, then
/// (optionally) the first voice listed.
pub fn select_voice(voices: &[Voice], preference: &VoicePreference) -> Option<Voice> {
    if let Some(name) = preference.name.as_deref().map(str::to_lowercase) {
        if let Some(voice) = voices.iter().find(|v| v.name.to_lowercase() == name) {
            return Some(voice.clone());
        }
        if let Some(voice) = voices.iter().find(|v| v.name.to_lowercase().contains(&name)) {
            return Some(voice.clone());
        }
    }

    if let Some(lang) = preference.lang.as_deref() {
        let mut candidates = voices.iter().filter(|v| lang_matches(&v.lang, lang));
        if let Some(first) = candidates.next() {
            let chosen = std::iter::once(first)
                .chain(candidates)
                .find(|v| v.default)
                .unwrap_or(first);
            return Some(chosen.clone());
        }
    }

    if preference.fallback_to_first {
        return voices.first().cloned();
    }
    None
}

/// A speech engine that only logs what it would have said.
#[derive(Debug, Default)]
pub struct SilentEngine;

#[async_trait]
impl SpeechEngine for SilentEngine {
    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(Vec::new())
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        tracing::info!("(silent) would speak: \"{}\"", utterance.text);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        Ok(())
    }
}
