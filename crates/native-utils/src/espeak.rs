use crate::audio;
use crate::output::OutputQueue;
use anyhow::{Context, Result};
use async_trait::async_trait;
use companion_core::speech::{SpeechEngine, Utterance, Voice};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub const DEFAULT_ESPEAK_BIN: &str = "espeak-ng";

// espeak-ng's own defaults, which a pitch or rate of 1.0 maps onto.
const ESPEAK_DEFAULT_PITCH: f32 = 50.0;
const ESPEAK_DEFAULT_WPM: f32 = 175.0;

/// Speech through the `espeak-ng` command line, played on a local output device.
pub struct EspeakEngine {
    bin: String,
    output: OutputQueue,
}

impl EspeakEngine {
    pub fn new(bin: &str, device_name: Option<String>) -> Result<Self> {
        let output = OutputQueue::open(device_name).context("Failed to open speech output")?;
        Ok(Self {
            bin: bin.to_string(),
            output,
        })
    }
}

/// Runs `bin` once for `utterance` and returns the WAV it writes to stdout.
pub async fn synthesize(bin: &str, utterance: &Utterance) -> Result<Vec<u8>> {
    let mut child = Command::new(bin)
        .args(synth_args(utterance))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to run {}", bin))?;

    // Write on a separate task: espeak may fill its stdout pipe before
    // it has read all of its input.
    let mut stdin = child.stdin.take().context("espeak stdin unavailable")?;
    let text = utterance.text.clone();
    let writer = tokio::spawn(async move { stdin.write_all(text.as_bytes()).await });

    let output = child
        .wait_with_output()
        .await
        .context("espeak did not finish")?;
    // A failed exit explains a broken pipe on the input side, so it wins.
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "{} exited with {}: {}",
            bin,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    writer
        .await
        .context("espeak input task failed")?
        .context("Failed to send text to espeak")?;
    Ok(output.stdout)
}

/// Command-line arguments for one utterance. Text goes in on stdin.
pub fn synth_args(utterance: &Utterance) -> Vec<String> {
    let mut args = vec!["--stdout".to_string()];
    if let Some(voice) = &utterance.voice {
        args.push("-v".to_string());
        args.push(voice.lang.clone());
    }
    let pitch = (utterance.pitch * ESPEAK_DEFAULT_PITCH).round().clamp(0.0, 99.0) as u32;
    let wpm = (utterance.rate * ESPEAK_DEFAULT_WPM).round().clamp(80.0, 450.0) as u32;
    args.push("-p".to_string());
    args.push(pitch.to_string());
    args.push("-s".to_string());
    args.push(wpm.to_string());
    args
}

/// Parses the table printed by `espeak-ng --voices`:
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
///  2  en-us           --/M      English_(America)  gmw/en-US            (en 3)
/// ```
pub fn parse_voice_table(table: &str) -> Vec<Voice> {
    table
        .lines()
        .filter(|line| !line.trim_start().starts_with("Pty"))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 4 {
                return None;
            }
            Some(Voice::new(&fields[3].replace('_', " "), fields[1]))
        })
        .collect()
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    async fn voices(&self) -> Result<Vec<Voice>> {
        let output = Command::new(&self.bin)
            .arg("--voices")
            .output()
            .await
            .with_context(|| format!("Failed to run {} --voices", self.bin))?;
        if !output.status.success() {
            return Err(anyhow::anyhow!("{} --voices exited with {}", self.bin, output.status));
        }
        Ok(parse_voice_table(&String::from_utf8_lossy(&output.stdout)))
    }

    async fn speak(&self, utterance: &Utterance) -> Result<()> {
        let wav = synthesize(&self.bin, utterance).await?;
        let decoded = audio::decode_wav(&wav).context("espeak produced unreadable audio")?;

        let mut samples =
            audio::resample(&decoded.samples, decoded.sample_rate, self.output.sample_rate())?;
        audio::apply_gain(&mut samples, utterance.volume);

        tracing::debug!(
            "Queueing {:.1}s of speech",
            samples.len() as f32 / self.output.sample_rate() as f32
        );
        self.output.enqueue(samples);
        Ok(())
    }

    fn pause(&self) -> Result<()> {
        self.output.control().set_paused(true);
        Ok(())
    }

    fn resume(&self) -> Result<()> {
        self.output.control().set_paused(false);
        Ok(())
    }

    fn cancel(&self) -> Result<()> {
        self.output.control().request_flush();
        Ok(())
    }
}
