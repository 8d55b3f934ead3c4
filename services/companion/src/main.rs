use anyhow::{Context, Result};
use clap::Parser;
use companion_core::chat::{ChatApi, ChatClient, ChatClientConfig};
use companion_core::playback::SpeechSettings;
use companion_core::speech::{SilentEngine, SpeechEngine};
use companion_core::{Companion, Notice};
use companion_native_utils::EspeakEngine;
use companion_service::config::{API_KEY_VAR, Config, SpeechBackend};
use companion_service::form::{self, FormInput};
use companion_service::prompt_loader;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Ask mental-health questions and hear the answers")]
struct Cli {
    /// Print answers without speaking them
    #[arg(long)]
    silent: bool,
    /// Preferred voice name
    #[arg(long)]
    voice: Option<String>,
    /// Speech pitch, 1.0 is normal
    #[arg(long)]
    pitch: Option<f32>,
    /// Speech rate, 1.0 is normal
    #[arg(long)]
    rate: Option<f32>,
    /// Speech volume, 1.0 is normal
    #[arg(long)]
    volume: Option<f32>,
    /// List audio output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    // Logs go to stderr so they stay out of the form's output.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    // --- 3. Parse Command-Line Arguments ---
    let args = Cli::parse();

    if args.list_devices {
        println!("{}", companion_native_utils::device::get_available_outputs()?);
        return Ok(());
    }

    tracing::info!("Configuration loaded. Using model {}", config.chat_model);
    if config.api_key.is_none() {
        tracing::warn!("{} is not set; the chat endpoint will refuse requests", API_KEY_VAR);
    }

    // --- 4. Chat Client ---
    let persona = prompt_loader::persona_prompt(&config.prompts_dir);
    let chat_config = ChatClientConfig::builder()
        .with_endpoint(&config.chat_endpoint)
        .with_model(&config.chat_model)
        .with_api_key(config.api_key.as_deref())
        .with_system_prompt(&persona)
        .with_timeout(config.chat_timeout)
        .build();
    let chat = Arc::new(ChatClient::new(chat_config)?);

    // --- 5. Speech Settings ---
    let mut settings = SpeechSettings {
        voice: config.voice.clone(),
        ..SpeechSettings::default()
    };
    if let Some(voice) = args.voice.clone() {
        settings.voice.name = Some(voice);
    }
    if let Some(pitch) = args.pitch {
        settings.pitch = pitch;
    }
    if let Some(rate) = args.rate {
        settings.rate = rate;
    }
    if let Some(volume) = args.volume {
        settings.volume = volume;
    }

    // --- 6. Speech Engine and Form ---
    let backend = if args.silent {
        SpeechBackend::Silent
    } else {
        config.speech_backend
    };
    match backend {
        SpeechBackend::Espeak => {
            match EspeakEngine::new(&config.espeak_bin, config.output_device.clone()) {
                Ok(engine) => run_form(chat, Arc::new(engine), settings).await,
                Err(e) => {
                    tracing::warn!("Speech unavailable, continuing silently: {:?}", e);
                    run_form(chat, Arc::new(SilentEngine), settings).await
                }
            }
        }
        SpeechBackend::Silent => run_form(chat, Arc::new(SilentEngine), settings).await,
    }
}

async fn run_form<E: SpeechEngine + 'static>(
    chat: Arc<ChatClient>,
    engine: Arc<E>,
    settings: SpeechSettings,
) -> Result<()> {
    let (notice_tx, mut notice_rx) = tokio::sync::mpsc::channel::<Notice>(32);
    let companion = Companion::new(chat, engine, settings, notice_tx);

    // Renders whatever the lifecycle reports, in arrival order.
    let renderer = tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            match &notice {
                Notice::Alert(text) => eprintln!("! {}", text),
                other => {
                    if let Some(text) = form::render_notice(other) {
                        println!("{}", text);
                    }
                }
            }
        }
    });

    println!("{}", form::HELP);
    println!("{}", form::render_view(&companion.view()));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut last_input: Option<String> = None;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read input")?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl-C, shutting down...");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };

        let input = match form::parse_line(&line)
            .and_then(|input| form::resolve_again(input, &mut last_input))
        {
            Ok(input) => input,
            Err(message) => {
                eprintln!("! {}", message);
                continue;
            }
        };

        match input {
            // Submissions run on their own task so the form stays responsive
            // while a request is in flight.
            FormInput::Submit(text) => {
                let companion = companion.clone();
                tokio::spawn(async move {
                    companion.submit(&text).await;
                });
            }
            FormInput::Quit => break,
            command => {
                if let Err(e) = handle_command(&companion, command).await {
                    tracing::warn!("Playback command failed: {:?}", e);
                }
            }
        }
    }

    // Stop speaking before the output stream goes away. A submission may
    // still hold the playback lock, so cancel on the engine directly.
    if let Err(e) = companion.interrupt() {
        tracing::debug!("Failed to stop speech on exit: {:?}", e);
    }
    drop(companion);
    renderer.abort();
    tracing::info!("Shutting down...");
    Ok(())
}

async fn handle_command<C, E>(companion: &Companion<C, E>, input: FormInput) -> Result<()>
where
    C: ChatApi,
    E: SpeechEngine,
{
    let mut playback = companion.playback().lock().await;
    match input {
        FormInput::Play => playback.play().await?,
        FormInput::Pause => playback.pause()?,
        FormInput::Stop => playback.stop()?,
        FormInput::Voice(name) => {
            let mut voice = playback.settings().voice.clone();
            voice.name = name;
            playback.set_voice(voice);
        }
        FormInput::Voices => {
            let voices = playback.engine().voices().await?;
            if voices.is_empty() {
                println!("No voices available");
            }
            for voice in voices {
                println!(" * {} ({})", voice.name, voice.lang);
            }
        }
        FormInput::Pitch(pitch) => playback.set_pitch(pitch),
        FormInput::Rate(rate) => playback.set_rate(rate),
        FormInput::Volume(volume) => playback.set_volume(volume),
        FormInput::Help => println!("{}", form::HELP),
        FormInput::Submit(_) | FormInput::Again | FormInput::Quit => {}
    }
    Ok(())
}
