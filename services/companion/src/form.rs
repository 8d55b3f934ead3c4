//! The terminal form: turns typed lines into submissions or playback
//! commands, and renders what the lifecycle reports.

use companion_core::Notice;
use companion_core::lifecycle::ViewState;

pub const NOTHING_YET: &str = "Nothing generated yet";
pub const LOADING: &str = "Loading";

pub const HELP: &str = "\
Type a question and press Enter to submit it.
  :again           submit the last question again
  :play            resume, or replay the last answer
  :pause           pause speech
  :stop            stop speech
  :voice [name]    prefer a voice by name (no name clears it)
  :voices          list available voices
  :pitch <n>       speech pitch, 1.0 is normal
  :rate <n>        speech rate, 1.0 is normal
  :volume <n>      speech volume, 1.0 is normal
  :help            show this help
  :quit            exit";

#[derive(Debug, Clone, PartialEq)]
pub enum FormInput {
    Submit(String),
    Again,
    Play,
    Pause,
    Stop,
    Voice(Option<String>),
    Voices,
    Pitch(f32),
    Rate(f32),
    Volume(f32),
    Help,
    Quit,
}

/// Parses one line. `Err` carries a message for the user.
pub fn parse_line(line: &str) -> Result<FormInput, String> {
    let Some(command) = line.strip_prefix(':') else {
        return Ok(FormInput::Submit(line.to_string()));
    };

    let mut parts = command.trim().splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default().to_lowercase();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

    match name.as_str() {
        "again" => Ok(FormInput::Again),
        "play" | "resume" => Ok(FormInput::Play),
        "pause" => Ok(FormInput::Pause),
        "stop" => Ok(FormInput::Stop),
        "voice" => Ok(FormInput::Voice(arg.map(str::to_string))),
        "voices" => Ok(FormInput::Voices),
        "pitch" => parse_number("pitch", arg).map(FormInput::Pitch),
        "rate" => parse_number("rate", arg).map(FormInput::Rate),
        "volume" => parse_number("volume", arg).map(FormInput::Volume),
        "help" | "?" => Ok(FormInput::Help),
        "quit" | "exit" | "q" => Ok(FormInput::Quit),
        other => Err(format!("Unknown command ':{}'. Type :help for commands.", other)),
    }
}

fn parse_number(name: &str, arg: Option<&str>) -> Result<f32, String> {
    let arg = arg.ok_or_else(|| format!(":{} needs a number", name))?;
    arg.parse::<f32>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("'{}' is not a number", arg))
}

/// Records submissions in `last_input` and turns `:again` into a
/// resubmission of it. Other inputs pass through.
pub fn resolve_again(input: FormInput, last_input: &mut Option<String>) -> Result<FormInput, String> {
    match input {
        FormInput::Submit(text) => {
            *last_input = Some(text.clone());
            Ok(FormInput::Submit(text))
        }
        FormInput::Again => last_input
            .clone()
            .map(FormInput::Submit)
            .ok_or_else(|| "Nothing to submit again yet".to_string()),
        other => Ok(other),
    }
}

/// The whole view, as shown at startup.
pub fn render_view(view: &ViewState) -> String {
    let mut lines = Vec::new();
    if view.message.is_none() || view.loading {
        lines.push(NOTHING_YET.to_string());
    }
    if view.loading {
        lines.push(LOADING.to_string());
    } else if let Some(message) = &view.message {
        lines.push(message.clone());
    }
    lines.join("\n")
}

/// What to print on stdout for a notice. Alerts go elsewhere.
pub fn render_notice(notice: &Notice) -> Option<String> {
    match notice {
        Notice::Alert(_) => None,
        Notice::Loading => Some(format!("{}\n{}", NOTHING_YET, LOADING)),
        Notice::Message(Some(message)) => Some(message.clone()),
        Notice::Message(None) => Some(NOTHING_YET.to_string()),
    }
}
