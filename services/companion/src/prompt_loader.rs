use anyhow::{Context, Result};
use companion_core::chat::PERSONA_PROMPT;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Key of the prompt file (`persona.md`) that replaces the built-in persona.
pub const PERSONA_KEY: &str = "persona";

/// Reads every `*.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
            let prompt_key = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem for prompt file")?
                .to_string();

            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

            prompts.insert(prompt_key, content);
        }
    }

    Ok(prompts)
}

/// The system prompt to send: `persona.md` from `dir_path` if it exists and
/// is not blank, the built-in persona otherwise.
pub fn persona_prompt(dir_path: &Path) -> String {
    if !dir_path.is_dir() {
        tracing::debug!(
            "No prompts directory at {}, using built-in persona",
            dir_path.display()
        );
        return PERSONA_PROMPT.to_string();
    }

    match load_prompts(dir_path) {
        Ok(mut prompts) => match prompts.remove(PERSONA_KEY) {
            Some(persona) if !persona.trim().is_empty() => {
                tracing::info!("Using persona prompt from {}", dir_path.display());
                persona.trim().to_string()
            }
            _ => PERSONA_PROMPT.to_string(),
        },
        Err(e) => {
            tracing::warn!("Failed to load prompts, using built-in persona: {:?}", e);
            PERSONA_PROMPT.to_string()
        }
    }
}
