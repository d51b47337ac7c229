//! Layered settings: compiled defaults, then the user settings document,
//! then environment variable overrides (highest priority).
//!
//! The settings document is a flat JSON key-value object at
//! `~/.claude-mem/settings.json`; recognized keys share their names with the
//! environment variables.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use secrecy::SecretString;

pub const PROVIDER_KEY: &str = "CLAUDE_MEM_PROVIDER";
pub const OPENROUTER_API_KEY: &str = "CLAUDE_MEM_OPENROUTER_API_KEY";
pub const OPENROUTER_MODEL_KEY: &str = "CLAUDE_MEM_OPENROUTER_MODEL";
pub const GEMINI_API_KEY: &str = "CLAUDE_MEM_GEMINI_API_KEY";
pub const GEMINI_MODEL_KEY: &str = "CLAUDE_MEM_GEMINI_MODEL";

const DEFAULT_OPENROUTER_MODEL: &str = "openai/gpt-4o-mini";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

/// LLM back-end selection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Provider {
    #[default]
    OpenRouter,
    Gemini,
}

impl Provider {
    /// Unknown values fall back to OpenRouter.
    pub fn from_value(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Self::Gemini,
            _ => Self::OpenRouter,
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Gemini => write!(f, "gemini"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub provider: Provider,
    pub openrouter_api_key: Option<SecretString>,
    pub openrouter_model: String,
    pub gemini_api_key: Option<SecretString>,
    pub gemini_model: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            openrouter_api_key: None,
            openrouter_model: DEFAULT_OPENROUTER_MODEL.to_string(),
            gemini_api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
        }
    }
}

impl Settings {
    /// Build settings from a merged key-value view.
    pub fn from_map(values: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            provider: values
                .get(PROVIDER_KEY)
                .map(|v| Provider::from_value(v))
                .unwrap_or(defaults.provider),
            openrouter_api_key: values
                .get(OPENROUTER_API_KEY)
                .map(|v| SecretString::from(v.clone())),
            openrouter_model: values
                .get(OPENROUTER_MODEL_KEY)
                .cloned()
                .unwrap_or(defaults.openrouter_model),
            gemini_api_key: values
                .get(GEMINI_API_KEY)
                .map(|v| SecretString::from(v.clone())),
            gemini_model: values
                .get(GEMINI_MODEL_KEY)
                .cloned()
                .unwrap_or(defaults.gemini_model),
        }
    }

    /// Load from the default settings path with env overrides.
    pub fn load() -> Self {
        Self::load_from_path(&settings_path())
    }

    /// Load from a specific document path, then apply env overrides.
    /// Unreadable or malformed documents degrade to defaults.
    pub fn load_from_path(path: &Path) -> Self {
        let mut values = read_document(path);
        for key in [
            PROVIDER_KEY,
            OPENROUTER_API_KEY,
            OPENROUTER_MODEL_KEY,
            GEMINI_API_KEY,
            GEMINI_MODEL_KEY,
        ] {
            if let Ok(value) = std::env::var(key) {
                values.insert(key.to_string(), value);
            }
        }
        Self::from_map(&values)
    }
}

/// `~/.claude-mem/settings.json`.
pub fn settings_path() -> PathBuf {
    home_dir().join(".claude-mem").join("settings.json")
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

/// Read the flat JSON document into string values. Non-string values and
/// unreadable files are ignored.
fn read_document(path: &Path) -> HashMap<String, String> {
    let Ok(raw) = std::fs::read_to_string(path) else {
        return HashMap::new();
    };
    let parsed: serde_json::Value = match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "malformed settings document, using defaults");
            return HashMap::new();
        }
    };
    let Some(object) = parsed.as_object() else {
        return HashMap::new();
    };
    object
        .iter()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
        .collect()
}
