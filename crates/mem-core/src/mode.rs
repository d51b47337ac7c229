//! Modes: named bundles of prompt fragments and allowed observation types.
//!
//! A mode is opaque to the pipeline beyond being a source of prompt strings;
//! workers compose its preambles into the system prompt for each LLM call.

/// A named prompt-fragment bundle.
#[derive(Clone, Debug)]
pub struct Mode {
    pub name: String,
    pub preamble: String,
    pub observation_types: Vec<String>,
}

const CODE_PREAMBLE: &str = "\
You are the memory layer of a coding assistant. You receive raw tool events \
captured during a coding session and distill them into durable observations \
another session can retrieve later. Report only what the events show; never \
invent files, commands, or outcomes. Emit zero or more <observation> blocks, \
each with <type>, <title>, <subtitle>, <facts> (one <fact> per item), \
<narrative>, <concepts> (one <concept> per item), <files_read> and \
<files_modified> (one <file> per item). If the events contain nothing worth \
remembering, emit nothing.";

const SUMMARY_PREAMBLE: &str = "\
You are the memory layer of a coding assistant. Summarize one completed user \
turn into a single <summary> block with <request>, <investigated>, \
<learned>, <completed>, <next_steps> and <notes>. Write for a future session \
that has no other context about this turn.";

impl Mode {
    /// Built-in default mode for coding sessions.
    pub fn code_default() -> Self {
        Self {
            name: "code".to_string(),
            preamble: CODE_PREAMBLE.to_string(),
            observation_types: vec![
                "discovery".to_string(),
                "decision".to_string(),
                "bugfix".to_string(),
                "feature".to_string(),
                "refactor".to_string(),
                "change".to_string(),
            ],
        }
    }

    /// System preamble for observation extraction, including the allowed types.
    pub fn observation_preamble(&self) -> String {
        format!(
            "{}\n\nAllowed <type> values: {}.",
            self.preamble,
            self.observation_types.join(", ")
        )
    }

    /// System preamble for session summaries.
    pub fn summary_preamble(&self) -> &'static str {
        SUMMARY_PREAMBLE
    }
}
