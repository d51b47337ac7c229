//! Prompt assembly for the summarization workers.
//!
//! Prompts are plain string composition: a mode-supplied system preamble plus
//! one XML-ish block per input. The length guidance on summaries is advice to
//! the model, never a validator on its output.

use mem_core::Mode;
use mem_store::queue::RawToolEvent;
use mem_store::sessions::RecentObservation;
use mem_store::summary_queue::RawSummaryRequest;

/// Per-field character guidance injected into summary prompts.
const LENGTH_GUIDANCE: &str = "\
Keep fields within these character ranges:
- request: 80-120
- investigated: 150-250
- learned: 150-250
- completed: 80-160
- next_steps: 80-160
- notes: 300-500";

/// Build the (system, user) prompt pair for a per-session event sub-batch.
pub fn build_observation_prompt(mode: &Mode, events: &[RawToolEvent]) -> (String, String) {
    let system = mode.observation_preamble();

    let mut user = String::new();
    for event in events {
        user.push_str("<tool_event>\n");
        push_tag(&mut user, "tool_name", &event.tool_name);
        push_tag(&mut user, "timestamp", &format_epoch(event.created_at_epoch));
        push_tag(&mut user, "cwd", &event.cwd);
        push_tag(&mut user, "input", &event.tool_input);
        push_tag(&mut user, "output", &event.tool_response);
        user.push_str("</tool_event>\n");
    }

    (system, user)
}

/// Build the (system, user) prompt pair for one summary request.
pub fn build_summary_prompt(
    mode: &Mode,
    request: &RawSummaryRequest,
    recent: &[RecentObservation],
) -> (String, String) {
    let system = format!("{}\n\n{}", mode.summary_preamble(), LENGTH_GUIDANCE);

    let mut user = String::from("<turn>\n");
    push_tag(&mut user, "user_prompt", &request.user_prompt);
    push_tag(
        &mut user,
        "last_assistant_message",
        &request.last_assistant_message,
    );
    user.push_str("</turn>\n");

    if !recent.is_empty() {
        user.push_str("<recent_activity>\n");
        for observation in recent {
            user.push_str(&format!(
                "  <item kind=\"{}\">{}</item>\n",
                observation.kind, observation.text
            ));
        }
        user.push_str("</recent_activity>\n");
    }

    (system, user)
}

fn push_tag(out: &mut String, tag: &str, value: &str) {
    out.push_str(&format!("  <{tag}>{value}</{tag}>\n"));
}

fn format_epoch(epoch_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(epoch_ms)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mem_store::queue::EventStatus;

    fn event(tool_name: &str) -> RawToolEvent {
        RawToolEvent {
            id: 1,
            session_db_id: 1,
            content_session_id: "cs_1".into(),
            tool_name: tool_name.into(),
            tool_input: r#"{"path":"/x"}"#.into(),
            tool_response: r#"{"ok":true}"#.into(),
            cwd: "/work".into(),
            prompt_number: 1,
            project: "demo".into(),
            status: EventStatus::Summarizing,
            retry_count: 0,
            created_at_epoch: 1_700_000_000_000,
            summarized_at_epoch: None,
            observation_id: None,
            error_message: None,
        }
    }

    fn request() -> RawSummaryRequest {
        RawSummaryRequest {
            id: 1,
            session_db_id: 42,
            content_session_id: "cs_42".into(),
            memory_session_id: None,
            project: "demo".into(),
            user_prompt: "fix the race".into(),
            last_assistant_message: "fixed it".into(),
            status: EventStatus::Summarizing,
            retry_count: 0,
            created_at_epoch: 0,
            summarized_at_epoch: None,
            summary_id: None,
            error_message: None,
        }
    }

    #[test]
    fn observation_prompt_has_one_block_per_event() {
        let mode = Mode::code_default();
        let events = vec![event("Read"), event("Bash")];
        let (system, user) = build_observation_prompt(&mode, &events);

        assert!(system.contains("Allowed <type> values"));
        assert_eq!(user.matches("<tool_event>").count(), 2);
        assert!(user.contains("<tool_name>Read</tool_name>"));
        assert!(user.contains("<tool_name>Bash</tool_name>"));
        assert!(user.contains("<cwd>/work</cwd>"));
        assert!(user.contains(r#"<input>{"path":"/x"}</input>"#));
        assert!(user.contains(r#"<output>{"ok":true}</output>"#));
        // Epoch millis render as an RFC 3339 timestamp
        assert!(user.contains("<timestamp>2023-11-14T"));
    }

    #[test]
    fn summary_prompt_includes_guidance() {
        let mode = Mode::code_default();
        let (system, user) = build_summary_prompt(&mode, &request(), &[]);

        assert!(system.contains("request: 80-120"));
        assert!(system.contains("notes: 300-500"));
        assert!(user.contains("<user_prompt>fix the race</user_prompt>"));
        assert!(user.contains("<last_assistant_message>fixed it</last_assistant_message>"));
        assert!(!user.contains("<recent_activity>"));
    }

    #[test]
    fn summary_prompt_includes_recent_activity() {
        let mode = Mode::code_default();
        let recent = vec![
            RecentObservation {
                kind: "discovery".into(),
                text: "queue uses a status lease".into(),
            },
            RecentObservation {
                kind: "bugfix".into(),
                text: "stall release keeps retry_count".into(),
            },
        ];
        let (_, user) = build_summary_prompt(&mode, &request(), &recent);

        assert!(user.contains("<recent_activity>"));
        assert_eq!(user.matches("<item kind=").count(), 2);
        assert!(user.contains("queue uses a status lease"));
    }
}
