//! Parsing of XML-ish LLM output into observations and summaries.
//!
//! Both entry points are pure and total: malformed or unrelated input yields
//! an empty result, never an error. The model is prompted for lowercase tags
//! so the scanner matches exactly; anything outside recognized blocks is
//! ignored.

use crate::observation::{Observation, SessionSummary};

/// Extract every `<tag>...</tag>` block's inner text, in document order.
fn block_contents<'a>(text: &'a str, tag: &str) -> Vec<&'a str> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find(&open) {
        let after_open = &rest[start + open.len()..];
        match after_open.find(&close) {
            Some(end) => {
                blocks.push(&after_open[..end]);
                rest = &after_open[end + close.len()..];
            }
            None => break,
        }
    }
    blocks
}

/// Inner text of the first `<tag>...</tag>` in `text`, trimmed.
/// Returns None when the tag is absent or empty.
fn tag_text(text: &str, tag: &str) -> Option<String> {
    let inner = block_contents(text, tag).into_iter().next()?.trim();
    if inner.is_empty() {
        None
    } else {
        Some(inner.to_string())
    }
}

/// All `<inner>` items inside the first `<outer>` block, trimmed, empties dropped.
fn tag_list(text: &str, outer: &str, inner: &str) -> Vec<String> {
    let Some(container) = block_contents(text, outer).into_iter().next() else {
        return Vec::new();
    };
    block_contents(container, inner)
        .into_iter()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse zero or more `<observation>` blocks out of an LLM response.
///
/// Blocks without a `<title>` are dropped; a missing `<type>` defaults to
/// "discovery". An empty result is a valid outcome.
pub fn parse_observations(text: &str, content_session_id: &str) -> Vec<Observation> {
    block_contents(text, "observation")
        .into_iter()
        .filter_map(|block| {
            let title = tag_text(block, "title")?;
            Some(Observation {
                content_session_id: content_session_id.to_string(),
                kind: tag_text(block, "type").unwrap_or_else(|| "discovery".to_string()),
                title,
                subtitle: tag_text(block, "subtitle"),
                facts: tag_list(block, "facts", "fact"),
                narrative: tag_text(block, "narrative"),
                concepts: tag_list(block, "concepts", "concept"),
                files_read: tag_list(block, "files_read", "file"),
                files_modified: tag_list(block, "files_modified", "file"),
            })
        })
        .collect()
}

/// Parse a `<summary>` block out of an LLM response.
///
/// Returns None when no block is present or every field is empty.
pub fn parse_summary(text: &str, session_db_id: i64) -> Option<SessionSummary> {
    let block = block_contents(text, "summary").into_iter().next()?;
    let summary = SessionSummary {
        session_db_id,
        request: tag_text(block, "request"),
        investigated: tag_text(block, "investigated"),
        learned: tag_text(block, "learned"),
        completed: tag_text(block, "completed"),
        next_steps: tag_text(block, "next_steps"),
        notes: tag_text(block, "notes"),
    };
    if summary.is_empty() {
        None
    } else {
        Some(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_OBSERVATION: &str = r#"
Some preamble the model emitted.
<observation>
  <type>bugfix</type>
  <title>Fixed stale claim release</title>
  <subtitle>Queue recovery</subtitle>
  <facts>
    <fact>Stuck rows revert to pending</fact>
    <fact>retry_count is untouched</fact>
  </facts>
  <narrative>The release path now ignores the retry counter.</narrative>
  <concepts>
    <concept>crash recovery</concept>
  </concepts>
  <files_read>
    <file>src/queue.rs</file>
  </files_read>
  <files_modified>
    <file>src/queue.rs</file>
    <file>src/worker.rs</file>
  </files_modified>
</observation>
"#;

    #[test]
    fn parses_full_observation() {
        let obs = parse_observations(FULL_OBSERVATION, "cs_42");
        assert_eq!(obs.len(), 1);
        let o = &obs[0];
        assert_eq!(o.content_session_id, "cs_42");
        assert_eq!(o.kind, "bugfix");
        assert_eq!(o.title, "Fixed stale claim release");
        assert_eq!(o.subtitle.as_deref(), Some("Queue recovery"));
        assert_eq!(o.facts.len(), 2);
        assert_eq!(o.concepts, vec!["crash recovery".to_string()]);
        assert_eq!(o.files_read, vec!["src/queue.rs".to_string()]);
        assert_eq!(o.files_modified.len(), 2);
    }

    #[test]
    fn parses_multiple_observations() {
        let text = "<observation><title>A</title></observation>\
                    <observation><title>B</title></observation>";
        let obs = parse_observations(text, "cs");
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].title, "A");
        assert_eq!(obs[1].title, "B");
    }

    #[test]
    fn missing_type_defaults_to_discovery() {
        let obs = parse_observations("<observation><title>T</title></observation>", "cs");
        assert_eq!(obs[0].kind, "discovery");
    }

    #[test]
    fn untitled_block_dropped() {
        let text = "<observation><type>bugfix</type></observation>";
        assert!(parse_observations(text, "cs").is_empty());
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(parse_observations("", "cs").is_empty());
        assert!(parse_observations("no tags at all", "cs").is_empty());
    }

    #[test]
    fn unclosed_block_ignored() {
        let text = "<observation><title>dangling";
        assert!(parse_observations(text, "cs").is_empty());
    }

    #[test]
    fn parses_summary() {
        let text = r#"
<summary>
  <request>Fix the claim race</request>
  <investigated>Queue transactions</investigated>
  <learned>Claims must be transactional</learned>
  <completed>Wrapped select+update</completed>
  <next_steps>Add stall release</next_steps>
  <notes>Retry budget unchanged</notes>
</summary>
"#;
        let summary = parse_summary(text, 7).unwrap();
        assert_eq!(summary.session_db_id, 7);
        assert_eq!(summary.request.as_deref(), Some("Fix the claim race"));
        assert_eq!(summary.next_steps.as_deref(), Some("Add stall release"));
    }

    #[test]
    fn partial_summary_is_kept() {
        let summary = parse_summary("<summary><learned>X</learned></summary>", 1).unwrap();
        assert_eq!(summary.learned.as_deref(), Some("X"));
        assert!(summary.request.is_none());
    }

    #[test]
    fn empty_summary_is_none() {
        assert!(parse_summary("<summary>  </summary>", 1).is_none());
        assert!(parse_summary("no summary here", 1).is_none());
    }

    #[test]
    fn whitespace_only_fields_dropped() {
        let text = "<observation><title>T</title><narrative>   </narrative></observation>";
        let obs = parse_observations(text, "cs");
        assert!(obs[0].narrative.is_none());
    }
}
