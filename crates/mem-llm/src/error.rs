#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no API key configured for {0}")]
    AuthMissing(&'static str),

    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("LLM call timed out after {0} ms")]
    Timeout(u64),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Cap error bodies so a failing provider can't flood log rows and
/// queue error columns.
const BODY_EXCERPT_MAX: usize = 300;

pub(crate) fn body_excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_MAX {
        return body.to_string();
    }
    let mut boundary = BODY_EXCERPT_MAX;
    while !body.is_char_boundary(boundary) {
        boundary -= 1;
    }
    format!("{}…", &body[..boundary])
}
