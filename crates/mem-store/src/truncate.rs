/// Byte cap applied to `tool_response` payloads at intake. Keeps every queue
/// row small enough to stay in the page cache.
pub const RESPONSE_BYTE_CAP: usize = 50_000;

/// Suffix appended to capped payloads so a reader can tell the response was cut.
pub const TRUNCATION_MARKER: &str = "\n\n[truncated]";

/// Truncate a tool response at `max_bytes`, cutting at a char boundary and
/// appending the truncation marker.
pub fn truncate_response(response: &str, max_bytes: usize) -> String {
    if response.len() <= max_bytes {
        return response.to_string();
    }
    let boundary = floor_char_boundary(response, max_bytes);
    let mut truncated = response[..boundary].to_string();
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Largest index `<= at` that lies on a char boundary.
fn floor_char_boundary(s: &str, at: usize) -> usize {
    if at >= s.len() {
        return s.len();
    }
    let mut boundary = at;
    while !s.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}
