//! Gemini back-end (generateContent wire format).

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use mem_core::settings::Settings;

use crate::client::{Completion, CompletionRequest, TEMPERATURE};
use crate::error::{body_excerpt, LlmError};

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    system_instruction: SystemInstruction<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct SystemInstruction<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f64,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

pub(crate) async fn complete(
    client: &Client,
    settings: &Settings,
    request: &CompletionRequest,
) -> Result<Completion, LlmError> {
    let key = settings
        .gemini_api_key
        .as_ref()
        .ok_or(LlmError::AuthMissing("gemini"))?;

    let url = format!("{API_BASE}/{}:generateContent", settings.gemini_model);
    let body = build_body(request);
    let response = client
        .post(&url)
        .header("x-goog-api-key", key.expose_secret())
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Upstream {
            status: status.as_u16(),
            body: body_excerpt(&body),
        });
    }

    let parsed: GenerateResponse = response.json().await?;
    Ok(parse_response(parsed))
}

fn build_body(request: &CompletionRequest) -> GenerateRequest<'_> {
    GenerateRequest {
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: &request.system,
            }],
        },
        contents: vec![Content {
            role: "user",
            parts: vec![Part {
                text: &request.user,
            }],
        }],
        generation_config: GenerationConfig {
            temperature: TEMPERATURE,
            max_output_tokens: request.max_output_tokens,
        },
    }
}

fn parse_response(response: GenerateResponse) -> Completion {
    let content = response
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    // Gemini reports prompt and candidate counts separately
    let total_tokens = response
        .usage_metadata
        .map(|usage| usage.prompt_token_count + usage.candidates_token_count)
        .unwrap_or(0);

    Completion {
        content,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> CompletionRequest {
        CompletionRequest {
            system: "you summarize".into(),
            user: "<tool_event/>".into(),
            max_output_tokens: 2048,
        }
    }

    #[test]
    fn body_shape() {
        let req = request();
        let body = serde_json::to_value(build_body(&req)).unwrap();
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "you summarize");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "<tool_event/>");
        assert_eq!(body["generationConfig"]["temperature"], 0.3);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 2048);
    }

    #[test]
    fn parse_full_response() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{
                "content": {"parts": [{"text": "<summary>"}, {"text": "</summary>"}], "role": "model"}
            }],
            "usageMetadata": {"promptTokenCount": 90, "candidatesTokenCount": 30}
        }))
        .unwrap();
        let completion = parse_response(response);
        assert_eq!(completion.content, "<summary></summary>");
        assert_eq!(completion.total_tokens, 120);
    }

    #[test]
    fn parse_no_candidates() {
        let response: GenerateResponse =
            serde_json::from_value(serde_json::json!({"candidates": []})).unwrap();
        let completion = parse_response(response);
        assert_eq!(completion.content, "");
        assert_eq!(completion.total_tokens, 0);
    }

    #[test]
    fn parse_partial_usage() {
        let response: GenerateResponse = serde_json::from_value(serde_json::json!({
            "candidates": [{"content": {"parts": [{"text": "x"}]}}],
            "usageMetadata": {"promptTokenCount": 10}
        }))
        .unwrap();
        assert_eq!(parse_response(response).total_tokens, 10);
    }
}
