//! OpenRouter back-end (chat-completions wire format).

use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use mem_core::settings::Settings;

use crate::client::{Completion, CompletionRequest, TEMPERATURE};
use crate::error::{body_excerpt, LlmError};

const API_URL: &str = "https://openrouter.ai/api/v1/chat/completions";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: Option<u64>,
}

pub(crate) async fn complete(
    client: &Client,
    settings: &Settings,
    request: &CompletionRequest,
) -> Result<Completion, LlmError> {
    let key = settings
        .openrouter_api_key
        .as_ref()
        .ok_or(LlmError::AuthMissing("openrouter"))?;

    let body = build_body(&settings.openrouter_model, request);
    let response = client
        .post(API_URL)
        .bearer_auth(key.expose_secret())
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

    let parsed: ChatResponse = response.json().await?;
    Ok(parse_response(parsed))
}

fn build_body<'a>(model: &'a str, request: &'a CompletionRequest) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            ChatMessage {
                role: "system",
                content: &request.system,
            },
            ChatMessage {
                role: "user",
                content: &request.user,
            },
        ],
        temperature: TEMPERATURE,
        max_tokens: request.max_output_tokens,
    }
}

fn parse_response(response: ChatResponse) -> Completion {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .unwrap_or_default();
    let total_tokens = response
        .usage
        .and_then(|usage| usage.total_tokens)
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
            max_output_tokens: 4096,
        }
    }

    #[test]
    fn body_shape() {
        let req = request();
        let body = serde_json::to_value(build_body("openai/gpt-4o-mini", &req)).unwrap();
        assert_eq!(body["model"], "openai/gpt-4o-mini");
        assert_eq!(body["temperature"], 0.3);
        assert_eq!(body["max_tokens"], 4096);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "you summarize");
        assert_eq!(body["messages"][1]["role"], "user");
    }

    #[test]
    fn parse_full_response() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": "<observation/>"}}],
            "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
        }))
        .unwrap();
        let completion = parse_response(response);
        assert_eq!(completion.content, "<observation/>");
        assert_eq!(completion.total_tokens, 120);
    }

    #[test]
    fn parse_empty_choices() {
        let response: ChatResponse =
            serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        let completion = parse_response(response);
        assert_eq!(completion.content, "");
        assert_eq!(completion.total_tokens, 0);
    }

    #[test]
    fn parse_null_content() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"role": "assistant", "content": null}}]
        }))
        .unwrap();
        assert_eq!(parse_response(response).content, "");
    }

    #[test]
    fn parse_missing_usage() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "x"}}]
        }))
        .unwrap();
        assert_eq!(parse_response(response).total_tokens, 0);
    }
}
