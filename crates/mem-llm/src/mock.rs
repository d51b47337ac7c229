//! Scripted completion client for deterministic tests without API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::client::{Completion, CompletionClient, CompletionRequest};
use crate::error::LlmError;

/// Returns pre-programmed responses in sequence; every call after the script
/// runs out fails.
pub struct MockClient {
    responses: Mutex<VecDeque<Result<Completion, LlmError>>>,
    call_count: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl MockClient {
    pub fn new(responses: Vec<Result<Completion, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            call_count: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Convenience: a client that replies with the given texts, in order.
    pub fn replying(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|text| {
                    Ok(Completion {
                        content: (*text).to_string(),
                        total_tokens: 100,
                    })
                })
                .collect(),
        )
    }

    /// Convenience: a client that fails `count` times with upstream 500s.
    pub fn failing(count: usize) -> Self {
        Self::new(
            (0..count)
                .map(|_| {
                    Err(LlmError::Upstream {
                        status: 500,
                        body: "internal".into(),
                    })
                })
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Requests seen so far, in call order.
    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for MockClient {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LlmError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(request.clone());
        self.responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::InvalidResponse("no scripted response".into())))
    }
}
