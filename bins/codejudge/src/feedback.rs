//! # Compile-Failure Feedback
//!
//! When a submission does not compile, the grader asks a language model to
//! explain the failure so the reviewer can decide whether the submission is
//! worth a manual look.
//!
//! - [`FeedbackRequester`] is the capability the orchestrator depends on.
//! - [`OpenAiFeedback`] talks to an OpenAI-compatible chat-completions API.
//! - [`DisabledFeedback`] is used when no API key is configured.
//!
//! Every implementation may fail; the orchestrator turns any error into an
//! explicit "unavailable" marker on the report.

use async_trait::async_trait;
use codejudge_common::config::FeedbackConfig;
use codejudge_common::types::SubmissionId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Everything a feedback provider may use to explain a compile failure
#[derive(Debug, Clone)]
pub struct FeedbackRequest {
    pub submission: SubmissionId,
    pub diagnostic: String,
    pub source: String,
    /// Problem statement the submission was written against, if known
    pub problem: Option<String>,
}

#[derive(Debug, Error)]
pub enum FeedbackError {
    #[error("no feedback provider configured")]
    Disabled,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("response contained no text")]
    EmptyResponse,
}

/// Capability: compiler diagnostic in, prose feedback out
#[async_trait]
pub trait FeedbackRequester: Send + Sync {
    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String, FeedbackError>;
}

/// Stand-in used when feedback generation is switched off
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledFeedback;

#[async_trait]
impl FeedbackRequester for DisabledFeedback {
    async fn generate_feedback(&self, _request: &FeedbackRequest) -> Result<String, FeedbackError> {
        Err(FeedbackError::Disabled)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

/// Feedback from an OpenAI-compatible chat-completions endpoint
#[derive(Debug, Clone)]
pub struct OpenAiFeedback {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiFeedback {
    pub fn new(config: &FeedbackConfig, api_key: String) -> Result<Self, FeedbackError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            api_key,
        })
    }
}

/// Prompt asking for the errors behind a failed compilation and whether the
/// attempt deserves a manual review
pub fn build_prompt(request: &FeedbackRequest) -> String {
    let problem = request
        .problem
        .as_deref()
        .unwrap_or("(no problem statement provided)");

    format!(
        r#"Review this student's C++ submission and identify the errors that caused the compilation failure. List your findings as short bullet points.
Then decide whether the submission deserves a manual review:
* Are the mistakes minor (syntax errors that are easily corrected) or fundamental misunderstandings of the programming concepts?
* Despite the errors, does the student show a logical and correct approach to most of the problem?
End with one line: "Manual review: yes" or "Manual review: no".

PROBLEM:
{problem}

COMPILER OUTPUT:
```
{diagnostic}
```

CODE:
```cpp
{source}
```"#,
        problem = problem,
        diagnostic = request.diagnostic.trim_end(),
        source = request.source.trim_end(),
    )
}

/// Pull the first non-empty message out of a chat-completions response body
fn extract_text(body: &str) -> Result<String, FeedbackError> {
    let response: ChatResponse =
        serde_json::from_str(body).map_err(|e| FeedbackError::Decode(e.to_string()))?;

    response
        .choices
        .into_iter()
        .filter_map(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .find(|text| !text.is_empty())
        .ok_or(FeedbackError::EmptyResponse)
}

#[async_trait]
impl FeedbackRequester for OpenAiFeedback {
    async fn generate_feedback(&self, request: &FeedbackRequest) -> Result<String, FeedbackError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: build_prompt(request),
            }],
            temperature: 0.0,
        };

        debug!(submission = %request.submission, model = %self.model, "Requesting feedback");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(FeedbackError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        extract_text(&text)
    }
}
