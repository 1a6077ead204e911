//! Blocking client for the Gemini `generateContent` endpoint.

use std::time::Duration;

use log::{debug, info, trace};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use super::{ClientError, GenerationConfig, ModelClient, Turn, RESPONSE_MIME_TYPE};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: WireGenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: [Part<'a>; 1],
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    response_mime_type: &'static str,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
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

fn build_request<'a>(turns: &'a [Turn], config: &GenerationConfig) -> GenerateRequest<'a> {
    GenerateRequest {
        contents: turns
            .iter()
            .map(|t| Content {
                role: t.role.as_str(),
                parts: [Part { text: &t.content }],
            })
            .collect(),
        generation_config: WireGenerationConfig {
            response_mime_type: RESPONSE_MIME_TYPE,
            temperature: config.temperature,
        },
        safety_settings: HARM_CATEGORIES
            .into_iter()
            .map(|category| SafetySetting {
                category,
                threshold: "BLOCK_ONLY_HIGH",
            })
            .collect(),
    }
}

/// Concatenate the text parts of the first candidate. A reply with no
/// candidates (for example one blocked by safety filters) yields "".
fn extract_text(response: GenerateResponse) -> String {
    response
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .collect::<String>()
        })
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct GeminiClient {
    http: Client,
    base_url: String,
    model: String,
    api_key: String,
    timeout: Duration,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(timeout)
            .connect_timeout(CONNECT_TIMEOUT.min(timeout))
            .build()
            .map_err(|e| ClientError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: model.into(),
            api_key: api_key.into(),
            timeout,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }

    fn map_reqwest(&self, e: reqwest::Error) -> ClientError {
        if e.is_timeout() {
            ClientError::Timeout(self.timeout)
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl ModelClient for GeminiClient {
    fn generate_structured(
        &mut self,
        turns: &[Turn],
        config: &GenerationConfig,
    ) -> Result<String, ClientError> {
        info!(
            "=== GEMINI CALL: {} turns, model={}, temperature={} ===",
            turns.len(),
            self.model,
            config.temperature
        );
        for (i, turn) in turns.iter().enumerate() {
            debug!("  turn[{i}] {turn}");
        }

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .json(&build_request(turns, config))
            .send()
            .map_err(|e| self.map_reqwest(e))?;

        let status = response.status();
        let body = response.text().map_err(|e| self.map_reqwest(e))?;
        trace!("=== GEMINI RAW BODY ({status}) ===\n{body}\n=== END BODY ===");

        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse = serde_json::from_str(&body)
            .map_err(|e| ClientError::Transport(format!("unreadable response body: {e}")))?;
        let text = extract_text(parsed);

        info!("Gemini replied with {} chars", text.len());
        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}
