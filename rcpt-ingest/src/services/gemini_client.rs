//! Gemini API client
//!
//! Uploads the PDF through the Files API, then issues a single
//! `generateContent` request with the fixed extraction prompt. Upstream
//! failures are classified into rate limiting, safety blocks and generic
//! adapter errors; the response text is handed to the normalizer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{debug, info, warn};

use super::extraction::{
    parse_model_output, ExtractedReceipt, ExtractionFailure, ReceiptExtractor, EXTRACTION_PROMPT,
};
use super::staging::PDF_MIME;

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
const USER_AGENT: &str = concat!("rcpt-ingest/", env!("CARGO_PKG_VERSION"));
const API_KEY_HEADER: &str = "x-goog-api-key";

const SAFETY_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Files API upload response
#[derive(Debug, Clone, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    name: String,
    uri: String,
    mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
    safety_settings: Vec<SafetySetting>,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Part<'a> {
    FileData {
        #[serde(rename = "mimeType")]
        mime_type: &'a str,
        #[serde(rename = "fileUri")]
        file_uri: &'a str,
    },
    Text(&'a str),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Serialize)]
struct SafetySetting {
    category: &'static str,
    threshold: &'static str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
    safety_ratings: Option<Value>,
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

/// Gemini-backed [`ReceiptExtractor`]
pub struct GeminiExtractor {
    http_client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiExtractor {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ExtractionFailure> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ExtractionFailure::Adapter(e.to_string()))?;
        let base_url: String = base_url.into();

        Ok(Self {
            http_client,
            api_key: api_key.into(),
            model: model.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn upload_file(&self, file_path: &Path) -> Result<UploadedFile, ExtractionFailure> {
        let bytes = tokio::fs::read(file_path).await.map_err(|e| {
            ExtractionFailure::Adapter(format!("Failed to read {}: {}", file_path.display(), e))
        })?;

        let url = format!("{}/upload/v1beta/files", self.base_url);
        debug!(path = %file_path.display(), bytes = bytes.len(), "Uploading file to Gemini");

        let response = self
            .http_client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Protocol", "raw")
            .header(reqwest::header::CONTENT_TYPE, PDF_MIME)
            .body(bytes)
            .send()
            .await
            .map_err(|e| ExtractionFailure::Adapter(format!("File upload failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let uploaded: UploadResponse = response.json().await.map_err(|e| {
            ExtractionFailure::Adapter(format!("Unexpected file upload response: {}", e))
        })?;

        info!(name = %uploaded.file.name, uri = %uploaded.file.uri, "Uploaded file to Gemini");
        Ok(uploaded.file)
    }

    async fn generate(&self, file: &UploadedFile) -> Result<String, ExtractionFailure> {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![
                    Part::FileData {
                        mime_type: file.mime_type.as_deref().unwrap_or(PDF_MIME),
                        file_uri: &file.uri,
                    },
                    Part::Text(EXTRACTION_PROMPT),
                ],
            }],
            generation_config: GenerationConfig {
                temperature: 0.1,
                max_output_tokens: 2048,
            },
            safety_settings: SAFETY_CATEGORIES
                .into_iter()
                .map(|category| SafetySetting {
                    category,
                    threshold: "BLOCK_MEDIUM_AND_ABOVE",
                })
                .collect(),
        };

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        debug!(model = %self.model, uri = %file.uri, "Calling Gemini model");

        let response = self
            .http_client
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractionFailure::Adapter(format!("Generation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_error(status.as_u16(), &body));
        }

        let generated: GenerateResponse = response.json().await.map_err(|e| {
            ExtractionFailure::Adapter(format!("Unexpected generation response: {}", e))
        })?;

        response_text(generated)
    }
}

#[async_trait]
impl ReceiptExtractor for GeminiExtractor {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn extract(&self, file_path: &Path) -> Result<ExtractedReceipt, ExtractionFailure> {
        let file = self.upload_file(file_path).await?;
        let text = self.generate(&file).await?;
        debug!(response = %text, "Gemini response text");
        parse_model_output(&text).into_result()
    }
}

/// Concatenated text of the first candidate, or the safety block that
/// prevented one
fn response_text(response: GenerateResponse) -> Result<String, ExtractionFailure> {
    if let Some(feedback) = &response.prompt_feedback {
        if feedback.get("blockReason").is_some() {
            warn!(feedback = %feedback, "Prompt blocked by Gemini safety filter");
            return Err(ExtractionFailure::SafetyBlocked {
                feedback: feedback.clone(),
            });
        }
    }

    let Some(candidate) = response.candidates.into_iter().next() else {
        // No candidate and no block reason: treat as an empty answer
        return Ok(String::new());
    };

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        let feedback = serde_json::json!({
            "finishReason": "SAFETY",
            "safetyRatings": candidate.safety_ratings.unwrap_or(Value::Null),
        });
        warn!(feedback = %feedback, "Candidate blocked by Gemini safety filter");
        return Err(ExtractionFailure::SafetyBlocked { feedback });
    }

    Ok(candidate
        .content
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|part| part.text)
                .collect::<String>()
        })
        .unwrap_or_default())
}

/// Map a non-success upstream response to a failure kind
fn classify_error(status: u16, body: &str) -> ExtractionFailure {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    let upstream_status = error
        .and_then(|e| e.get("status"))
        .and_then(Value::as_str)
        .unwrap_or_default();

    if status == 429
        || upstream_status == "RESOURCE_EXHAUSTED"
        || message.to_lowercase().contains("quota")
    {
        return ExtractionFailure::RateLimited(message);
    }

    ExtractionFailure::Adapter(format!("Gemini API error {}: {}", status, message))
}
