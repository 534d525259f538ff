//! Gemini `generateContent` client

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, info};

use super::{Extractor, parse_response};
use crate::config::ExtractionConfig;
use crate::error::{PoError, Result};
use crate::model::SourceRecord;

const EXTRACTION_PROMPT: &str = r#"Extract the following information from the attached quotation and return it as a valid JSON object. Do not include any text or formatting outside of the JSON object.

JSON Structure:
{
  "companyName": "The name of the company providing the quotation.",
  "address": "The full mailing address of the company.",
  "quotationNumber": "The unique quotation number or reference ID.",
  "pic": {
    "name": "The name of the Person-in-Charge or contact person. Use null if not found.",
    "email": "The contact person's email address. Use null if not found.",
    "phone": "The contact person's phone number. Use null if not found.",
    "fax": "The fax number. Use null if not found."
  },
  "terms": {
    "payment": "The payment terms (e.g., 'COD', '30 Days', '50% Upfront').",
    "deliveryWeeks": "The delivery lead time converted to a whole number of weeks (e.g., '14 days' becomes 2, '4 weeks' becomes 4). If the delivery time is a range (e.g., '2-4 weeks'), always select the lower number. Use null if not specified or cannot be converted."
  },
  "items": [
    {
      "quantity": "The numerical quantity of the item.",
      "unit": "The unit of measure (e.g., 'pcs', 'kgs', 'lot').",
      "description": "The full description of the item.",
      "unitPrice": "The price per unit as a number."
    }
  ]
}"#;

/// Extractor backed by the Generative Language API
#[derive(Debug, Clone)]
pub struct GeminiExtractor {
    client: Client,
    config: ExtractionConfig,
    api_key: String,
}

impl GeminiExtractor {
    /// Build a client, reading the API key from the configured environment variable
    pub fn from_config(config: &ExtractionConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                PoError::Service(format!(
                    "environment variable {} is not set",
                    config.api_key_env
                ))
            })?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &ExtractionConfig, api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PoError::Service(format!("could not create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: config.clone(),
            api_key: api_key.into(),
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.endpoint.trim_end_matches('/'),
            self.config.model
        )
    }
}

impl Extractor for GeminiExtractor {
    fn name(&self) -> &str {
        &self.config.model
    }

    fn extract(&self, document: &[u8]) -> Result<SourceRecord> {
        info!(model = %self.config.model, bytes = document.len(), "Sending quotation to extraction service");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(&self.config, document))
            .send()
            .map_err(|e| PoError::Service(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .map_err(|e| PoError::Service(format!("could not read response: {}", e)))?;

        if !status.is_success() {
            return Err(PoError::Service(format!("HTTP {}: {}", status, body.trim())));
        }

        let text = response_text(&body)?;
        debug!(chars = text.len(), "Received extraction response");
        parse_response(&text)
    }
}

fn request_body(config: &ExtractionConfig, document: &[u8]) -> Value {
    json!({
        "contents": [{
            "parts": [
                {
                    "inlineData": {
                        "mimeType": "application/pdf",
                        "data": BASE64.encode(document),
                    }
                },
                { "text": EXTRACTION_PROMPT }
            ]
        }],
        "generationConfig": {
            "temperature": config.temperature,
            "topP": config.top_p,
            "responseMimeType": "application/json",
        }
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

/// Text of the first candidate in a `generateContent` response envelope
fn response_text(body: &str) -> Result<String> {
    let envelope: GenerateContentResponse =
        serde_json::from_str(body).map_err(|e| PoError::Parse {
            message: format!("unexpected response envelope: {}", e),
            raw: body.to_string(),
        })?;

    if let Some(reason) = envelope
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason)
    {
        return Err(PoError::Service(format!("request blocked: {}", reason)));
    }

    let candidate = envelope.candidates.into_iter().next();
    let finish_reason = candidate
        .as_ref()
        .and_then(|c| c.finish_reason.clone())
        .unwrap_or_default();
    let text: String = candidate
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(PoError::Parse {
            message: format!("response contained no text (finish reason: {})", finish_reason),
            raw: body.to_string(),
        });
    }

    Ok(text)
}
