//! Nutrition analysis of food images via a hosted vision/language model.
//!
//! The provider is asked for a single JSON object describing the dish. Model
//! output is only loosely schema-bound, so parsing has two layers: the payload
//! must be valid JSON (anything else is a malformed response), but individual
//! fields inside a parseable payload are coerced with per-field defaults
//! rather than failing the whole call.

use crate::config::AnalysisConfig;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

/// Placeholder used when the model omits a description
pub const DESCRIPTION_PLACEHOLDER: &str = "No description available";

/// Structured nutrition facts for a single analyzed image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutritionEstimate {
    /// Estimated calories (kcal)
    pub calories: f64,
    /// Estimated protein (grams)
    pub protein: f64,
    /// Estimated carbohydrates (grams)
    pub carbs: f64,
    /// Estimated fat (grams)
    pub fat: f64,
    /// Short free-text description of the dish
    pub description: String,
}

/// Errors that can occur during image analysis
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// The call itself failed: transport error, non-success status, or a
    /// response with no usable candidate text
    #[error("Analysis service unavailable: {0}")]
    Unavailable(String),

    /// The candidate text was returned but is not parseable JSON
    #[error("Analysis response malformed: {0}")]
    Malformed(String),
}

/// Analysis service seam used by the orchestrator
#[async_trait]
pub trait NutritionAnalyzer: Send + Sync {
    /// Analyze a food image and return a nutrition estimate
    async fn analyze(
        &self,
        image_bytes: &[u8],
        content_type: &str,
    ) -> Result<NutritionEstimate, AnalysisError>;
}

/// Nutrition analyzer backed by the Gemini `generateContent` API
pub struct GeminiAnalyzer {
    client: reqwest::Client,
    endpoint_url: String,
    model: String,
    api_key: String,
    prompt: String,
}

impl GeminiAnalyzer {
    /// Create a new analyzer from configuration
    pub fn new(config: &AnalysisConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint_url: config.endpoint_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            prompt: config.prompt.clone(),
        })
    }
}

#[async_trait]
impl NutritionAnalyzer for GeminiAnalyzer {
    #[instrument(skip(self, image_bytes), fields(model = %self.model, size_bytes = image_bytes.len()))]
    async fn analyze(
        &self,
        image_bytes: &[u8],
        content_type: &str,
    ) -> Result<NutritionEstimate, AnalysisError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.endpoint_url, self.model, self.api_key
        );

        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": self.prompt },
                    {
                        "inlineData": {
                            "mimeType": content_type,
                            "data": STANDARD.encode(image_bytes)
                        }
                    }
                ]
            }]
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::Unavailable(format!(
                "analysis API returned status {status}"
            )));
        }

        let payload: GenerateContentResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Unavailable(e.to_string()))?;

        let text = payload.candidate_text().ok_or_else(|| {
            AnalysisError::Unavailable("response contained no candidate text".to_string())
        })?;

        debug!(chars = text.len(), "Received analysis candidate text");

        parse_estimate(&text)
    }
}

/// Response shape of the `generateContent` API, reduced to what we read
#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
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
    parts: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    text: Option<String>,
}

impl GenerateContentResponse {
    /// First non-empty candidate text, if any
    fn candidate_text(self) -> Option<String> {
        self.candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .filter_map(|p| p.text)
            .find(|t| !t.trim().is_empty())
    }
}

/// Parse the model's candidate text into a nutrition estimate.
///
/// The payload must be valid JSON; individual fields are coerced with
/// per-field defaults and never abort the parse.
pub fn parse_estimate(text: &str) -> Result<NutritionEstimate, AnalysisError> {
    let payload = strip_code_fence(text);

    let value: Value =
        serde_json::from_str(payload).map_err(|e| AnalysisError::Malformed(e.to_string()))?;

    Ok(NutritionEstimate {
        calories: coerce_number(value.get("calories")),
        protein: coerce_number(value.get("protein")),
        carbs: coerce_number(value.get("carbs")),
        fat: coerce_number(value.get("fat")),
        description: coerce_description(value.get("description")),
    })
}

/// Strip a surrounding Markdown code fence. Models routinely wrap JSON in
/// ```json ... ``` despite being asked not to.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();

    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the info string ("json") up to the first newline
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Coerce a JSON field to a non-negative number.
/// Missing fields, non-numeric values, and NaN all become 0.
fn coerce_number(value: Option<&Value>) -> f64 {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    parsed
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0))
        .unwrap_or(0.0)
}

/// Coerce the description field, substituting the placeholder when the model
/// omits it or sends an empty string
fn coerce_description(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        _ => DESCRIPTION_PLACEHOLDER.to_string(),
    }
}
