use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ClassifierError;
use crate::models::Verdict;

/// Opaque safety-classification call. Implementations return an error for
/// anything other than a well-formed verdict; the worker converts every
/// failure into the fail-closed FLAGGED verdict.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, content: &str) -> Result<Verdict, ClassifierError>;
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

/// Classifier backed by Gemini's `generateContent` endpoint.
///
/// The model is instructed to answer with a bare JSON verdict; the reply
/// text is stripped of markdown fences and parsed. Any parse or contract
/// failure surfaces as `ClassifierError::Malformed`.
pub struct GeminiClassifier {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiClassifier {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
        }
    }

    fn prompt(content: &str) -> String {
        format!(
            "Analyze the following content for moderation.\n\
             Classify it as either \"APPROVED\" (safe) or \"FLAGGED\" (unsafe: hate speech, \
             violence, explicit content, or harassment).\n\
             Provide a confidence score between 0 and 1.\n\
             If FLAGGED, provide a short reason.\n\n\
             Content: \"{}\"\n\n\
             Respond ONLY in JSON format:\n\
             {{\"status\": \"APPROVED\" | \"FLAGGED\", \"reason\": \"string\" | null, \"confidence\": number}}",
            content
        )
    }

    fn parse_reply(text: &str) -> Result<Verdict, ClassifierError> {
        let cleaned = text.replace("```json", "").replace("```", "");
        let verdict: Verdict = serde_json::from_str(cleaned.trim())
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;
        verdict.validate().map_err(ClassifierError::Malformed)
    }
}

#[async_trait]
impl Classifier for GeminiClassifier {
    async fn classify(&self, content: &str) -> Result<Verdict, ClassifierError> {
        // API key goes in the query string, not an Authorization header.
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": Self::prompt(content) }]
            }],
            "generationConfig": { "temperature": 0.0 }
        });

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(format!("{}: {}", status, text)));
        }

        let parsed: GenerateContentResponse = response.json().await?;

        let text = parsed
            .candidates
            .as_ref()
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.content.parts.iter().find_map(|p| p.text.clone()))
            .ok_or_else(|| {
                ClassifierError::Malformed("no candidate text in response".to_string())
            })?;

        debug!(reply_chars = text.len(), "classifier reply received");
        Self::parse_reply(&text)
    }
}
