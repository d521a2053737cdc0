//! Gemini-backed screen analyzer.
//!
//! Sends the snapshot PNG inline (base64) together with an instruction
//! prompt and returns the model's text. The collaborator contract
//! treats this endpoint as slow and unreliable: every failure is
//! normalized into [`PeerError::Analysis`] and the exchange surfaces a
//! fallback answer instead.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Value};
use tracing::debug;

use syncstream_core::{PeerError, ScreenAnalyzer, Snapshot};

use crate::config::AiConfig;

/// Screen assistant over the Gemini `generateContent` API.
pub struct GeminiAnalyzer {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiAnalyzer {
    /// Build from config, reading the key from the configured
    /// environment variable. `None` when the variable is unset or empty.
    pub fn from_env(config: &AiConfig) -> Option<Self> {
        let api_key = std::env::var(&config.api_key_env).ok()?;
        if api_key.is_empty() {
            return None;
        }
        Some(Self::new(
            config.endpoint.clone(),
            config.model.clone(),
            api_key,
        ))
    }

    pub fn new(endpoint: String, model: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            model,
            api_key,
        }
    }

    fn request_body(snapshot: &Snapshot, question: &str) -> Value {
        let prompt = format!(
            "You are a helpful screen assistant. The user has provided a \
             screenshot of their device.\n\n\
             User Question: \"{question}\"\n\n\
             Instructions:\n\
             1. Analyze the image or the specific part relevant to the question.\n\
             2. Provide a clear, direct, and concise answer.\n\
             3. If the user asks to solve a problem (math, code), solve it.\n\
             4. If the user asks for design details, describe them.\n\n\
             Answer in plain text. Do not use markdown blocks unless providing code."
        );
        json!({
            "contents": [{
                "parts": [
                    {
                        "inline_data": {
                            "mime_type": "image/png",
                            "data": BASE64.encode(snapshot.png_bytes()),
                        }
                    },
                    { "text": prompt },
                ]
            }]
        })
    }

    /// Pull the first candidate's text out of a response document.
    fn extract_answer(value: &Value) -> Result<String, PeerError> {
        value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| PeerError::Analysis("empty model response".into()))
    }
}

#[async_trait]
impl ScreenAnalyzer for GeminiAnalyzer {
    async fn analyze(&self, snapshot: &Snapshot, question: &str) -> Result<String, PeerError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.endpoint, self.model
        );
        debug!("asking {} about a {}x{} snapshot", self.model, snapshot.width(), snapshot.height());

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(snapshot, question))
            .send()
            .await
            .map_err(|e| PeerError::Analysis(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PeerError::Analysis(format!("HTTP {status}")));
        }

        let document: Value = response
            .json()
            .await
            .map_err(|e| PeerError::Analysis(e.to_string()))?;
        Self::extract_answer(&document)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use syncstream_core::{capture_frame, VideoFrame};

    fn snapshot() -> Snapshot {
        let frame = VideoFrame::new(2, 2, Bytes::from(vec![0u8; 16]));
        capture_frame(&frame).unwrap()
    }

    #[test]
    fn request_body_carries_png_and_question() {
        let body = GeminiAnalyzer::request_body(&snapshot(), "what is this?");
        let data = body
            .pointer("/contents/0/parts/0/inline_data/data")
            .and_then(Value::as_str)
            .unwrap();
        assert!(!data.is_empty());
        let text = body
            .pointer("/contents/0/parts/1/text")
            .and_then(Value::as_str)
            .unwrap();
        assert!(text.contains("what is this?"));
    }

    #[test]
    fn extract_answer_trims_candidate_text() {
        let doc = json!({
            "candidates": [{
                "content": { "parts": [{ "text": "  A login screen.\n" }] }
            }]
        });
        assert_eq!(
            GeminiAnalyzer::extract_answer(&doc).unwrap(),
            "A login screen."
        );
    }

    #[test]
    fn missing_candidates_is_an_analysis_error() {
        let err = GeminiAnalyzer::extract_answer(&json!({})).unwrap_err();
        assert!(matches!(err, PeerError::Analysis(_)));
    }
}
