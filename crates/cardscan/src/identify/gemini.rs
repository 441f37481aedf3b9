//! Gemini-backed card identification and visual comparison.
//!
//! Requests use `generateContent` with a fixed JSON response schema. The
//! model's answer arrives as a JSON string in
//! `candidates[0].content.parts[0].text`; candidates inside it that fail
//! validation are dropped, while a body that cannot be read at all is an
//! upstream error.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};

use super::{
    http_error, sort_candidates, CardIdentifier, ComparisonImage, VisualComparator, VisualMatch,
};
use crate::error::IdentifyError;
use crate::types::{Game, IdentificationCandidate, Language};

const SERVICE: &str = "gemini";

pub struct GeminiIdentifier {
    client: Client,
    base_url: String,
    model: String,
    api_key: SecretString,
}

impl GeminiIdentifier {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, IdentifyError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
        })
    }

    async fn generate(&self, parts: Vec<Value>, schema: Value) -> Result<Value, IdentifyError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url,
            self.model,
            self.api_key.expose_secret()
        );
        let body = json!({
            "contents": [{ "parts": parts }],
            "generationConfig": {
                "temperature": 0.1,
                "response_mime_type": "application/json",
                "response_schema": schema
            }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| IdentifyError::from_reqwest(SERVICE, e))?;

        if !response.status().is_success() {
            let err = http_error(SERVICE, response).await;
            log::warn!("Gemini request failed: {}", err);
            return Err(err);
        }

        let envelope: Value = response.json().await.map_err(|e| malformed(e.to_string()))?;
        let text = envelope["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| malformed("missing text in response".to_string()))?;
        serde_json::from_str(text).map_err(|e| malformed(format!("answer is not JSON: {}", e)))
    }
}

fn malformed(message: String) -> IdentifyError {
    IdentifyError::MalformedResponse {
        service: SERVICE,
        message,
    }
}

fn candidate_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "candidates": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": {"type": "string"},
                        "card_type": {"type": "string"},
                        "subtype": {"type": "string"},
                        "set_name": {"type": "string"},
                        "set_code": {"type": "string"},
                        "number": {"type": "string"},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"}
                    },
                    "required": ["name", "confidence"]
                }
            }
        },
        "required": ["candidates"]
    })
}

fn comparison_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "selected_id": {"type": "string"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        },
        "required": ["selected_id", "confidence"]
    })
}

/// Extracts valid candidates from the model's answer, best first.
pub(crate) fn parse_candidates(answer: &Value) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
    let items = answer["candidates"]
        .as_array()
        .ok_or_else(|| malformed("answer has no candidates array".to_string()))?;

    let mut candidates: Vec<IdentificationCandidate> = items
        .iter()
        .filter_map(|item| {
            match serde_json::from_value::<IdentificationCandidate>(item.clone()) {
                Ok(candidate) if candidate.is_well_formed() => Some(candidate),
                Ok(candidate) => {
                    log::debug!("Dropping invalid candidate '{}'", candidate.name);
                    None
                }
                Err(e) => {
                    log::debug!("Dropping unparseable candidate: {}", e);
                    None
                }
            }
        })
        .collect();
    sort_candidates(&mut candidates);
    Ok(candidates)
}

/// Reads a comparison answer, accepting only ids that were offered.
pub(crate) fn parse_comparison(answer: &Value, offered: &[ComparisonImage]) -> Option<VisualMatch> {
    let selected_id = answer["selected_id"].as_str()?.trim();
    let confidence = answer["confidence"].as_f64()?;
    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return None;
    }
    if !offered.iter().any(|c| c.card_id == selected_id) {
        log::debug!("Comparison selected unknown card '{}'", selected_id);
        return None;
    }
    Some(VisualMatch {
        selected_id: selected_id.to_string(),
        confidence,
        reasoning: answer["reasoning"].as_str().map(str::to_string),
    })
}

fn inline_image(mime_type: &str, bytes: &[u8]) -> Value {
    json!({
        "inline_data": {
            "mime_type": mime_type,
            "data": general_purpose::STANDARD.encode(bytes)
        }
    })
}

#[async_trait]
impl CardIdentifier for GeminiIdentifier {
    async fn identify_text(
        &self,
        text: &str,
        language: Language,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        let prompt = format!(
            "The following text was read by OCR from a trading card printed in language '{}'. \
             Identify the card. Return up to three candidates, best first, with the English card \
             name, card type, subtype, set name, set code and collector number when known, a \
             confidence between 0 and 1 and a short reasoning.\n\nOCR text:\n{}",
            language, text
        );
        let answer = self
            .generate(vec![json!({ "text": prompt })], candidate_schema())
            .await?;
        parse_candidates(&answer)
    }

    async fn identify_image(
        &self,
        image: &[u8],
        mime_type: &str,
        game: Game,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError> {
        let prompt = format!(
            "Identify this {} trading card. Return up to three candidates, best first, with the \
             English card name, card type, subtype, set name, set code and collector number when \
             known, a confidence between 0 and 1 and a short reasoning.",
            game
        );
        let parts = vec![inline_image(mime_type, image), json!({ "text": prompt })];
        let answer = self.generate(parts, candidate_schema()).await?;
        parse_candidates(&answer)
    }
}

#[async_trait]
impl VisualComparator for GeminiIdentifier {
    async fn compare(
        &self,
        scanned_jpeg: &[u8],
        candidates: &[ComparisonImage],
    ) -> Result<Option<VisualMatch>, IdentifyError> {
        if candidates.is_empty() {
            return Ok(None);
        }

        let mut parts = vec![
            json!({ "text": "Scanned card:" }),
            inline_image("image/jpeg", scanned_jpeg),
        ];
        for candidate in candidates {
            parts.push(json!({ "text": format!("Candidate {}:", candidate.card_id) }));
            parts.push(inline_image("image/jpeg", &candidate.jpeg));
        }
        parts.push(json!({
            "text": "Which candidate shows the same card artwork as the scanned card? \
                     Answer with the candidate id, a confidence between 0 and 1 and a short \
                     reasoning. Use an empty id when none match."
        }));

        let answer = self.generate(parts, comparison_schema()).await?;
        Ok(parse_comparison(&answer, candidates))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_stub;
    use axum::http::StatusCode;
    use axum::{Json, Router};

    fn envelope(answer: Value) -> Value {
        json!({
            "candidates": [{
                "content": { "parts": [{ "text": answer.to_string() }] }
            }]
        })
    }

    #[test]
    fn test_parse_candidates_drops_invalid_entries() {
        let answer = json!({
            "candidates": [
                { "name": "Pikachu", "confidence": 0.4 },
                { "name": "", "confidence": 0.9 },
                { "name": "Mew", "confidence": 1.7 },
                { "confidence": 0.5 },
                { "name": "Charizard", "confidence": 0.92, "set_code": "swsh4", "number": "25" }
            ]
        });
        let candidates = parse_candidates(&answer).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].name, "Charizard");
        assert_eq!(candidates[0].set_code.as_deref(), Some("swsh4"));
        assert_eq!(candidates[1].name, "Pikachu");
    }

    #[test]
    fn test_parse_candidates_without_array_is_malformed() {
        let err = parse_candidates(&json!({ "answer": "Charizard" })).unwrap_err();
        assert!(matches!(err, IdentifyError::MalformedResponse { .. }));
    }

    #[test]
    fn test_parse_comparison_requires_offered_id() {
        let offered = vec![ComparisonImage {
            card_id: "sv1-1".into(),
            jpeg: vec![],
        }];
        let picked = parse_comparison(
            &json!({ "selected_id": "sv1-1", "confidence": 0.8, "reasoning": "same art" }),
            &offered,
        )
        .unwrap();
        assert_eq!(picked.selected_id, "sv1-1");

        assert!(parse_comparison(&json!({ "selected_id": "sv9-9", "confidence": 0.8 }), &offered)
            .is_none());
        assert!(parse_comparison(&json!({ "selected_id": "", "confidence": 0.8 }), &offered)
            .is_none());
    }

    async fn identifier_for(app: Router) -> GeminiIdentifier {
        let base = spawn_stub(app).await;
        GeminiIdentifier::new(
            base,
            "test-model",
            SecretString::from("key".to_string()),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_identify_text_success() {
        let app = Router::new().fallback(|| async {
            Json(envelope(json!({
                "candidates": [{ "name": "Mewtwo", "confidence": 0.88 }]
            })))
        });
        let identifier = identifier_for(app).await;
        let candidates = identifier
            .identify_text("ミュウツー HP 130", Language::Ja)
            .await
            .unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "Mewtwo");
    }

    #[tokio::test]
    async fn test_rate_limit_is_upstream_error() {
        let app = Router::new()
            .fallback(|| async { (StatusCode::TOO_MANY_REQUESTS, "quota exceeded") });
        let identifier = identifier_for(app).await;
        let err = identifier
            .identify_text("ピカチュウ", Language::Ja)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentifyError::Http { status: 429, .. }));
        assert_eq!(err.code(), crate::error::ErrorCode::UpstreamError);
    }

    #[tokio::test]
    async fn test_non_json_answer_is_malformed() {
        let app = Router::new().fallback(|| async {
            Json(json!({
                "candidates": [{ "content": { "parts": [{ "text": "I think it is Pikachu" }] } }]
            }))
        });
        let identifier = identifier_for(app).await;
        let err = identifier
            .identify_text("ピカチュウ", Language::Ja)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentifyError::MalformedResponse { .. }));
    }
}
