//! Identification chain: static dictionary, cache, primary AI identifier
//! and literal translation fallback, plus visual comparison of candidates.

pub mod gemini;
pub mod resolver;
pub mod translate;
pub mod visual;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IdentifyError;
use crate::types::{Game, IdentificationCandidate, Language};

pub use gemini::GeminiIdentifier;
pub use resolver::{IdentificationResolver, ResolveFailure, ResolverConfig};
pub use translate::{
    LiteralTranslator, QuotaReservation, QuotaStatus, TokenProvider, TranslationQuota,
};
pub use visual::{VisualMatcher, VisualMatcherConfig};

/// Primary AI identifier.
///
/// Implementations return well-formed candidates only, best first.
#[async_trait]
pub trait CardIdentifier: Send + Sync {
    async fn identify_text(
        &self,
        text: &str,
        language: Language,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError>;

    async fn identify_image(
        &self,
        image: &[u8],
        mime_type: &str,
        game: Game,
    ) -> Result<Vec<IdentificationCandidate>, IdentifyError>;
}

/// Literal machine translation.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source: Language,
        target: Language,
    ) -> Result<String, IdentifyError>;
}

/// A catalog card image prepared for comparison.
#[derive(Debug, Clone)]
pub struct ComparisonImage {
    pub card_id: String,
    pub jpeg: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualMatch {
    pub selected_id: String,
    pub confidence: f64,
    pub reasoning: Option<String>,
}

/// Compares a scanned image against candidate card images.
#[async_trait]
pub trait VisualComparator: Send + Sync {
    async fn compare(
        &self,
        scanned_jpeg: &[u8],
        candidates: &[ComparisonImage],
    ) -> Result<Option<VisualMatch>, IdentifyError>;
}

/// Maximum length for error bodies carried into errors and logs.
const MAX_ERROR_BODY_LENGTH: usize = 200;

/// Converts a non-success response into an HTTP error with a shortened body.
pub(crate) async fn http_error(service: &'static str, response: reqwest::Response) -> IdentifyError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    IdentifyError::Http {
        service,
        status,
        body: truncate_body(body),
    }
}

fn truncate_body(body: String) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY_LENGTH) {
        Some((cut, _)) => format!("{}... (truncated)", &body[..cut]),
        None => body,
    }
}

/// Sorts candidates best first. Ties keep their original order.
pub(crate) fn sort_candidates(candidates: &mut [IdentificationCandidate]) {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}
