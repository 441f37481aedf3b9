//! The identification chain.
//!
//! Resolution runs these steps in order and stops at the first that
//! produces an answer:
//!
//! 1. **Skip**: confident extraction or a language the chain is not for
//! 2. **Confirmed**: a user already picked the card for this text
//! 3. **Static**: the built-in dictionary changed the text
//! 4. **Cache**: a live entry for the normalized text
//! 5. **Primary**: the AI identifier returned an acceptable candidate
//! 6. **Fallback**: literal translation, keeping weak primary candidates
//!
//! When none does, the caller gets a [`ResolveFailure`] carrying the
//! weakest primary candidate as its guess so the item can be resolved by
//! hand.

use std::sync::Arc;

use thiserror::Error;

use super::{CardIdentifier, Translator};
use crate::cache::{CacheSource, CachedTranslation, CachedValue, TranslationCache};
use crate::config::ResolverSettings;
use crate::dictionary::StaticDictionary;
use crate::error::{ErrorCode, IdentifyError};
use crate::types::{Game, IdentificationCandidate, Language, Resolution, ResolutionSource};

/// Weight of a literal translation relative to the best primary candidate.
const FALLBACK_RELATIVE_WEIGHT: f64 = 0.3;

/// Confidence of a literal translation when there is no primary candidate.
const FALLBACK_BASE_CONFIDENCE: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// 0-1000 scale; priors above it skip the chain.
    pub confidence_threshold: u32,
    pub target_language: Language,
    pub min_acceptance: f64,
    pub fallback_enabled: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self::from(&ResolverSettings::default())
    }
}

impl From<&ResolverSettings> for ResolverConfig {
    fn from(settings: &ResolverSettings) -> Self {
        Self {
            confidence_threshold: settings.confidence_threshold,
            target_language: settings.target_language,
            min_acceptance: settings.min_acceptance,
            fallback_enabled: settings.fallback_enabled,
        }
    }
}

/// The chain produced no acceptable answer.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ResolveFailure {
    pub code: ErrorCode,
    pub message: String,
    /// The lowest-confidence primary candidate, if there was any.
    pub best_guess: Option<IdentificationCandidate>,
    /// Every candidate seen, best first.
    pub candidates: Vec<IdentificationCandidate>,
}

impl ResolveFailure {
    fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            best_guess: None,
            candidates: Vec::new(),
        }
    }
}

pub struct IdentificationResolver {
    dictionary: StaticDictionary,
    cache: Arc<TranslationCache>,
    identifier: Option<Arc<dyn CardIdentifier>>,
    translator: Option<Arc<dyn Translator>>,
    config: ResolverConfig,
}

impl IdentificationResolver {
    pub fn new(cache: Arc<TranslationCache>, config: ResolverConfig) -> Self {
        Self {
            dictionary: StaticDictionary::new(),
            cache,
            identifier: None,
            translator: None,
            config,
        }
    }

    pub fn with_identifier(mut self, identifier: Arc<dyn CardIdentifier>) -> Self {
        self.identifier = Some(identifier);
        self
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_dictionary(mut self, dictionary: StaticDictionary) -> Self {
        self.dictionary = dictionary;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    pub fn has_identifier(&self) -> bool {
        self.identifier.is_some()
    }

    pub fn has_translator(&self) -> bool {
        self.translator.is_some()
    }

    /// Runs `text` through the chain. `prior_confidence` is the extractor's
    /// confidence on a 0-1000 scale.
    pub async fn resolve(
        &self,
        text: &str,
        declared_language: Language,
        prior_confidence: u32,
    ) -> Result<Resolution, ResolveFailure> {
        if prior_confidence > self.config.confidence_threshold
            || declared_language != self.config.target_language
        {
            return Ok(Resolution {
                translated_text: text.to_string(),
                source: ResolutionSource::Skipped,
                candidates: Vec::new(),
                card_id: None,
            });
        }

        let cached = match self.from_cache(text) {
            Some(resolution) if resolution.card_id.is_some() => return Ok(resolution),
            other => other,
        };

        let substitution = self.dictionary.substitute(text);
        if substitution.changed() {
            log::debug!(
                "Static dictionary replaced {} terms",
                substitution.replaced
            );
            self.store(
                text,
                CachedTranslation {
                    translated_text: substitution.text.clone(),
                    candidate: None,
                },
                CacheSource::Static,
            );
            return Ok(Resolution {
                translated_text: substitution.text,
                source: ResolutionSource::Static,
                candidates: Vec::new(),
                card_id: None,
            });
        }

        if let Some(resolution) = cached {
            return Ok(resolution);
        }

        let mut weak_candidates = Vec::new();
        let mut primary_error = None;
        match &self.identifier {
            Some(identifier) => match identifier.identify_text(text, declared_language).await {
                Ok(candidates) => match self.accept(candidates) {
                    Ok(top_and_rest) => {
                        let top = &top_and_rest[0];
                        self.store(
                            text,
                            CachedTranslation {
                                translated_text: top.name.clone(),
                                candidate: Some(top.clone()),
                            },
                            CacheSource::Primary,
                        );
                        return Ok(Resolution {
                            translated_text: top.name.clone(),
                            source: ResolutionSource::Primary,
                            candidates: top_and_rest,
                            card_id: None,
                        });
                    }
                    Err(weak) => weak_candidates = weak,
                },
                Err(e) => {
                    log::warn!("Primary identification failed: {}", e);
                    primary_error = Some(e);
                }
            },
            None => log::debug!("No primary identifier configured"),
        }

        let mut fallback_error = None;
        if self.config.fallback_enabled {
            if let Some(translator) = &self.translator {
                match translator
                    .translate(text, declared_language, Language::En)
                    .await
                {
                    Ok(translated) if !translated.trim().is_empty() => {
                        self.store(
                            text,
                            CachedTranslation {
                                translated_text: translated.clone(),
                                candidate: None,
                            },
                            CacheSource::Fallback,
                        );
                        let mut candidates = weak_candidates;
                        candidates.push(literal_candidate(&translated, &candidates));
                        return Ok(Resolution {
                            translated_text: translated,
                            source: ResolutionSource::Fallback,
                            candidates,
                            card_id: None,
                        });
                    }
                    Ok(_) => log::warn!("Literal translation came back empty"),
                    Err(e) => {
                        if e.code() == ErrorCode::ConfigurationError {
                            log::warn!("Skipping literal translation: {}", e);
                        } else {
                            log::warn!("Literal translation failed: {}", e);
                        }
                        fallback_error = Some(e);
                    }
                }
            }
        }

        Err(self.failure(weak_candidates, primary_error, fallback_error))
    }

    /// Identifies a card from its image with the primary identifier. The
    /// text cache is not consulted.
    pub async fn identify_image(
        &self,
        image: &[u8],
        mime_type: &str,
        game: Game,
    ) -> Result<Resolution, ResolveFailure> {
        let Some(identifier) = &self.identifier else {
            return Err(ResolveFailure::new(
                ErrorCode::ConfigurationError,
                "No primary identifier is configured",
            ));
        };

        let candidates = identifier
            .identify_image(image, mime_type, game)
            .await
            .map_err(|e| ResolveFailure::new(e.code(), e.to_string()))?;

        match self.accept(candidates) {
            Ok(candidates) => Ok(Resolution {
                translated_text: candidates[0].name.clone(),
                source: ResolutionSource::Primary,
                candidates,
                card_id: None,
            }),
            Err(weak) => Err(self.failure(weak, None, None)),
        }
    }

    /// Splits candidates into an accepted list (top first) or the weak ones.
    fn accept(
        &self,
        candidates: Vec<IdentificationCandidate>,
    ) -> Result<Vec<IdentificationCandidate>, Vec<IdentificationCandidate>> {
        let mut candidates: Vec<_> = candidates
            .into_iter()
            .filter(IdentificationCandidate::is_well_formed)
            .collect();
        super::sort_candidates(&mut candidates);
        match candidates.first() {
            Some(top) if top.confidence >= self.config.min_acceptance => Ok(candidates),
            _ => Err(candidates),
        }
    }

    fn from_cache(&self, text: &str) -> Option<Resolution> {
        let hit = match self.cache.get(text) {
            Ok(hit) => hit?,
            Err(e) => {
                log::warn!("Cache lookup failed, treating as miss: {}", e);
                return None;
            }
        };
        let (translation, card_id) = match hit.value {
            CachedValue::Identity {
                card_id,
                translation,
            } => (translation, Some(card_id)),
            CachedValue::Translation(t) => (Some(t), None),
        };
        let (translated_text, candidates) = match translation {
            Some(t) => (t.translated_text, t.candidate.into_iter().collect()),
            None => (text.to_string(), Vec::new()),
        };
        Some(Resolution {
            translated_text,
            source: ResolutionSource::Cache,
            candidates,
            card_id,
        })
    }

    fn store(&self, text: &str, value: CachedTranslation, source: CacheSource) {
        if let Err(e) = self.cache.set(text, &value, source) {
            log::warn!("Failed to cache {} result: {}", source, e);
        }
    }

    fn failure(
        &self,
        weak_candidates: Vec<IdentificationCandidate>,
        primary_error: Option<IdentifyError>,
        fallback_error: Option<IdentifyError>,
    ) -> ResolveFailure {
        let (code, message) = if let Some(top) = weak_candidates.first() {
            (
                ErrorCode::NoMatch,
                format!(
                    "Best candidate '{}' has confidence {:.2}, below {:.2}",
                    top.name, top.confidence, self.config.min_acceptance
                ),
            )
        } else if let Some(e) = primary_error.or(fallback_error) {
            (e.code(), e.to_string())
        } else if self.identifier.is_none() && self.translator.is_none() {
            (
                ErrorCode::ConfigurationError,
                "No identification service is configured".to_string(),
            )
        } else {
            (ErrorCode::NoMatch, "No candidate matched".to_string())
        };

        ResolveFailure {
            code,
            message,
            best_guess: weak_candidates.last().cloned(),
            candidates: weak_candidates,
        }
    }
}

fn literal_candidate(
    translated: &str,
    primary: &[IdentificationCandidate],
) -> IdentificationCandidate {
    let confidence = primary
        .first()
        .map(|best| best.confidence * FALLBACK_RELATIVE_WEIGHT)
        .unwrap_or(FALLBACK_BASE_CONFIDENCE);
    let name = translated
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default()
        .to_string();
    IdentificationCandidate {
        name,
        confidence,
        reasoning: Some("Literal translation of the scanned text".to_string()),
        ..Default::default()
    }
}
