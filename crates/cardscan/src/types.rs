use std::fmt;

use serde::{Deserialize, Serialize};

/// Supported trading card games.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Game {
    Pokemon,
    Magic,
}

impl Game {
    pub fn as_str(&self) -> &'static str {
        match self {
            Game::Pokemon => "pokemon",
            Game::Magic => "magic",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pokemon" | "pokémon" | "ptcg" => Some(Game::Pokemon),
            "magic" | "mtg" => Some(Game::Magic),
            _ => None,
        }
    }
}

impl fmt::Display for Game {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language a card is printed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ja,
    De,
    Fr,
    It,
    Es,
    Pt,
    Ko,
    Zh,
    Other,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ja => "ja",
            Language::De => "de",
            Language::Fr => "fr",
            Language::It => "it",
            Language::Es => "es",
            Language::Pt => "pt",
            Language::Ko => "ko",
            Language::Zh => "zh",
            Language::Other => "other",
        }
    }

    /// Parses an ISO-639-1 code. Unknown codes map to [`Language::Other`].
    pub fn from_code(code: &str) -> Self {
        let code = code.trim().to_ascii_lowercase();
        let primary = code.split(|c| c == '-' || c == '_').next().unwrap_or_default();
        match primary {
            "en" => Language::En,
            "ja" | "jp" => Language::Ja,
            "de" => Language::De,
            "fr" => Language::Fr,
            "it" => Language::It,
            "es" => Language::Es,
            "pt" => Language::Pt,
            "ko" | "kr" => Language::Ko,
            "zh" | "cn" => Language::Zh,
            _ => Language::Other,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scanned card as submitted for import.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawScan {
    /// Image bytes to store, if the scan came with a picture.
    #[serde(skip)]
    pub image: Option<ScanImage>,
    pub ocr_text: Option<String>,
    pub game: Game,
    pub language: Language,
    #[serde(default)]
    pub hints: Option<ImageHints>,
}

impl RawScan {
    pub fn from_text(text: impl Into<String>, game: Game, language: Language) -> Self {
        Self {
            image: None,
            ocr_text: Some(text.into()),
            game,
            language,
            hints: None,
        }
    }

    pub fn has_content(&self) -> bool {
        let has_text = self
            .ocr_text
            .as_deref()
            .map(|t| !t.trim().is_empty())
            .unwrap_or(false);
        let has_image = self
            .image
            .as_ref()
            .map(|i| !i.bytes.is_empty())
            .unwrap_or(false);
        has_text || has_image
    }
}

/// Uploaded image bytes with their file extension.
#[derive(Debug, Clone)]
pub struct ScanImage {
    pub bytes: Vec<u8>,
    pub extension: String,
}

/// Signals from an external image analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageHints {
    pub is_foil: Option<bool>,
    #[serde(default)]
    pub condition_hints: Vec<String>,
    pub confidence: f64,
}

/// A proposed card match.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentificationCandidate {
    pub name: String,
    #[serde(default)]
    pub card_type: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub set_name: Option<String>,
    #[serde(default)]
    pub set_code: Option<String>,
    #[serde(default)]
    pub number: Option<String>,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl IdentificationCandidate {
    /// Whether the candidate is usable at all: a non-empty name and a
    /// finite confidence in [0, 1].
    pub fn is_well_formed(&self) -> bool {
        !self.name.trim().is_empty()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Skipped,
    Static,
    Cache,
    Primary,
    Fallback,
    Failed,
}

impl ResolutionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionSource::Skipped => "skipped",
            ResolutionSource::Static => "static",
            ResolutionSource::Cache => "cache",
            ResolutionSource::Primary => "primary",
            ResolutionSource::Fallback => "fallback",
            ResolutionSource::Failed => "failed",
        }
    }
}

impl fmt::Display for ResolutionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of running a text through the identification chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub translated_text: String,
    pub source: ResolutionSource,
    /// Ordered best first.
    pub candidates: Vec<IdentificationCandidate>,
    /// Identity confirmed by a user for this exact text.
    pub card_id: Option<String>,
}

impl Resolution {
    pub fn best_guess(&self) -> Option<&IdentificationCandidate> {
        self.candidates.first()
    }
}

/// A card as known to the catalog.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardRecord {
    pub id: String,
    pub name: String,
    pub game: Option<Game>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub number: Option<String>,
    pub rarity: Option<String>,
    pub image_url: Option<String>,
}

/// Catalog search parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardQuery {
    pub game: Option<Game>,
    pub name: Option<String>,
    pub set_code: Option<String>,
    pub number: Option<String>,
    pub limit: Option<u32>,
}
