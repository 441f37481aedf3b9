//! Builders for test inputs.

#![allow(dead_code)]

use cardscan::{
    CardRecord, Game, IdentificationCandidate, ImageHints, Language, RawScan, ScanImage,
};

/// Builder for `RawScan` values.
pub struct ScanBuilder {
    game: Game,
    language: Language,
    text: Option<String>,
    image: Option<ScanImage>,
    hints: Option<ImageHints>,
}

impl ScanBuilder {
    pub fn new() -> Self {
        Self {
            game: Game::Pokemon,
            language: Language::Ja,
            text: None,
            image: None,
            hints: None,
        }
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = Some(text.to_string());
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.language = language;
        self
    }

    pub fn game(mut self, game: Game) -> Self {
        self.game = game;
        self
    }

    pub fn image(mut self, bytes: &[u8], extension: &str) -> Self {
        self.image = Some(ScanImage {
            bytes: bytes.to_vec(),
            extension: extension.to_string(),
        });
        self
    }

    pub fn foil_hint(mut self, is_foil: bool, confidence: f64) -> Self {
        self.hints = Some(ImageHints {
            is_foil: Some(is_foil),
            condition_hints: Vec::new(),
            confidence,
        });
        self
    }

    pub fn build(self) -> RawScan {
        RawScan {
            image: self.image,
            ocr_text: self.text,
            game: self.game,
            language: self.language,
            hints: self.hints,
        }
    }
}

impl Default for ScanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A confident English scan that needs no identification service.
pub fn confident_english_scan() -> RawScan {
    ScanBuilder::new()
        .language(Language::En)
        .text("Charizard\nHP 170\n025/185\nSWSH4")
        .build()
}

pub fn japanese_scan(text: &str) -> RawScan {
    ScanBuilder::new().text(text).build()
}

pub fn candidate(name: &str, confidence: f64) -> IdentificationCandidate {
    IdentificationCandidate {
        name: name.to_string(),
        confidence,
        ..Default::default()
    }
}

pub fn card(id: &str, name: &str, set_code: &str, number: &str) -> CardRecord {
    CardRecord {
        id: id.to_string(),
        name: name.to_string(),
        game: Some(Game::Pokemon),
        set_code: Some(set_code.to_string()),
        number: Some(number.to_string()),
        ..Default::default()
    }
}
