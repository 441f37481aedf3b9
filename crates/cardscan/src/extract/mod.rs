//! Field extraction from raw OCR text.
//!
//! [`FieldExtractor::extract`] is pure: the same text, game and hints
//! always produce the same [`ExtractedFields`]. Game-specific rules
//! live in [`pokemon`] and [`magic`], the rule data in [`patterns`] and
//! [`sets`].

pub mod magic;
pub mod patterns;
pub mod pokemon;
pub mod sets;

use aho_corasick::{AhoCorasick, MatchKind};
use serde::{Deserialize, Serialize};

use crate::dictionary::POKEMON_NAMES;
use crate::types::{Game, ImageHints};

use self::magic::MagicRules;
use self::patterns::{
    PatternTable, BOILERPLATE_PREFIXES, CONDITIONS, FOIL_TRIGGERS, GRADING_RULES,
    KNOWN_MAGIC_NAMES, MAX_INPUT_CHARS, MAX_SPECIAL_CHAR_DENSITY, SUFFIX_TOKENS,
};
use self::pokemon::PokemonRules;

pub use self::patterns::RULESET_VERSION;

const NAME_WEIGHT: f64 = 0.4;
const NUMBER_WEIGHT: f64 = 0.3;
const SET_WEIGHT: f64 = 0.2;
const HP_WEIGHT: f64 = 0.1;

/// Image-analysis signals at or above this confidence replace the text
/// signals instead of adding to them.
pub const HINT_OVERRIDE_CONFIDENCE: f64 = 0.7;

/// Structured fields recovered from a scan.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub card_name: Option<String>,
    pub card_number: Option<String>,
    pub set_total: Option<String>,
    pub set_code: Option<String>,
    pub set_name: Option<String>,
    pub hp: Option<String>,
    pub rarity: Option<String>,
    pub is_foil: bool,
    #[serde(default)]
    pub foil_triggers: Vec<String>,
    #[serde(default)]
    pub condition_hints: Vec<String>,
    /// Every set sharing the printed total when it did not identify a
    /// single set.
    #[serde(default)]
    pub set_candidates: Vec<String>,
    pub confidence: f64,
}

impl ExtractedFields {
    /// Additive coverage score over the identifying fields.
    fn coverage_confidence(&self) -> f64 {
        let mut score = 0.0;
        if self.card_name.is_some() {
            score += NAME_WEIGHT;
        }
        if self.card_number.is_some() {
            score += NUMBER_WEIGHT;
        }
        if self.set_code.is_some() || self.set_name.is_some() {
            score += SET_WEIGHT;
        }
        if self.hp.is_some() {
            score += HP_WEIGHT;
        }
        score.clamp(0.0, 1.0)
    }
}

/// Collector number as read from the card.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectorNumber {
    pub number: String,
    pub total: Option<String>,
    /// Set implied by the numbering scheme itself (promos).
    pub set_code: Option<String>,
    /// Rarity implied by the numbering scheme itself (footer letters).
    pub rarity: Option<&'static str>,
}

/// Game-specific extraction rules.
pub trait GameRules: Send + Sync {
    fn collector_number(&self, text: &str) -> Option<CollectorNumber>;
    fn hp(&self, text: &str) -> Option<String>;
    fn rarity(&self, text: &str, number: Option<&CollectorNumber>) -> Option<&'static str>;
    fn explicit_set_code(&self, text: &str) -> Option<String>;
    fn is_rarity_line(&self, line: &str) -> bool;
    /// Removes numbers, HP and set codes from a line.
    fn strip_structured(&self, line: &str) -> String;
    fn strip_hp(&self, line: &str) -> String;
}

/// Strips leading zeros, keeping a single `0` for all-zero input.
pub fn strip_leading_zeros(raw: &str) -> String {
    let stripped = raw.trim().trim_start_matches('0');
    if stripped.is_empty() {
        "0".to_string()
    } else {
        stripped.to_string()
    }
}

fn truncate_input(text: &str) -> &str {
    match text.char_indices().nth(MAX_INPUT_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

pub struct FieldExtractor {
    pokemon: PokemonRules,
    magic: MagicRules,
    foil: Option<AhoCorasick>,
    foil_terms: Vec<&'static str>,
    grading: PatternTable<&'static str>,
    pokemon_names: Option<AhoCorasick>,
    magic_names: Option<AhoCorasick>,
}

impl FieldExtractor {
    pub fn new() -> Self {
        let foil_terms: Vec<&'static str> = FOIL_TRIGGERS
            .iter()
            .chain(SUFFIX_TOKENS)
            .copied()
            .collect();
        let pokemon_names: Vec<&'static str> = POKEMON_NAMES
            .iter()
            .flat_map(|(ja, en)| [*ja, *en])
            .collect();

        Self {
            pokemon: PokemonRules::new(),
            magic: MagicRules::new(),
            foil: build_matcher("foil triggers", &foil_terms),
            foil_terms,
            grading: PatternTable::compile("grading", GRADING_RULES),
            pokemon_names: build_matcher("pokemon names", &pokemon_names),
            magic_names: build_matcher("magic names", KNOWN_MAGIC_NAMES),
        }
    }

    fn rules(&self, game: Game) -> &dyn GameRules {
        match game {
            Game::Pokemon => &self.pokemon,
            Game::Magic => &self.magic,
        }
    }

    /// Extracts structured fields from OCR text, folding in optional
    /// image-analysis hints.
    pub fn extract(&self, text: &str, game: Game, hints: Option<&ImageHints>) -> ExtractedFields {
        let text = truncate_input(text);
        let rules = self.rules(game);
        let mut fields = ExtractedFields::default();

        let number = rules.collector_number(text);
        if let Some(n) = &number {
            fields.card_number = Some(n.number.clone());
            fields.set_total = n.total.clone();
        }

        fields.hp = rules.hp(text);
        fields.rarity = rules.rarity(text, number.as_ref()).map(str::to_string);
        self.resolve_set(text, game, rules, number.as_ref(), &mut fields);
        fields.card_name = self.card_name(text, game, rules);

        fields.foil_triggers = self.foil_triggers(text);
        fields.is_foil = !fields.foil_triggers.is_empty();
        fields.condition_hints = self.condition_hints(text);

        fields.confidence = fields.coverage_confidence();

        if let Some(hints) = hints {
            apply_hints(&mut fields, hints);
        }

        fields
    }

    /// Explicit code, then set name (longest wins), then printed total
    /// when it names exactly one set.
    fn resolve_set(
        &self,
        text: &str,
        game: Game,
        rules: &dyn GameRules,
        number: Option<&CollectorNumber>,
        fields: &mut ExtractedFields,
    ) {
        let named = sets::set_names(game).find(text);

        let code = rules
            .explicit_set_code(text)
            .or_else(|| number.and_then(|n| n.set_code.clone()))
            .or_else(|| named.map(|(_, code)| code.to_string()));

        let code = match code {
            Some(code) => Some(code),
            None => {
                let candidates = fields
                    .set_total
                    .as_deref()
                    .map(|total| sets::set_codes_for_total(game, total))
                    .unwrap_or_default();
                match candidates.as_slice() {
                    [only] => Some(only.to_string()),
                    [] => None,
                    many => {
                        fields.set_candidates = many.iter().map(|c| c.to_string()).collect();
                        None
                    }
                }
            }
        };

        fields.set_name = named
            .map(|(name, _)| name.to_string())
            .or_else(|| {
                code.as_deref()
                    .and_then(|c| sets::set_name_for_code(game, c))
                    .map(str::to_string)
            });
        fields.set_code = code;
    }

    fn card_name(&self, text: &str, game: Game, rules: &dyn GameRules) -> Option<String> {
        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let names = match game {
            Game::Pokemon => self.pokemon_names.as_ref(),
            Game::Magic => self.magic_names.as_ref(),
        };
        if let Some(names) = names {
            let known = lines
                .iter()
                .find(|line| contains_known_name(names, line))
                .map(|line| clean_name(&rules.strip_hp(line)));
            if let Some(name) = known.filter(|n| !n.is_empty()) {
                return Some(name);
            }
        }

        let plausible = lines.iter().find(|line| {
            let residue = rules.strip_structured(line);
            residue.chars().any(char::is_alphabetic)
                && !rules.is_rarity_line(line)
                && !BOILERPLATE_PREFIXES.starts_with_entry(line)
                && !self.grading.is_match(line)
                && special_char_density(line) < MAX_SPECIAL_CHAR_DENSITY
        });
        if let Some(line) = plausible {
            let name = clean_name(&rules.strip_hp(line));
            if !name.is_empty() {
                return Some(name);
            }
        }

        lines
            .iter()
            .find(|line| line.chars().any(char::is_alphabetic))
            .map(|line| clean_name(line))
            .filter(|n| !n.is_empty())
    }

    fn foil_triggers(&self, text: &str) -> Vec<String> {
        let Some(matcher) = &self.foil else {
            return Vec::new();
        };
        let mut triggers: Vec<String> = Vec::new();
        for m in matcher.find_iter(text) {
            let term = self.foil_terms[m.pattern().as_usize()].to_string();
            if !triggers.contains(&term) {
                triggers.push(term);
            }
        }
        triggers
    }

    fn condition_hints(&self, text: &str) -> Vec<String> {
        let mut hints: Vec<String> = self
            .grading
            .captures_all(text)
            .into_iter()
            .filter_map(|(caps, _)| {
                Some(format!(
                    "{} {}",
                    caps.get(1)?.as_str().to_ascii_uppercase(),
                    caps.get(2)?.as_str()
                ))
            })
            .collect();
        if let Some((_, condition)) = CONDITIONS.find(text) {
            hints.push(condition.to_string());
        }
        hints.dedup();
        hints
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}

fn build_matcher(what: &str, terms: &[&str]) -> Option<AhoCorasick> {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .match_kind(MatchKind::LeftmostLongest)
        .build(terms)
        .map_err(|e| log::warn!("Failed to build {} matcher: {}", what, e))
        .ok()
}

/// Known names must stand alone when they are ASCII (`Mew` in `Smew`
/// does not count); CJK names have no word separators to check.
fn contains_known_name(matcher: &AhoCorasick, line: &str) -> bool {
    matcher.find_iter(line).any(|m| {
        let matched = &line[m.start()..m.end()];
        if !matched.is_ascii() {
            return true;
        }
        let before = line[..m.start()].chars().next_back();
        let after = line[m.end()..].chars().next();
        !before.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
            && !after.map(|c| c.is_ascii_alphanumeric()).unwrap_or(false)
    })
}

fn clean_name(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| !c.is_alphanumeric() && c != '\'' && c != ')' && c != '.')
        .to_string()
}

fn special_char_density(line: &str) -> f64 {
    let visible: Vec<char> = line.chars().filter(|c| !c.is_whitespace()).collect();
    if visible.is_empty() {
        return 1.0;
    }
    let special = visible.iter().filter(|c| !c.is_alphanumeric()).count();
    special as f64 / visible.len() as f64
}

/// Folds image-analysis hints into text-derived fields. Confidence is
/// raised to the hint confidence, never lowered.
fn apply_hints(fields: &mut ExtractedFields, hints: &ImageHints) {
    let hint_confidence = if hints.confidence.is_finite() {
        hints.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };

    if hint_confidence >= HINT_OVERRIDE_CONFIDENCE {
        if let Some(is_foil) = hints.is_foil {
            fields.is_foil = is_foil;
            if !is_foil {
                fields.foil_triggers.clear();
            }
        }
        if !hints.condition_hints.is_empty() {
            fields.condition_hints = hints.condition_hints.clone();
        }
    } else {
        if hints.is_foil == Some(true) {
            fields.is_foil = true;
        }
        for hint in &hints.condition_hints {
            if !fields.condition_hints.contains(hint) {
                fields.condition_hints.push(hint.clone());
            }
        }
    }

    fields.confidence = fields.confidence.max(hint_confidence);
}
