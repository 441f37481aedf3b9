use super::patterns::{
    NumberFormat, PatternTable, HP_RANGE, HP_RULES, POKEMON_NUMBER_RULES, POKEMON_RARITIES,
    POKEMON_RARITY_CODES, PROMO_SETS,
};
use super::sets::POKEMON_SET_CODE_RULES;
use super::{strip_leading_zeros, CollectorNumber, GameRules};

pub struct PokemonRules {
    numbers: PatternTable<NumberFormat>,
    hp: PatternTable<&'static str>,
    rarity_codes: PatternTable<&'static str>,
    set_codes: PatternTable<()>,
}

impl PokemonRules {
    pub fn new() -> Self {
        Self {
            numbers: PatternTable::compile("pokemon_numbers", POKEMON_NUMBER_RULES),
            hp: PatternTable::compile("hp", HP_RULES),
            rarity_codes: PatternTable::compile("pokemon_rarity_codes", POKEMON_RARITY_CODES),
            set_codes: PatternTable::compile("pokemon_set_codes", POKEMON_SET_CODE_RULES),
        }
    }
}

impl Default for PokemonRules {
    fn default() -> Self {
        Self::new()
    }
}

/// Repairs digits commonly misread by OCR.
fn repair_digits(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            'O' | 'o' => '0',
            'I' | 'i' | 'l' | 'L' => '1',
            'S' | 's' => '5',
            other => other,
        })
        .collect()
}

impl GameRules for PokemonRules {
    fn collector_number(&self, text: &str) -> Option<CollectorNumber> {
        self.numbers.first_accepted(text, |caps, format| match format {
            NumberFormat::Gallery => {
                let prefix = caps.get(1)?.as_str().to_ascii_uppercase();
                let number = strip_leading_zeros(caps.get(2)?.as_str());
                let total = strip_leading_zeros(caps.get(3)?.as_str());
                Some(CollectorNumber {
                    number: format!("{}{}", prefix, number),
                    total: Some(format!("{}{}", prefix, total)),
                    ..Default::default()
                })
            }
            NumberFormat::Standard => {
                let total = strip_leading_zeros(caps.get(2)?.as_str());
                if total == "0" {
                    return None;
                }
                Some(CollectorNumber {
                    number: strip_leading_zeros(caps.get(1)?.as_str()),
                    total: Some(total),
                    ..Default::default()
                })
            }
            NumberFormat::Promo => {
                let prefix = caps.get(1)?.as_str().to_ascii_uppercase();
                let number = strip_leading_zeros(caps.get(2)?.as_str());
                Some(CollectorNumber {
                    set_code: PROMO_SETS.exact(&prefix).map(str::to_string),
                    number: format!("{}{}", prefix, number),
                    ..Default::default()
                })
            }
            NumberFormat::Footer => None,
        })
    }

    fn hp(&self, text: &str) -> Option<String> {
        self.hp.first_accepted(text, |caps, _| {
            let raw = caps.get(1)?.as_str();
            if !raw.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
            let value: u32 = repair_digits(raw).parse().ok()?;
            HP_RANGE.contains(&value).then(|| value.to_string())
        })
    }

    fn rarity(&self, text: &str, _number: Option<&CollectorNumber>) -> Option<&'static str> {
        POKEMON_RARITIES
            .find(text)
            .map(|(_, rarity)| rarity)
            .or_else(|| self.rarity_codes.first_accepted(text, |_, rarity| Some(rarity)))
    }

    fn explicit_set_code(&self, text: &str) -> Option<String> {
        self.set_codes.first_accepted(text, |caps, _| {
            let m = caps.get(1)?;
            // `SV10/SV30` is a gallery number, not a set code.
            if text[m.end()..].trim_start().starts_with('/')
                || text[..m.start()].trim_end().ends_with('/')
            {
                return None;
            }
            Some(m.as_str().to_ascii_lowercase())
        })
    }

    fn is_rarity_line(&self, line: &str) -> bool {
        POKEMON_RARITIES.exact(line).is_some() || self.rarity_codes.strip(line).trim().is_empty()
    }

    fn strip_structured(&self, line: &str) -> String {
        let line = self.numbers.strip(line);
        let line = self.hp.strip(&line);
        self.set_codes.strip(&line)
    }

    fn strip_hp(&self, line: &str) -> String {
        self.hp.strip(line)
    }
}
