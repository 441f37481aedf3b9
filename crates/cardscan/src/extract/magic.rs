use super::patterns::{
    magic_rarity_letter, NumberFormat, PatternTable, MAGIC_NUMBER_RULES, MAGIC_RARITIES,
};
use super::sets::MAGIC_SET_CODE_RULES;
use super::{strip_leading_zeros, CollectorNumber, GameRules};

pub struct MagicRules {
    numbers: PatternTable<NumberFormat>,
    set_codes: PatternTable<()>,
}

impl MagicRules {
    pub fn new() -> Self {
        Self {
            numbers: PatternTable::compile("magic_numbers", MAGIC_NUMBER_RULES),
            set_codes: PatternTable::compile("magic_set_codes", MAGIC_SET_CODE_RULES),
        }
    }
}

impl Default for MagicRules {
    fn default() -> Self {
        Self::new()
    }
}

impl GameRules for MagicRules {
    fn collector_number(&self, text: &str) -> Option<CollectorNumber> {
        self.numbers.first_accepted(text, |caps, format| match format {
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
            NumberFormat::Footer => Some(CollectorNumber {
                number: strip_leading_zeros(caps.get(1)?.as_str()),
                rarity: magic_rarity_letter(caps.get(2)?.as_str()),
                ..Default::default()
            }),
            NumberFormat::Gallery | NumberFormat::Promo => None,
        })
    }

    fn hp(&self, _text: &str) -> Option<String> {
        None
    }

    fn rarity(&self, text: &str, number: Option<&CollectorNumber>) -> Option<&'static str> {
        MAGIC_RARITIES
            .find(text)
            .map(|(_, rarity)| rarity)
            .or_else(|| number.and_then(|n| n.rarity))
    }

    fn explicit_set_code(&self, text: &str) -> Option<String> {
        self.set_codes.first_accepted(text, |caps, _| {
            Some(caps.get(1)?.as_str().to_ascii_lowercase())
        })
    }

    fn is_rarity_line(&self, line: &str) -> bool {
        MAGIC_RARITIES.exact(line).is_some()
    }

    fn strip_structured(&self, line: &str) -> String {
        let line = self.numbers.strip(line);
        self.set_codes.strip(&line)
    }

    fn strip_hp(&self, line: &str) -> String {
        line.to_string()
    }
}
