//! Declarative rule tables for field extraction.
//!
//! Every table is an ordered list of `(pattern, result)` pairs plus a
//! [`MatchPolicy`]. The data lives in consts so it can be reviewed and
//! versioned on its own; the matching code below is shared by all tables.

use regex::{Captures, Regex};

/// Bumped whenever a table below changes in a way that alters output.
pub const RULESET_VERSION: u32 = 4;

/// How a table resolves several matching entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPolicy {
    /// The first entry (in table order) that matches anywhere wins.
    FirstMatch,
    /// The longest matching literal wins; ties go to the earlier entry.
    LongestLiteral,
}

/// A table of case-insensitive literals.
#[derive(Debug)]
pub struct LiteralTable<T: 'static> {
    pub name: &'static str,
    pub policy: MatchPolicy,
    /// Require a non-alphanumeric character (or text edge) on both sides.
    pub word_bounded: bool,
    pub entries: &'static [(&'static str, T)],
}

impl<T: Copy> LiteralTable<T> {
    /// Finds the winning entry in `text` according to the table policy.
    pub fn find(&self, text: &str) -> Option<(&'static str, T)> {
        let haystack = text.to_lowercase();
        let mut best: Option<(&'static str, T)> = None;
        for &(literal, result) in self.entries {
            if !contains_literal(&haystack, &literal.to_lowercase(), self.word_bounded) {
                continue;
            }
            match self.policy {
                MatchPolicy::FirstMatch => return Some((literal, result)),
                MatchPolicy::LongestLiteral => {
                    let longer = best
                        .map(|(current, _)| literal.chars().count() > current.chars().count())
                        .unwrap_or(true);
                    if longer {
                        best = Some((literal, result));
                    }
                }
            }
        }
        best
    }

    /// Returns the entry equal to the whole of `text` (trimmed).
    pub fn exact(&self, text: &str) -> Option<T> {
        let needle = text.trim().to_lowercase();
        self.entries
            .iter()
            .find(|(literal, _)| literal.to_lowercase() == needle)
            .map(|(_, result)| *result)
    }

    /// Whether `text` starts with one of the literals as a whole word.
    pub fn starts_with_entry(&self, text: &str) -> bool {
        let haystack = text.trim().to_lowercase();
        self.entries.iter().any(|(literal, _)| {
            let literal = literal.to_lowercase();
            haystack.starts_with(&literal)
                && !haystack[literal.len()..]
                    .chars()
                    .next()
                    .map(char::is_alphanumeric)
                    .unwrap_or(false)
        })
    }
}

fn contains_literal(haystack: &str, needle: &str, word_bounded: bool) -> bool {
    if needle.is_empty() {
        return false;
    }
    if !word_bounded {
        return haystack.contains(needle);
    }
    haystack.match_indices(needle).any(|(start, matched)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + matched.len()..].chars().next();
        !before.map(char::is_alphanumeric).unwrap_or(false)
            && !after.map(char::is_alphanumeric).unwrap_or(false)
    })
}

/// Source form of a regex rule.
#[derive(Debug, Clone, Copy)]
pub struct PatternRule<T: 'static> {
    pub pattern: &'static str,
    pub result: T,
}

/// A compiled, ordered regex table. The first rule whose pattern matches
/// and whose captures pass the caller's check wins.
#[derive(Debug)]
pub struct PatternTable<T: 'static> {
    pub name: &'static str,
    rules: Vec<(Regex, T)>,
}

impl<T: Copy> PatternTable<T> {
    /// Compiles a rule list. Rules that fail to compile are logged and
    /// skipped so one bad entry cannot disable the whole table.
    pub fn compile(name: &'static str, rules: &[PatternRule<T>]) -> Self {
        let rules = rules
            .iter()
            .filter_map(|rule| match Regex::new(rule.pattern) {
                Ok(regex) => Some((regex, rule.result)),
                Err(e) => {
                    log::warn!("Skipping invalid {} pattern '{}': {}", name, rule.pattern, e);
                    None
                }
            })
            .collect();
        Self { name, rules }
    }

    /// Returns the first accepted match, trying every occurrence of each
    /// rule in order.
    pub fn first_accepted<'t, R>(
        &self,
        text: &'t str,
        mut accept: impl FnMut(&Captures<'t>, T) -> Option<R>,
    ) -> Option<R> {
        for (regex, result) in &self.rules {
            for caps in regex.captures_iter(text) {
                if let Some(value) = accept(&caps, *result) {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Every match of every rule, in rule order.
    pub fn captures_all<'t>(&self, text: &'t str) -> Vec<(Captures<'t>, T)> {
        self.rules
            .iter()
            .flat_map(|(regex, result)| regex.captures_iter(text).map(move |c| (c, *result)))
            .collect()
    }

    /// Removes every match of every rule from `text`.
    pub fn strip(&self, text: &str) -> String {
        self.rules
            .iter()
            .fold(text.to_string(), |acc, (regex, _)| {
                regex.replace_all(&acc, " ").into_owned()
            })
    }

    /// Whether any rule matches `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.rules.iter().any(|(regex, _)| regex.is_match(text))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Collector numbers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumberFormat {
    /// `TG05/TG30`: prefixed gallery numbering.
    Gallery,
    /// `025/185`.
    Standard,
    /// `SWSH039`: black star promo.
    Promo,
    /// `0123 R`: modern footer with a rarity letter.
    Footer,
}

pub const POKEMON_NUMBER_RULES: &[PatternRule<NumberFormat>] = &[
    PatternRule {
        pattern: r"(?i)\b(TG|GG|SV|RC)\s*0*(\d{1,3})\s*/\s*(?:TG|GG|SV|RC)?\s*0*(\d{1,3})\b",
        result: NumberFormat::Gallery,
    },
    PatternRule {
        pattern: r"\b(\d{1,3})\s*/\s*(\d{2,3})\b",
        result: NumberFormat::Standard,
    },
    PatternRule {
        pattern: r"(?i)\b(SWSH|SVP|SM|XY|BW)\s*-?\s*(\d{3})\b",
        result: NumberFormat::Promo,
    },
];

pub const MAGIC_NUMBER_RULES: &[PatternRule<NumberFormat>] = &[
    PatternRule {
        pattern: r"\b(\d{1,4})\s*/\s*(\d{2,4})\b",
        result: NumberFormat::Standard,
    },
    PatternRule {
        pattern: r"\b(\d{3,4})\s+([CURMSLT])\b",
        result: NumberFormat::Footer,
    },
];

/// Promo prefixes to their promo set codes.
pub const PROMO_SETS: LiteralTable<&str> = LiteralTable {
    name: "promo_sets",
    policy: MatchPolicy::FirstMatch,
    word_bounded: true,
    entries: &[
        ("swsh", "swshp"),
        ("svp", "svp"),
        ("sm", "smp"),
        ("xy", "xyp"),
        ("bw", "bwp"),
    ],
};

// ---------------------------------------------------------------------------
// HP
// ---------------------------------------------------------------------------

/// HP patterns in order of trust. Digit classes admit the common OCR
/// misreads O, I, l and S; captured values are repaired before the
/// plausibility check.
pub const HP_RULES: &[PatternRule<&str>] = &[
    PatternRule {
        pattern: r"(?i)\b(?:HP|KP|PV|PS)[ \t]*[:.]?[ \t]*([0-9OIlS]{2,3})\b",
        result: "label_first",
    },
    PatternRule {
        pattern: r"(?i)\b([0-9OIlS]{2,3})[ \t]*(?:HP|KP|PV|PS)\b",
        result: "label_last",
    },
    PatternRule {
        pattern: r"(?i)\bH[ \t]+P[ \t]*([0-9OIlS]{2,3})\b",
        result: "spaced_label",
    },
];

pub const HP_RANGE: std::ops::RangeInclusive<u32> = 10..=400;

// ---------------------------------------------------------------------------
// Rarity
// ---------------------------------------------------------------------------

pub const POKEMON_RARITIES: LiteralTable<&str> = LiteralTable {
    name: "pokemon_rarities",
    policy: MatchPolicy::LongestLiteral,
    word_bounded: true,
    entries: &[
        ("Special Illustration Rare", "Special Illustration Rare"),
        ("Illustration Rare", "Illustration Rare"),
        ("Hyper Rare", "Hyper Rare"),
        ("Secret Rare", "Secret Rare"),
        ("Ultra Rare", "Ultra Rare"),
        ("Double Rare", "Double Rare"),
        ("ACE SPEC Rare", "ACE SPEC Rare"),
        ("Amazing Rare", "Amazing Rare"),
        ("Radiant Rare", "Radiant Rare"),
        ("Shiny Rare", "Shiny Rare"),
        ("Rare Holo VMAX", "Rare Holo VMAX"),
        ("Rare Holo V", "Rare Holo V"),
        ("Rare Holo", "Rare Holo"),
        ("Promo", "Promo"),
        ("Rare", "Rare"),
        ("Uncommon", "Uncommon"),
        ("Common", "Common"),
    ],
};

/// Whole-word printed rarity codes, mostly seen on Japanese prints.
pub const POKEMON_RARITY_CODES: &[PatternRule<&str>] = &[
    PatternRule {
        pattern: r"\bSAR\b",
        result: "Special Illustration Rare",
    },
    PatternRule {
        pattern: r"\bCSR\b",
        result: "Character Super Rare",
    },
    PatternRule {
        pattern: r"\bCHR\b",
        result: "Character Rare",
    },
    PatternRule {
        pattern: r"\bUR\b",
        result: "Hyper Rare",
    },
    PatternRule {
        pattern: r"\bHR\b",
        result: "Hyper Rare",
    },
    PatternRule {
        pattern: r"\bSR\b",
        result: "Secret Rare",
    },
    PatternRule {
        pattern: r"\bAR\b",
        result: "Illustration Rare",
    },
    PatternRule {
        pattern: r"\bRRR\b",
        result: "Ultra Rare",
    },
    PatternRule {
        pattern: r"\bRR\b",
        result: "Double Rare",
    },
];

pub const MAGIC_RARITIES: LiteralTable<&str> = LiteralTable {
    name: "magic_rarities",
    policy: MatchPolicy::LongestLiteral,
    word_bounded: true,
    entries: &[
        ("Mythic Rare", "Mythic Rare"),
        ("Mythic", "Mythic Rare"),
        ("Rare", "Rare"),
        ("Uncommon", "Uncommon"),
        ("Common", "Common"),
        ("Special", "Special"),
        ("Bonus", "Bonus"),
    ],
};

/// Footer rarity letters.
pub fn magic_rarity_letter(letter: &str) -> Option<&'static str> {
    match letter {
        "C" => Some("Common"),
        "U" => Some("Uncommon"),
        "R" => Some("Rare"),
        "M" => Some("Mythic Rare"),
        "S" => Some("Special"),
        "L" => Some("Land"),
        "T" => Some("Token"),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Foil, condition
// ---------------------------------------------------------------------------

/// Substrings that mark a foil printing. Matched leftmost-longest, so
/// `reverse holo` is reported once rather than as `holo` too.
pub const FOIL_TRIGGERS: &[&str] = &[
    "reverse holo",
    "holofoil",
    "cosmos holo",
    "holo",
    "foil",
    "etched",
    "full art",
    "textured",
];

/// Special-suffix variant markers. Any of these also flags the card.
pub const SUFFIX_TOKENS: &[&str] = &["oversized", "jumbo", "alternate art", "alt art", "★"];

pub const GRADING_RULES: &[PatternRule<&str>] = &[PatternRule {
    pattern: r"(?i)\b(PSA|BGS|CGC|SGC|ACE)\s*(10|[1-9](?:\.5)?)\b",
    result: "grade",
}];

pub const CONDITIONS: LiteralTable<&str> = LiteralTable {
    name: "conditions",
    policy: MatchPolicy::LongestLiteral,
    word_bounded: true,
    entries: &[
        ("Near Mint", "Near Mint"),
        ("NM", "Near Mint"),
        ("Lightly Played", "Lightly Played"),
        ("LP", "Lightly Played"),
        ("Moderately Played", "Moderately Played"),
        ("MP", "Moderately Played"),
        ("Heavily Played", "Heavily Played"),
        ("Damaged", "Damaged"),
        ("Mint", "Mint"),
    ],
};

// ---------------------------------------------------------------------------
// Name heuristics
// ---------------------------------------------------------------------------

/// Lines that start with one of these are card-type or boilerplate lines,
/// never a name.
pub const BOILERPLATE_PREFIXES: LiteralTable<()> = LiteralTable {
    name: "boilerplate_prefixes",
    policy: MatchPolicy::FirstMatch,
    word_bounded: true,
    entries: &[
        ("basic", ()),
        ("stage 1", ()),
        ("stage 2", ()),
        ("trainer", ()),
        ("supporter", ()),
        ("item", ()),
        ("stadium", ()),
        ("energy", ()),
        ("pokémon tool", ()),
        ("weakness", ()),
        ("resistance", ()),
        ("retreat", ()),
        ("illus", ()),
        ("©", ()),
        ("nintendo", ()),
        ("creatures", ()),
        ("game freak", ()),
        ("ability", ()),
        ("evolves from", ()),
        ("たね", ()),
        ("進化", ()),
        ("creature", ()),
        ("legendary creature", ()),
        ("instant", ()),
        ("sorcery", ()),
        ("enchantment", ()),
        ("artifact", ()),
        ("land", ()),
        ("planeswalker", ()),
        ("battle", ()),
        ("wizards of the coast", ()),
    ],
};

/// Names that mark a line as the card name when present.
pub const KNOWN_MAGIC_NAMES: &[&str] = &[
    "Sheoldred",
    "Jace",
    "Liliana",
    "Chandra",
    "Nissa",
    "Teferi",
    "Urza",
    "Karn",
    "Elesh Norn",
    "Atraxa",
    "Ragavan",
    "The One Ring",
    "Lightning Bolt",
    "Counterspell",
];

/// Lines whose share of special characters reaches this are noise.
pub const MAX_SPECIAL_CHAR_DENSITY: f64 = 0.3;

/// Input beyond this many characters is ignored.
pub const MAX_INPUT_CHARS: usize = 10_000;
