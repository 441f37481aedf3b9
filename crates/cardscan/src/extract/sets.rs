//! Set identification tables: explicit code patterns, printed set names
//! and printed set totals.

use super::patterns::{LiteralTable, MatchPolicy, PatternRule};
use crate::types::Game;

/// Explicit Pokemon set codes as printed in the card footer.
pub const POKEMON_SET_CODE_RULES: &[PatternRule<()>] = &[
    PatternRule {
        pattern: r"(?i)\b(swsh\d{1,2}(?:pt5)?|sv\d{1,2}(?:pt5)?|sm\d{1,2}|xy\d{1,2}|bw\d{1,2})\b",
        result: (),
    },
    PatternRule {
        pattern: r"(?i)\b(s\d{1,2}[a-z]|sv\d[a-z])\b",
        result: (),
    },
];

/// Magic set codes printed next to the language marker, e.g. `DMU • EN`.
pub const MAGIC_SET_CODE_RULES: &[PatternRule<()>] = &[PatternRule {
    pattern: r"\b([A-Z0-9]{3})\s*[•·*]\s*(?:EN|JA|JP|DE|FR|IT|ES|PT|KO|ZH|RU|CS|CT|PH)\b",
    result: (),
}];

pub const POKEMON_SET_NAMES: LiteralTable<&str> = LiteralTable {
    name: "pokemon_set_names",
    policy: MatchPolicy::LongestLiteral,
    word_bounded: true,
    entries: &[
        ("Sword & Shield", "swsh1"),
        ("Sword & Shield Black Star Promos", "swshp"),
        ("Rebel Clash", "swsh2"),
        ("Darkness Ablaze", "swsh3"),
        ("Champion's Path", "swsh35"),
        ("Vivid Voltage", "swsh4"),
        ("Shining Fates", "swsh45"),
        ("Battle Styles", "swsh5"),
        ("Chilling Reign", "swsh6"),
        ("Evolving Skies", "swsh7"),
        ("Fusion Strike", "swsh8"),
        ("Brilliant Stars", "swsh9"),
        ("Astral Radiance", "swsh10"),
        ("Lost Origin", "swsh11"),
        ("Silver Tempest", "swsh12"),
        ("Crown Zenith", "swsh12pt5"),
        ("Scarlet & Violet", "sv1"),
        ("Scarlet & Violet Black Star Promos", "svp"),
        ("Paldea Evolved", "sv2"),
        ("Obsidian Flames", "sv3"),
        ("Paradox Rift", "sv4"),
        ("Paldean Fates", "sv4pt5"),
        ("Temporal Forces", "sv5"),
        ("Twilight Masquerade", "sv6"),
        ("Shrouded Fable", "sv6pt5"),
        ("Stellar Crown", "sv7"),
        ("Surging Sparks", "sv8"),
    ],
};

pub const MAGIC_SET_NAMES: LiteralTable<&str> = LiteralTable {
    name: "magic_set_names",
    policy: MatchPolicy::LongestLiteral,
    word_bounded: true,
    entries: &[
        ("Kamigawa: Neon Dynasty", "neo"),
        ("Streets of New Capenna", "snc"),
        ("Dominaria United", "dmu"),
        ("The Brothers' War", "bro"),
        ("Phyrexia: All Will Be One", "one"),
        ("March of the Machine", "mom"),
        ("March of the Machine: The Aftermath", "mat"),
        ("Wilds of Eldraine", "woe"),
        ("Throne of Eldraine", "eld"),
        ("The Lost Caverns of Ixalan", "lci"),
        ("Murders at Karlov Manor", "mkm"),
        ("Outlaws of Thunder Junction", "otj"),
        ("Bloomburrow", "blb"),
        ("Duskmourn", "dsk"),
    ],
};

/// Printed set totals. A total may belong to several sets.
pub const POKEMON_SET_TOTALS: &[(u32, &str)] = &[
    (202, "swsh1"),
    (192, "swsh2"),
    (189, "swsh3"),
    (73, "swsh35"),
    (185, "swsh4"),
    (72, "swsh45"),
    (163, "swsh5"),
    (198, "swsh6"),
    (203, "swsh7"),
    (264, "swsh8"),
    (172, "swsh9"),
    (189, "swsh10"),
    (196, "swsh11"),
    (195, "swsh12"),
    (159, "swsh12pt5"),
    (198, "sv1"),
    (193, "sv2"),
    (197, "sv3"),
    (182, "sv4"),
    (91, "sv4pt5"),
    (162, "sv5"),
    (167, "sv6"),
    (64, "sv6pt5"),
    (142, "sv7"),
    (191, "sv8"),
];

pub const MAGIC_SET_TOTALS: &[(u32, &str)] = &[
    (302, "neo"),
    (281, "snc"),
    (281, "dmu"),
    (287, "bro"),
    (271, "one"),
    (281, "mom"),
    (276, "woe"),
    (291, "lci"),
    (286, "mkm"),
    (276, "otj"),
    (280, "blb"),
    (276, "dsk"),
];

pub fn set_names(game: Game) -> &'static LiteralTable<&'static str> {
    match game {
        Game::Pokemon => &POKEMON_SET_NAMES,
        Game::Magic => &MAGIC_SET_NAMES,
    }
}

/// Every set code printed with `total` cards, in table order.
pub fn set_codes_for_total(game: Game, total: &str) -> Vec<&'static str> {
    let Ok(total) = total.trim().parse::<u32>() else {
        return Vec::new();
    };
    let table = match game {
        Game::Pokemon => POKEMON_SET_TOTALS,
        Game::Magic => MAGIC_SET_TOTALS,
    };
    table
        .iter()
        .filter(|(t, _)| *t == total)
        .map(|(_, code)| *code)
        .collect()
}

/// Display name for a set code, if the code is in the name table.
pub fn set_name_for_code(game: Game, code: &str) -> Option<&'static str> {
    set_names(game)
        .entries
        .iter()
        .find(|(_, c)| c.eq_ignore_ascii_case(code))
        .map(|(name, _)| *name)
}
