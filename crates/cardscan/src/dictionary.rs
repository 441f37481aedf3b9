//! Static dictionary substitution.
//!
//! Replaces known Japanese card names and card terms with their English
//! counterparts. Matching is leftmost-longest, so `ミュウツー` becomes
//! `Mewtwo` rather than `Mew` followed by a stray `ツー`.

use aho_corasick::{AhoCorasick, MatchKind};

/// Bumped whenever [`POKEMON_NAMES`] or [`CARD_TERMS`] changes.
pub const DICTIONARY_VERSION: u32 = 2;

pub const POKEMON_NAMES: &[(&str, &str)] = &[
    ("フシギダネ", "Bulbasaur"),
    ("フシギソウ", "Ivysaur"),
    ("フシギバナ", "Venusaur"),
    ("ヒトカゲ", "Charmander"),
    ("リザード", "Charmeleon"),
    ("リザードン", "Charizard"),
    ("ゼニガメ", "Squirtle"),
    ("カメール", "Wartortle"),
    ("カメックス", "Blastoise"),
    ("ピチュー", "Pichu"),
    ("ピカチュウ", "Pikachu"),
    ("ライチュウ", "Raichu"),
    ("ニャース", "Meowth"),
    ("コダック", "Psyduck"),
    ("ゲンガー", "Gengar"),
    ("ギャラドス", "Gyarados"),
    ("ラプラス", "Lapras"),
    ("イーブイ", "Eevee"),
    ("シャワーズ", "Vaporeon"),
    ("サンダース", "Jolteon"),
    ("ブースター", "Flareon"),
    ("エーフィ", "Espeon"),
    ("ブラッキー", "Umbreon"),
    ("リーフィア", "Leafeon"),
    ("グレイシア", "Glaceon"),
    ("ニンフィア", "Sylveon"),
    ("カビゴン", "Snorlax"),
    ("カイリュー", "Dragonite"),
    ("ミュウ", "Mew"),
    ("ミュウツー", "Mewtwo"),
    ("ルギア", "Lugia"),
    ("ホウオウ", "Ho-Oh"),
    ("レックウザ", "Rayquaza"),
    ("ナエトル", "Turtwig"),
    ("ヒコザル", "Chimchar"),
    ("ポッチャマ", "Piplup"),
    ("ルカリオ", "Lucario"),
    ("ガブリアス", "Garchomp"),
    ("ディアルガ", "Dialga"),
    ("パルキア", "Palkia"),
    ("ギラティナ", "Giratina"),
    ("アルセウス", "Arceus"),
    ("サーナイト", "Gardevoir"),
    ("ゲッコウガ", "Greninja"),
    ("ミミッキュ", "Mimikyu"),
    ("ニャオハ", "Sprigatito"),
    ("ホゲータ", "Fuecoco"),
    ("クワッス", "Quaxly"),
    ("コライドン", "Koraidon"),
    ("ミライドン", "Miraidon"),
];

pub const CARD_TERMS: &[(&str, &str)] = &[
    ("特性", "Ability"),
    ("ワザ", "Attack"),
    ("弱点", "Weakness"),
    ("抵抗力", "Resistance"),
    ("にげる", "Retreat"),
    ("たね", "Basic"),
    ("1進化", "Stage 1"),
    ("2進化", "Stage 2"),
    ("トレーナーズ", "Trainer"),
    ("サポート", "Supporter"),
    ("グッズ", "Item"),
    ("スタジアム", "Stadium"),
    ("ポケモンのどうぐ", "Pokémon Tool"),
    ("エネルギー", "Energy"),
];

/// Output of [`StaticDictionary::substitute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Substitution {
    pub text: String,
    pub replaced: usize,
}

impl Substitution {
    pub fn changed(&self) -> bool {
        self.replaced > 0
    }
}

pub struct StaticDictionary {
    matcher: Option<AhoCorasick>,
    entries: Vec<(&'static str, &'static str)>,
}

impl StaticDictionary {
    pub fn new() -> Self {
        Self::from_entries(POKEMON_NAMES.iter().chain(CARD_TERMS).copied().collect())
    }

    pub fn from_entries(entries: Vec<(&'static str, &'static str)>) -> Self {
        let matcher = AhoCorasick::builder()
            .match_kind(MatchKind::LeftmostLongest)
            .build(entries.iter().map(|(source, _)| source))
            .map_err(|e| log::warn!("Static dictionary disabled: {}", e))
            .ok();
        Self { matcher, entries }
    }

    /// Replaces every dictionary entry found in `text`.
    pub fn substitute(&self, text: &str) -> Substitution {
        let Some(matcher) = &self.matcher else {
            return Substitution {
                text: text.to_string(),
                replaced: 0,
            };
        };

        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        let mut replaced = 0;
        for m in matcher.find_iter(text) {
            out.push_str(&text[last..m.start()]);
            out.push_str(self.entries[m.pattern().as_usize()].1);
            last = m.end();
            replaced += 1;
        }
        out.push_str(&text[last..]);

        Substitution {
            text: out,
            replaced,
        }
    }

    /// Whether `text` contains any source-language entry.
    pub fn contains_entry(&self, text: &str) -> bool {
        self.matcher
            .as_ref()
            .map(|m| m.is_match(text))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for StaticDictionary {
    fn default() -> Self {
        Self::new()
    }
}
