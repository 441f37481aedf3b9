use sha2::{Digest, Sha256};
use unicode_normalization::UnicodeNormalization;

/// Canonical form of OCR text for cache keys.
///
/// NFKC (which also folds full-width forms), trimmed lines, lines without
/// any letter dropped, remaining lines sorted. Two scans of the same card
/// that differ only in line order or character width normalize equally.
pub fn normalize(text: &str) -> String {
    let folded: String = text.nfkc().collect();
    let mut lines: Vec<&str> = folded
        .lines()
        .map(str::trim)
        .filter(|line| line.chars().any(char::is_alphabetic))
        .collect();
    lines.sort_unstable();
    lines.join("\n")
}

/// Hex SHA-256 of the normalized text.
pub fn text_hash(text: &str) -> String {
    hash(&normalize(text))
}

/// Hash and normalized form of `text`, or `None` when no line carries a
/// letter. Such texts are not cacheable.
pub fn cache_key(text: &str) -> Option<(String, String)> {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return None;
    }
    Some((hash(&normalized), normalized))
}

fn hash(normalized: &str) -> String {
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_order_does_not_matter() {
        assert_eq!(
            text_hash("Charizard\nHP 170\nSWSH4"),
            text_hash("SWSH4\nCharizard\nHP 170")
        );
    }

    #[test]
    fn test_full_width_folds() {
        assert_eq!(normalize("ＨＰ １７０"), "HP 170");
        assert_eq!(text_hash("ＨＰ １７０"), text_hash("HP 170"));
    }

    #[test]
    fn test_blank_and_letterless_lines_dropped() {
        assert_eq!(normalize("  Pikachu  \n\n025/185\n---\n"), "Pikachu");
    }

    #[test]
    fn test_letterless_text_has_no_key() {
        assert!(cache_key("025/185\n---").is_none());
        assert!(cache_key("   \n").is_none());
        let (hash, normalized) = cache_key("025/185\nPikachu").unwrap();
        assert_eq!(normalized, "Pikachu");
        assert_eq!(hash, text_hash("Pikachu"));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = text_hash("Pikachu");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(hash, text_hash("Raichu"));
    }
}
