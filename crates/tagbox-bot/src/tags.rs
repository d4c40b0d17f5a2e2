//! Hashtag extraction.

use std::sync::LazyLock;

use regex::Regex;

/// `#` followed by ASCII word characters or CJK unified ideographs. Other
/// letters (Cyrillic, accented Latin) end the tag.
static HASHTAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"#[A-Za-z0-9_\x{4E00}-\x{9FA5}]+").expect("valid hashtag pattern")
});

static NON_SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\p{Han}]+").expect("valid slug pattern"));

/// Lowercased hashtag labels, deduplicated, in order of first occurrence.
pub fn extract_tags(text: &str) -> Vec<String> {
    let mut tags: Vec<String> = Vec::new();
    for found in HASHTAG.find_iter(text) {
        let label = found.as_str()[1..].to_lowercase();
        if !tags.contains(&label) {
            tags.push(label);
        }
    }
    tags
}

/// `text` with every hashtag removed.
pub fn strip_tags(text: &str) -> String {
    HASHTAG.replace_all(text, "").trim().to_string()
}

/// Tag naming a channel, e.g. `channel_rust_news` for "Rust News!".
pub fn channel_tag(title: &str) -> Option<String> {
    let lowered = title.to_lowercase();
    let slug = NON_SLUG.replace_all(&lowered, "_");
    let slug = slug.trim_matches('_');
    (!slug.is_empty()).then(|| format!("channel_{slug}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_case_folded_unique_tags_in_order() {
        assert_eq!(
            extract_tags("Hello #Tech #tech 世界 #世界"),
            vec!["tech", "世界"]
        );
    }

    #[test]
    fn non_ascii_letters_end_a_tag() {
        assert_eq!(
            extract_tags("#Привет #café #Straße #日本語"),
            vec!["caf", "stra", "日本語"]
        );
    }

    #[test]
    fn no_tags_yields_empty_list() {
        assert!(extract_tags("just text # and #").is_empty());
    }

    #[test]
    fn tags_stop_at_punctuation() {
        assert_eq!(
            extract_tags("#rust, #async-std and #snake_case."),
            vec!["rust", "async", "snake_case"]
        );
    }

    #[test]
    fn strip_removes_hashtags() {
        assert_eq!(strip_tags("#inbox remember the milk #todo"), "remember the milk");
    }

    #[test]
    fn channel_tags_slugify_titles() {
        assert_eq!(channel_tag("Rust News!").as_deref(), Some("channel_rust_news"));
        assert_eq!(channel_tag("  读书 笔记 ").as_deref(), Some("channel_读书_笔记"));
        assert_eq!(channel_tag("!!!"), None);
    }
}
