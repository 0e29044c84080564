//! Tag normalization
//!
//! Item tags and the shared tag library both compare case-insensitively and
//! keep the first spelling they saw.

use std::collections::HashSet;

use crate::error::ValidationError;
use crate::models::{MAX_TAGS_PER_ITEM, MAX_TAG_LEN};

/// Upper bound on the shared tag library
pub const MAX_LIBRARY_TAGS: usize = 100;

/// Trim, drop empties and dedupe case-insensitively, keeping first spellings
fn clean(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_lowercase()))
        .map(str::to_string)
        .collect()
}

/// Normalize the tags of one item
///
/// Lists over the per-item limits are rejected rather than truncated.
pub fn normalize_item_tags(tags: &[String]) -> Result<Vec<String>, ValidationError> {
    let tags = clean(tags);
    if tags.len() > MAX_TAGS_PER_ITEM {
        return Err(ValidationError::TooManyTags {
            count: tags.len(),
            max: MAX_TAGS_PER_ITEM,
        });
    }
    if let Some(tag) = tags.iter().find(|t| t.chars().count() > MAX_TAG_LEN) {
        return Err(ValidationError::TagTooLong {
            tag: tag.clone(),
            max: MAX_TAG_LEN,
        });
    }
    Ok(tags)
}

/// Normalize the tag library: deduped, capped, sorted case-insensitively
///
/// The cap keeps the first tags in input order, so tags already in the
/// library win over newly merged ones.
pub fn normalize_library(tags: &[String]) -> Vec<String> {
    let mut tags = clean(tags);
    tags.truncate(MAX_LIBRARY_TAGS);
    tags.sort_by_cached_key(|t| t.to_lowercase());
    tags
}

/// Merge `incoming` into `library`
pub fn merge_into_library(library: &[String], incoming: &[String]) -> Vec<String> {
    let merged: Vec<String> = library.iter().chain(incoming).cloned().collect();
    normalize_library(&merged)
}

/// Remove `tag` (case-insensitive) from a tag list
pub fn remove_tag(tags: &[String], tag: &str) -> Vec<String> {
    tags.iter()
        .filter(|t| !t.eq_ignore_ascii_case(tag.trim()))
        .cloned()
        .collect()
}

/// Replace `from` with `to` in a tag list, merging if `to` is already present
pub fn rename_tag(tags: &[String], from: &str, to: &str) -> Vec<String> {
    let renamed: Vec<String> = tags
        .iter()
        .map(|t| {
            if t.eq_ignore_ascii_case(from.trim()) {
                to.trim().to_string()
            } else {
                t.clone()
            }
        })
        .collect();
    clean(&renamed)
}

/// The tag named by a `#tag` search query
pub fn tag_query(query: &str) -> Option<&str> {
    query
        .trim()
        .strip_prefix('#')
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_item_tags_trimmed_and_deduped() {
        let tags = normalize_item_tags(&strings(&[" Rust ", "", "rust", "web"])).unwrap();
        assert_eq!(tags, strings(&["Rust", "web"]));
    }

    #[test]
    fn test_item_tags_limits() {
        let too_many = strings(&["a", "b", "c", "d", "e", "f"]);
        assert!(matches!(
            normalize_item_tags(&too_many),
            Err(ValidationError::TooManyTags { count: 6, max: 5 })
        ));

        // Duplicates do not count against the limit
        let dupes = strings(&["a", "b", "c", "d", "e", "A"]);
        assert_eq!(normalize_item_tags(&dupes).unwrap().len(), 5);

        let long = strings(&["abcdefghijk"]);
        assert!(matches!(
            normalize_item_tags(&long),
            Err(ValidationError::TagTooLong { .. })
        ));
    }

    #[test]
    fn test_library_sorted_case_insensitively() {
        let library = normalize_library(&strings(&["beta", "Alpha", "alpha", "Gamma"]));
        assert_eq!(library, strings(&["Alpha", "beta", "Gamma"]));
    }

    #[test]
    fn test_library_cap_keeps_existing_tags() {
        let existing: Vec<String> = (0..MAX_LIBRARY_TAGS).map(|i| format!("t{:03}", i)).collect();
        let merged = merge_into_library(&existing, &strings(&["aaa"]));
        assert_eq!(merged.len(), MAX_LIBRARY_TAGS);
        assert!(!merged.contains(&"aaa".to_string()));
    }

    #[test]
    fn test_rename_and_remove() {
        let tags = strings(&["work", "Home"]);
        assert_eq!(rename_tag(&tags, "WORK", "job"), strings(&["job", "Home"]));
        assert_eq!(rename_tag(&tags, "work", "home"), strings(&["home"]));
        assert_eq!(remove_tag(&tags, "home"), strings(&["work"]));
    }

    #[test]
    fn test_tag_query() {
        assert_eq!(tag_query("#rust"), Some("rust"));
        assert_eq!(tag_query("  # web "), Some("web"));
        assert_eq!(tag_query("#"), None);
        assert_eq!(tag_query("rust"), None);
    }
}
