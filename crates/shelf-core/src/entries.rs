//! Flat entry list
//!
//! The top-level layout is one ordered list of entries. Pages are not stored:
//! they are derived by walking the list, where an explicit page break or a
//! full page starts the next one. Everything here is a pure function over
//! `&[Entry]`.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::{Entry, SYSTEM_IDS};

/// A slot on a derived page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub page: usize,
    pub index: usize,
}

impl Position {
    pub fn new(page: usize, index: usize) -> Self {
        Self { page, index }
    }
}

/// Keep the recognised entry strings of a persisted list, in order
///
/// Anything that is not an array yields an empty list.
pub fn filter_valid(raw: &Value) -> Vec<Entry> {
    raw.as_array()
        .map(|values| {
            values
                .iter()
                .filter_map(Value::as_str)
                .filter_map(Entry::parse)
                .collect()
        })
        .unwrap_or_default()
}

/// Collapse runs of page breaks and strip leading/trailing breaks
pub fn normalize_structure(entries: &[Entry]) -> Vec<Entry> {
    let mut out: Vec<Entry> = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.is_break() && out.last().map_or(true, Entry::is_break) {
            continue;
        }
        out.push(entry.clone());
    }
    if out.last().is_some_and(Entry::is_break) {
        out.pop();
    }
    out
}

/// Drop repeated concrete ids, keeping the first occurrence
pub fn dedupe_preserve_order(entries: &[Entry]) -> Vec<Entry> {
    let mut seen = HashSet::new();
    entries
        .iter()
        .filter(|entry| match entry.id() {
            Some(id) => seen.insert(id.to_string()),
            None => true,
        })
        .cloned()
        .collect()
}

/// Full normalization; idempotent
pub fn normalize(entries: &[Entry]) -> Vec<Entry> {
    normalize_structure(&dedupe_preserve_order(&normalize_structure(entries)))
}

/// Append any fixed system entry that is missing
pub fn ensure_system_entries(entries: &[Entry]) -> Vec<Entry> {
    let mut out = entries.to_vec();
    for id in SYSTEM_IDS {
        if !out.iter().any(|e| e.is_item(id)) {
            out.push(Entry::System(id.to_string()));
        }
    }
    out
}

/// Split the list into pages of concrete entries
///
/// A `page_size` of 0 is treated as 1. There is always at least one page.
pub fn paginate(entries: &[Entry], page_size: usize) -> Vec<Vec<Entry>> {
    let page_size = page_size.max(1);
    let mut pages: Vec<Vec<Entry>> = vec![Vec::new()];

    for entry in entries {
        let Some(current) = pages.last_mut() else {
            break;
        };
        if entry.is_break() {
            if !current.is_empty() {
                pages.push(Vec::new());
            }
            continue;
        }
        if current.len() >= page_size {
            pages.push(vec![entry.clone()]);
        } else {
            current.push(entry.clone());
        }
    }

    if pages.len() > 1 && pages.last().is_some_and(Vec::is_empty) {
        pages.pop();
    }
    pages
}

/// Concrete entries of all pages, in order
pub fn flatten(pages: &[Vec<Entry>]) -> Vec<Entry> {
    pages
        .iter()
        .flatten()
        .filter(|e| !e.is_break())
        .cloned()
        .collect()
}

pub fn page_count(entries: &[Entry], page_size: usize) -> usize {
    paginate(entries, page_size).len()
}

/// Index into `entries` at which an insert lands on `position`
///
/// An index past the end of the page lands at the end of that page; a page
/// past the last one lands at the end of the list.
pub fn absolute_index(entries: &[Entry], position: Position, page_size: usize) -> usize {
    let page_size = page_size.max(1);
    let mut page = 0;
    let mut count = 0;

    for (i, entry) in entries.iter().enumerate() {
        if entry.is_break() {
            if count > 0 {
                if page == position.page {
                    return i;
                }
                page += 1;
                count = 0;
            }
            continue;
        }

        if count >= page_size {
            if page == position.page {
                return i;
            }
            page += 1;
            count = 0;
        }
        if page == position.page && count == position.index {
            return i;
        }
        count += 1;
    }

    entries.len()
}

/// Insert `entry`, appending when no position is given
pub fn insert_at(
    entries: &[Entry],
    entry: Entry,
    position: Option<Position>,
    page_size: usize,
) -> Vec<Entry> {
    let mut out = entries.to_vec();
    match position {
        Some(position) => {
            let at = absolute_index(&out, position, page_size);
            out.insert(at, entry);
        }
        None => out.push(entry),
    }
    out
}

/// Append `entry` so that it starts a new page
pub fn append_on_new_page(entries: &[Entry], entry: Entry) -> Vec<Entry> {
    let mut out = entries.to_vec();
    if !out.is_empty() {
        out.push(Entry::PageBreak);
    }
    out.push(entry);
    out
}

/// Remove every occurrence of `id`
pub fn remove_id(entries: &[Entry], id: &str) -> Vec<Entry> {
    entries.iter().filter(|e| !e.is_item(id)).cloned().collect()
}

pub fn position_of(entries: &[Entry], id: &str) -> Option<usize> {
    entries.iter().position(|e| e.is_item(id))
}

/// Page and index of `id` on the derived pages
pub fn locate(entries: &[Entry], id: &str, page_size: usize) -> Option<Position> {
    paginate(entries, page_size)
        .iter()
        .enumerate()
        .find_map(|(page, items)| {
            items
                .iter()
                .position(|e| e.is_item(id))
                .map(|index| Position { page, index })
        })
}

/// Rebuild the list from an explicit page layout
///
/// Unrecognised ids are dropped; empty pages disappear.
pub fn from_pages(pages: &[Vec<String>]) -> Vec<Entry> {
    let mut out = Vec::new();
    for page in pages {
        let concrete: Vec<Entry> = page.iter().filter_map(|id| Entry::from_id(id)).collect();
        if concrete.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push(Entry::PageBreak);
        }
        out.extend(concrete);
    }
    out
}

/// Index of the explicit break that opens `target` (page > 0)
///
/// `None` when the page does not exist or opens because the previous page
/// was full.
fn opening_break(entries: &[Entry], target: usize, page_size: usize) -> Option<usize> {
    let page_size = page_size.max(1);
    let mut page = 0;
    let mut count = 0;

    for (i, entry) in entries.iter().enumerate() {
        if entry.is_break() {
            if count > 0 {
                page += 1;
                count = 0;
                if page == target {
                    return Some(i);
                }
            }
            continue;
        }
        if count >= page_size {
            page += 1;
            count = 0;
            if page == target {
                return None;
            }
        }
        count += 1;
    }
    None
}

/// Merge page `page` into its neighbour by dropping the break between them
///
/// Page 0 merges with page 1, any other page with the one before it. Items
/// are never removed. Returns `None` when there is no explicit break to drop.
pub fn remove_page(entries: &[Entry], page: usize, page_size: usize) -> Option<Vec<Entry>> {
    let at = opening_break(entries, page.max(1), page_size)?;
    let mut out = entries.to_vec();
    out.remove(at);
    Some(out)
}

/// Persisted form of an entry list
pub fn to_value(entries: &[Entry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|e| Value::String(e.as_str().to_string()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PAGE_BREAK, SYSTEM_ADD, SYSTEM_SETTINGS};
    use proptest::prelude::*;
    use serde_json::json;

    fn parse(raw: &[&str]) -> Vec<Entry> {
        raw.iter().filter_map(|s| Entry::parse(s)).collect()
    }

    fn ids(entries: &[Entry]) -> Vec<&str> {
        entries.iter().map(Entry::as_str).collect()
    }

    const B: &str = PAGE_BREAK;

    #[test]
    fn test_filter_valid_drops_unknown_shapes() {
        let raw = json!(["qlink_a", 5, "junk", B, "qfolder_f", null, "qsys_add"]);
        assert_eq!(
            ids(&filter_valid(&raw)),
            vec!["qlink_a", B, "qfolder_f", "qsys_add"]
        );
        assert!(filter_valid(&json!({"items": []})).is_empty());
    }

    #[test]
    fn test_normalize_structure() {
        let entries = parse(&[B, B, "qlink_a", B, B, B, "qlink_b", B]);
        let normalized = normalize_structure(&entries);
        assert_eq!(ids(&normalized), vec!["qlink_a", B, "qlink_b"]);
        assert_eq!(normalize_structure(&normalized), normalized);
        assert!(normalize_structure(&parse(&[B, B])).is_empty());
    }

    #[test]
    fn test_dedupe_keeps_first_and_breaks() {
        let entries = parse(&["qlink_a", B, "qlink_a", B, "qlink_b"]);
        assert_eq!(
            ids(&dedupe_preserve_order(&entries)),
            vec!["qlink_a", B, B, "qlink_b"]
        );
        assert_eq!(ids(&normalize(&entries)), vec!["qlink_a", B, "qlink_b"]);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let entries = parse(&[B, "qlink_a", "qlink_b", B, "qlink_a", B, B, "qlink_c", B]);
        let once = normalize(&entries);
        assert_eq!(normalize(&once), once);
        assert_eq!(ids(&once), vec!["qlink_a", "qlink_b", B, "qlink_c"]);
    }

    #[test]
    fn test_ensure_system_entries() {
        let entries = parse(&["qlink_a", SYSTEM_SETTINGS]);
        let ensured = ensure_system_entries(&entries);
        assert_eq!(ids(&ensured), vec!["qlink_a", SYSTEM_SETTINGS, SYSTEM_ADD]);
        assert_eq!(ensure_system_entries(&ensured), ensured);
    }

    #[test]
    fn test_paginate_breaks_and_page_size() {
        let entries = parse(&["qlink_1", "qlink_2", "qlink_3", B, "qlink_4"]);
        let pages = paginate(&entries, 2);
        assert_eq!(pages.len(), 3);
        assert_eq!(ids(&pages[0]), vec!["qlink_1", "qlink_2"]);
        assert_eq!(ids(&pages[1]), vec!["qlink_3"]);
        assert_eq!(ids(&pages[2]), vec!["qlink_4"]);

        let concrete: Vec<Entry> = entries.iter().filter(|e| !e.is_break()).cloned().collect();
        assert_eq!(flatten(&pages), concrete);
    }

    #[test]
    fn test_paginate_full_page_then_break_does_not_leave_empty_page() {
        let entries = parse(&["qlink_1", "qlink_2", B, "qlink_3"]);
        let pages = paginate(&entries, 2);
        assert_eq!(pages.len(), 2);
        assert_eq!(ids(&pages[1]), vec!["qlink_3"]);
    }

    #[test]
    fn test_paginate_zero_page_size_and_empty() {
        let entries = parse(&["qlink_1", "qlink_2"]);
        assert_eq!(paginate(&entries, 0).len(), 2);
        assert_eq!(paginate(&[], 10), vec![Vec::<Entry>::new()]);
        assert_eq!(page_count(&[], 10), 1);
    }

    #[test]
    fn test_insert_at_positions() {
        let entries = parse(&["qlink_a", "qlink_b", B, "qlink_c"]);
        let new = || Entry::Item("qlink_n".to_string());

        let at_start_of_page_1 = insert_at(&entries, new(), Some(Position::new(1, 0)), 10);
        assert_eq!(
            ids(&at_start_of_page_1),
            vec!["qlink_a", "qlink_b", B, "qlink_n", "qlink_c"]
        );

        let past_end_of_page_0 = insert_at(&entries, new(), Some(Position::new(0, 99)), 10);
        assert_eq!(
            ids(&past_end_of_page_0),
            vec!["qlink_a", "qlink_b", "qlink_n", B, "qlink_c"]
        );

        let beyond_last_page = insert_at(&entries, new(), Some(Position::new(7, 0)), 10);
        assert_eq!(beyond_last_page.last(), Some(&new()));

        let appended = insert_at(&entries, new(), None, 10);
        assert_eq!(appended.last(), Some(&new()));
    }

    #[test]
    fn test_insert_at_accounts_for_implicit_breaks() {
        let entries = parse(&["qlink_1", "qlink_2", "qlink_3", "qlink_4"]);
        let new = Entry::Item("qlink_n".to_string());
        let out = insert_at(&entries, new, Some(Position::new(1, 1)), 2);
        assert_eq!(
            ids(&out),
            vec!["qlink_1", "qlink_2", "qlink_3", "qlink_n", "qlink_4"]
        );
        assert_eq!(locate(&out, "qlink_n", 2), Some(Position::new(1, 1)));
    }

    #[test]
    fn test_append_on_new_page() {
        let entries = parse(&["qlink_a"]);
        let out = append_on_new_page(&entries, Entry::Item("qlink_b".to_string()));
        assert_eq!(locate(&out, "qlink_b", 10), Some(Position::new(1, 0)));
        let out = append_on_new_page(&[], Entry::Item("qlink_b".to_string()));
        assert_eq!(ids(&out), vec!["qlink_b"]);
    }

    #[test]
    fn test_from_pages() {
        let pages = vec![
            vec!["qlink_a".to_string(), "bogus".to_string()],
            vec![],
            vec!["qfolder_f".to_string()],
        ];
        assert_eq!(ids(&from_pages(&pages)), vec!["qlink_a", B, "qfolder_f"]);
    }

    #[test]
    fn test_remove_page_merges_neighbours() {
        let entries = parse(&["qlink_a", B, "qlink_b", B, "qlink_c"]);
        let merged = remove_page(&entries, 2, 10).unwrap();
        assert_eq!(ids(&merged), vec!["qlink_a", B, "qlink_b", "qlink_c"]);

        let merged = remove_page(&entries, 0, 10).unwrap();
        assert_eq!(ids(&merged), vec!["qlink_a", "qlink_b", B, "qlink_c"]);

        // Implicit page: nothing to remove
        let implicit = parse(&["qlink_a", "qlink_b", "qlink_c"]);
        assert!(remove_page(&implicit, 1, 2).is_none());
        assert!(remove_page(&entries, 5, 10).is_none());
    }

    #[test]
    fn test_to_value() {
        let entries = parse(&["qlink_a", B]);
        assert_eq!(to_value(&entries), json!(["qlink_a", B]));
    }

    // Few distinct ids so duplicates are common
    fn entry_strategy() -> impl Strategy<Value = Entry> {
        prop_oneof![
            4 => (0u8..10).prop_map(|n| Entry::Item(format!("qlink_{}", n))),
            1 => (0u8..3).prop_map(|n| Entry::Folder(format!("qfolder_{}", n))),
            3 => Just(Entry::PageBreak),
        ]
    }

    fn concrete(entries: &[Entry]) -> Vec<Entry> {
        entries.iter().filter(|e| !e.is_break()).cloned().collect()
    }

    proptest! {
        #[test]
        fn proptest_normalize_is_idempotent(entries in prop::collection::vec(entry_strategy(), 0..40)) {
            let once = normalize(&entries);
            prop_assert_eq!(normalize(&once), once.clone());
            prop_assert_eq!(normalize_structure(&once), once);
        }

        #[test]
        fn proptest_normalized_breaks_only_separate(entries in prop::collection::vec(entry_strategy(), 0..40)) {
            let out = normalize(&entries);
            prop_assert!(!out.first().is_some_and(Entry::is_break));
            prop_assert!(!out.last().is_some_and(Entry::is_break));
            prop_assert!(out.windows(2).all(|w| !(w[0].is_break() && w[1].is_break())));
        }

        #[test]
        fn proptest_dedupe_keeps_first_occurrences(entries in prop::collection::vec(entry_strategy(), 0..40)) {
            let out = dedupe_preserve_order(&entries);

            let mut expected: Vec<Entry> = Vec::new();
            for entry in concrete(&entries) {
                if !expected.contains(&entry) {
                    expected.push(entry);
                }
            }
            prop_assert_eq!(concrete(&out), expected);

            let breaks = |list: &[Entry]| list.iter().filter(|e| e.is_break()).count();
            prop_assert_eq!(breaks(&out), breaks(&entries));
        }

        #[test]
        fn proptest_paginate_then_flatten_keeps_order(
            entries in prop::collection::vec(entry_strategy(), 0..60),
            page_size in 0usize..8,
        ) {
            let pages = paginate(&entries, page_size);
            prop_assert!(!pages.is_empty());
            prop_assert!(pages.iter().all(|page| page.len() <= page_size.max(1)));
            prop_assert!(pages.iter().flatten().all(|e| !e.is_break()));
            prop_assert_eq!(flatten(&pages), concrete(&entries));
            prop_assert_eq!(page_count(&entries, page_size), pages.len());
        }
    }
}
