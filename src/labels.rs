#![forbid(unsafe_code)]

//! Label annotations are keyed by the index of the video they precede. Any
//! change to the video list renumbers them; these helpers do that renumbering
//! without touching the list itself so they can be tested in isolation.
//!
//! When two annotations land on the same index the one already there keeps
//! its place and the moved text is appended after a line break.

use std::collections::BTreeMap;

pub type Labels = BTreeMap<usize, String>;

/// Appends `text` to the annotation at `index`, creating it when absent.
pub fn attach(labels: &mut Labels, index: usize, text: &str) {
    match labels.get_mut(&index) {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(text);
        }
        None => {
            labels.insert(index, text.to_string());
        }
    }
}

/// Renumbers annotations after a video was inserted at `index`: everything at
/// or after the insertion point moves one slot forward.
pub fn shift_for_insert(labels: &mut Labels, index: usize) {
    renumber(labels, |position| {
        if position >= index {
            position + 1
        } else {
            position
        }
    });
}

/// Renumbers annotations after the video at `index` was removed: everything
/// strictly after it moves one slot back, merging into whatever annotation
/// already sits at `index`.
pub fn shift_for_remove(labels: &mut Labels, index: usize) {
    renumber(labels, |position| {
        if position > index {
            position - 1
        } else {
            position
        }
    });
}

/// Returns the index of the first annotation whose full text equals `text`.
pub fn find(labels: &Labels, text: &str) -> Option<usize> {
    labels
        .iter()
        .find(|(_, value)| value.as_str() == text)
        .map(|(position, _)| *position)
}

/// Returns the index of the next annotation strictly after `position`.
pub fn next_after(labels: &Labels, position: usize) -> Option<usize> {
    labels
        .range(position + 1..)
        .next()
        .map(|(position, _)| *position)
}

fn renumber(labels: &mut Labels, map: impl Fn(usize) -> usize) {
    // Ascending iteration keeps "existing first" when two keys collide.
    let previous = std::mem::take(labels);
    for (position, text) in previous {
        attach(labels, map(position), &text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(entries: &[(usize, &str)]) -> Labels {
        entries
            .iter()
            .map(|(position, text)| (*position, text.to_string()))
            .collect()
    }

    #[test]
    fn insert_moves_labels_at_and_after_index() {
        let mut current = labels(&[(0, "A"), (2, "B")]);
        shift_for_insert(&mut current, 1);
        assert_eq!(current, labels(&[(0, "A"), (3, "B")]));
    }

    #[test]
    fn insert_at_labelled_index_pushes_label_forward() {
        let mut current = labels(&[(2, "New")]);
        shift_for_insert(&mut current, 2);
        assert_eq!(current, labels(&[(3, "New")]));
    }

    #[test]
    fn remove_restores_positions() {
        let mut current = labels(&[(0, "A"), (3, "B")]);
        shift_for_remove(&mut current, 1);
        assert_eq!(current, labels(&[(0, "A"), (2, "B")]));
    }

    #[test]
    fn remove_merges_collisions_existing_first() {
        let mut current = labels(&[(1, "first"), (2, "second"), (4, "tail")]);
        shift_for_remove(&mut current, 1);
        assert_eq!(current, labels(&[(1, "first\nsecond"), (3, "tail")]));
    }

    #[test]
    fn remove_keeps_label_of_removed_slot() {
        let mut current = labels(&[(1, "band")]);
        shift_for_remove(&mut current, 1);
        assert_eq!(current, labels(&[(1, "band")]));
    }

    #[test]
    fn attach_joins_with_newline() {
        let mut current = labels(&[(0, "one")]);
        attach(&mut current, 0, "two");
        attach(&mut current, 5, "three");
        assert_eq!(current, labels(&[(0, "one\ntwo"), (5, "three")]));
    }

    #[test]
    fn find_and_next_after() {
        let current = labels(&[(0, "Old"), (4, "New"), (9, "Later")]);
        assert_eq!(find(&current, "New"), Some(4));
        assert_eq!(find(&current, "Missing"), None);
        assert_eq!(next_after(&current, 4), Some(9));
        assert_eq!(next_after(&current, 9), None);
    }
}
