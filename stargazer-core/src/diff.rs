//! Sorted-merge set difference.
//!
//! [`set_diff`] answers: what must be inserted into `source`, and what must be
//! deleted from it, so that it holds exactly the names in `target`?
//!
//! It is a single linear merge over two cursors, not a general LCS diff. Both
//! inputs MUST be sorted ascending (byte order) and free of duplicates; the
//! function does not check this and silently returns wrong answers otherwise.
//! Run arbitrary lists through [`sorted_unique`] first.

use std::cmp::Ordering;

/// Compute `(to_insert, to_delete)` turning `source` into `target`.
///
/// Names present in both inputs appear in neither output.
pub fn set_diff<S: AsRef<str>>(source: &[S], target: &[S]) -> (Vec<String>, Vec<String>) {
    let source: Vec<&str> = source.iter().map(AsRef::as_ref).collect();
    let target: Vec<&str> = target.iter().map(AsRef::as_ref).collect();
    let (inserts, deletes) = diff_sorted(&source, &target);
    (
        inserts.into_iter().map(str::to_owned).collect(),
        deletes.into_iter().map(str::to_owned).collect(),
    )
}

/// [`set_diff`] over any totally ordered element, e.g. paths that need not be
/// valid UTF-8. Same precondition: both inputs sorted by `Ord` and unique.
pub fn diff_sorted<T: Ord + Clone>(source: &[T], target: &[T]) -> (Vec<T>, Vec<T>) {
    let mut inserts = Vec::new();
    let mut deletes = Vec::new();
    let (mut x, mut y) = (0, 0);

    while x < source.len() || y < target.len() {
        if y >= target.len() {
            deletes.extend_from_slice(&source[x..]);
            break;
        }
        if x >= source.len() {
            inserts.extend_from_slice(&target[y..]);
            break;
        }

        match source[x].cmp(&target[y]) {
            Ordering::Less => {
                deletes.push(source[x].clone());
                x += 1;
            }
            Ordering::Greater => {
                inserts.push(target[y].clone());
                y += 1;
            }
            Ordering::Equal => {
                x += 1;
                y += 1;
            }
        }
    }

    (inserts, deletes)
}

/// Sort ascending and drop duplicates, producing a valid [`set_diff`] input.
pub fn sorted_unique<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
    names.sort_unstable();
    names.dedup();
    names
}
