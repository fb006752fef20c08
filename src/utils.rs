//! Utility functions for output naming and path handling

use crate::types::RecordId;
use std::path::{Path, PathBuf};

/// File name the surrounding application gives a downloaded book
///
/// Follows the `{source_book_id}_{record_id}_{internal_book_id}.txt`
/// convention. Path separators in the ids are replaced so the result is always
/// a single path component. The scheduler itself writes to whatever
/// `file_path` the record carries.
///
/// # Examples
///
/// ```
/// use bookdl::types::RecordId;
/// use bookdl::utils::output_file_name;
///
/// assert_eq!(output_file_name("qd-881", RecordId(12), "b7f3"), "qd-881_12_b7f3.txt");
/// ```
#[must_use]
pub fn output_file_name(
    source_book_id: &str,
    record_id: RecordId,
    internal_book_id: &str,
) -> String {
    format!(
        "{}_{}_{}.txt",
        sanitize_component(source_book_id),
        record_id,
        sanitize_component(internal_book_id)
    )
}

/// [`output_file_name`] joined onto `dir`
#[must_use]
pub fn output_path(
    dir: &Path,
    source_book_id: &str,
    record_id: RecordId,
    internal_book_id: &str,
) -> PathBuf {
    dir.join(output_file_name(source_book_id, record_id, internal_book_id))
}

/// Temporary sibling of `path` used while the merged book is written
///
/// Lives in the same directory so the final rename stays on one filesystem.
#[must_use]
pub fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    path.with_file_name(format!(".{}.{}.part", name, std::process::id()))
}

fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}
