//! Ordered merge and atomic output write.

use crate::error::DownloadError;
use crate::utils::temp_sibling;
use std::path::Path;

use super::fetch::FetchedChapter;

/// Render chapters in ascending index order as `title\ncontent` blocks
/// separated by a blank line
///
/// Equal indexes keep chapter-list order, never fetch completion order.
pub(super) fn render_book(mut chapters: Vec<FetchedChapter>) -> String {
    chapters.sort_by_key(|c| (c.index, c.position));
    chapters
        .iter()
        .map(|c| format!("{}\n{}", c.title, c.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Write `contents` to `path` so that `path` is either absent or complete
///
/// Creates missing parent directories, writes a temporary sibling, then
/// renames it into place. The temporary file is removed on failure.
pub(super) async fn write_atomically(path: &Path, contents: &str) -> Result<(), DownloadError> {
    let merge_error = |e: std::io::Error| DownloadError::MergeWrite {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await.map_err(merge_error)?;
    }

    let temp_path = temp_sibling(path);
    let written = async {
        tokio::fs::write(&temp_path, contents.as_bytes()).await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(e) = written {
        if let Err(cleanup) = tokio::fs::remove_file(&temp_path).await
            && cleanup.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!(
                path = %temp_path.display(),
                error = %cleanup,
                "Failed to remove temporary output file"
            );
        }
        return Err(merge_error(e));
    }

    Ok(())
}
