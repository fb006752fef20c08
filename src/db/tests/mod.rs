
use crate::types::{ChapterRef, NewBookDownload};
use std::path::PathBuf;

pub(super) fn new_book(internal_book_id: &str, file_path: &str) -> NewBookDownload {
    NewBookDownload {
        source_book_id: format!("src-{internal_book_id}"),
        internal_book_id: internal_book_id.to_string(),
        title: format!("Book {internal_book_id}"),
        chapter_list: vec![
            ChapterRef::new("c0", format!("{internal_book_id}/c0"), "Chapter 0", 0),
            ChapterRef::new("c1", format!("{internal_book_id}/c1"), "Chapter 1", 1),
        ],
        file_path: PathBuf::from(file_path),
    }
}
