//! Core types for bookdl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Unique identifier for a book download record
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    /// Create a new RecordId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for RecordId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for i64 {
    fn from(id: RecordId) -> Self {
        id.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for RecordId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for RecordId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for RecordId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Download state of a record
///
/// Persisted as an integer code (see [`DownloadState::to_i32`]).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadState {
    /// Waiting to be picked up by the scheduler
    Pending,
    /// Dispatched to a worker
    Downloading,
    /// Output file written
    Completed,
    /// Download failed; stays failed until reset externally
    Failed,
    /// Interrupted by shutdown; stays paused until reset externally
    Paused,
}

impl DownloadState {
    /// Every state, in code order.
    pub const ALL: [DownloadState; 5] = [
        DownloadState::Pending,
        DownloadState::Downloading,
        DownloadState::Completed,
        DownloadState::Failed,
        DownloadState::Paused,
    ];

    /// Convert integer state code to DownloadState
    ///
    /// Unknown codes map to `Failed` so they are never picked up again.
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => DownloadState::Pending,
            1 => DownloadState::Downloading,
            2 => DownloadState::Completed,
            3 => DownloadState::Failed,
            4 => DownloadState::Paused,
            _ => DownloadState::Failed,
        }
    }

    /// Convert DownloadState to integer state code
    pub fn to_i32(&self) -> i32 {
        match self {
            DownloadState::Pending => 0,
            DownloadState::Downloading => 1,
            DownloadState::Completed => 2,
            DownloadState::Failed => 3,
            DownloadState::Paused => 4,
        }
    }

    /// The transition table. Every state change in the crate is checked against it.
    ///
    /// `Failed -> Pending` and `Paused -> Pending` are external resets; the
    /// scheduler itself never performs them.
    pub fn can_transition_to(self, next: DownloadState) -> bool {
        use DownloadState::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Downloading, Completed)
                | (Downloading, Failed)
                | (Downloading, Paused)
                | (Failed, Pending)
                | (Paused, Pending)
        )
    }

    /// States from which `next` may be entered.
    pub fn predecessors(next: DownloadState) -> Vec<DownloadState> {
        Self::ALL
            .into_iter()
            .filter(|from| from.can_transition_to(next))
            .collect()
    }

    /// Whether the scheduler considers this state final
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DownloadState::Completed | DownloadState::Failed | DownloadState::Paused
        )
    }
}

impl std::fmt::Display for DownloadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DownloadState::Pending => "pending",
            DownloadState::Downloading => "downloading",
            DownloadState::Completed => "completed",
            DownloadState::Failed => "failed",
            DownloadState::Paused => "paused",
        };
        f.write_str(name)
    }
}

/// One entry of a record's chapter list
///
/// Fields default when absent from the stored JSON so that a damaged list can
/// still be loaded and rejected by [`ChapterRef::validate`] instead of poisoning
/// every store query.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterRef {
    /// Chapter identifier in the remote catalog
    #[serde(default)]
    pub chapter_id: String,
    /// Opaque key into blob storage
    #[serde(default)]
    pub content_locator: String,
    /// Chapter title, rendered as the first line of the chapter block
    #[serde(default)]
    pub title: String,
    /// Ordering key; not necessarily contiguous
    #[serde(default)]
    pub index: Option<i64>,
}

impl ChapterRef {
    /// Create a chapter reference
    pub fn new(
        chapter_id: impl Into<String>,
        content_locator: impl Into<String>,
        title: impl Into<String>,
        index: i64,
    ) -> Self {
        Self {
            chapter_id: chapter_id.into(),
            content_locator: content_locator.into(),
            title: title.into(),
            index: Some(index),
        }
    }

    /// Check the fields a fetch needs, returning the ordering key.
    pub fn validate(&self, position: usize) -> std::result::Result<i64, String> {
        if self.chapter_id.trim().is_empty() {
            return Err(format!("chapter at position {} has no chapter_id", position));
        }
        if self.content_locator.trim().is_empty() {
            return Err(format!(
                "chapter {} has no content_locator",
                self.chapter_id
            ));
        }
        self.index
            .ok_or_else(|| format!("chapter {} has no index", self.chapter_id))
    }
}

/// A book download request, one row of the queue store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BookDownloadRecord {
    /// Locally generated primary key
    pub id: RecordId,
    /// Identifier in the originating catalog
    pub source_book_id: String,
    /// Identifier used for content lookups
    pub internal_book_id: String,
    /// Book title
    pub title: String,
    /// Chapters in insertion order
    pub chapter_list: Vec<ChapterRef>,
    /// Target output location
    pub file_path: PathBuf,
    /// Chapters written by the last successful download
    pub downloaded_chapter_count: i64,
    /// Current persisted state
    pub state: DownloadState,
    /// Unix timestamp when the record was created
    pub created_at: i64,
    /// Unix timestamp of the last change
    pub updated_at: i64,
}

/// New download request to be inserted (or merged) into the queue store
#[derive(Clone, Debug)]
pub struct NewBookDownload {
    /// Identifier in the originating catalog
    pub source_book_id: String,
    /// Identifier used for content lookups
    pub internal_book_id: String,
    /// Book title
    pub title: String,
    /// Chapters in canonical order
    pub chapter_list: Vec<ChapterRef>,
    /// Target output location
    pub file_path: PathBuf,
}

/// Event kinds observers can register handlers for
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A record was dispatched
    Started,
    /// A record finished and its file is on disk
    Completed,
    /// A record failed
    Failed,
}

/// Event emitted during the download lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Record moved to `Downloading` and was handed to a worker
    Started {
        /// The dispatched record
        record: BookDownloadRecord,
    },

    /// Record moved to `Completed`
    Completed {
        /// The completed record
        record: BookDownloadRecord,
    },

    /// Record moved to `Failed`
    Failed {
        /// The failed record
        record: BookDownloadRecord,
        /// Diagnostic text
        reason: String,
    },

    /// In-memory queue was rebuilt from the store
    QueueUpdated {
        /// Ids still waiting for a free slot, in dispatch order
        pending: Vec<RecordId>,
    },

    /// All `Downloading` records were moved to `Paused`
    Paused {
        /// Number of records paused
        count: u64,
    },

    /// Graceful shutdown finished
    Shutdown,
}

impl Event {
    /// The handler kind this event is delivered to, if any
    pub fn kind(&self) -> Option<EventKind> {
        match self {
            Event::Started { .. } => Some(EventKind::Started),
            Event::Completed { .. } => Some(EventKind::Completed),
            Event::Failed { .. } => Some(EventKind::Failed),
            _ => None,
        }
    }
}

/// Result of running one download task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Whether the output file is in place
    pub success: bool,
    /// Diagnostic text on failure
    pub reason: Option<String>,
    /// Chapters written; `None` when the file already existed
    pub chapters_written: Option<usize>,
}

impl TaskOutcome {
    /// Successful outcome
    pub fn succeeded(chapters_written: Option<usize>) -> Self {
        Self {
            success: true,
            reason: None,
            chapters_written,
        }
    }

    /// Failed outcome with a reason
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            reason: Some(reason.into()),
            chapters_written: None,
        }
    }

    /// State the record moves to for this outcome
    pub fn terminal_state(&self) -> DownloadState {
        if self.success {
            DownloadState::Completed
        } else {
            DownloadState::Failed
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_codes_round_trip() {
        for state in DownloadState::ALL {
            assert_eq!(DownloadState::from_i32(state.to_i32()), state);
        }
        assert_eq!(DownloadState::from_i32(42), DownloadState::Failed);
    }

    #[test]
    fn scheduler_path_is_legal() {
        use DownloadState::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Downloading.can_transition_to(Failed));
        assert!(Downloading.can_transition_to(Paused));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        use DownloadState::*;
        assert!(!Completed.can_transition_to(Downloading));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Failed.can_transition_to(Downloading));
        assert!(!Paused.can_transition_to(Downloading));
        assert!(!Completed.can_transition_to(Pending));
        for state in DownloadState::ALL {
            assert!(!state.can_transition_to(state), "{state} -> {state}");
        }
    }

    #[test]
    fn predecessors_follow_table() {
        assert_eq!(
            DownloadState::predecessors(DownloadState::Pending),
            vec![DownloadState::Failed, DownloadState::Paused]
        );
        assert_eq!(
            DownloadState::predecessors(DownloadState::Failed),
            vec![DownloadState::Downloading]
        );
    }

    #[test]
    fn chapter_validation_reports_missing_fields() {
        let ok = ChapterRef::new("c1", "books/1/c1.txt", "One", 4);
        assert_eq!(ok.validate(0), Ok(4));

        let no_index = ChapterRef {
            index: None,
            ..ok.clone()
        };
        assert!(no_index.validate(0).unwrap_err().contains("no index"));

        let no_id = ChapterRef {
            chapter_id: " ".into(),
            ..ok.clone()
        };
        assert!(no_id.validate(2).unwrap_err().contains("position 2"));

        let no_locator = ChapterRef {
            content_locator: String::new(),
            ..ok
        };
        assert!(no_locator.validate(0).unwrap_err().contains("content_locator"));
    }

    #[test]
    fn chapter_list_tolerates_missing_keys() {
        let parsed: Vec<ChapterRef> =
            serde_json::from_str(r#"[{"chapter_id":"a","index":1},{"title":"x"}]"#).unwrap();
        assert_eq!(parsed[0].index, Some(1));
        assert_eq!(parsed[1].chapter_id, "");
        assert_eq!(parsed[1].index, None);
    }

    #[test]
    fn only_lifecycle_events_have_kinds() {
        assert_eq!(Event::Shutdown.kind(), None);
        assert_eq!(Event::Paused { count: 1 }.kind(), None);
        assert_eq!(
            Event::QueueUpdated { pending: vec![] }.kind(),
            None
        );
    }

    #[test]
    fn outcome_maps_to_terminal_state() {
        assert_eq!(
            TaskOutcome::succeeded(Some(3)).terminal_state(),
            DownloadState::Completed
        );
        let failed = TaskOutcome::failed("boom");
        assert_eq!(failed.terminal_state(), DownloadState::Failed);
        assert_eq!(failed.reason.as_deref(), Some("boom"));
    }
}
