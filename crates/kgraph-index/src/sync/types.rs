use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

/// How the new content of an added/modified file is transmitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeMode {
    /// `content` is the complete new file.
    #[default]
    Full,
    /// `patch` is a unified diff against the current mirror; `content`, if
    /// present, is the fallback when the patch does not apply.
    Patch,
}

/// One item of a sync batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub path: String,
    pub status: ChangeStatus,
    #[serde(default)]
    pub mode: ChangeMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

impl Change {
    #[must_use]
    pub fn full(path: &str, status: ChangeStatus, content: &str) -> Self {
        Self {
            path: path.to_string(),
            status,
            mode: ChangeMode::Full,
            content: Some(content.to_string()),
            patch: None,
        }
    }

    #[must_use]
    pub fn patch(path: &str, status: ChangeStatus, patch: &str, fallback: Option<&str>) -> Self {
        Self {
            path: path.to_string(),
            status,
            mode: ChangeMode::Patch,
            content: fallback.map(str::to_string),
            patch: Some(patch.to_string()),
        }
    }

    #[must_use]
    pub fn deleted(path: &str) -> Self {
        Self {
            path: path.to_string(),
            status: ChangeStatus::Deleted,
            mode: ChangeMode::Full,
            content: None,
            patch: None,
        }
    }
}

/// Successfully processed items of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCounts {
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserts: u64,
}

/// Outcome of one batch: the wire counts plus what was skipped or failed.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub counts: SyncCounts,
    /// Paths rejected as unsafe.
    pub skipped: Vec<String>,
    /// Per-item failures as `(path, message)`.
    pub errors: Vec<(String, String)>,
    pub linked_calls: u64,
    pub duration_ms: u64,
}
