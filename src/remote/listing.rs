//! Wire model of the folder listing API and its translation into
//! [`NormalizedChange`] records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque continuation token returned by a listing response.
///
/// Only valid for `list_folder_continue` against the folder tree that produced
/// it. An empty cursor means a full listing is required.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SyncCursor(String);

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for SyncCursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const PREVIEW: usize = 12;
        if self.0.len() > PREVIEW {
            let end = self
                .0
                .char_indices()
                .nth(PREVIEW)
                .map(|(idx, _)| idx)
                .unwrap_or(self.0.len());
            write!(f, "{}…", &self.0[..end])
        } else {
            f.write_str(&self.0)
        }
    }
}

/// One entry as the listing API reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = ".tag", rename_all = "snake_case")]
pub enum RawEntry {
    File {
        name: String,
        #[serde(default)]
        path_display: Option<String>,
        #[serde(default)]
        size: u64,
        #[serde(default)]
        server_modified: Option<String>,
    },
    Folder {
        name: String,
        #[serde(default)]
        path_display: Option<String>,
    },
    Deleted {
        name: String,
        #[serde(default)]
        path_display: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// One page of a listing or listing-continue response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListFolderPage {
    pub entries: Vec<RawEntry>,
    pub cursor: SyncCursor,
    pub has_more: bool,
}

/// Source-agnostic record of one file addition, modification, or deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedChange {
    pub path: String,
    pub size: u64,
    /// `None` for deletions, which carry no timestamp.
    pub modified_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

/// Why a raw entry could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntryError {
    #[error("entry {path} has no modification timestamp")]
    MissingTimestamp { path: String },
    #[error("entry {path} has malformed timestamp {value:?}: {reason}")]
    MalformedTimestamp {
        path: String,
        value: String,
        reason: String,
    },
}

impl RawEntry {
    /// Converts the entry; folders and unknown tags yield `Ok(None)`.
    pub fn normalize(&self) -> Result<Option<NormalizedChange>, EntryError> {
        match self {
            RawEntry::File {
                name,
                path_display,
                size,
                server_modified,
            } => {
                let path = display_path(name, path_display);
                let raw = server_modified
                    .as_deref()
                    .ok_or_else(|| EntryError::MissingTimestamp { path: path.clone() })?;
                let modified_at = DateTime::parse_from_rfc3339(raw)
                    .map_err(|err| EntryError::MalformedTimestamp {
                        path: path.clone(),
                        value: raw.to_owned(),
                        reason: err.to_string(),
                    })?
                    .with_timezone(&Utc);
                Ok(Some(NormalizedChange {
                    path,
                    size: *size,
                    modified_at: Some(modified_at),
                    is_deleted: false,
                }))
            }
            RawEntry::Deleted { name, path_display } => Ok(Some(NormalizedChange {
                path: display_path(name, path_display),
                size: 0,
                modified_at: None,
                is_deleted: true,
            })),
            RawEntry::Folder { .. } | RawEntry::Unknown => Ok(None),
        }
    }
}

/// Result of normalizing one page.
#[derive(Debug, Default)]
pub(crate) struct NormalizedPage {
    pub(crate) changes: Vec<NormalizedChange>,
    pub(crate) skipped: usize,
}

/// Normalizes every entry of a page. A bad entry is logged and skipped so it
/// cannot block the rest of the page.
pub(crate) fn normalize_entries(entries: &[RawEntry]) -> NormalizedPage {
    let mut page = NormalizedPage {
        changes: Vec::with_capacity(entries.len()),
        skipped: 0,
    };

    for entry in entries {
        match entry.normalize() {
            Ok(Some(change)) => page.changes.push(change),
            Ok(None) => {
                tracing::trace!(entry = ?entry, "ignoring non-file listing entry");
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping listing entry");
                page.skipped += 1;
            }
        }
    }

    page
}

fn display_path(name: &str, path_display: &Option<String>) -> String {
    match path_display {
        Some(path) if !path.is_empty() => path.clone(),
        _ => name.to_owned(),
    }
}
