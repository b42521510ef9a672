//! Per-file version history: a base snapshot plus a chain of patches.
//!
//! Architecture:
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                       FileHistory                         │
//! │                                                           │
//! │  base_text ──P(b+1)──► ──P(b+2)──► … ──P(head)──► head_text │
//! │  (version b)                                              │
//! │                                                           │
//! │  Compaction: fold the oldest patches into a new base      │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry *i* turns version `base_version + i` into `base_version + i + 1`.
//! Version numbers are never reused or renumbered: removing an edit appends
//! a new `Removal` version, and compaction only moves the base forward.
//!
//! The whole history is the value the mediator stores per file key.
//!
//! Reference: Kleppmann, DDIA, Chapter 3 (Log-Structured Storage)

use palimpsest_core::{apply_patch, apply_patch_with, compute_patch, Patch, PatchCorrector, PatchError};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use thiserror::Error;

/// Compaction settings.
#[derive(Debug, Clone)]
pub struct HistoryConfig {
    /// Compact once the history holds more entries than this (default: 256)
    pub compaction_threshold: usize,
    /// Entries kept after compaction (default: 64)
    pub retained_entries: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            compaction_threshold: 256,
            retained_entries: 64,
        }
    }
}

impl HistoryConfig {
    pub fn for_testing() -> Self {
        Self {
            compaction_threshold: 8,
            retained_entries: 4,
        }
    }
}

/// How a version came to be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// New content submitted by an author.
    Edit,
    /// The effect of an earlier version was taken out.
    Removal { removed_version: u64 },
}

/// Listing metadata for one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: u64,
    pub author: String,
    pub timestamp_ms: u64,
    pub kind: EntryKind,
    /// Content length in chars
    pub length: usize,
}

impl VersionInfo {
    /// Version 0: the empty file before any edit.
    pub fn initial() -> Self {
        Self {
            version: 0,
            author: String::new(),
            timestamp_ms: 0,
            kind: EntryKind::Edit,
            length: 0,
        }
    }
}

/// A version's metadata together with its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionContent {
    pub info: VersionInfo,
    pub content: String,
}

/// One step of the patch chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub version: u64,
    pub author: String,
    pub timestamp_ms: u64,
    pub kind: EntryKind,
    /// Content length in chars after this entry
    pub length: usize,
    /// Turns version `version - 1` into `version`
    pub patch: Patch,
}

impl HistoryEntry {
    pub fn info(&self) -> VersionInfo {
        VersionInfo {
            version: self.version,
            author: self.author.clone(),
            timestamp_ms: self.timestamp_ms,
            kind: self.kind.clone(),
            length: self.length,
        }
    }
}

/// History errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("version {version} does not exist (head is {head})")]
    VersionNotFound { version: u64, head: u64 },

    #[error("version {version} was compacted (oldest available is {base_version})")]
    VersionCompacted { version: u64, base_version: u64 },

    /// A stored patch no longer reproduces its version.
    #[error("history corrupt at version {version}: {source}")]
    Corrupt {
        version: u64,
        #[source]
        source: PatchError,
    },

    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Base snapshot plus the patches leading to the head version.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileHistory {
    base_version: u64,
    base_text: String,
    /// Metadata of the base version, once compaction has moved it past 0
    base_info: Option<VersionInfo>,
    entries: Vec<HistoryEntry>,
    head_text: String,
}

impl FileHistory {
    pub fn head_version(&self) -> u64 {
        self.base_version + self.entries.len() as u64
    }

    pub fn head_text(&self) -> &str {
        &self.head_text
    }

    /// Oldest version whose text is still available.
    pub fn base_version(&self) -> u64 {
        self.base_version
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    /// Metadata for every available version, oldest first. Empty for a new file.
    pub fn versions(&self) -> Vec<VersionInfo> {
        self.base_info
            .iter()
            .cloned()
            .chain(self.entries.iter().map(HistoryEntry::info))
            .collect()
    }

    /// Metadata for one version.
    pub fn info(&self, version: u64) -> Result<VersionInfo, HistoryError> {
        self.check_available(version)?;
        if version == self.base_version {
            return Ok(self.base_info.clone().unwrap_or_else(VersionInfo::initial));
        }
        Ok(self.entries[self.entry_index(version)].info())
    }

    /// Append a new version with `content`. Identical content still creates a version.
    pub fn record(&mut self, author: &str, content: &str) -> VersionInfo {
        self.record_at(author, content, now_ms())
    }

    /// [`record`](Self::record) with an explicit timestamp.
    pub fn record_at(&mut self, author: &str, content: &str, timestamp_ms: u64) -> VersionInfo {
        let patch = compute_patch(&self.head_text, content);
        self.push_entry(author, timestamp_ms, EntryKind::Edit, patch, content.to_string())
    }

    /// Text of `version`, replayed from the base snapshot.
    pub fn text_at(&self, version: u64) -> Result<String, HistoryError> {
        self.check_available(version)?;
        if version == self.head_version() {
            return Ok(self.head_text.clone());
        }

        let mut text = self.base_text.clone();
        for entry in &self.entries[..(version - self.base_version) as usize] {
            text = apply_patch(&entry.patch, &text)
                .into_text()
                .map_err(|source| HistoryError::Corrupt {
                    version: entry.version,
                    source,
                })?;
        }
        Ok(text)
    }

    /// Take the effect of `version` out of the head, keeping every later edit.
    ///
    /// Appends a `Removal` version and returns its metadata. A conflict with a
    /// later edit leaves the history untouched.
    pub fn remove_edit(
        &mut self,
        version: u64,
        author: &str,
        corrector: &PatchCorrector,
    ) -> Result<VersionInfo, HistoryError> {
        if version == 0 || version > self.head_version() {
            return Err(HistoryError::VersionNotFound {
                version,
                head: self.head_version(),
            });
        }
        if version <= self.base_version {
            return Err(HistoryError::VersionCompacted {
                version,
                base_version: self.base_version,
            });
        }

        let idx = self.entry_index(version);
        let text_at_removal = self.text_at(version)?;
        let later = self.entries[idx + 1..].iter().map(|e| &e.patch);
        let undo = corrector.delete_from_history(&self.entries[idx].patch, later, &text_at_removal)?;

        let new_text = apply_patch_with(&undo, &self.head_text, corrector.options()).into_text()?;
        log::debug!(
            "Removed version {version}: {} undo hunks over {} later entries",
            undo.len(),
            self.entries.len() - idx - 1
        );
        Ok(self.push_entry(
            author,
            now_ms(),
            EntryKind::Removal {
                removed_version: version,
            },
            undo,
            new_text,
        ))
    }

    /// Fold the oldest entries into the base once the history outgrows
    /// `config.compaction_threshold`. Returns the number of entries folded.
    pub fn compact(&mut self, config: &HistoryConfig) -> Result<usize, HistoryError> {
        if self.entries.len() <= config.compaction_threshold {
            return Ok(0);
        }
        let fold = self.entries.len() - config.retained_entries.min(self.entries.len());
        if fold == 0 {
            return Ok(0);
        }

        let new_base = self.base_version + fold as u64;
        self.base_text = self.text_at(new_base)?;
        self.base_info = Some(self.entries[fold - 1].info());
        self.entries.drain(..fold);
        self.base_version = new_base;

        log::debug!("Compacted {fold} entries; base is now version {new_base}");
        Ok(fold)
    }

    // ─── Helpers ──────────────────────────────────────────────────────

    fn check_available(&self, version: u64) -> Result<(), HistoryError> {
        if version > self.head_version() {
            return Err(HistoryError::VersionNotFound {
                version,
                head: self.head_version(),
            });
        }
        if version < self.base_version {
            return Err(HistoryError::VersionCompacted {
                version,
                base_version: self.base_version,
            });
        }
        Ok(())
    }

    /// Index of the entry producing `version` (`base_version < version <= head`).
    fn entry_index(&self, version: u64) -> usize {
        (version - self.base_version - 1) as usize
    }

    fn push_entry(
        &mut self,
        author: &str,
        timestamp_ms: u64,
        kind: EntryKind,
        patch: Patch,
        new_text: String,
    ) -> VersionInfo {
        let entry = HistoryEntry {
            version: self.head_version() + 1,
            author: author.to_string(),
            timestamp_ms,
            kind,
            length: new_text.chars().count(),
            patch,
        };
        let info = entry.info();
        self.entries.push(entry);
        self.head_text = new_text;
        info
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
