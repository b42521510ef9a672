//! Errors raised by patch application, parsing and history rebasing.

use std::fmt;

use thiserror::Error;

/// Which application inside a rebase step failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebaseStage {
    /// Replaying a later edit on top of the text that still contains the removed edit.
    ForwardEdit,
    /// Applying the current undo patch to the forward text.
    Undo,
}

impl fmt::Display for RebaseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RebaseStage::ForwardEdit => write!(f, "forward edit"),
            RebaseStage::Undo => write!(f, "undo"),
        }
    }
}

/// Patch errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    /// One or more hunks did not match their expected location/content.
    #[error("{} of {total} hunks failed to apply (indices {failed:?})", failed.len())]
    HunkApplyFailure { failed: Vec<usize>, total: usize },

    /// A later edit conflicts with the edit being removed from history.
    #[error("rebase conflict at step {step} ({stage}): hunks {failed_hunks:?} failed")]
    RebaseConflict {
        step: usize,
        stage: RebaseStage,
        failed_hunks: Vec<usize>,
    },

    /// Malformed patch text.
    #[error("invalid patch text at line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

impl PatchError {
    pub(crate) fn parse(line: usize, reason: impl Into<String>) -> Self {
        PatchError::Parse {
            line,
            reason: reason.into(),
        }
    }
}
