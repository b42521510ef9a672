//! Patch reversal and removal of a historical edit from a patch chain.
//!
//! ```text
//!  text_at_removal ──Q1──► t1 ──Q2──► t2 ── … ──Qm──► tm (latest)
//!        │                 │          │                │
//!      undo0             undo1      undo2            undom   (re-derived by diff)
//!        ▼                 ▼          ▼                ▼
//!    without edit ──►  without  ──► without ── … ──► result of applying undom
//! ```
//!
//! A single reverse patch cannot be replayed unchanged across later edits:
//! hunk offsets drift, and a fuzzy-located application is not representable
//! by the stale patch. Each step therefore applies the current undo patch to
//! the forward text and diffs the two texts to obtain the next undo patch.
//! This is O(m) diffs and is never replaced by algebraic patch composition.

use crate::apply::apply_patch_with;
use crate::diff::{compute_patch_with, PatchOptions};
use crate::error::{PatchError, RebaseStage};
use crate::patch::Patch;

/// Invert a patch: swap source/target ranges and insert/delete ops.
pub fn reverse(patch: &Patch) -> Patch {
    Patch::new(patch.hunks().iter().map(|hunk| hunk.inverted()).collect())
}

/// Stateless patch corrector. Safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct PatchCorrector {
    options: PatchOptions,
}

impl PatchCorrector {
    pub fn new(options: PatchOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &PatchOptions {
        &self.options
    }

    pub fn reverse(&self, patch: &Patch) -> Patch {
        reverse(patch)
    }

    /// Compute a patch that removes `patch_to_remove`'s effect from the latest text.
    ///
    /// `text_at_removal` is the text produced by `patch_to_remove`;
    /// `subsequent` are the later patches in chronological order. The returned
    /// patch applies to the text after all of them. Any hunk failure aborts
    /// with [`PatchError::RebaseConflict`] and no partial result.
    pub fn delete_from_history<'a, I>(
        &self,
        patch_to_remove: &Patch,
        subsequent: I,
        text_at_removal: &str,
    ) -> Result<Patch, PatchError>
    where
        I: IntoIterator<Item = &'a Patch>,
    {
        let mut undo = reverse(patch_to_remove);
        let mut current = text_at_removal.to_string();

        for (step, later) in subsequent.into_iter().enumerate() {
            let forward = apply_patch_with(later, &current, &self.options);
            if !forward.is_clean() {
                log::warn!("rebase step {step}: later edit no longer applies");
                return Err(PatchError::RebaseConflict {
                    step,
                    stage: RebaseStage::ForwardEdit,
                    failed_hunks: forward.failed_hunks(),
                });
            }
            let next = forward.text;

            let rebased = apply_patch_with(&undo, &next, &self.options);
            if !rebased.is_clean() {
                log::warn!("rebase step {step}: undo conflicts with later edit");
                return Err(PatchError::RebaseConflict {
                    step,
                    stage: RebaseStage::Undo,
                    failed_hunks: rebased.failed_hunks(),
                });
            }

            undo = compute_patch_with(&next, &rebased.text, &self.options);
            log::debug!("rebase step {step}: undo re-derived with {} hunks", undo.len());
            current = next;
        }

        Ok(undo)
    }
}
