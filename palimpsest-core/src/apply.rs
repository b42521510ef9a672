//! Patch application with fuzzy hunk location.
//!
//! Hunks are applied in order against a working copy of the text. Hunk *k*
//! is expected at its `target_start` (where its pre-image sits once hunks
//! `0..k` are applied), shifted by the drift observed on earlier hunks. When
//! the pre-image is not at the expected location, apply searches outward up
//! to `match_distance` chars and takes the nearest exact match. Failing that
//! it retries with one side of the keep context dropped, but only within
//! `margin` chars of the expected location: the kept side must still sit
//! right next to the change. A hunk is never placed by its bare core. A hunk
//! that cannot be placed is skipped and reported, never raised.
//!
//! Reference: Fraser, Differential Synchronization (2009), §4 "Fuzzy Patch"

use std::borrow::Cow;

use crate::diff::PatchOptions;
use crate::error::PatchError;
use crate::patch::{Hunk, Patch};

/// Result of applying a patch: the new text plus per-hunk success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub text: String,
    pub hunk_results: Vec<bool>,
}

impl ApplyOutcome {
    /// Every hunk applied.
    pub fn is_clean(&self) -> bool {
        self.hunk_results.iter().all(|ok| *ok)
    }

    /// Indices of hunks that could not be placed.
    pub fn failed_hunks(&self) -> Vec<usize> {
        self.hunk_results
            .iter()
            .enumerate()
            .filter(|(_, ok)| !**ok)
            .map(|(i, _)| i)
            .collect()
    }

    /// The resulting text, or `HunkApplyFailure` if any hunk failed.
    pub fn into_text(self) -> Result<String, PatchError> {
        if self.is_clean() {
            Ok(self.text)
        } else {
            Err(PatchError::HunkApplyFailure {
                failed: self.failed_hunks(),
                total: self.hunk_results.len(),
            })
        }
    }
}

/// Apply `patch` to `text` with default options.
pub fn apply_patch(patch: &Patch, text: &str) -> ApplyOutcome {
    apply_patch_with(patch, text, &PatchOptions::default())
}

/// Apply `patch` to `text`.
pub fn apply_patch_with(patch: &Patch, text: &str, options: &PatchOptions) -> ApplyOutcome {
    let mut working: Vec<char> = text.chars().collect();
    let mut hunk_results = Vec::with_capacity(patch.len());
    let mut drift: isize = 0;

    for (idx, hunk) in patch.hunks().iter().enumerate() {
        let expected = (hunk.target_start as isize).saturating_add(drift);
        match place(&working, hunk, expected, options) {
            Some(placement) => {
                let at = placement.at;
                working.splice(
                    at..at + placement.matched_len,
                    placement.hunk.target_text().chars(),
                );
                drift = (at as isize).saturating_sub(placement.hunk.target_start as isize);
                hunk_results.push(true);
            }
            None => {
                log::trace!("hunk {idx} not found near offset {expected}");
                drift = drift.saturating_sub(hunk.length_delta());
                hunk_results.push(false);
            }
        }
    }

    ApplyOutcome {
        text: working.into_iter().collect(),
        hunk_results,
    }
}

/// Where a hunk (or one of its one-sided variants) matched.
struct Placement<'h> {
    at: usize,
    /// Chars of `working` covered by the matched pre-image
    matched_len: usize,
    hunk: Cow<'h, Hunk>,
}

/// Find where `hunk` applies in `working`.
///
/// The splice length comes from the ops, not the header, so a hunk whose
/// `source_len` disagrees with its ops cannot index past the text.
fn place<'h>(
    working: &[char],
    hunk: &'h Hunk,
    expected: isize,
    options: &PatchOptions,
) -> Option<Placement<'h>> {
    let pattern: Vec<char> = hunk.source_text().chars().collect();
    if let Some(at) = locate(working, &pattern, expected, options.match_distance) {
        return Some(Placement {
            at,
            matched_len: pattern.len(),
            hunk: Cow::Borrowed(hunk),
        });
    }
    if !options.trim_context {
        return None;
    }

    for (lead, variant) in hunk.one_sided() {
        let pattern: Vec<char> = variant.source_text().chars().collect();
        let near = expected.saturating_add(lead as isize);
        if let Some(at) = locate(working, &pattern, near, options.margin) {
            log::trace!("hunk placed at {at} with one side of its context");
            return Some(Placement {
                at,
                matched_len: pattern.len(),
                hunk: Cow::Owned(variant),
            });
        }
    }
    None
}

/// Nearest exact occurrence of `pattern` within `distance` of `expected`.
fn locate(haystack: &[char], pattern: &[char], expected: isize, distance: usize) -> Option<usize> {
    if pattern.len() > haystack.len() {
        return None;
    }
    let max_start = haystack.len() - pattern.len();
    let expected = expected.clamp(0, max_start as isize) as usize;
    let matches_at = |at: usize| haystack[at..at + pattern.len()] == *pattern;

    if matches_at(expected) {
        return Some(expected);
    }
    for d in 1..=distance {
        let before = expected.checked_sub(d);
        let after = expected.saturating_add(d);
        if before.is_none() && after > max_start {
            break;
        }
        if let Some(at) = before {
            if matches_at(at) {
                return Some(at);
            }
        }
        if after <= max_start && matches_at(after) {
            return Some(after);
        }
    }
    None
}
