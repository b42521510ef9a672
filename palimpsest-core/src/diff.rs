//! Patch computation on top of a character-level Myers diff.
//!
//! The raw edit script from `similar` is grouped into hunks carrying
//! `margin` chars of unchanged context on each side. Change regions
//! separated by at most `2 * margin` unchanged chars share a hunk.
//!
//! Reference: Myers, An O(ND) Difference Algorithm and Its Variations (1986)

use similar::{capture_diff_slices, Algorithm, DiffOp as RawOp};

use crate::patch::{DiffOp, Hunk, Patch};

/// Tuning knobs shared by patch computation and application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// Context chars kept on each side of a change, and the search window
    /// for one-sided matches (default: 4)
    pub margin: usize,
    /// How far (in chars) apply searches from a hunk's expected location (default: 1000)
    pub match_distance: usize,
    /// Retry a hunk with one side of its keep context when the full pre-image
    /// is not found. The retry only looks within `margin` chars of the
    /// expected location (default: true)
    pub trim_context: bool,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            margin: 4,
            match_distance: 1000,
            trim_context: true,
        }
    }
}

impl PatchOptions {
    /// Exact-location application only: no search, no context trimming.
    pub fn strict() -> Self {
        Self {
            match_distance: 0,
            trim_context: false,
            ..Self::default()
        }
    }
}

/// A run of the raw edit script, in chars.
#[derive(Debug, Clone, Copy)]
enum Run {
    Equal(usize),
    Delete(usize),
    Insert(usize),
}

/// Compute a patch turning `old` into `new` with default options.
pub fn compute_patch(old: &str, new: &str) -> Patch {
    compute_patch_with(old, new, &PatchOptions::default())
}

/// Compute a patch turning `old` into `new`.
pub fn compute_patch_with(old: &str, new: &str, options: &PatchOptions) -> Patch {
    let old_chars: Vec<char> = old.chars().collect();
    let new_chars: Vec<char> = new.chars().collect();
    let runs = edit_runs(&old_chars, &new_chars);
    let margin = options.margin;

    let mut hunks = Vec::new();
    let mut open: Option<HunkBuilder> = None;
    let (mut old_pos, mut new_pos) = (0usize, 0usize);
    let last = runs.len().saturating_sub(1);

    for (i, run) in runs.iter().enumerate() {
        match *run {
            Run::Equal(len) => {
                if let Some(mut builder) = open.take() {
                    if len <= 2 * margin && i != last {
                        builder.push(DiffOp::Keep(collect(&old_chars[old_pos..old_pos + len])));
                        open = Some(builder);
                    } else {
                        let tail = len.min(margin);
                        builder.push(DiffOp::Keep(collect(&old_chars[old_pos..old_pos + tail])));
                        hunks.push(builder.finish());
                    }
                }
                old_pos += len;
                new_pos += len;
            }
            Run::Delete(len) => {
                open.get_or_insert_with(|| HunkBuilder::open(&old_chars, old_pos, new_pos, margin))
                    .push(DiffOp::Delete(collect(&old_chars[old_pos..old_pos + len])));
                old_pos += len;
            }
            Run::Insert(len) => {
                open.get_or_insert_with(|| HunkBuilder::open(&old_chars, old_pos, new_pos, margin))
                    .push(DiffOp::Insert(collect(&new_chars[new_pos..new_pos + len])));
                new_pos += len;
            }
        }
    }

    if let Some(builder) = open {
        hunks.push(builder.finish());
    }
    Patch::new(hunks)
}

/// Flatten similar's ops into equal/delete/insert runs; a replace becomes delete + insert.
fn edit_runs(old: &[char], new: &[char]) -> Vec<Run> {
    let mut runs = Vec::new();
    for op in capture_diff_slices(Algorithm::Myers, old, new) {
        match op {
            RawOp::Equal { len, .. } => runs.push(Run::Equal(len)),
            RawOp::Delete { old_len, .. } => runs.push(Run::Delete(old_len)),
            RawOp::Insert { new_len, .. } => runs.push(Run::Insert(new_len)),
            RawOp::Replace { old_len, new_len, .. } => {
                runs.push(Run::Delete(old_len));
                runs.push(Run::Insert(new_len));
            }
        }
    }
    runs
}

fn collect(chars: &[char]) -> String {
    chars.iter().collect()
}

/// Accumulates ops for one hunk, merging adjacent fragments of the same kind.
struct HunkBuilder {
    source_start: usize,
    target_start: usize,
    ops: Vec<DiffOp>,
}

impl HunkBuilder {
    /// Open a hunk at a change starting at (`old_pos`, `new_pos`), pulling in leading context.
    fn open(old: &[char], old_pos: usize, new_pos: usize, margin: usize) -> Self {
        let lead = margin.min(old_pos).min(new_pos);
        let mut builder = Self {
            source_start: old_pos - lead,
            target_start: new_pos - lead,
            ops: Vec::new(),
        };
        builder.push(DiffOp::Keep(collect(&old[old_pos - lead..old_pos])));
        builder
    }

    fn push(&mut self, op: DiffOp) {
        if op.text().is_empty() {
            return;
        }
        match (self.ops.last_mut(), op) {
            (Some(DiffOp::Keep(prev)), DiffOp::Keep(t))
            | (Some(DiffOp::Insert(prev)), DiffOp::Insert(t))
            | (Some(DiffOp::Delete(prev)), DiffOp::Delete(t)) => prev.push_str(&t),
            (_, op) => self.ops.push(op),
        }
    }

    fn finish(self) -> Hunk {
        Hunk::new(self.source_start, self.target_start, self.ops)
    }
}
