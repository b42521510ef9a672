//! # palimpsest-core: Patch engine for versioned text files
//!
//! Computes, applies and rebases character-level patches. Pure and
//! synchronous: no I/O, no locks, no async.
//!
//! ## Architecture
//!
//! ```text
//!   old text ──► compute_patch ──► Patch ──► apply_patch ──► new text
//!                                   │
//!                                   ▼
//!                           PatchCorrector
//!                    ┌──────────────┴──────────────┐
//!                 reverse               delete_from_history
//!              (invert a patch)    (drop one edit, keep the rest)
//! ```
//!
//! ## Modules
//!
//! - [`patch`]: `DiffOp` / `Hunk` / `Patch` and the textual patch form
//! - [`diff`]: Myers diff grouped into context hunks
//! - [`apply`]: fuzzy hunk placement with per-hunk results
//! - [`corrector`]: reversal and history rebasing
//! - [`error`]: `PatchError`
//!
//! ## Performance Targets
//!
//! | Metric | Target |
//! |--------|--------|
//! | Diff + apply, 10KB text, 1% changed | <1ms |
//! | Remove edit behind 100 later edits | <50ms |

pub mod apply;
pub mod corrector;
pub mod diff;
pub mod error;
pub mod patch;

// Re-exports for convenience
pub use apply::{apply_patch, apply_patch_with, ApplyOutcome};
pub use corrector::{reverse, PatchCorrector};
pub use diff::{compute_patch, compute_patch_with, PatchOptions};
pub use error::{PatchError, RebaseStage};
pub use patch::{DiffOp, Hunk, Patch};
