//! Per-file digest execution
//!
//! The [`Reconciler`] keeps one row per registered output for every file; the
//! [`Coordinator`] walks the registry in order and applies the status state
//! machine to those rows.

mod core;
mod reconciler;

pub use core::{Coordinator, FileOutcome, NO_OUTPUT_ERROR, OUTPUT_NOT_PRODUCED_ERROR};
pub use reconciler::{BackfillStats, EnsureStats, ORPHAN_ERROR, Reconciler};
