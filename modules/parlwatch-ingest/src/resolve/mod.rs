//! Entity resolution: mapping feed references onto canonical members.
//!
//! `live` runs inside every ingestion run and only trusts exact keys.
//! `batch` is the offline backfill that scores fuzzy name matches.

pub mod batch;
pub mod live;

pub use batch::{match_confidence, name_similarity, BatchReconciler, ReconciliationPlan};
pub use live::{EntityIndex, Resolution};
