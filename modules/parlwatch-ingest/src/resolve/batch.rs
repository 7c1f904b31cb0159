//! Offline backfill of external ids onto pre-existing members.
//!
//! Reads one full roster snapshot, scores every legacy member (no external id)
//! against every snapshot entry, links only exact/high confidence matches and
//! reports the rest for manual review.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use parlwatch_common::{CanonicalEntity, MatchConfidence, MatchTier, RosterEntry};

use crate::normalize::{collapse_whitespace, name_key};
use crate::store::IngestStore;

const SCORE_EXACT: f64 = 1.0;
const SCORE_FIRST_LAST_EXACT: f64 = 0.95;
const HIGH_NAME_THRESHOLD: f64 = 0.9;
const HIGH_CONSTITUENCY_THRESHOLD: f64 = 0.8;
const MEDIUM_THRESHOLD: f64 = 0.8;
const LOW_THRESHOLD: f64 = 0.6;

fn fold(s: &str) -> String {
    collapse_whitespace(s).to_lowercase()
}

/// Character-overlap similarity between two strings.
///
/// Equal → 1.0, one containing the other → 0.9, otherwise the number of
/// characters of the shorter string that occur anywhere in the longer one,
/// divided by the longer string's length. Asymmetric in spirit and biased
/// toward long strings; the tier thresholds below are tuned to it.
pub fn name_similarity(a: &str, b: &str) -> f64 {
    let (a, b) = (fold(a), fold(b));
    if a == b {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.9;
    }
    let (shorter, longer) = if a.chars().count() <= b.chars().count() {
        (&a, &b)
    } else {
        (&b, &a)
    };
    let found = shorter.chars().filter(|c| longer.contains(*c)).count();
    found as f64 / longer.chars().count() as f64
}

/// The three fields a backfill match is judged on.
#[derive(Debug, Clone, Copy)]
pub struct NameFields<'a> {
    pub first: &'a str,
    pub last: &'a str,
    pub constituency: &'a str,
}

impl<'a> From<&'a CanonicalEntity> for NameFields<'a> {
    fn from(e: &'a CanonicalEntity) -> Self {
        Self {
            first: &e.first_name,
            last: &e.last_name,
            constituency: &e.constituency,
        }
    }
}

impl<'a> From<&'a RosterEntry> for NameFields<'a> {
    fn from(e: &'a RosterEntry) -> Self {
        Self {
            first: &e.first_name,
            last: &e.last_name,
            constituency: &e.constituency,
        }
    }
}

/// Score an existing member against an external roster entry.
pub fn match_confidence(existing: NameFields<'_>, external: NameFields<'_>) -> MatchConfidence {
    let first_eq = fold(existing.first) == fold(external.first);
    let last_eq = fold(existing.last) == fold(external.last);
    let constituency_eq = fold(existing.constituency) == fold(external.constituency);

    if first_eq && last_eq && constituency_eq {
        return MatchConfidence { tier: MatchTier::Exact, score: SCORE_EXACT };
    }
    if first_eq && last_eq {
        return MatchConfidence { tier: MatchTier::High, score: SCORE_FIRST_LAST_EXACT };
    }

    let name_sim = (name_similarity(existing.first, external.first)
        + name_similarity(existing.last, external.last))
        / 2.0;
    let constituency_sim = name_similarity(existing.constituency, external.constituency);

    let tier = if name_sim >= HIGH_NAME_THRESHOLD && constituency_sim >= HIGH_CONSTITUENCY_THRESHOLD {
        MatchTier::High
    } else if name_sim >= MEDIUM_THRESHOLD {
        MatchTier::Medium
    } else if name_sim >= LOW_THRESHOLD {
        MatchTier::Low
    } else {
        MatchTier::None
    };
    MatchConfidence { tier, score: name_sim }
}

/// An external id to write onto an existing member.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposedLink {
    pub entity_id: Uuid,
    pub external_id: String,
    pub entity_name: String,
    pub external_name: String,
    pub confidence: MatchConfidence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewReason {
    /// Best candidate scored below the auto-link tiers.
    LowConfidence,
    /// No legacy member to compare against.
    NoCandidate,
    /// Best candidate was already claimed by an earlier entry in this snapshot.
    EntityClaimed,
    /// Snapshot entry carries no external id to backfill.
    MissingExternalId,
    /// The external id was already assigned to another member in this plan.
    ExternalIdConflict,
}

/// A snapshot entry left for a human to link.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewItem {
    pub external_id: Option<String>,
    pub external_name: String,
    pub external_constituency: String,
    pub best_entity: Option<(Uuid, String)>,
    pub confidence: MatchConfidence,
    pub reason: ReviewReason,
}

#[derive(Debug, Default)]
pub struct ReconciliationPlan {
    pub links: Vec<ProposedLink>,
    pub review: Vec<ReviewItem>,
    /// Snapshot entries whose external id is already on a stored member.
    pub already_linked: usize,
}

const NO_MATCH: MatchConfidence = MatchConfidence { tier: MatchTier::None, score: 0.0 };

pub struct BatchReconciler<'a> {
    existing: &'a [CanonicalEntity],
}

impl<'a> BatchReconciler<'a> {
    pub fn new(existing: &'a [CanonicalEntity]) -> Self {
        Self { existing }
    }

    /// Decide, for every snapshot entry, whether to link it, skip it or report it.
    pub fn plan(&self, snapshot: &[RosterEntry]) -> ReconciliationPlan {
        let known_ids: HashSet<&str> = self
            .existing
            .iter()
            .filter_map(|e| e.external_id.as_deref())
            .collect();

        let candidates: Vec<&CanonicalEntity> =
            self.existing.iter().filter(|e| e.external_id.is_none()).collect();

        let mut exact: HashMap<(String, String), usize> = HashMap::new();
        for (i, c) in candidates.iter().enumerate() {
            exact
                .entry((name_key(&c.first_name, &c.last_name), fold(&c.constituency)))
                .or_insert(i);
        }

        let mut plan = ReconciliationPlan::default();
        let mut claimed: HashSet<Uuid> = HashSet::new();
        let mut assigned: HashSet<String> = HashSet::new();

        for entry in snapshot {
            let external_name = format!("{} {}", entry.first_name, entry.last_name);
            let Some(external_id) = entry.external_id.clone() else {
                plan.review.push(review_item(entry, None, NO_MATCH, ReviewReason::MissingExternalId));
                continue;
            };
            if known_ids.contains(external_id.as_str()) {
                plan.already_linked += 1;
                continue;
            }

            let key = (name_key(&entry.first_name, &entry.last_name), fold(&entry.constituency));
            let best = match exact.get(&key) {
                Some(&i) => Some((candidates[i], MatchConfidence { tier: MatchTier::Exact, score: SCORE_EXACT })),
                None => best_candidate(&candidates, entry),
            };

            let Some((candidate, confidence)) = best else {
                plan.review.push(review_item(entry, None, NO_MATCH, ReviewReason::NoCandidate));
                continue;
            };

            if !confidence.tier.auto_applicable() {
                plan.review.push(review_item(entry, Some(candidate), confidence, ReviewReason::LowConfidence));
                continue;
            }
            if assigned.contains(&external_id) {
                plan.review.push(review_item(entry, Some(candidate), confidence, ReviewReason::ExternalIdConflict));
                continue;
            }
            if !claimed.insert(candidate.id) {
                plan.review.push(review_item(entry, Some(candidate), confidence, ReviewReason::EntityClaimed));
                continue;
            }
            assigned.insert(external_id.clone());

            plan.links.push(ProposedLink {
                entity_id: candidate.id,
                external_id,
                entity_name: candidate.full_name(),
                external_name,
                confidence,
            });
        }

        info!(
            links = plan.links.len(),
            review = plan.review.len(),
            already_linked = plan.already_linked,
            "Reconciliation plan computed"
        );
        plan
    }
}

/// Full scan over every candidate. Highest tier wins, then highest score,
/// then earliest candidate.
fn best_candidate<'e>(
    candidates: &[&'e CanonicalEntity],
    entry: &RosterEntry,
) -> Option<(&'e CanonicalEntity, MatchConfidence)> {
    let mut best: Option<(&'e CanonicalEntity, MatchConfidence)> = None;
    for &candidate in candidates {
        let confidence = match_confidence(candidate.into(), entry.into());
        let better = match &best {
            None => true,
            Some((_, current)) => {
                confidence.tier > current.tier
                    || (confidence.tier == current.tier && confidence.score > current.score)
            }
        };
        if better {
            best = Some((candidate, confidence));
        }
    }
    best
}

fn review_item(
    entry: &RosterEntry,
    candidate: Option<&CanonicalEntity>,
    confidence: MatchConfidence,
    reason: ReviewReason,
) -> ReviewItem {
    ReviewItem {
        external_id: entry.external_id.clone(),
        external_name: format!("{} {}", entry.first_name, entry.last_name),
        external_constituency: entry.constituency.clone(),
        best_entity: candidate.map(|c| (c.id, c.full_name())),
        confidence,
        reason,
    }
}

/// Write every planned link. A failed write is logged and skipped.
pub async fn apply_links(store: &dyn IngestStore, links: &[ProposedLink]) -> u64 {
    let mut applied = 0;
    for link in links {
        match store.set_external_id(link.entity_id, &link.external_id).await {
            Ok(()) => {
                applied += 1;
                info!(
                    entity_id = %link.entity_id,
                    external_id = link.external_id.as_str(),
                    tier = %link.confidence.tier,
                    score = link.confidence.score,
                    "Backfilled external id"
                );
            }
            Err(e) => warn!(
                entity_id = %link.entity_id,
                external_id = link.external_id.as_str(),
                error = %e,
                "Failed to backfill external id"
            ),
        }
    }
    applied
}

#[derive(Serialize)]
struct ReportRow<'a> {
    external_id: &'a str,
    external_name: &'a str,
    external_constituency: &'a str,
    best_entity_id: String,
    best_entity_name: &'a str,
    tier: String,
    score: String,
    reason: ReviewReason,
}

/// Write the manual-review items as CSV. Returns the number of rows written.
pub fn write_review_report(items: &[ReviewItem], path: &Path) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report dir {}", parent.display()))?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to open report {}", path.display()))?;

    for item in items {
        writer.serialize(ReportRow {
            external_id: item.external_id.as_deref().unwrap_or_default(),
            external_name: &item.external_name,
            external_constituency: &item.external_constituency,
            best_entity_id: item.best_entity.as_ref().map(|(id, _)| id.to_string()).unwrap_or_default(),
            best_entity_name: item.best_entity.as_ref().map(|(_, n)| n.as_str()).unwrap_or_default(),
            tier: item.confidence.tier.to_string(),
            score: format!("{:.3}", item.confidence.score),
            reason: item.reason,
        })?;
    }
    writer.flush()?;
    Ok(items.len())
}
