//! Roster reconciliation: upsert every member in the current roster, then
//! soft-delete the active members that no longer appear in it.
//!
//! Planning is pure (`RosterReconciler::plan`); `apply` performs the writes.

use std::collections::{HashMap, HashSet};

use tracing::{info, warn};
use uuid::Uuid;

use parlwatch_common::{CanonicalEntity, MatchTier, MemberUpsert, PersistStats, RosterEntry};

use crate::normalize::{
    province_name, sanitize, sanitize_label, smart_merge, smart_merge_opt, strip_honorific,
};
use crate::orchestrator::PreparedBatch;
use crate::resolve::batch::match_confidence;
use crate::store::IngestStore;

/// One planned roster write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterChange {
    Upsert(MemberUpsert),
    /// Active member missing from the roster; becomes `past`.
    Depart { id: Uuid, name: String },
}

impl RosterChange {
    pub fn as_upsert(&self) -> Option<&MemberUpsert> {
        match self {
            RosterChange::Upsert(m) => Some(m),
            RosterChange::Depart { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RosterReconciler {
    /// When set, only this many entries are processed and departures are skipped.
    dry_run_limit: Option<usize>,
}

impl RosterReconciler {
    pub fn new(dry_run_limit: Option<usize>) -> Self {
        Self { dry_run_limit }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run_limit.is_some()
    }

    /// Apply the dry-run cap. Returns the kept entries and how many were cut.
    pub fn cap(&self, mut entries: Vec<RosterEntry>) -> (Vec<RosterEntry>, u64) {
        match self.dry_run_limit {
            Some(limit) if entries.len() > limit => {
                let skipped = (entries.len() - limit) as u64;
                entries.truncate(limit);
                info!(limit, skipped, "Dry run: capping roster entries");
                (entries, skipped)
            }
            _ => (entries, 0),
        }
    }

    /// Plan upserts for `entries` against the stored members, followed by
    /// departures for active members that were not seen.
    pub fn plan(&self, existing: &[CanonicalEntity], entries: &[RosterEntry]) -> PreparedBatch<RosterChange> {
        let by_external_id: HashMap<&str, &CanonicalEntity> = existing
            .iter()
            .filter_map(|e| e.external_id.as_deref().map(|ext| (ext, e)))
            .collect();

        let mut changes = Vec::with_capacity(entries.len());
        let mut dropped = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();

        for entry in entries {
            let Some(external_id) = entry
                .external_id
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
            else {
                dropped.push(format!("{} {}", entry.first_name, entry.last_name));
                continue;
            };

            let (stored, adopt_id) = match by_external_id.get(external_id) {
                Some(e) => (Some(*e), None),
                None => match adoptable(existing, entry, &seen) {
                    Some(legacy) => {
                        info!(
                            external_id,
                            entity_id = %legacy.id,
                            name = %legacy.full_name(),
                            "Adopting legacy member without external id"
                        );
                        (Some(legacy), Some(legacy.id))
                    }
                    None => (None, None),
                },
            };
            if let Some(stored) = stored {
                seen.insert(stored.id);
            }

            changes.push(RosterChange::Upsert(merge(external_id, stored, adopt_id, entry)));
        }

        let upserts = changes.len();
        if upserts == 0 {
            warn!("Roster yielded no usable entries, skipping departures");
        } else if self.is_dry_run() {
            info!("Dry run: skipping departures");
        } else {
            for member in existing.iter().filter(|e| e.is_active && !seen.contains(&e.id)) {
                changes.push(RosterChange::Depart {
                    id: member.id,
                    name: member.full_name(),
                });
            }
        }

        info!(
            upserts,
            departures = changes.len() - upserts,
            dropped = dropped.len(),
            "Planned roster reconciliation"
        );

        PreparedBatch {
            records: changes,
            dropped,
            skipped: 0,
        }
    }

    /// Upsert every entry, then mark all departures in one statement.
    /// A failed upsert is logged and counted; the rest of the batch proceeds.
    pub async fn apply(&self, store: &dyn IngestStore, batch: PreparedBatch<RosterChange>) -> PersistStats {
        let mut stats = PersistStats::default();
        let mut departures = Vec::new();

        for change in batch.records {
            match change {
                RosterChange::Upsert(member) => match store.upsert_member(&member).await {
                    Ok(outcome) => stats.record(outcome),
                    Err(e) => {
                        stats.failed += 1;
                        warn!(external_id = member.external_id.as_str(), error = %e, "Failed to upsert member");
                    }
                },
                RosterChange::Depart { id, name } => {
                    info!(entity_id = %id, name = name.as_str(), "Member no longer on roster");
                    departures.push(id);
                }
            }
        }

        if !departures.is_empty() {
            match store.mark_departed(&departures).await {
                Ok(n) => stats.departed = n,
                Err(e) => {
                    stats.failed += departures.len() as u64;
                    warn!(count = departures.len(), error = %e, "Failed to mark departed members");
                }
            }
        }

        stats
    }
}

/// A legacy member (no external id yet) that matches `entry` exactly and
/// has not already been claimed this run.
fn adoptable<'e>(
    existing: &'e [CanonicalEntity],
    entry: &RosterEntry,
    claimed: &HashSet<Uuid>,
) -> Option<&'e CanonicalEntity> {
    existing
        .iter()
        .filter(|e| e.external_id.is_none() && !claimed.contains(&e.id))
        .find(|e| match_confidence((*e).into(), entry.into()).tier == MatchTier::Exact)
}

fn merge(
    external_id: &str,
    stored: Option<&CanonicalEntity>,
    adopt_id: Option<Uuid>,
    entry: &RosterEntry,
) -> MemberUpsert {
    let first_name = smart_merge(
        stored.map(|s| s.first_name.as_str()),
        &strip_honorific(&entry.first_name),
        sanitize,
    );
    let last_name = smart_merge(stored.map(|s| s.last_name.as_str()), &entry.last_name, sanitize);
    let display_name = format!("{first_name} {last_name}");

    MemberUpsert {
        external_id: external_id.to_string(),
        adopt_id,
        constituency: smart_merge(
            stored.map(|s| s.constituency.as_str()),
            &entry.constituency,
            sanitize,
        ),
        region: smart_merge(stored.map(|s| s.region.as_str()), &entry.region, province_name),
        affiliation: smart_merge(
            stored.map(|s| s.affiliation.as_str()),
            &entry.affiliation,
            sanitize_label,
        ),
        email: smart_merge_opt(
            stored.and_then(|s| s.email.as_deref()),
            entry.email.as_deref(),
            sanitize_label,
        ),
        phone: smart_merge_opt(
            stored.and_then(|s| s.phone.as_deref()),
            entry.phone.as_deref(),
            sanitize_label,
        ),
        display_name,
        first_name,
        last_name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entity, roster_entry};

    fn upserts(batch: &PreparedBatch<RosterChange>) -> Vec<&MemberUpsert> {
        batch.records.iter().filter_map(RosterChange::as_upsert).collect()
    }

    fn departures(batch: &PreparedBatch<RosterChange>) -> Vec<Uuid> {
        batch
            .records
            .iter()
            .filter_map(|c| match c {
                RosterChange::Depart { id, .. } => Some(*id),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn departs_active_members_missing_from_roster() {
        let staying = entity(Some("1"), "John", "Smith", "Ottawa Centre");
        let leaving = entity(Some("2"), "Jane", "Doe", "Halifax");
        let existing = vec![staying.clone(), leaving.clone()];

        let batch = RosterReconciler::new(None)
            .plan(&existing, &[roster_entry(Some("1"), "John", "Smith", "Ottawa Centre")]);

        assert_eq!(upserts(&batch).len(), 1);
        assert_eq!(departures(&batch), vec![leaving.id]);
    }

    #[test]
    fn upserts_come_before_departures() {
        let existing = vec![entity(Some("2"), "Jane", "Doe", "Halifax")];
        let batch = RosterReconciler::new(None)
            .plan(&existing, &[roster_entry(Some("1"), "John", "Smith", "Ottawa Centre")]);
        assert!(matches!(batch.records[0], RosterChange::Upsert(_)));
        assert!(matches!(batch.records[1], RosterChange::Depart { .. }));
    }

    #[test]
    fn past_members_are_not_departed_again() {
        let mut gone = entity(Some("2"), "Jane", "Doe", "Halifax");
        gone.is_active = false;
        let batch = RosterReconciler::new(None)
            .plan(&[gone], &[roster_entry(Some("1"), "John", "Smith", "Ottawa Centre")]);
        assert!(departures(&batch).is_empty());
    }

    #[test]
    fn empty_roster_departs_nobody() {
        let existing = vec![entity(Some("1"), "John", "Smith", "Ottawa Centre")];
        let batch = RosterReconciler::new(None).plan(&existing, &[]);
        assert!(batch.records.is_empty());
    }

    #[test]
    fn dry_run_caps_and_skips_departures() {
        let existing = vec![entity(Some("9"), "Jane", "Doe", "Halifax")];
        let reconciler = RosterReconciler::new(Some(2));
        let entries = vec![
            roster_entry(Some("1"), "A", "One", "X"),
            roster_entry(Some("2"), "B", "Two", "Y"),
            roster_entry(Some("3"), "C", "Three", "Z"),
        ];

        let (kept, skipped) = reconciler.cap(entries);
        assert_eq!(kept.len(), 2);
        assert_eq!(skipped, 1);

        let batch = reconciler.plan(&existing, &kept);
        assert_eq!(upserts(&batch).len(), 2);
        assert!(departures(&batch).is_empty());
    }

    #[test]
    fn smart_merge_keeps_stored_casing() {
        let mut stored = entity(Some("1"), "Ken", "McDonald", "Avalon");
        stored.affiliation = "Liberal".into();
        let mut entry = roster_entry(Some("1"), "KEN", "MCDONALD", "  avalon ");
        entry.affiliation = "Liberal".into();

        let batch = RosterReconciler::new(None).plan(&[stored], &[entry]);
        let upsert = upserts(&batch)[0];
        assert_eq!(upsert.last_name, "McDonald");
        assert_eq!(upsert.constituency, "Avalon");
        assert_eq!(upsert.display_name, "Ken McDonald");
        assert_eq!(upsert.adopt_id, None);
    }

    #[test]
    fn new_members_are_sanitized() {
        let mut entry = roster_entry(Some("7"), "  JEAN-YVES ", "DUCLOS", "QUÉBEC");
        entry.region = "24".into();
        entry.email = Some(" jean-yves.duclos@parl.gc.ca ".into());

        let batch = RosterReconciler::new(None).plan(&[], &[entry]);
        let upsert = upserts(&batch)[0];
        assert_eq!(upsert.first_name, "Jean-Yves");
        assert_eq!(upsert.last_name, "Duclos");
        assert_eq!(upsert.constituency, "Québec");
        assert_eq!(upsert.region, "Quebec");
        assert_eq!(upsert.email.as_deref(), Some("jean-yves.duclos@parl.gc.ca"));
    }

    #[test]
    fn adopts_legacy_member_only_on_exact_match() {
        let legacy = entity(None, "John", "Smith", "Ottawa Centre");
        let near = entity(None, "Jane", "Doe", "Halifax");
        let existing = vec![legacy.clone(), near];

        let batch = RosterReconciler::new(None).plan(
            &existing,
            &[
                roster_entry(Some("1"), "JOHN", "SMITH", "ottawa centre"),
                roster_entry(Some("2"), "Jane", "Doe", "Halifax West"),
            ],
        );

        let planned = upserts(&batch);
        assert_eq!(planned[0].adopt_id, Some(legacy.id));
        assert_eq!(planned[1].adopt_id, None);
    }

    #[test]
    fn adopted_legacy_member_is_not_departed() {
        let legacy = entity(None, "John", "Smith", "Ottawa Centre");
        let batch = RosterReconciler::new(None)
            .plan(std::slice::from_ref(&legacy), &[roster_entry(Some("1"), "John", "Smith", "Ottawa Centre")]);
        assert!(departures(&batch).is_empty());
    }

    #[test]
    fn entries_without_person_id_are_dropped() {
        let batch = RosterReconciler::new(None).plan(&[], &[roster_entry(None, "John", "Smith", "Ottawa Centre")]);
        assert!(batch.records.is_empty());
        assert_eq!(batch.dropped, vec!["John Smith".to_string()]);
    }
}
