use std::collections::HashMap;

use tracing::{debug, warn};
use uuid::Uuid;

use parlwatch_common::{CanonicalEntity, MemberRef};

use crate::normalize::name_key;

/// Outcome of resolving one feed reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ByExternalId(Uuid),
    /// Matched on `"first last"`. `id_drift` is set when the feed also carried
    /// an external id that the store does not know.
    ByName { id: Uuid, id_drift: bool },
    Unresolved,
}

impl Resolution {
    pub fn id(&self) -> Option<Uuid> {
        match self {
            Resolution::ByExternalId(id) | Resolution::ByName { id, .. } => Some(*id),
            Resolution::Unresolved => None,
        }
    }
}

/// Lookup tables built once per run from every canonical member, active or past.
#[derive(Debug, Default)]
pub struct EntityIndex {
    by_external_id: HashMap<String, Uuid>,
    by_name: HashMap<String, Uuid>,
}

impl EntityIndex {
    /// Build from entities in store order. On duplicate names the first entity wins.
    pub fn build(entities: &[CanonicalEntity]) -> Self {
        let mut index = Self::default();
        for entity in entities {
            if let Some(ext) = entity.external_id.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                index.by_external_id.entry(ext.to_string()).or_insert(entity.id);
            }
            index
                .by_name
                .entry(name_key(&entity.first_name, &entity.last_name))
                .or_insert(entity.id);
        }
        debug!(
            external_ids = index.by_external_id.len(),
            names = index.by_name.len(),
            "Built entity index"
        );
        index
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Resolve a reference: external id first, then full name, never invented.
    pub fn resolve(&self, member: &MemberRef) -> Resolution {
        let external_id = member
            .external_id
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty());

        if let Some(ext) = external_id {
            if let Some(id) = self.by_external_id.get(ext) {
                return Resolution::ByExternalId(*id);
            }
        }

        let (Some(first), Some(last)) = (member.first_name.as_deref(), member.last_name.as_deref())
        else {
            return Resolution::Unresolved;
        };
        if first.trim().is_empty() || last.trim().is_empty() {
            return Resolution::Unresolved;
        }

        match self.by_name.get(&name_key(first, last)) {
            Some(id) => {
                let id_drift = external_id.is_some();
                if let Some(ext) = external_id {
                    warn!(
                        external_id = ext,
                        name = %format!("{first} {last}"),
                        internal_id = %id,
                        "External id not in store, resolved by name instead"
                    );
                }
                Resolution::ByName { id: *id, id_drift }
            }
            None => Resolution::Unresolved,
        }
    }

    /// Resolve a reference a record cannot exist without. Logs and returns
    /// `None` so the caller drops the record.
    pub fn resolve_required(&self, member: &MemberRef, context: &str) -> Option<Uuid> {
        let id = self.resolve(member).id();
        if id.is_none() {
            warn!(member = %member.describe(), context, "Unresolved member reference, dropping record");
        }
        id
    }

    /// Resolve a reference the record can live without; unresolved leaves it unset.
    pub fn resolve_optional(&self, member: Option<&MemberRef>, context: &str) -> Option<Uuid> {
        let member = member?;
        let id = self.resolve(member).id();
        if id.is_none() {
            debug!(member = %member.describe(), context, "Optional member reference unresolved");
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::entity;

    fn member(id: Option<&str>, first: &str, last: &str) -> MemberRef {
        MemberRef {
            external_id: id.map(String::from),
            first_name: Some(first.into()),
            last_name: Some(last.into()),
        }
    }

    #[test]
    fn external_id_match_skips_name_lookup() {
        let smith = entity(Some("123"), "John", "Smith", "Ottawa Centre");
        let index = EntityIndex::build(&[smith.clone()]);

        let resolution = index.resolve(&member(Some("123"), "John", "Smith"));
        assert_eq!(resolution, Resolution::ByExternalId(smith.id));
    }

    #[test]
    fn external_id_is_never_overridden_by_name() {
        let by_id = entity(Some("123"), "Jane", "Doe", "Halifax");
        let by_name = entity(Some("999"), "John", "Smith", "Ottawa Centre");
        let index = EntityIndex::build(&[by_id.clone(), by_name]);

        // Name points at someone else, id wins.
        let resolution = index.resolve(&member(Some("123"), "John", "Smith"));
        assert_eq!(resolution, Resolution::ByExternalId(by_id.id));
    }

    #[test]
    fn unknown_external_id_falls_back_to_name_with_drift() {
        let smith = entity(Some("555"), "John", "Smith", "Ottawa Centre");
        let index = EntityIndex::build(&[smith.clone()]);

        let resolution = index.resolve(&member(Some("123"), "John", "Smith"));
        assert_eq!(resolution, Resolution::ByName { id: smith.id, id_drift: true });
    }

    #[test]
    fn name_only_reference_has_no_drift() {
        let smith = entity(None, "John", "Smith", "Ottawa Centre");
        let index = EntityIndex::build(&[smith.clone()]);

        let resolution = index.resolve(&MemberRef::by_name("JOHN", "smith"));
        assert_eq!(resolution, Resolution::ByName { id: smith.id, id_drift: false });
    }

    #[test]
    fn unknown_id_and_name_is_unresolved() {
        let index = EntityIndex::build(&[entity(Some("555"), "Jane", "Doe", "Halifax")]);
        let reference = member(Some("123"), "John", "Smith");

        assert_eq!(index.resolve(&reference), Resolution::Unresolved);
        assert_eq!(index.resolve_required(&reference, "vote"), None);
    }

    #[test]
    fn missing_name_parts_are_unresolved() {
        let index = EntityIndex::build(&[entity(None, "John", "Smith", "Ottawa Centre")]);
        let reference = MemberRef {
            external_id: None,
            first_name: Some("John".into()),
            last_name: None,
        };
        assert_eq!(index.resolve(&reference), Resolution::Unresolved);
    }

    #[test]
    fn optional_reference_absent_is_none() {
        let index = EntityIndex::build(&[]);
        assert_eq!(index.resolve_optional(None, "bill sponsor"), None);
    }

    #[test]
    fn duplicate_names_resolve_to_first_in_store_order() {
        let first = entity(None, "John", "Smith", "Ottawa Centre");
        let second = entity(None, "John", "Smith", "Calgary Centre");
        let index = EntityIndex::build(&[first.clone(), second]);

        for _ in 0..3 {
            assert_eq!(index.resolve(&MemberRef::by_name("John", "Smith")).id(), Some(first.id));
        }
    }

    #[test]
    fn past_members_still_resolve() {
        let mut departed = entity(Some("42"), "Old", "Timer", "Somewhere");
        departed.is_active = false;
        departed.status = parlwatch_common::EntityStatus::Past;
        let index = EntityIndex::build(&[departed.clone()]);

        assert_eq!(index.resolve(&member(Some("42"), "Old", "Timer")).id(), Some(departed.id));
    }
}
