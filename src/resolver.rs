// 🧭 Temporal Entity Resolver
//
// "What was this facility called, and who governed it, on date X?"
//
// Two independent tracks:
//   facility → identity at X
//   facility identity → affiliation at X → unit → unit identity (at the
//   affiliation's start, or at X)
// Misses are None. Overlaps are tolerated: latest effective_from wins.

use chrono::NaiveDate;
use log::debug;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::access::{Group, GroupId, Principal};
use crate::catalog::Postmark;
use crate::entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, FacilityId, FacilityIdentityId,
    JurisdictionalAffiliation, PostalFacility, PostalFacilityIdentity, UnitId,
};
use crate::error::{StoreError, StoreResult};
use crate::store::TemporalStore;
use crate::temporal::{all_at, select_at, select_current, sort_timeline, today};

/// A resolved affiliation with its unit, named at some date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Jurisdiction {
    pub affiliation: JurisdictionalAffiliation,
    pub unit: AdministrativeUnit,
    /// None when the unit has no identity covering the naming date
    pub unit_identity: Option<AdministrativeUnitIdentity>,
}

/// Facility identity and jurisdiction resolved at the same date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FacilityAtDate {
    pub date: NaiveDate,
    pub facility: PostalFacility,
    pub identity: PostalFacilityIdentity,
    pub jurisdiction: Option<Jurisdiction>,
}

/// How the governing unit is named.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingMode {
    /// Unit identity at the affiliation's own effective_from
    AtAffiliationStart,
    /// Unit identity at the caller's target date
    AsOfTarget,
}

impl NamingMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "affiliation" | "affiliation-start" => Some(NamingMode::AtAffiliationStart),
            "as-of" | "as_of" | "target" => Some(NamingMode::AsOfTarget),
            _ => None,
        }
    }
}

pub struct TemporalResolver<'a, S: TemporalStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: TemporalStore + ?Sized> TemporalResolver<'a, S> {
    pub fn new(store: &'a S) -> Self {
        TemporalResolver { store }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    // ========================================================================
    // FACILITY IDENTITIES
    // ========================================================================

    /// Identity whose [from, to) contains `date`.
    pub fn facility_identity_at(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
    ) -> StoreResult<Option<PostalFacilityIdentity>> {
        let identities = self.store.facility_identities(facility_id)?;
        let context = format!("facility:{}", facility_id);
        let found = select_at(&identities, date, &context).cloned();
        debug!(
            "event=identity_resolved module=resolver facility={} date={} found={}",
            facility_id,
            date,
            found.is_some()
        );
        Ok(found)
    }

    /// Open-ended identity.
    pub fn current_facility_identity(
        &self,
        facility_id: FacilityId,
    ) -> StoreResult<Option<PostalFacilityIdentity>> {
        let identities = self.store.facility_identities(facility_id)?;
        let context = format!("facility:{}", facility_id);
        Ok(select_current(&identities, &context).cloned())
    }

    /// Every identity, oldest first.
    pub fn facility_timeline(&self, facility_id: FacilityId) -> StoreResult<Vec<PostalFacilityIdentity>> {
        let mut identities = self.store.facility_identities(facility_id)?;
        sort_timeline(&mut identities);
        Ok(identities)
    }

    // ========================================================================
    // UNIT IDENTITIES
    // ========================================================================

    pub fn unit_identity_at(
        &self,
        unit_id: UnitId,
        date: NaiveDate,
    ) -> StoreResult<Option<AdministrativeUnitIdentity>> {
        let identities = self.store.unit_identities(unit_id)?;
        let context = format!("unit:{}", unit_id);
        Ok(select_at(&identities, date, &context).cloned())
    }

    pub fn current_unit_identity(&self, unit_id: UnitId) -> StoreResult<Option<AdministrativeUnitIdentity>> {
        let identities = self.store.unit_identities(unit_id)?;
        let context = format!("unit:{}", unit_id);
        Ok(select_current(&identities, &context).cloned())
    }

    pub fn unit_timeline(&self, unit_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        let mut identities = self.store.unit_identities(unit_id)?;
        sort_timeline(&mut identities);
        Ok(identities)
    }

    /// The parent's identity as it stood when `identity` began.
    pub fn parent_identity_at_this_time(
        &self,
        identity: &AdministrativeUnitIdentity,
    ) -> StoreResult<Option<AdministrativeUnitIdentity>> {
        match identity.parent_unit_id {
            Some(parent_id) => self.unit_identity_at(parent_id, identity.interval.effective_from),
            None => Ok(None),
        }
    }

    // ========================================================================
    // JURISDICTION
    // ========================================================================

    /// Affiliation of `identity_id` in force at `date`, after tie-break.
    pub fn affiliation_at(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
    ) -> StoreResult<Option<JurisdictionalAffiliation>> {
        let affiliations = self.store.affiliations_for_identity(identity_id)?;
        let context = format!("facility_identity:{}", identity_id);
        Ok(select_at(&affiliations, date, &context).cloned())
    }

    /// Every affiliation in force at `date`, no tie-break.
    pub fn affiliations_in_force(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
    ) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        let affiliations = self.store.affiliations_for_identity(identity_id)?;
        Ok(all_at(&affiliations, date).into_iter().cloned().collect())
    }

    /// Governing unit at `date`, named as it was when the affiliation began.
    pub fn jurisdiction_at_affiliation_start(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
    ) -> StoreResult<Option<Jurisdiction>> {
        self.jurisdiction(identity_id, date, NamingMode::AtAffiliationStart)
    }

    /// Governing unit at `date`, named as it was at `date`.
    pub fn jurisdiction_as_of(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
    ) -> StoreResult<Option<Jurisdiction>> {
        self.jurisdiction(identity_id, date, NamingMode::AsOfTarget)
    }

    pub fn jurisdiction(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
        mode: NamingMode,
    ) -> StoreResult<Option<Jurisdiction>> {
        let affiliation = match self.affiliation_at(identity_id, date)? {
            Some(affiliation) => affiliation,
            None => return Ok(None),
        };
        let unit = self.affiliated_unit(&affiliation)?;
        let naming_date = match mode {
            NamingMode::AtAffiliationStart => affiliation.interval.effective_from,
            NamingMode::AsOfTarget => date,
        };
        let unit_identity = self.unit_identity_at(unit.id, naming_date)?;
        Ok(Some(Jurisdiction {
            affiliation,
            unit,
            unit_identity,
        }))
    }

    /// Resolve a facility's identity at `date`, then that identity's
    /// jurisdiction at the same date.
    pub fn facility_at(
        &self,
        facility_id: FacilityId,
        date: NaiveDate,
        mode: NamingMode,
    ) -> StoreResult<Option<FacilityAtDate>> {
        let facility = match self.store.facility(facility_id)? {
            Some(facility) => facility,
            None => return Ok(None),
        };
        let identity = match self.facility_identity_at(facility_id, date)? {
            Some(identity) => identity,
            None => return Ok(None),
        };
        let jurisdiction = self.jurisdiction(identity.id, date, mode)?;
        Ok(Some(FacilityAtDate {
            date,
            facility,
            identity,
            jurisdiction,
        }))
    }

    fn affiliated_unit(&self, affiliation: &JurisdictionalAffiliation) -> StoreResult<AdministrativeUnit> {
        self.store
            .unit(affiliation.unit_id)?
            .ok_or_else(|| StoreError::InvalidData {
                table: "jurisdictional_affiliations",
                reason: format!(
                    "affiliation {} points at missing unit {}",
                    affiliation.id, affiliation.unit_id
                ),
            })
    }

    // ========================================================================
    // RESPONSIBLE GROUPS
    // ========================================================================

    /// Groups entitled to modify records of `identity_id` at `date`.
    ///
    /// Every affiliation in force counts. Result is deduplicated and may be
    /// empty.
    pub fn responsible_groups_at(
        &self,
        identity_id: FacilityIdentityId,
        date: NaiveDate,
    ) -> StoreResult<Vec<Group>> {
        let unit_ids: BTreeSet<UnitId> = self
            .affiliations_in_force(identity_id, date)?
            .into_iter()
            .map(|a| a.unit_id)
            .collect();

        let mut group_ids = BTreeSet::new();
        for unit_id in unit_ids {
            for responsibility in self.store.responsibilities_for_unit(unit_id)? {
                if responsibility.is_active {
                    group_ids.insert(responsibility.group_id);
                }
            }
        }
        self.groups(group_ids)
    }

    /// Responsible groups for a postmark as of today.
    pub fn postmark_responsible_groups(&self, postmark: &Postmark) -> StoreResult<Vec<Group>> {
        self.responsible_groups_at(postmark.facility_identity_id, today())
    }

    /// Groups with an active responsibility for `unit_id`.
    pub fn unit_responsible_groups(&self, unit_id: UnitId) -> StoreResult<Vec<Group>> {
        let group_ids: BTreeSet<GroupId> = self
            .store
            .responsibilities_for_unit(unit_id)?
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| r.group_id)
            .collect();
        self.groups(group_ids)
    }

    fn groups(&self, group_ids: BTreeSet<GroupId>) -> StoreResult<Vec<Group>> {
        let mut groups = Vec::with_capacity(group_ids.len());
        for id in group_ids {
            match self.store.group(id)? {
                Some(group) => groups.push(group),
                None => {
                    return Err(StoreError::InvalidData {
                        table: "unit_responsibilities",
                        reason: format!("responsibility points at missing group {}", id),
                    })
                }
            }
        }
        Ok(groups)
    }

    // ========================================================================
    // REVERSE LOOKUPS
    // ========================================================================

    /// Units with an open-ended identity parented by `unit_id`.
    pub fn child_units(&self, unit_id: UnitId) -> StoreResult<Vec<AdministrativeUnit>> {
        let child_ids: BTreeSet<UnitId> = self
            .store
            .child_unit_identities(unit_id)?
            .into_iter()
            .filter(|i| i.interval.is_current())
            .map(|i| i.unit_id)
            .collect();
        self.units(child_ids)
    }

    /// Facilities with an open-ended affiliation to `unit_id`.
    pub fn facilities_in_unit(&self, unit_id: UnitId) -> StoreResult<Vec<PostalFacility>> {
        let mut facilities: BTreeMap<FacilityId, PostalFacility> = BTreeMap::new();
        for affiliation in self.store.affiliations_for_unit(unit_id)? {
            if !affiliation.interval.is_current() {
                continue;
            }
            let identity = match self.store.facility_identity(affiliation.facility_identity_id)? {
                Some(identity) => identity,
                None => continue,
            };
            if facilities.contains_key(&identity.facility_id) {
                continue;
            }
            if let Some(facility) = self.store.facility(identity.facility_id)? {
                facilities.insert(facility.id, facility);
            }
        }
        Ok(facilities.into_values().collect())
    }

    /// Units the given groups hold an active responsibility for.
    pub fn units_for_groups(&self, group_ids: &[GroupId]) -> StoreResult<Vec<AdministrativeUnit>> {
        let unit_ids: BTreeSet<UnitId> = self
            .store
            .responsibilities_for_groups(group_ids)?
            .into_iter()
            .filter(|r| r.is_active)
            .map(|r| r.unit_id)
            .collect();
        self.units(unit_ids)
    }

    /// Postmarks struck under facility identities currently affiliated with a
    /// unit the principal's groups are responsible for.
    pub fn postmarks_in_region(&self, principal: &Principal) -> StoreResult<Vec<Postmark>> {
        let group_ids: Vec<GroupId> = principal.groups.iter().copied().collect();
        let mut identity_ids = BTreeSet::new();
        for unit in self.units_for_groups(&group_ids)? {
            for affiliation in self.store.affiliations_for_unit(unit.id)? {
                if affiliation.interval.is_current() {
                    identity_ids.insert(affiliation.facility_identity_id);
                }
            }
        }
        let identity_ids: Vec<FacilityIdentityId> = identity_ids.into_iter().collect();
        self.store.postmarks_for_identities(&identity_ids)
    }

    /// Postmarks across every identity of a facility.
    pub fn postmarks_for_facility(&self, facility_id: FacilityId) -> StoreResult<Vec<Postmark>> {
        let identity_ids: Vec<FacilityIdentityId> = self
            .store
            .facility_identities(facility_id)?
            .into_iter()
            .map(|i| i.id)
            .collect();
        self.store.postmarks_for_identities(&identity_ids)
    }

    /// Facility identities affiliated at `date` with any unit that has (or
    /// had) an identity matching `query` by abbreviation or name.
    pub fn identities_governed_by(
        &self,
        query: &str,
        date: NaiveDate,
    ) -> StoreResult<HashSet<FacilityIdentityId>> {
        let unit_ids: BTreeSet<UnitId> = self
            .store
            .all_unit_identities()?
            .into_iter()
            .filter(|i| i.matches(query))
            .map(|i| i.unit_id)
            .collect();

        let mut identity_ids = HashSet::new();
        for unit_id in unit_ids {
            for affiliation in self.store.affiliations_for_unit(unit_id)? {
                if affiliation.interval.contains(date) {
                    identity_ids.insert(affiliation.facility_identity_id);
                }
            }
        }
        Ok(identity_ids)
    }

    fn units(&self, unit_ids: BTreeSet<UnitId>) -> StoreResult<Vec<AdministrativeUnit>> {
        let mut units = Vec::with_capacity(unit_ids.len());
        for id in unit_ids {
            if let Some(unit) = self.store.unit(id)? {
                units.push(unit);
            }
        }
        Ok(units)
    }
}
