// 🗄️ Storage capability
//
// The resolver only needs "give me the rows of X" queries. SqliteStore (db.rs)
// answers them from disk, MemoryStore from append-only vectors.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::access::{Group, GroupId};
use crate::catalog::{Postmark, PostmarkId};
use crate::entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, AffiliationId, FacilityId,
    FacilityIdentityId, JurisdictionalAffiliation, PostalFacility, PostalFacilityIdentity,
    ResponsibilityId, UnitId, UnitIdentityId, UnitResponsibility,
};
use crate::error::{StoreError, StoreResult};

/// Read queries the temporal resolver runs against persistence.
///
/// Collections come back unordered; ordering and tie-breaks are the
/// resolver's job.
pub trait TemporalStore {
    fn facility(&self, id: FacilityId) -> StoreResult<Option<PostalFacility>>;
    fn facility_by_reference(&self, reference_code: &str) -> StoreResult<Option<PostalFacility>>;
    fn facility_identities(&self, facility_id: FacilityId) -> StoreResult<Vec<PostalFacilityIdentity>>;
    fn facility_identity(&self, id: FacilityIdentityId) -> StoreResult<Option<PostalFacilityIdentity>>;

    fn unit(&self, id: UnitId) -> StoreResult<Option<AdministrativeUnit>>;
    fn unit_by_reference(&self, reference_code: &str) -> StoreResult<Option<AdministrativeUnit>>;
    fn unit_identities(&self, unit_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>>;
    /// Identities (any period) whose parent is `parent_id`
    fn child_unit_identities(&self, parent_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>>;
    fn all_unit_identities(&self) -> StoreResult<Vec<AdministrativeUnitIdentity>>;

    fn affiliations_for_identity(
        &self,
        identity_id: FacilityIdentityId,
    ) -> StoreResult<Vec<JurisdictionalAffiliation>>;
    fn affiliations_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<JurisdictionalAffiliation>>;

    fn responsibilities_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<UnitResponsibility>>;
    fn responsibilities_for_groups(&self, group_ids: &[GroupId]) -> StoreResult<Vec<UnitResponsibility>>;
    fn group(&self, id: GroupId) -> StoreResult<Option<Group>>;

    fn postmark(&self, id: PostmarkId) -> StoreResult<Option<Postmark>>;
    fn postmarks_for_identities(&self, identity_ids: &[FacilityIdentityId]) -> StoreResult<Vec<Postmark>>;
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// Append-only in-memory store.
///
/// Ids are assigned on insert (max + 1) unless the record already carries
/// one, so fixtures can pin ids to exercise tie-breaks.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    facilities: Arc<RwLock<Vec<PostalFacility>>>,
    facility_identities: Arc<RwLock<Vec<PostalFacilityIdentity>>>,
    units: Arc<RwLock<Vec<AdministrativeUnit>>>,
    unit_identities: Arc<RwLock<Vec<AdministrativeUnitIdentity>>>,
    affiliations: Arc<RwLock<Vec<JurisdictionalAffiliation>>>,
    responsibilities: Arc<RwLock<Vec<UnitResponsibility>>>,
    groups: Arc<RwLock<Vec<Group>>>,
    postmarks: Arc<RwLock<Vec<Postmark>>>,
}

fn read<T>(table: &RwLock<Vec<T>>) -> StoreResult<RwLockReadGuard<'_, Vec<T>>> {
    table.read().map_err(|_| StoreError::LockPoisoned)
}

fn write<T>(table: &RwLock<Vec<T>>) -> StoreResult<RwLockWriteGuard<'_, Vec<T>>> {
    table.write().map_err(|_| StoreError::LockPoisoned)
}

/// Push `record`, giving it the next id if it has none yet.
fn append<T>(
    table: &RwLock<Vec<T>>,
    mut record: T,
    id_of: fn(&T) -> i64,
    set_id: fn(&mut T, i64),
) -> StoreResult<i64> {
    let mut rows = write(table)?;
    let mut id = id_of(&record);
    if id == 0 {
        id = rows.iter().map(id_of).max().unwrap_or(0) + 1;
        set_id(&mut record, id);
    }
    rows.push(record);
    Ok(id)
}

fn filtered<T: Clone>(table: &RwLock<Vec<T>>, keep: impl Fn(&T) -> bool) -> StoreResult<Vec<T>> {
    Ok(read(table)?.iter().filter(|r| keep(r)).cloned().collect())
}

fn first<T: Clone>(table: &RwLock<Vec<T>>, keep: impl Fn(&T) -> bool) -> StoreResult<Option<T>> {
    Ok(read(table)?.iter().find(|r| keep(r)).cloned())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_facility(&self, facility: PostalFacility) -> StoreResult<FacilityId> {
        append(&self.facilities, facility, |r| r.id.get(), |r, id| r.id = FacilityId(id)).map(FacilityId)
    }

    pub fn insert_facility_identity(
        &self,
        identity: PostalFacilityIdentity,
    ) -> StoreResult<FacilityIdentityId> {
        append(
            &self.facility_identities,
            identity,
            |r| r.id.get(),
            |r, id| r.id = FacilityIdentityId(id),
        )
        .map(FacilityIdentityId)
    }

    pub fn insert_unit(&self, unit: AdministrativeUnit) -> StoreResult<UnitId> {
        append(&self.units, unit, |r| r.id.get(), |r, id| r.id = UnitId(id)).map(UnitId)
    }

    pub fn insert_unit_identity(
        &self,
        identity: AdministrativeUnitIdentity,
    ) -> StoreResult<UnitIdentityId> {
        append(
            &self.unit_identities,
            identity,
            |r| r.id.get(),
            |r, id| r.id = UnitIdentityId(id),
        )
        .map(UnitIdentityId)
    }

    pub fn insert_affiliation(
        &self,
        affiliation: JurisdictionalAffiliation,
    ) -> StoreResult<AffiliationId> {
        append(
            &self.affiliations,
            affiliation,
            |r| r.id.get(),
            |r, id| r.id = AffiliationId(id),
        )
        .map(AffiliationId)
    }

    pub fn insert_responsibility(
        &self,
        responsibility: UnitResponsibility,
    ) -> StoreResult<ResponsibilityId> {
        append(
            &self.responsibilities,
            responsibility,
            |r| r.id.get(),
            |r, id| r.id = ResponsibilityId(id),
        )
        .map(ResponsibilityId)
    }

    pub fn insert_group(&self, group: Group) -> StoreResult<GroupId> {
        append(&self.groups, group, |r| r.id.get(), |r, id| r.id = GroupId(id)).map(GroupId)
    }

    pub fn insert_postmark(&self, postmark: Postmark) -> StoreResult<PostmarkId> {
        append(&self.postmarks, postmark, |r| r.id.get(), |r, id| r.id = PostmarkId(id)).map(PostmarkId)
    }
}

impl TemporalStore for MemoryStore {
    fn facility(&self, id: FacilityId) -> StoreResult<Option<PostalFacility>> {
        first(&self.facilities, |f| f.id == id)
    }

    fn facility_by_reference(&self, reference_code: &str) -> StoreResult<Option<PostalFacility>> {
        first(&self.facilities, |f| f.reference_code == reference_code)
    }

    fn facility_identities(&self, facility_id: FacilityId) -> StoreResult<Vec<PostalFacilityIdentity>> {
        filtered(&self.facility_identities, |i| i.facility_id == facility_id)
    }

    fn facility_identity(&self, id: FacilityIdentityId) -> StoreResult<Option<PostalFacilityIdentity>> {
        first(&self.facility_identities, |i| i.id == id)
    }

    fn unit(&self, id: UnitId) -> StoreResult<Option<AdministrativeUnit>> {
        first(&self.units, |u| u.id == id)
    }

    fn unit_by_reference(&self, reference_code: &str) -> StoreResult<Option<AdministrativeUnit>> {
        first(&self.units, |u| u.reference_code == reference_code)
    }

    fn unit_identities(&self, unit_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        filtered(&self.unit_identities, |i| i.unit_id == unit_id)
    }

    fn child_unit_identities(&self, parent_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        filtered(&self.unit_identities, |i| i.parent_unit_id == Some(parent_id))
    }

    fn all_unit_identities(&self) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        filtered(&self.unit_identities, |_| true)
    }

    fn affiliations_for_identity(
        &self,
        identity_id: FacilityIdentityId,
    ) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        filtered(&self.affiliations, |a| a.facility_identity_id == identity_id)
    }

    fn affiliations_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        filtered(&self.affiliations, |a| a.unit_id == unit_id)
    }

    fn responsibilities_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<UnitResponsibility>> {
        filtered(&self.responsibilities, |r| r.unit_id == unit_id)
    }

    fn responsibilities_for_groups(&self, group_ids: &[GroupId]) -> StoreResult<Vec<UnitResponsibility>> {
        filtered(&self.responsibilities, |r| group_ids.contains(&r.group_id))
    }

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        first(&self.groups, |g| g.id == id)
    }

    fn postmark(&self, id: PostmarkId) -> StoreResult<Option<Postmark>> {
        first(&self.postmarks, |p| p.id == id)
    }

    fn postmarks_for_identities(&self, identity_ids: &[FacilityIdentityId]) -> StoreResult<Vec<Postmark>> {
        filtered(&self.postmarks, |p| identity_ids.contains(&p.facility_identity_id))
    }
}
