// ✍️ Audited writes
//
// Every mutating operation takes the acting principal explicitly, runs in
// one SQLite transaction, stamps the record and appends a history snapshot
// for its kind. Reads go through the resolver instead.
//
// Identity and affiliation writes reject overlapping windows (and therefore
// a second open-ended row). Bulk import bypasses this layer.

use chrono::NaiveDate;
use log::info;
use rusqlite::{Connection, ErrorCode};
use serde::Serialize;

use crate::access::{authorize, authorize_regional, Action, GroupId, Principal};
use crate::audit::{AuditStamp, HistoryAction, HistoryEvent, VersionedKind};
use crate::catalog::{
    Color, ColorId, FileStorage, ImageUpload, LookupEntry, LookupKind, Postcover, PostcoverId,
    PostcoverImage, PostcoverImageView, PostcoverPostmark, Postmark, PostmarkColor,
    PostmarkDatesSeen, PostmarkId, PostmarkImage, PostmarkImageView, PostmarkLocation,
    PostmarkPublication, PostmarkSize, PostmarkStyle, PostmarkValuation, PublicationId,
    PublicationReference, RateLocation,
};
use crate::db::{insert_history_event, SqliteStore};
use crate::entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, AffiliationId, FacilityId, FacilityIdentityId,
    JurisdictionalAffiliation, PostalFacility, PostalFacilityIdentity, UnitId, UnitIdentityId,
    UnitResponsibility,
};
use crate::error::{CatalogError, CatalogResult, StoreError};
use crate::resolver::TemporalResolver;
use crate::store::TemporalStore;
use crate::temporal::{find_collision, select_current, EffectiveInterval, Temporal};

/// Append one history snapshot through the store's connection.
fn record_history<T: Serialize>(
    store: &SqliteStore<'_>,
    action: HistoryAction,
    kind: VersionedKind,
    entity_id: i64,
    record: &T,
    actor: &Principal,
) -> CatalogResult<()> {
    let event = HistoryEvent::new(action, kind, entity_id, record, actor).map_err(StoreError::from)?;
    insert_history_event(store.connection(), &event)?;
    Ok(())
}

/// Turn UNIQUE / FOREIGN KEY failures into integrity errors.
fn constraint<T>(result: Result<T, StoreError>, what: &str) -> CatalogResult<T> {
    result.map_err(|err| {
        if let StoreError::Sqlite(rusqlite::Error::SqliteFailure(code, message)) = &err {
            if code.code == ErrorCode::ConstraintViolation {
                return CatalogError::Integrity(format!(
                    "{}: {}",
                    what,
                    message.as_deref().unwrap_or("constraint violated")
                ));
            }
        }
        CatalogError::Store(err)
    })
}

fn reject_collision<T: Temporal>(
    existing: &[T],
    candidate: &EffectiveInterval,
    what: &str,
) -> CatalogResult<()> {
    if candidate.is_current() && existing.iter().any(|r| r.interval().is_current()) {
        return Err(CatalogError::Integrity(format!(
            "{} already has an open-ended record",
            what
        )));
    }
    if let Some(clash) = find_collision(existing, candidate) {
        return Err(CatalogError::Integrity(format!(
            "{} window {} overlaps existing record {} ({})",
            what,
            candidate,
            clash.record_id(),
            clash.interval()
        )));
    }
    Ok(())
}

/// New window for a closed record, validated against its start.
fn closed_interval(interval: &EffectiveInterval, effective_to: NaiveDate) -> CatalogResult<EffectiveInterval> {
    if !interval.is_current() {
        return Err(CatalogError::Integrity(format!(
            "record is already closed ({})",
            interval
        )));
    }
    EffectiveInterval::new(interval.effective_from, Some(effective_to))
}

pub struct CatalogService<'conn> {
    conn: &'conn Connection,
}

impl<'conn> CatalogService<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        CatalogService { conn }
    }

    /// Run `op` in a transaction, committing only on success.
    fn write<T>(&self, op: impl FnOnce(&SqliteStore<'_>) -> CatalogResult<T>) -> CatalogResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let out = op(&SqliteStore::new(&tx))?;
        tx.commit()?;
        Ok(out)
    }

    // ========================================================================
    // POSTAL FACILITIES
    // ========================================================================

    pub fn create_facility(
        &self,
        actor: &Principal,
        reference_code: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
    ) -> CatalogResult<PostalFacility> {
        authorize(actor, Action::Modify)?;
        let mut facility = PostalFacility::new(reference_code, latitude, longitude, AuditStamp::created_by(actor))?;
        self.write(|store| {
            if store.facility_by_reference(&facility.reference_code)?.is_some() {
                return Err(CatalogError::Integrity(format!(
                    "reference_code '{}' already exists",
                    facility.reference_code
                )));
            }
            facility.id = store.insert_facility(&facility)?;
            record_history(store, HistoryAction::Created, VersionedKind::PostalFacility, facility.id.get(), &facility, actor)
        })?;
        info!(
            "event=facility_created module=service id={} reference={} actor={}",
            facility.id, facility.reference_code, actor.username
        );
        Ok(facility)
    }

    /// Add an identity slice; its window must not touch any existing one.
    pub fn add_facility_identity(
        &self,
        actor: &Principal,
        mut identity: PostalFacilityIdentity,
    ) -> CatalogResult<PostalFacilityIdentity> {
        authorize(actor, Action::Modify)?;
        identity.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            if store.facility(identity.facility_id)?.is_none() {
                return Err(CatalogError::not_found("Postal facility", identity.facility_id));
            }
            let existing = store.facility_identities(identity.facility_id)?;
            let what = format!("facility {}", identity.facility_id);
            reject_collision(&existing, &identity.interval, &what)?;
            identity.id = store.insert_facility_identity(&identity)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::PostalFacilityIdentity,
                identity.id.get(),
                &identity,
                actor,
            )
        })?;
        info!(
            "event=facility_identity_added module=service id={} facility={} window=\"{}\"",
            identity.id, identity.facility_id, identity.interval
        );
        Ok(identity)
    }

    /// Close the current identity at `next.effective_from` and open `next`.
    pub fn supersede_facility_identity(
        &self,
        actor: &Principal,
        mut next: PostalFacilityIdentity,
    ) -> CatalogResult<PostalFacilityIdentity> {
        authorize(actor, Action::Modify)?;
        next.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            let existing = store.facility_identities(next.facility_id)?;
            let context = format!("facility:{}", next.facility_id);
            let mut current = select_current(&existing, &context)
                .cloned()
                .ok_or_else(|| CatalogError::Integrity(format!(
                    "facility {} has no current identity to supersede",
                    next.facility_id
                )))?;
            current.interval = closed_interval(&current.interval, next.interval.effective_from)?;
            current.audit.touch(actor);
            store.update_facility_identity(&current)?;
            record_history(
                store,
                HistoryAction::Closed,
                VersionedKind::PostalFacilityIdentity,
                current.id.get(),
                &current,
                actor,
            )?;

            let others: Vec<PostalFacilityIdentity> = existing
                .into_iter()
                .map(|i| if i.id == current.id { current.clone() } else { i })
                .collect();
            let what = format!("facility {}", next.facility_id);
            reject_collision(&others, &next.interval, &what)?;
            next.id = store.insert_facility_identity(&next)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::PostalFacilityIdentity,
                next.id.get(),
                &next,
                actor,
            )
        })?;
        info!(
            "event=facility_identity_superseded module=service facility={} new_identity={} from={}",
            next.facility_id, next.id, next.interval.effective_from
        );
        Ok(next)
    }

    pub fn close_facility_identity(
        &self,
        actor: &Principal,
        identity_id: FacilityIdentityId,
        effective_to: NaiveDate,
    ) -> CatalogResult<PostalFacilityIdentity> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let mut identity = store
                .facility_identity(identity_id)?
                .ok_or_else(|| CatalogError::not_found("Postal facility identity", identity_id))?;
            identity.interval = closed_interval(&identity.interval, effective_to)?;
            identity.audit.touch(actor);
            store.update_facility_identity(&identity)?;
            record_history(
                store,
                HistoryAction::Closed,
                VersionedKind::PostalFacilityIdentity,
                identity.id.get(),
                &identity,
                actor,
            )?;
            Ok(identity)
        })
    }

    /// Refused while identities still reference the facility.
    pub fn delete_facility(&self, actor: &Principal, facility_id: FacilityId) -> CatalogResult<()> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let facility = store
                .facility(facility_id)?
                .ok_or_else(|| CatalogError::not_found("Postal facility", facility_id))?;
            store.delete_facility(facility_id)?;
            record_history(store, HistoryAction::Deleted, VersionedKind::PostalFacility, facility_id.get(), &facility, actor)
        })
    }

    // ========================================================================
    // ADMINISTRATIVE UNITS
    // ========================================================================

    pub fn create_unit(&self, actor: &Principal, reference_code: &str) -> CatalogResult<AdministrativeUnit> {
        authorize(actor, Action::Modify)?;
        let mut unit = AdministrativeUnit::new(reference_code, AuditStamp::created_by(actor))?;
        self.write(|store| {
            if store.unit_by_reference(&unit.reference_code)?.is_some() {
                return Err(CatalogError::Integrity(format!(
                    "reference_code '{}' already exists",
                    unit.reference_code
                )));
            }
            unit.id = store.insert_unit(&unit)?;
            record_history(store, HistoryAction::Created, VersionedKind::AdministrativeUnit, unit.id.get(), &unit, actor)
        })?;
        info!(
            "event=unit_created module=service id={} reference={}",
            unit.id, unit.reference_code
        );
        Ok(unit)
    }

    pub fn add_unit_identity(
        &self,
        actor: &Principal,
        mut identity: AdministrativeUnitIdentity,
    ) -> CatalogResult<AdministrativeUnitIdentity> {
        authorize(actor, Action::Modify)?;
        identity.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            Self::check_unit_identity_refs(store, &identity)?;
            let existing = store.unit_identities(identity.unit_id)?;
            let what = format!("administrative unit {}", identity.unit_id);
            reject_collision(&existing, &identity.interval, &what)?;
            identity.id = store.insert_unit_identity(&identity)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::AdministrativeUnitIdentity,
                identity.id.get(),
                &identity,
                actor,
            )
        })?;
        info!(
            "event=unit_identity_added module=service id={} unit={} name=\"{}\"",
            identity.id, identity.unit_id, identity.unit_name
        );
        Ok(identity)
    }

    pub fn supersede_unit_identity(
        &self,
        actor: &Principal,
        mut next: AdministrativeUnitIdentity,
    ) -> CatalogResult<AdministrativeUnitIdentity> {
        authorize(actor, Action::Modify)?;
        next.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            Self::check_unit_identity_refs(store, &next)?;
            let existing = store.unit_identities(next.unit_id)?;
            let context = format!("unit:{}", next.unit_id);
            let mut current = select_current(&existing, &context)
                .cloned()
                .ok_or_else(|| CatalogError::Integrity(format!(
                    "administrative unit {} has no current identity to supersede",
                    next.unit_id
                )))?;
            current.interval = closed_interval(&current.interval, next.interval.effective_from)?;
            current.audit.touch(actor);
            store.update_unit_identity(&current)?;
            record_history(
                store,
                HistoryAction::Closed,
                VersionedKind::AdministrativeUnitIdentity,
                current.id.get(),
                &current,
                actor,
            )?;

            let others: Vec<AdministrativeUnitIdentity> = existing
                .into_iter()
                .map(|i| if i.id == current.id { current.clone() } else { i })
                .collect();
            let what = format!("administrative unit {}", next.unit_id);
            reject_collision(&others, &next.interval, &what)?;
            next.id = store.insert_unit_identity(&next)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::AdministrativeUnitIdentity,
                next.id.get(),
                &next,
                actor,
            )
        })?;
        info!(
            "event=unit_identity_superseded module=service unit={} new_identity={} reason={}",
            next.unit_id,
            next.id,
            next.change_reason.as_str()
        );
        Ok(next)
    }

    pub fn close_unit_identity(
        &self,
        actor: &Principal,
        identity_id: UnitIdentityId,
        effective_to: NaiveDate,
    ) -> CatalogResult<AdministrativeUnitIdentity> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let mut identity = store
                .unit_identity(identity_id)?
                .ok_or_else(|| CatalogError::not_found("Administrative unit identity", identity_id))?;
            identity.interval = closed_interval(&identity.interval, effective_to)?;
            identity.audit.touch(actor);
            store.update_unit_identity(&identity)?;
            record_history(
                store,
                HistoryAction::Closed,
                VersionedKind::AdministrativeUnitIdentity,
                identity.id.get(),
                &identity,
                actor,
            )?;
            Ok(identity)
        })
    }

    fn check_unit_identity_refs(store: &SqliteStore<'_>, identity: &AdministrativeUnitIdentity) -> CatalogResult<()> {
        if store.unit(identity.unit_id)?.is_none() {
            return Err(CatalogError::not_found("Administrative unit", identity.unit_id));
        }
        if let Some(parent_id) = identity.parent_unit_id {
            if parent_id == identity.unit_id {
                return Err(CatalogError::InvalidInput(
                    "an administrative unit cannot be its own parent".to_string(),
                ));
            }
            if store.unit(parent_id)?.is_none() {
                return Err(CatalogError::not_found("Parent administrative unit", parent_id));
            }
        }
        Ok(())
    }

    /// Refused while identities, child identities or affiliations reference the unit.
    pub fn delete_unit(&self, actor: &Principal, unit_id: UnitId) -> CatalogResult<()> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let unit = store
                .unit(unit_id)?
                .ok_or_else(|| CatalogError::not_found("Administrative unit", unit_id))?;
            store.delete_unit(unit_id)?;
            record_history(store, HistoryAction::Deleted, VersionedKind::AdministrativeUnit, unit_id.get(), &unit, actor)
        })
    }

    // ========================================================================
    // RESPONSIBILITIES
    // ========================================================================

    /// Make `group_id` responsible for `unit_id`, reactivating an old row.
    pub fn assign_responsibility(
        &self,
        actor: &Principal,
        unit_id: UnitId,
        group_id: GroupId,
        notes: &str,
    ) -> CatalogResult<UnitResponsibility> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            if store.unit(unit_id)?.is_none() {
                return Err(CatalogError::not_found("Administrative unit", unit_id));
            }
            if store.group(group_id)?.is_none() {
                return Err(CatalogError::not_found("Group", group_id));
            }
            let responsibility = match store.responsibility(unit_id, group_id)? {
                Some(mut existing) => {
                    existing.is_active = true;
                    existing.notes = notes.trim().to_string();
                    existing.audit.touch(actor);
                    store.update_responsibility(&existing)?;
                    record_history(
                        store,
                        HistoryAction::Updated,
                        VersionedKind::UnitResponsibility,
                        existing.id.get(),
                        &existing,
                        actor,
                    )?;
                    existing
                }
                None => {
                    let mut created = UnitResponsibility::new(unit_id, group_id, AuditStamp::created_by(actor));
                    created.notes = notes.trim().to_string();
                    created.id = store.insert_responsibility(&created)?;
                    record_history(
                        store,
                        HistoryAction::Created,
                        VersionedKind::UnitResponsibility,
                        created.id.get(),
                        &created,
                        actor,
                    )?;
                    created
                }
            };
            Ok(responsibility)
        })
    }

    pub fn deactivate_responsibility(
        &self,
        actor: &Principal,
        unit_id: UnitId,
        group_id: GroupId,
    ) -> CatalogResult<UnitResponsibility> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let mut responsibility = store
                .responsibility(unit_id, group_id)?
                .ok_or_else(|| CatalogError::not_found("Unit responsibility", format!("{}/{}", unit_id, group_id)))?;
            responsibility.is_active = false;
            responsibility.audit.touch(actor);
            store.update_responsibility(&responsibility)?;
            record_history(
                store,
                HistoryAction::Updated,
                VersionedKind::UnitResponsibility,
                responsibility.id.get(),
                &responsibility,
                actor,
            )?;
            Ok(responsibility)
        })
    }

    // ========================================================================
    // JURISDICTIONAL AFFILIATIONS
    // ========================================================================

    pub fn add_affiliation(
        &self,
        actor: &Principal,
        mut affiliation: JurisdictionalAffiliation,
    ) -> CatalogResult<JurisdictionalAffiliation> {
        authorize(actor, Action::Modify)?;
        affiliation.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            if store.facility_identity(affiliation.facility_identity_id)?.is_none() {
                return Err(CatalogError::not_found(
                    "Postal facility identity",
                    affiliation.facility_identity_id,
                ));
            }
            if store.unit(affiliation.unit_id)?.is_none() {
                return Err(CatalogError::not_found("Administrative unit", affiliation.unit_id));
            }
            let existing = store.affiliations_for_identity(affiliation.facility_identity_id)?;
            let what = format!("facility identity {} affiliation", affiliation.facility_identity_id);
            reject_collision(&existing, &affiliation.interval, &what)?;
            affiliation.id = store.insert_affiliation(&affiliation)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::JurisdictionalAffiliation,
                affiliation.id.get(),
                &affiliation,
                actor,
            )
        })?;
        info!(
            "event=affiliation_added module=service id={} identity={} unit={} window=\"{}\"",
            affiliation.id, affiliation.facility_identity_id, affiliation.unit_id, affiliation.interval
        );
        Ok(affiliation)
    }

    pub fn close_affiliation(
        &self,
        actor: &Principal,
        affiliation_id: AffiliationId,
        effective_to: NaiveDate,
    ) -> CatalogResult<JurisdictionalAffiliation> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let mut affiliation = store
                .affiliation(affiliation_id)?
                .ok_or_else(|| CatalogError::not_found("Jurisdictional affiliation", affiliation_id))?;
            affiliation.interval = closed_interval(&affiliation.interval, effective_to)?;
            affiliation.audit.touch(actor);
            store.update_affiliation(&affiliation)?;
            record_history(
                store,
                HistoryAction::Closed,
                VersionedKind::JurisdictionalAffiliation,
                affiliation.id.get(),
                &affiliation,
                actor,
            )?;
            Ok(affiliation)
        })
    }

    /// Removes the edge only; the unit is untouched.
    pub fn delete_affiliation(&self, actor: &Principal, affiliation_id: AffiliationId) -> CatalogResult<()> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            let affiliation = store
                .affiliation(affiliation_id)?
                .ok_or_else(|| CatalogError::not_found("Jurisdictional affiliation", affiliation_id))?;
            store.delete_affiliation(affiliation_id)?;
            record_history(
                store,
                HistoryAction::Deleted,
                VersionedKind::JurisdictionalAffiliation,
                affiliation_id.get(),
                &affiliation,
                actor,
            )
        })
    }

    // ========================================================================
    // LOOKUPS & COLORS
    // ========================================================================

    pub fn create_lookup(
        &self,
        actor: &Principal,
        kind: LookupKind,
        name: &str,
        description: &str,
    ) -> CatalogResult<LookupEntry> {
        authorize(actor, Action::Modify)?;
        let mut entry = LookupEntry::new(kind, name, description, AuditStamp::created_by(actor))?;
        self.write(|store| {
            entry.id = constraint(store.insert_lookup(&entry), kind.table())?;
            record_history(store, HistoryAction::Created, VersionedKind::Lookup, entry.id.get(), &entry, actor)
        })?;
        Ok(entry)
    }

    pub fn create_color(&self, actor: &Principal, color_name: &str, color_value: &str) -> CatalogResult<Color> {
        authorize(actor, Action::Modify)?;
        let mut color = Color::new(color_name, color_value, AuditStamp::created_by(actor))?;
        self.write(|store| {
            color.id = constraint(store.insert_color(&color), "colors")?;
            record_history(store, HistoryAction::Created, VersionedKind::Color, color.id.get(), &color, actor)
        })?;
        Ok(color)
    }

    // ========================================================================
    // POSTMARKS
    // ========================================================================

    fn check_postmark_refs(store: &SqliteStore<'_>, postmark: &Postmark) -> CatalogResult<()> {
        if store.facility_identity(postmark.facility_identity_id)?.is_none() {
            return Err(CatalogError::not_found(
                "Postal facility identity",
                postmark.facility_identity_id,
            ));
        }
        let style = postmark.style();
        let lookups = [
            (LookupKind::PostmarkShape, style.shape_id),
            (LookupKind::LetteringStyle, style.lettering_style_id),
            (LookupKind::FramingStyle, style.framing_style_id),
            (LookupKind::DateFormat, style.date_format_id),
        ];
        for (kind, id) in lookups {
            if !store.lookup_exists(kind, id)? {
                return Err(CatalogError::not_found(kind.table(), id));
            }
        }
        Ok(())
    }

    /// Load a postmark and apply the regional rule for `action`.
    fn regional_postmark(
        store: &SqliteStore<'_>,
        actor: &Principal,
        postmark_id: PostmarkId,
    ) -> CatalogResult<Postmark> {
        let postmark = store
            .postmark(postmark_id)?
            .ok_or_else(|| CatalogError::not_found("Postmark", postmark_id))?;
        let responsible = TemporalResolver::new(store).postmark_responsible_groups(&postmark)?;
        authorize_regional(actor, Action::Modify, &responsible)?;
        Ok(postmark)
    }

    pub fn create_postmark(
        &self,
        actor: &Principal,
        facility_identity_id: FacilityIdentityId,
        style: PostmarkStyle,
        postmark_key: &str,
        rate_location: RateLocation,
        rate_value: &str,
    ) -> CatalogResult<Postmark> {
        authorize(actor, Action::Modify)?;
        let mut postmark = Postmark::new(
            facility_identity_id,
            style,
            postmark_key,
            rate_location,
            rate_value,
            AuditStamp::created_by(actor),
        )?;
        self.write(|store| {
            Self::check_postmark_refs(store, &postmark)?;
            postmark.id = constraint(store.insert_postmark(&postmark), "postmarks")?;
            record_history(store, HistoryAction::Created, VersionedKind::Postmark, postmark.id.get(), &postmark, actor)
        })?;
        info!(
            "event=postmark_created module=service id={} key={} identity={}",
            postmark.id, postmark.postmark_key, postmark.facility_identity_id
        );
        Ok(postmark)
    }

    /// Rewrite a postmark's attributes. Requires regional responsibility.
    pub fn update_postmark(&self, actor: &Principal, mut postmark: Postmark) -> CatalogResult<Postmark> {
        self.write(|store| {
            let stored = Self::regional_postmark(store, actor, postmark.id)?;
            postmark.audit = stored.audit;
            postmark.audit.touch(actor);
            Self::check_postmark_refs(store, &postmark)?;
            constraint(store.update_postmark(&postmark), "postmarks")?;
            record_history(store, HistoryAction::Updated, VersionedKind::Postmark, postmark.id.get(), &postmark, actor)
        })?;
        Ok(postmark)
    }

    pub fn add_postmark_color(
        &self,
        actor: &Principal,
        postmark_id: PostmarkId,
        color_id: ColorId,
    ) -> CatalogResult<PostmarkColor> {
        self.write(|store| {
            Self::regional_postmark(store, actor, postmark_id)?;
            if store.color(color_id)?.is_none() {
                return Err(CatalogError::not_found("Color", color_id));
            }
            let mut link = PostmarkColor {
                id: 0,
                postmark_id,
                color_id,
                audit: AuditStamp::created_by(actor),
            };
            link.id = constraint(store.insert_postmark_color(&link), "postmark_colors")?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkDetail, link.id, &link, actor)?;
            Ok(link)
        })
    }

    pub fn add_dates_seen(
        &self,
        actor: &Principal,
        postmark_id: PostmarkId,
        earliest: NaiveDate,
        latest: NaiveDate,
    ) -> CatalogResult<PostmarkDatesSeen> {
        let mut dates = PostmarkDatesSeen::new(postmark_id, earliest, latest, AuditStamp::created_by(actor))?;
        self.write(|store| {
            Self::regional_postmark(store, actor, postmark_id)?;
            dates.id = store.insert_dates_seen(&dates)?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkDetail, dates.id, &dates, actor)
        })?;
        Ok(dates)
    }

    pub fn add_size(
        &self,
        actor: &Principal,
        postmark_id: PostmarkId,
        width: f64,
        height: f64,
        notes: &str,
    ) -> CatalogResult<PostmarkSize> {
        authorize(actor, Action::Modify)?;
        let mut size = PostmarkSize::new(postmark_id, width, height, notes, AuditStamp::created_by(actor))?;
        self.write(|store| {
            if store.postmark(postmark_id)?.is_none() {
                return Err(CatalogError::not_found("Postmark", postmark_id));
            }
            size.id = store.insert_size(&size)?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkDetail, size.id, &size, actor)
        })?;
        Ok(size)
    }

    /// The acting principal is recorded as the valuer.
    pub fn add_valuation(
        &self,
        actor: &Principal,
        postmark_id: PostmarkId,
        estimated_value: f64,
        valuation_date: NaiveDate,
    ) -> CatalogResult<PostmarkValuation> {
        authorize(actor, Action::Modify)?;
        let mut valuation = PostmarkValuation::new(
            postmark_id,
            actor.user_id,
            estimated_value,
            valuation_date,
            AuditStamp::created_by(actor),
        )?;
        self.write(|store| {
            if store.postmark(postmark_id)?.is_none() {
                return Err(CatalogError::not_found("Postmark", postmark_id));
            }
            valuation.id = store.insert_valuation(&valuation)?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkDetail, valuation.id, &valuation, actor)
        })?;
        Ok(valuation)
    }

    // ========================================================================
    // PUBLICATIONS
    // ========================================================================

    pub fn create_publication(
        &self,
        actor: &Principal,
        mut publication: PostmarkPublication,
    ) -> CatalogResult<PostmarkPublication> {
        authorize(actor, Action::Modify)?;
        publication.audit = AuditStamp::created_by(actor);
        self.write(|store| {
            publication.id = store.insert_publication(&publication)?;
            record_history(
                store,
                HistoryAction::Created,
                VersionedKind::Publication,
                publication.id.get(),
                &publication,
                actor,
            )
        })?;
        Ok(publication)
    }

    pub fn cite_postmark(
        &self,
        actor: &Principal,
        postmark_id: PostmarkId,
        publication_id: PublicationId,
        published_id: &str,
        reference_location: &str,
    ) -> CatalogResult<PublicationReference> {
        authorize(actor, Action::Modify)?;
        let published_id = published_id.trim();
        if published_id.is_empty() {
            return Err(CatalogError::InvalidInput("published_id cannot be empty".to_string()));
        }
        self.write(|store| {
            if store.postmark(postmark_id)?.is_none() {
                return Err(CatalogError::not_found("Postmark", postmark_id));
            }
            if store.publication(publication_id)?.is_none() {
                return Err(CatalogError::not_found("Publication", publication_id));
            }
            let mut reference = PublicationReference {
                id: 0,
                postmark_id,
                publication_id,
                published_id: published_id.to_string(),
                reference_location: reference_location.trim().to_string(),
                audit: AuditStamp::created_by(actor),
            };
            reference.id = constraint(
                store.insert_publication_reference(&reference),
                "postmark_publication_references",
            )?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkDetail, reference.id, &reference, actor)?;
            Ok(reference)
        })
    }

    // ========================================================================
    // IMAGES
    // ========================================================================

    /// Store the bytes, then the row. A failed insert removes the stored file.
    pub fn attach_postmark_image(
        &self,
        actor: &Principal,
        storage: &dyn FileStorage,
        postmark_id: PostmarkId,
        image_view: PostmarkImageView,
        upload: &ImageUpload,
    ) -> CatalogResult<PostmarkImage> {
        authorize(actor, Action::Modify)?;
        let file = upload.describe(actor.user_id)?;
        let mut image = PostmarkImage {
            id: 0,
            postmark_id,
            image_view,
            file,
            audit: AuditStamp::created_by(actor),
        };
        if self.store().postmark(postmark_id)?.is_none() {
            return Err(CatalogError::not_found("Postmark", postmark_id));
        }
        storage
            .put(&image.file.storage_filename, &upload.bytes)
            .map_err(|e| CatalogError::InvalidInput(format!("could not store image: {}", e)))?;

        let saved = self.write(|store| {
            image.id = constraint(store.insert_postmark_image(&image), "postmark_images")?;
            record_history(store, HistoryAction::Created, VersionedKind::PostmarkImage, image.id, &image, actor)
        });
        if let Err(err) = saved {
            if let Err(cleanup) = storage.delete(&image.file.storage_filename) {
                log::warn!(
                    "event=image_cleanup_failed module=service file={} error={}",
                    image.file.storage_filename, cleanup
                );
            }
            return Err(err);
        }
        info!(
            "event=image_attached module=service postmark={} file={} checksum={}",
            postmark_id, image.file.storage_filename, image.file.file_checksum
        );
        Ok(image)
    }

    /// Mark an image as reviewed. Requires regional responsibility.
    pub fn approve_postmark_image(&self, actor: &Principal, image_id: i64) -> CatalogResult<PostmarkImage> {
        self.write(|store| {
            let mut image = store
                .postmark_image(image_id)?
                .ok_or_else(|| CatalogError::not_found("Postmark image", image_id))?;
            Self::regional_postmark(store, actor, image.postmark_id)?;
            image.audit.touch(actor);
            store.touch_postmark_image(&image)?;
            record_history(store, HistoryAction::Updated, VersionedKind::PostmarkImage, image.id, &image, actor)?;
            Ok(image)
        })
    }

    /// Remove an image and its stored bytes. Requires regional responsibility.
    pub fn reject_postmark_image(
        &self,
        actor: &Principal,
        storage: &dyn FileStorage,
        image_id: i64,
    ) -> CatalogResult<()> {
        let image = self.write(|store| {
            let image = store
                .postmark_image(image_id)?
                .ok_or_else(|| CatalogError::not_found("Postmark image", image_id))?;
            Self::regional_postmark(store, actor, image.postmark_id)?;
            store
                .connection()
                .execute("DELETE FROM postmark_images WHERE id = ?1", [image_id])?;
            record_history(store, HistoryAction::Deleted, VersionedKind::PostmarkImage, image.id, &image, actor)?;
            Ok(image)
        })?;
        if let Err(e) = storage.delete(&image.file.storage_filename) {
            log::warn!(
                "event=image_cleanup_failed module=service file={} error={}",
                image.file.storage_filename, e
            );
        }
        info!(
            "event=image_rejected module=service image={} postmark={} actor={}",
            image_id, image.postmark_id, actor.username
        );
        Ok(())
    }

    // ========================================================================
    // POSTCOVERS
    // ========================================================================

    /// New cover owned by the acting principal.
    pub fn create_postcover(&self, actor: &Principal, postcover_key: &str, description: &str) -> CatalogResult<Postcover> {
        authorize(actor, Action::Modify)?;
        let mut cover = Postcover::new(actor.user_id, postcover_key, description, AuditStamp::created_by(actor))?;
        self.write(|store| {
            cover.id = constraint(store.insert_postcover(&cover), "postcovers")?;
            record_history(store, HistoryAction::Created, VersionedKind::Postcover, cover.id.get(), &cover, actor)
        })?;
        Ok(cover)
    }

    pub fn place_postmark_on_cover(
        &self,
        actor: &Principal,
        postcover_id: PostcoverId,
        postmark_id: PostmarkId,
        position_order: i64,
        location: PostmarkLocation,
    ) -> CatalogResult<PostcoverPostmark> {
        authorize(actor, Action::Modify)?;
        self.write(|store| {
            if store.postcover(postcover_id)?.is_none() {
                return Err(CatalogError::not_found("Postcover", postcover_id));
            }
            if store.postmark(postmark_id)?.is_none() {
                return Err(CatalogError::not_found("Postmark", postmark_id));
            }
            let mut link = PostcoverPostmark {
                id: 0,
                postcover_id,
                postmark_id,
                position_order,
                postmark_location: location,
                audit: AuditStamp::created_by(actor),
            };
            link.id = constraint(store.insert_postcover_postmark(&link), "postcover_postmarks")?;
            record_history(store, HistoryAction::Updated, VersionedKind::Postcover, postcover_id.get(), &link, actor)?;
            Ok(link)
        })
    }

    pub fn attach_postcover_image(
        &self,
        actor: &Principal,
        storage: &dyn FileStorage,
        postcover_id: PostcoverId,
        image_view: PostcoverImageView,
        upload: &ImageUpload,
    ) -> CatalogResult<PostcoverImage> {
        authorize(actor, Action::Modify)?;
        let file = upload.describe(actor.user_id)?;
        let mut image = PostcoverImage {
            id: 0,
            postcover_id,
            image_view,
            file,
            audit: AuditStamp::created_by(actor),
        };
        if self.store().postcover(postcover_id)?.is_none() {
            return Err(CatalogError::not_found("Postcover", postcover_id));
        }
        storage
            .put(&image.file.storage_filename, &upload.bytes)
            .map_err(|e| CatalogError::InvalidInput(format!("could not store image: {}", e)))?;

        let saved = self.write(|store| {
            image.id = constraint(store.insert_postcover_image(&image), "postcover_images")?;
            record_history(store, HistoryAction::Created, VersionedKind::PostcoverImage, image.id, &image, actor)
        });
        if let Err(err) = saved {
            if let Err(cleanup) = storage.delete(&image.file.storage_filename) {
                log::warn!(
                    "event=image_cleanup_failed module=service file={} error={}",
                    image.file.storage_filename, cleanup
                );
            }
            return Err(err);
        }
        Ok(image)
    }

    fn store(&self) -> SqliteStore<'conn> {
        SqliteStore::new(self.conn)
    }
}
