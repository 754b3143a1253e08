// Resolution scenarios run against both storage backends.

use chrono::NaiveDate;
use rusqlite::Connection;

use postal_history::catalog::{LookupEntry, LookupId, LookupKind, Postmark, PostmarkStyle, RateLocation};
use postal_history::db::setup_database;
use postal_history::temporal::today;
use postal_history::{
    AdministrativeUnit, AdministrativeUnitIdentity, AuditStamp, ChangeReason, EffectiveInterval,
    FacilityId, FacilityIdentityId, FacilityType, Group, GroupId, JurisdictionalAffiliation,
    MemoryStore, NamingMode, PostalFacility, PostalFacilityIdentity, Principal, SqliteStore,
    StoreResult, TemporalResolver, TemporalStore, UnitId, UnitResponsibility, UnitType,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn stamp() -> AuditStamp {
    AuditStamp::created_by(&Principal::anonymous())
}

/// Raw inserts, no write-time checks.
trait Fixture: TemporalStore {
    fn put_facility(&self, facility: PostalFacility) -> StoreResult<FacilityId>;
    fn put_facility_identity(&self, identity: PostalFacilityIdentity) -> StoreResult<FacilityIdentityId>;
    fn put_unit(&self, unit: AdministrativeUnit) -> StoreResult<UnitId>;
    fn put_unit_identity(&self, identity: AdministrativeUnitIdentity) -> StoreResult<()>;
    fn put_affiliation(&self, affiliation: JurisdictionalAffiliation) -> StoreResult<()>;
    fn put_responsibility(&self, responsibility: UnitResponsibility) -> StoreResult<()>;
    fn put_group(&self, group: Group) -> StoreResult<GroupId>;
    fn put_postmark(&self, identity: FacilityIdentityId, key: &str) -> StoreResult<Postmark>;
}

impl Fixture for MemoryStore {
    fn put_facility(&self, facility: PostalFacility) -> StoreResult<FacilityId> {
        self.insert_facility(facility)
    }
    fn put_facility_identity(&self, identity: PostalFacilityIdentity) -> StoreResult<FacilityIdentityId> {
        self.insert_facility_identity(identity)
    }
    fn put_unit(&self, unit: AdministrativeUnit) -> StoreResult<UnitId> {
        self.insert_unit(unit)
    }
    fn put_unit_identity(&self, identity: AdministrativeUnitIdentity) -> StoreResult<()> {
        self.insert_unit_identity(identity).map(|_| ())
    }
    fn put_affiliation(&self, affiliation: JurisdictionalAffiliation) -> StoreResult<()> {
        self.insert_affiliation(affiliation).map(|_| ())
    }
    fn put_responsibility(&self, responsibility: UnitResponsibility) -> StoreResult<()> {
        self.insert_responsibility(responsibility).map(|_| ())
    }
    fn put_group(&self, group: Group) -> StoreResult<GroupId> {
        self.insert_group(group)
    }
    fn put_postmark(&self, identity: FacilityIdentityId, key: &str) -> StoreResult<Postmark> {
        let style = PostmarkStyle {
            shape_id: LookupId::UNSAVED,
            lettering_style_id: LookupId::UNSAVED,
            framing_style_id: LookupId::UNSAVED,
            date_format_id: LookupId::UNSAVED,
        };
        let mut postmark = Postmark::new(identity, style, key, RateLocation::Top, "3", stamp()).unwrap();
        postmark.id = self.insert_postmark(postmark.clone())?;
        Ok(postmark)
    }
}

impl Fixture for SqliteStore<'_> {
    fn put_facility(&self, facility: PostalFacility) -> StoreResult<FacilityId> {
        self.insert_facility(&facility)
    }
    fn put_facility_identity(&self, identity: PostalFacilityIdentity) -> StoreResult<FacilityIdentityId> {
        self.insert_facility_identity(&identity)
    }
    fn put_unit(&self, unit: AdministrativeUnit) -> StoreResult<UnitId> {
        self.insert_unit(&unit)
    }
    fn put_unit_identity(&self, identity: AdministrativeUnitIdentity) -> StoreResult<()> {
        self.insert_unit_identity(&identity).map(|_| ())
    }
    fn put_affiliation(&self, affiliation: JurisdictionalAffiliation) -> StoreResult<()> {
        self.insert_affiliation(&affiliation).map(|_| ())
    }
    fn put_responsibility(&self, responsibility: UnitResponsibility) -> StoreResult<()> {
        self.insert_responsibility(&responsibility).map(|_| ())
    }
    fn put_group(&self, group: Group) -> StoreResult<GroupId> {
        self.insert_group(&group)
    }
    fn put_postmark(&self, identity: FacilityIdentityId, key: &str) -> StoreResult<Postmark> {
        let mut ids = Vec::new();
        for kind in LookupKind::ALL {
            let entry = LookupEntry::new(kind, &format!("{} {:?}", key, kind), "", stamp()).unwrap();
            ids.push(self.insert_lookup(&entry)?);
        }
        let style = PostmarkStyle {
            shape_id: ids[0],
            lettering_style_id: ids[1],
            framing_style_id: ids[2],
            date_format_id: ids[3],
        };
        let mut postmark = Postmark::new(identity, style, key, RateLocation::Top, "3", stamp()).unwrap();
        postmark.id = self.insert_postmark(&postmark)?;
        Ok(postmark)
    }
}

/// Run `scenario` once per backend.
fn on_both_stores(scenario: impl Fn(&dyn Fixture)) {
    let memory = MemoryStore::new();
    scenario(&memory);

    let conn = Connection::open_in_memory().unwrap();
    setup_database(&conn).unwrap();
    let sqlite = SqliteStore::new(&conn);
    scenario(&sqlite);
}

// ============================================================================
// Builders
// ============================================================================

fn unit(store: &dyn Fixture, code: &str) -> UnitId {
    store.put_unit(AdministrativeUnit::new(code, stamp()).unwrap()).unwrap()
}

fn unit_name(store: &dyn Fixture, unit_id: UnitId, name: &str, abbr: &str, from: NaiveDate, to: Option<NaiveDate>) {
    store
        .put_unit_identity(
            AdministrativeUnitIdentity::new(
                unit_id,
                None,
                EffectiveInterval::new(from, to).unwrap(),
                name,
                abbr,
                UnitType::State,
                2,
                ChangeReason::Initial,
                stamp(),
            )
            .unwrap(),
        )
        .unwrap();
}

fn facility(store: &dyn Fixture, code: &str) -> FacilityId {
    store
        .put_facility(PostalFacility::new(code, None, None, stamp()).unwrap())
        .unwrap()
}

fn facility_name(
    store: &dyn Fixture,
    facility_id: FacilityId,
    name: &str,
    from: NaiveDate,
    to: Option<NaiveDate>,
) -> FacilityIdentityId {
    store
        .put_facility_identity(
            PostalFacilityIdentity::new(
                facility_id,
                EffectiveInterval::new(from, to).unwrap(),
                name,
                FacilityType::PostOffice,
                stamp(),
            )
            .unwrap(),
        )
        .unwrap()
}

fn affiliate(store: &dyn Fixture, identity: FacilityIdentityId, unit_id: UnitId, from: NaiveDate, to: Option<NaiveDate>) {
    store
        .put_affiliation(
            JurisdictionalAffiliation::new(identity, unit_id, EffectiveInterval::new(from, to).unwrap(), "Records", stamp())
                .unwrap(),
        )
        .unwrap();
}

fn group(store: &dyn Fixture, name: &str) -> GroupId {
    store
        .put_group(Group {
            id: GroupId::UNSAVED,
            name: name.to_string(),
            permissions: vec![],
        })
        .unwrap()
}

fn responsible(store: &dyn Fixture, unit_id: UnitId, group_id: GroupId, active: bool) {
    let mut responsibility = UnitResponsibility::new(unit_id, group_id, stamp());
    responsibility.is_active = active;
    store.put_responsibility(responsibility).unwrap();
}

fn resolver(store: &dyn Fixture) -> TemporalResolver<'_, dyn Fixture + '_> {
    TemporalResolver::new(store)
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn richmond_end_to_end() {
    on_both_stores(|store| {
        let richmond = facility(store, "US-VA-RICHMOND-001");
        let a = facility_name(store, richmond, "Richmond", d(1860, 1, 1), Some(d(1863, 6, 1)));
        let b = facility_name(store, richmond, "Richmond C.S.A.", d(1863, 6, 1), None);
        let r = resolver(store);

        let at = |date| r.facility_identity_at(richmond, date).unwrap().map(|i| i.id);
        assert_eq!(at(d(1862, 1, 1)), Some(a));
        assert_eq!(at(d(1863, 5, 31)), Some(a));
        // right-open: the boundary day belongs to the successor
        assert_eq!(at(d(1863, 6, 1)), Some(b));
        assert_eq!(at(d(1870, 1, 1)), Some(b));
        assert_eq!(at(d(1859, 12, 31)), None);

        assert_eq!(r.current_facility_identity(richmond).unwrap().map(|i| i.id), Some(b));
        let timeline: Vec<FacilityIdentityId> =
            r.facility_timeline(richmond).unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(timeline, vec![a, b]);
    });
}

#[test]
fn tie_break_ignores_insertion_order() {
    on_both_stores(|store| {
        let r = resolver(store);

        // same overlapping pair, inserted late-first and then early-first
        for (code, late_first) in [("US-VA-OVERLAP-001", true), ("US-VA-OVERLAP-003", false)] {
            let f = facility(store, code);
            let (late, early) = if late_first {
                let late = facility_name(store, f, "Late", d(1861, 1, 1), None);
                (late, facility_name(store, f, "Early", d(1860, 1, 1), None))
            } else {
                let early = facility_name(store, f, "Early", d(1860, 1, 1), None);
                (facility_name(store, f, "Late", d(1861, 1, 1), None), early)
            };

            assert_eq!(r.facility_identity_at(f, d(1862, 1, 1)).unwrap().map(|i| i.id), Some(late), "{}", code);
            assert_eq!(r.facility_identity_at(f, d(1860, 6, 1)).unwrap().map(|i| i.id), Some(early), "{}", code);
            assert_eq!(r.current_facility_identity(f).unwrap().map(|i| i.id), Some(late), "{}", code);
        }

        // equal starts: highest id wins
        let g = facility(store, "US-VA-OVERLAP-002");
        let first = facility_name(store, g, "First", d(1850, 1, 1), None);
        let second = facility_name(store, g, "Second", d(1850, 1, 1), None);
        assert!(second.get() > first.get());
        assert_eq!(r.facility_identity_at(g, d(1851, 1, 1)).unwrap().map(|i| i.id), Some(second));
    });
}

#[test]
fn jurisdiction_is_independent_of_identity_boundaries() {
    on_both_stores(|store| {
        let virginia = unit(store, "US-VA");
        unit_name(store, virginia, "Virginia", "VA", d(1788, 6, 25), None);
        let west = unit(store, "US-WV");
        unit_name(store, west, "West Virginia", "WV", d(1863, 6, 20), None);

        let wheeling = facility(store, "US-WV-WHEELING-001");
        let identity = facility_name(store, wheeling, "Wheeling", d(1850, 1, 1), None);
        affiliate(store, identity, virginia, d(1850, 1, 1), Some(d(1863, 6, 20)));
        affiliate(store, identity, west, d(1863, 6, 20), None);
        let r = resolver(store);

        let unit_at = |date| {
            r.jurisdiction(identity, date, NamingMode::AsOfTarget)
                .unwrap()
                .map(|j| j.unit.reference_code)
        };
        assert_eq!(unit_at(d(1860, 1, 1)).as_deref(), Some("US-VA"));
        assert_eq!(unit_at(d(1863, 6, 20)).as_deref(), Some("US-WV"));
        assert_eq!(unit_at(d(1849, 1, 1)), None);

        let resolved = r.facility_at(wheeling, d(1864, 1, 1), NamingMode::AsOfTarget).unwrap().unwrap();
        assert_eq!(resolved.identity.id, identity);
        assert_eq!(resolved.jurisdiction.unwrap().unit.id, west);
    });
}

#[test]
fn unit_naming_depends_on_mode() {
    on_both_stores(|store| {
        let territory = unit(store, "US-DAKOTA");
        unit_name(store, territory, "Dakota Territory", "DT", d(1861, 3, 2), Some(d(1889, 11, 2)));
        unit_name(store, territory, "North Dakota", "ND", d(1889, 11, 2), None);

        let fargo = facility(store, "US-ND-FARGO-001");
        let identity = facility_name(store, fargo, "Fargo", d(1871, 1, 1), None);
        affiliate(store, identity, territory, d(1871, 1, 1), None);
        let r = resolver(store);

        let name = |mode| {
            r.jurisdiction(identity, d(1900, 1, 1), mode)
                .unwrap()
                .and_then(|j| j.unit_identity)
                .map(|i| i.unit_abbreviation)
        };
        assert_eq!(name(NamingMode::AtAffiliationStart).as_deref(), Some("DT"));
        assert_eq!(name(NamingMode::AsOfTarget).as_deref(), Some("ND"));

        let start = r.jurisdiction_at_affiliation_start(identity, d(1900, 1, 1)).unwrap().unwrap();
        let as_of = r.jurisdiction_as_of(identity, d(1900, 1, 1)).unwrap().unwrap();
        assert_eq!(start.unit.id, as_of.unit.id);
    });
}

#[test]
fn unit_without_identity_still_resolves() {
    on_both_stores(|store| {
        let nameless = unit(store, "XX-NAMELESS");
        let f = facility(store, "XX-NAMELESS-001");
        let identity = facility_name(store, f, "Somewhere", d(1900, 1, 1), None);
        affiliate(store, identity, nameless, d(1900, 1, 1), None);

        let j = resolver(store).jurisdiction_as_of(identity, d(1950, 1, 1)).unwrap().unwrap();
        assert_eq!(j.unit.id, nameless);
        assert!(j.unit_identity.is_none());
    });
}

#[test]
fn responsible_groups_empty_and_deduplicated() {
    on_both_stores(|store| {
        let editors = group(store, "Editors");
        let reviewers = group(store, "Reviewers");
        let retired = group(store, "Retired");

        let north = unit(store, "XX-NORTH");
        let south = unit(store, "XX-SOUTH");
        responsible(store, north, editors, true);
        responsible(store, south, editors, true);
        responsible(store, south, reviewers, true);
        responsible(store, south, retired, false);

        let border = facility(store, "XX-BORDER-001");
        let identity = facility_name(store, border, "Border", d(1900, 1, 1), None);
        // both affiliations open: all units in force count
        affiliate(store, identity, north, d(1900, 1, 1), None);
        affiliate(store, identity, south, d(1950, 1, 1), None);
        let r = resolver(store);

        let names = |date| {
            let mut names: Vec<String> = r
                .responsible_groups_at(identity, date)
                .unwrap()
                .into_iter()
                .map(|g| g.name)
                .collect();
            names.sort();
            names
        };
        assert_eq!(names(d(1920, 1, 1)), vec!["Editors".to_string()]);
        assert_eq!(names(today()), vec!["Editors".to_string(), "Reviewers".to_string()]);
        assert!(names(d(1800, 1, 1)).is_empty());

        let postmark = store.put_postmark(identity, "XX-BORDER-A").unwrap();
        assert_eq!(r.postmark_responsible_groups(&postmark).unwrap().len(), 2);

        let orphan = facility(store, "XX-ORPHAN-001");
        let lonely = facility_name(store, orphan, "Orphan", d(1900, 1, 1), None);
        let unowned = store.put_postmark(lonely, "XX-ORPHAN-A").unwrap();
        assert!(r.postmark_responsible_groups(&unowned).unwrap().is_empty());
    });
}

#[test]
fn reverse_lookups_follow_current_affiliations() {
    on_both_stores(|store| {
        let editors = group(store, "Editors");
        let county = unit(store, "XX-COUNTY");
        responsible(store, county, editors, true);

        let f = facility(store, "XX-COUNTY-001");
        let old = facility_name(store, f, "Old", d(1900, 1, 1), Some(d(1950, 1, 1)));
        let new = facility_name(store, f, "New", d(1950, 1, 1), None);
        affiliate(store, old, county, d(1900, 1, 1), Some(d(1950, 1, 1)));
        affiliate(store, new, county, d(1950, 1, 1), None);
        let r = resolver(store);

        let facilities = r.facilities_in_unit(county).unwrap();
        assert_eq!(facilities.len(), 1);
        assert_eq!(facilities[0].id, f);

        let units = r.units_for_groups(&[editors]).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(r.unit_responsible_groups(county).unwrap()[0].id, editors);
    });
}
