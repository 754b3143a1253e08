// Curator workflow through the service layer on a file-backed database,
// then carried to a second database through the CSV transfer.

use chrono::NaiveDate;
use rusqlite::Connection;
use std::collections::BTreeSet;
use std::path::Path;

use postal_history::catalog::{LookupKind, PostmarkStyle, RateLocation};
use postal_history::{
    export_catalog, get_history_for_entity, import_catalog, setup_database,
    AdministrativeUnitIdentity, AuditStamp, CatalogError, CatalogService, ChangeReason,
    EffectiveInterval, FacilityType, Group, GroupId, HistoryAction, JurisdictionalAffiliation,
    NamingMode, PostalFacilityIdentity, PostmarkFilter, Principal, SqliteStore, TemporalResolver,
    TemporalStore, UnitType, UserId, VersionedKind,
};

fn d(y: i32, m: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, day).unwrap()
}

fn open_db(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    setup_database(&conn).unwrap();
    conn
}

fn curator() -> Principal {
    Principal::authenticated(UserId(1), "curator".to_string(), BTreeSet::new(), false)
}

struct Seeded {
    editors: GroupId,
    postmark_key: String,
}

/// Richmond, renamed in 1863, governed by Virginia, which carried an
/// older name before 1776.
fn seed(conn: &Connection) -> Seeded {
    let service = CatalogService::new(conn);
    let actor = curator();

    let editors = SqliteStore::new(conn)
        .insert_group(&Group {
            id: GroupId::UNSAVED,
            name: "Virginia editors".to_string(),
            permissions: vec!["change_postmark".to_string()],
        })
        .unwrap();

    let virginia = service.create_unit(&actor, "US-VA").unwrap();
    service
        .add_unit_identity(
            &actor,
            AdministrativeUnitIdentity::new(
                virginia.id,
                None,
                EffectiveInterval::new(d(1607, 5, 14), Some(d(1776, 7, 4))).unwrap(),
                "Colony of Virginia",
                "COLVA",
                UnitType::Territory,
                2,
                ChangeReason::Initial,
                AuditStamp::created_by(&actor),
            )
            .unwrap(),
        )
        .unwrap();
    service
        .add_unit_identity(
            &actor,
            AdministrativeUnitIdentity::new(
                virginia.id,
                None,
                EffectiveInterval::open(d(1776, 7, 4)),
                "Virginia",
                "VA",
                UnitType::State,
                2,
                ChangeReason::Independence,
                AuditStamp::created_by(&actor),
            )
            .unwrap(),
        )
        .unwrap();
    service.assign_responsibility(&actor, virginia.id, editors, "State editors").unwrap();

    let facility = service.create_facility(&actor, "US-VA-RICHMOND-001", Some(37.5407), Some(-77.4360)).unwrap();
    let first = service
        .add_facility_identity(
            &actor,
            PostalFacilityIdentity::new(
                facility.id,
                EffectiveInterval::open(d(1860, 1, 1)),
                "Richmond",
                FacilityType::PostOffice,
                AuditStamp::created_by(&actor),
            )
            .unwrap(),
        )
        .unwrap();
    let second = service
        .supersede_facility_identity(
            &actor,
            PostalFacilityIdentity::new(
                facility.id,
                EffectiveInterval::open(d(1863, 6, 1)),
                "Richmond C.S.A.",
                FacilityType::PostOffice,
                AuditStamp::created_by(&actor),
            )
            .unwrap(),
        )
        .unwrap();
    for identity in [first.id, second.id] {
        service
            .add_affiliation(
                &actor,
                JurisdictionalAffiliation::new(
                    identity,
                    virginia.id,
                    EffectiveInterval::open(d(1860, 1, 1)),
                    "Statehood",
                    AuditStamp::created_by(&actor),
                )
                .unwrap(),
            )
            .unwrap();
    }

    let mut style = Vec::new();
    for kind in LookupKind::ALL {
        style.push(service.create_lookup(&actor, kind, "Standard", "").unwrap().id);
    }
    let postmark = service
        .create_postmark(
            &actor,
            second.id,
            PostmarkStyle {
                shape_id: style[0],
                lettering_style_id: style[1],
                framing_style_id: style[2],
                date_format_id: style[3],
            },
            "VA-RICH-CSA-01",
            RateLocation::Bottom,
            "PAID 10",
        )
        .unwrap();
    service
        .add_size(&actor, postmark.id, 31.5, 28.0, "double circle")
        .unwrap();

    Seeded {
        editors,
        postmark_key: postmark.postmark_key,
    }
}

#[test]
fn supersede_is_visible_to_resolution_and_history() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(&dir.path().join("catalog.db"));
    seed(&conn);

    let store = SqliteStore::new(&conn);
    let facility = store.facility_by_reference("US-VA-RICHMOND-001").unwrap().unwrap();
    let resolver = TemporalResolver::new(&store);

    let timeline = resolver.facility_timeline(facility.id).unwrap();
    assert_eq!(timeline.len(), 2);
    assert_eq!(timeline[0].interval.effective_to, Some(d(1863, 6, 1)));
    assert!(timeline[1].interval.is_current());

    let before = resolver.facility_at(facility.id, d(1862, 1, 1), NamingMode::AsOfTarget).unwrap().unwrap();
    assert_eq!(before.identity.facility_name, "Richmond");
    let name = before.jurisdiction.unwrap().unit_identity.unwrap().unit_name;
    assert_eq!(name, "Virginia");

    // the closed first identity has a created and a closed snapshot
    let events = get_history_for_entity(&conn, VersionedKind::PostalFacilityIdentity, timeline[0].id.get()).unwrap();
    let actions: Vec<HistoryAction> = events.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![HistoryAction::Closed, HistoryAction::Created]);
    assert_eq!(events[0].snapshot["interval"]["effective_to"], "1863-06-01");
}

#[test]
fn overlapping_writes_are_rejected_but_imports_are_not() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(&dir.path().join("catalog.db"));
    seed(&conn);
    let service = CatalogService::new(&conn);
    let actor = curator();

    let facility = SqliteStore::new(&conn)
        .facility_by_reference("US-VA-RICHMOND-001")
        .unwrap()
        .unwrap();
    let err = service
        .add_facility_identity(
            &actor,
            PostalFacilityIdentity::new(
                facility.id,
                EffectiveInterval::new(d(1862, 1, 1), Some(d(1864, 1, 1))).unwrap(),
                "Overlapping",
                FacilityType::Station,
                AuditStamp::created_by(&actor),
            )
            .unwrap(),
        )
        .unwrap_err();
    assert!(matches!(err, CatalogError::Integrity(_)));
    assert_eq!(
        TemporalResolver::new(&SqliteStore::new(&conn))
            .facility_timeline(facility.id)
            .unwrap()
            .len(),
        2
    );
}

#[test]
fn regional_editing_follows_responsibility() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(&dir.path().join("catalog.db"));
    let seeded = seed(&conn);
    let service = CatalogService::new(&conn);

    let store = SqliteStore::new(&conn);
    let mut postmark = store
        .postmarks()
        .unwrap()
        .into_iter()
        .find(|p| p.postmark_key == seeded.postmark_key)
        .unwrap();
    postmark.other_characteristics = "struck in blue".to_string();

    let outsider = curator();
    let denied = service.update_postmark(&outsider, postmark.clone()).unwrap_err();
    assert!(matches!(denied, CatalogError::PermissionDenied(_)));

    let editor = Principal::authenticated(
        UserId(2),
        "editor".to_string(),
        BTreeSet::from([seeded.editors]),
        false,
    );
    let updated = service.update_postmark(&editor, postmark.clone()).unwrap();
    assert_eq!(updated.audit.modified_by, UserId(2));
    assert_eq!(updated.audit.created_by, UserId(1));

    let superuser = Principal::authenticated(UserId(3), "admin".to_string(), BTreeSet::new(), true);
    service.update_postmark(&superuser, postmark).unwrap();

    let anonymous = Principal::anonymous();
    assert!(service.create_unit(&anonymous, "US-NC").is_err());
}

#[test]
fn state_filter_matches_historical_unit_names() {
    let dir = tempfile::tempdir().unwrap();
    let conn = open_db(&dir.path().join("catalog.db"));
    seed(&conn);

    let store = SqliteStore::new(&conn);
    let resolver = TemporalResolver::new(&store);
    let listings = store.postmark_listings().unwrap();

    let by_state = |state: &str| {
        let filter = PostmarkFilter {
            state: Some(state.to_string()),
            ..PostmarkFilter::default()
        };
        filter.apply(listings.clone(), &resolver).unwrap().len()
    };
    assert_eq!(by_state("VA"), 1);
    assert_eq!(by_state("Colony of Virginia"), 1);
    assert_eq!(by_state("NC"), 0);
}

#[test]
fn export_import_preserves_resolution() {
    let dir = tempfile::tempdir().unwrap();
    let source = open_db(&dir.path().join("source.db"));
    seed(&source);
    let csv_dir = dir.path().join("export");
    let exported = export_catalog(&source, &csv_dir).unwrap();

    let target = open_db(&dir.path().join("target.db"));
    let imported = import_catalog(&target, &csv_dir, false).unwrap();
    assert_eq!(imported.total(), exported.total());

    for conn in [&source, &target] {
        let store = SqliteStore::new(conn);
        let facility = store.facility_by_reference("US-VA-RICHMOND-001").unwrap().unwrap();
        let resolver = TemporalResolver::new(&store);
        let at = |date| {
            resolver
                .facility_at(facility.id, date, NamingMode::AtAffiliationStart)
                .unwrap()
                .map(|r| r.identity.facility_name)
        };
        assert_eq!(at(d(1862, 1, 1)).as_deref(), Some("Richmond"));
        assert_eq!(at(d(1863, 6, 1)).as_deref(), Some("Richmond C.S.A."));
        assert_eq!(at(d(1850, 1, 1)), None);

        let groups = resolver.unit_responsible_groups(store.unit_by_reference("US-VA").unwrap().unwrap().id).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "Virginia editors");
    }
}
