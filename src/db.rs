// 💾 SQLite persistence
//
// Schema setup (WAL), row mapping, the TemporalStore implementation and the
// write side used by the services and by CSV import. Dates are stored as
// ISO text (YYYY-MM-DD), timestamps as RFC 3339.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::HashMap;

use crate::access::{Group, GroupId, User, UserId};
use crate::audit::{AuditStamp, HistoryAction, HistoryEvent, VersionedKind};
use crate::catalog::{
    Color, ColorId, ImageFile, LookupEntry, LookupId, LookupKind, Postcover, PostcoverId,
    PostcoverImage, PostcoverImageView, PostcoverPostmark, Postmark, PostmarkColor,
    PostmarkDatesSeen, PostmarkId, PostmarkImage, PostmarkImageView, PostmarkLocation,
    PostmarkPublication, PostmarkSize, PostmarkValuation, PublicationId, PublicationReference,
    PublicationType, RateLocation,
};
use crate::entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, AffiliationId, ChangeReason, FacilityId,
    FacilityIdentityId, FacilityType, JurisdictionalAffiliation, PostalFacility,
    PostalFacilityIdentity, ResponsibilityId, UnitId, UnitIdentityId, UnitResponsibility,
    UnitType,
};
use crate::error::{CatalogError, CatalogResult, StoreError, StoreResult};
use crate::filters::{PostcoverListing, PostmarkListing};
use crate::store::TemporalStore;
use crate::temporal::{EffectiveInterval, DATE_FORMAT};

// ============================================================================
// SCHEMA
// ============================================================================

const AUDIT_COLUMNS: &str = "created_by INTEGER NOT NULL,
            created_at TEXT NOT NULL,
            modified_by INTEGER NOT NULL,
            modified_at TEXT NOT NULL";

const TABLES: &[&str] = &[
    // Access control
    "CREATE TABLE IF NOT EXISTS auth_groups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        permissions TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE TABLE IF NOT EXISTS auth_users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        username TEXT UNIQUE NOT NULL,
        password TEXT NOT NULL,
        email TEXT NOT NULL DEFAULT '',
        first_name TEXT NOT NULL DEFAULT '',
        last_name TEXT NOT NULL DEFAULT '',
        is_active INTEGER NOT NULL DEFAULT 1,
        is_staff INTEGER NOT NULL DEFAULT 0,
        is_superuser INTEGER NOT NULL DEFAULT 0,
        last_login TEXT,
        date_joined TEXT NOT NULL,
        user_permissions TEXT NOT NULL DEFAULT '[]'
    )",
    "CREATE TABLE IF NOT EXISTS auth_user_groups (
        user_id INTEGER NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
        group_id INTEGER NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
        PRIMARY KEY (user_id, group_id)
    )",
    // Temporal core
    "CREATE TABLE IF NOT EXISTS postal_facilities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reference_code TEXT UNIQUE NOT NULL,
        latitude REAL,
        longitude REAL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postal_facility_identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        facility_id INTEGER NOT NULL REFERENCES postal_facilities(id) ON DELETE RESTRICT,
        effective_from TEXT NOT NULL,
        effective_to TEXT,
        facility_name TEXT NOT NULL,
        facility_type TEXT NOT NULL,
        is_operational INTEGER NOT NULL DEFAULT 1,
        discontinuation_reason TEXT NOT NULL DEFAULT '',
        latitude REAL,
        longitude REAL,
        notes TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS administrative_units (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        reference_code TEXT UNIQUE NOT NULL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS administrative_unit_identities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        unit_id INTEGER NOT NULL REFERENCES administrative_units(id) ON DELETE RESTRICT,
        parent_unit_id INTEGER REFERENCES administrative_units(id) ON DELETE RESTRICT,
        effective_from TEXT NOT NULL,
        effective_to TEXT,
        unit_name TEXT NOT NULL,
        unit_abbreviation TEXT NOT NULL DEFAULT '',
        unit_type TEXT NOT NULL,
        hierarchy_level INTEGER NOT NULL,
        change_reason TEXT NOT NULL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS unit_responsibilities (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        unit_id INTEGER NOT NULL REFERENCES administrative_units(id) ON DELETE CASCADE,
        group_id INTEGER NOT NULL REFERENCES auth_groups(id) ON DELETE CASCADE,
        is_active INTEGER NOT NULL DEFAULT 1,
        notes TEXT NOT NULL DEFAULT '',
        {audit},
        UNIQUE (unit_id, group_id)
    )",
    "CREATE TABLE IF NOT EXISTS jurisdictional_affiliations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        facility_identity_id INTEGER NOT NULL REFERENCES postal_facility_identities(id) ON DELETE CASCADE,
        unit_id INTEGER NOT NULL REFERENCES administrative_units(id) ON DELETE RESTRICT,
        effective_from TEXT NOT NULL,
        effective_to TEXT,
        affiliation_source TEXT NOT NULL,
        {audit}
    )",
    // Lookups
    "CREATE TABLE IF NOT EXISTS postmark_shapes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS lettering_styles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS framing_styles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS date_formats (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS colors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        color_name TEXT UNIQUE NOT NULL,
        color_value TEXT NOT NULL,
        {audit}
    )",
    // Postmarks
    "CREATE TABLE IF NOT EXISTS postmarks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        facility_identity_id INTEGER NOT NULL REFERENCES postal_facility_identities(id) ON DELETE RESTRICT,
        shape_id INTEGER NOT NULL REFERENCES postmark_shapes(id) ON DELETE RESTRICT,
        lettering_style_id INTEGER NOT NULL REFERENCES lettering_styles(id) ON DELETE RESTRICT,
        framing_style_id INTEGER NOT NULL REFERENCES framing_styles(id) ON DELETE RESTRICT,
        date_format_id INTEGER NOT NULL REFERENCES date_formats(id) ON DELETE RESTRICT,
        postmark_key TEXT UNIQUE NOT NULL,
        rate_location TEXT NOT NULL,
        rate_value TEXT NOT NULL DEFAULT '',
        is_manuscript INTEGER NOT NULL DEFAULT 0,
        other_characteristics TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postmark_colors (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        color_id INTEGER NOT NULL REFERENCES colors(id) ON DELETE RESTRICT,
        {audit},
        UNIQUE (postmark_id, color_id)
    )",
    "CREATE TABLE IF NOT EXISTS postmark_dates_seen (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        earliest_date_seen TEXT NOT NULL,
        latest_date_seen TEXT NOT NULL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postmark_sizes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        width REAL NOT NULL,
        height REAL NOT NULL,
        size_notes TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postmark_valuations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        valued_by INTEGER NOT NULL,
        estimated_value REAL NOT NULL,
        valuation_date TEXT NOT NULL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postmark_publications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        publication_title TEXT NOT NULL,
        author TEXT NOT NULL,
        publisher TEXT NOT NULL,
        publication_date TEXT NOT NULL,
        isbn TEXT NOT NULL DEFAULT '',
        edition TEXT NOT NULL DEFAULT '',
        publication_type TEXT NOT NULL,
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postmark_publication_references (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        publication_id INTEGER NOT NULL REFERENCES postmark_publications(id) ON DELETE RESTRICT,
        published_id TEXT NOT NULL,
        reference_location TEXT NOT NULL DEFAULT '',
        {audit},
        UNIQUE (postmark_id, publication_id, published_id)
    )",
    "CREATE TABLE IF NOT EXISTS postmark_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE CASCADE,
        image_view TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        storage_filename TEXT UNIQUE NOT NULL,
        file_checksum TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        image_width INTEGER NOT NULL,
        image_height INTEGER NOT NULL,
        file_size_bytes INTEGER NOT NULL,
        image_description TEXT NOT NULL DEFAULT '',
        display_order INTEGER NOT NULL DEFAULT 0,
        uploaded_by INTEGER NOT NULL,
        {audit}
    )",
    // Collector covers
    "CREATE TABLE IF NOT EXISTS postcovers (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id INTEGER NOT NULL,
        postcover_key TEXT UNIQUE NOT NULL,
        description TEXT NOT NULL DEFAULT '',
        {audit}
    )",
    "CREATE TABLE IF NOT EXISTS postcover_postmarks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postcover_id INTEGER NOT NULL REFERENCES postcovers(id) ON DELETE CASCADE,
        postmark_id INTEGER NOT NULL REFERENCES postmarks(id) ON DELETE RESTRICT,
        position_order INTEGER NOT NULL,
        postmark_location TEXT NOT NULL,
        {audit},
        UNIQUE (postcover_id, postmark_id, position_order)
    )",
    "CREATE TABLE IF NOT EXISTS postcover_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        postcover_id INTEGER NOT NULL REFERENCES postcovers(id) ON DELETE CASCADE,
        image_view TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        storage_filename TEXT UNIQUE NOT NULL,
        file_checksum TEXT NOT NULL,
        mime_type TEXT NOT NULL,
        image_width INTEGER NOT NULL,
        image_height INTEGER NOT NULL,
        file_size_bytes INTEGER NOT NULL,
        image_description TEXT NOT NULL DEFAULT '',
        display_order INTEGER NOT NULL DEFAULT 0,
        uploaded_by INTEGER NOT NULL,
        {audit}
    )",
    // Snapshot-on-write history
    "CREATE TABLE IF NOT EXISTS history_events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT UNIQUE NOT NULL,
        timestamp TEXT NOT NULL,
        action TEXT NOT NULL,
        entity_kind TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        snapshot TEXT NOT NULL,
        actor INTEGER NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_facility_identities_facility ON postal_facility_identities(facility_id, effective_from)",
    "CREATE INDEX IF NOT EXISTS idx_unit_identities_unit ON administrative_unit_identities(unit_id, effective_from)",
    "CREATE INDEX IF NOT EXISTS idx_unit_identities_parent ON administrative_unit_identities(parent_unit_id)",
    "CREATE INDEX IF NOT EXISTS idx_affiliations_identity ON jurisdictional_affiliations(facility_identity_id, effective_from)",
    "CREATE INDEX IF NOT EXISTS idx_affiliations_unit ON jurisdictional_affiliations(unit_id)",
    "CREATE INDEX IF NOT EXISTS idx_postmarks_identity ON postmarks(facility_identity_id)",
    "CREATE INDEX IF NOT EXISTS idx_history_entity ON history_events(entity_kind, entity_id)",
    "CREATE INDEX IF NOT EXISTS idx_history_timestamp ON history_events(timestamp)",
];

pub fn setup_database(conn: &Connection) -> StoreResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    for ddl in TABLES {
        conn.execute(&ddl.replace("{audit}", AUDIT_COLUMNS), [])?;
    }
    for ddl in INDEXES {
        conn.execute(ddl, [])?;
    }

    log::debug!(
        "event=schema_ready module=db tables={} indexes={}",
        TABLES.len(),
        INDEXES.len()
    );
    Ok(())
}

// ============================================================================
// COLUMN HELPERS
// ============================================================================

fn conversion_error<E>(row: &Row<'_>, column: &str, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column).unwrap_or(0);
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn get_date(row: &Row<'_>, column: &str) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(column)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(row, column, e))
}

fn get_opt_date(row: &Row<'_>, column: &str) -> rusqlite::Result<Option<NaiveDate>> {
    let raw: Option<String> = row.get(column)?;
    raw.map(|s| NaiveDate::parse_from_str(&s, DATE_FORMAT).map_err(|e| conversion_error(row, column, e)))
        .transpose()
}

fn get_datetime(row: &Row<'_>, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(row, column, e))
}

fn get_parsed<T>(row: &Row<'_>, column: &str, parse: fn(&str) -> CatalogResult<T>) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    parse(&raw).map_err(|e| conversion_error(row, column, e))
}

fn get_json<T: serde::de::DeserializeOwned>(row: &Row<'_>, column: &str) -> rusqlite::Result<T> {
    let raw: String = row.get(column)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(row, column, e))
}

fn get_interval(row: &Row<'_>) -> rusqlite::Result<EffectiveInterval> {
    Ok(EffectiveInterval {
        effective_from: get_date(row, "effective_from")?,
        effective_to: get_opt_date(row, "effective_to")?,
    })
}

fn get_audit(row: &Row<'_>) -> rusqlite::Result<AuditStamp> {
    Ok(AuditStamp {
        created_by: row.get("created_by")?,
        created_at: get_datetime(row, "created_at")?,
        modified_by: row.get("modified_by")?,
        modified_at: get_datetime(row, "modified_at")?,
    })
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn opt_date_text(date: Option<NaiveDate>) -> Option<String> {
    date.map(date_text)
}

/// NULL for unsaved records so SQLite assigns the id.
fn id_param(id: i64) -> Option<i64> {
    if id == 0 {
        None
    } else {
        Some(id)
    }
}

// ============================================================================
// ROW MAPPERS
// ============================================================================

fn facility_from_row(row: &Row<'_>) -> rusqlite::Result<PostalFacility> {
    Ok(PostalFacility {
        id: row.get("id")?,
        reference_code: row.get("reference_code")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        audit: get_audit(row)?,
    })
}

fn facility_identity_from_row(row: &Row<'_>) -> rusqlite::Result<PostalFacilityIdentity> {
    Ok(PostalFacilityIdentity {
        id: row.get("id")?,
        facility_id: row.get("facility_id")?,
        interval: get_interval(row)?,
        facility_name: row.get("facility_name")?,
        facility_type: get_parsed(row, "facility_type", FacilityType::parse)?,
        is_operational: row.get("is_operational")?,
        discontinuation_reason: row.get("discontinuation_reason")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        notes: row.get("notes")?,
        audit: get_audit(row)?,
    })
}

fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<AdministrativeUnit> {
    Ok(AdministrativeUnit {
        id: row.get("id")?,
        reference_code: row.get("reference_code")?,
        audit: get_audit(row)?,
    })
}

fn unit_identity_from_row(row: &Row<'_>) -> rusqlite::Result<AdministrativeUnitIdentity> {
    Ok(AdministrativeUnitIdentity {
        id: row.get("id")?,
        unit_id: row.get("unit_id")?,
        parent_unit_id: row.get("parent_unit_id")?,
        interval: get_interval(row)?,
        unit_name: row.get("unit_name")?,
        unit_abbreviation: row.get("unit_abbreviation")?,
        unit_type: get_parsed(row, "unit_type", UnitType::parse)?,
        hierarchy_level: row.get("hierarchy_level")?,
        change_reason: get_parsed(row, "change_reason", ChangeReason::parse)?,
        audit: get_audit(row)?,
    })
}

fn affiliation_from_row(row: &Row<'_>) -> rusqlite::Result<JurisdictionalAffiliation> {
    Ok(JurisdictionalAffiliation {
        id: row.get("id")?,
        facility_identity_id: row.get("facility_identity_id")?,
        unit_id: row.get("unit_id")?,
        interval: get_interval(row)?,
        affiliation_source: row.get("affiliation_source")?,
        audit: get_audit(row)?,
    })
}

fn responsibility_from_row(row: &Row<'_>) -> rusqlite::Result<UnitResponsibility> {
    Ok(UnitResponsibility {
        id: row.get("id")?,
        unit_id: row.get("unit_id")?,
        group_id: row.get("group_id")?,
        is_active: row.get("is_active")?,
        notes: row.get("notes")?,
        audit: get_audit(row)?,
    })
}

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get("id")?,
        name: row.get("name")?,
        permissions: get_json(row, "permissions")?,
    })
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let last_login: Option<String> = row.get("last_login")?;
    let last_login = match last_login {
        Some(raw) => Some(
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| conversion_error(row, "last_login", e))?,
        ),
        None => None,
    };
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        password: row.get("password")?,
        email: row.get("email")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        is_active: row.get("is_active")?,
        is_staff: row.get("is_staff")?,
        is_superuser: row.get("is_superuser")?,
        last_login,
        date_joined: get_datetime(row, "date_joined")?,
        groups: Vec::new(),
        user_permissions: get_json(row, "user_permissions")?,
    })
}

fn postmark_from_row(row: &Row<'_>) -> rusqlite::Result<Postmark> {
    Ok(Postmark {
        id: row.get("id")?,
        facility_identity_id: row.get("facility_identity_id")?,
        shape_id: row.get("shape_id")?,
        lettering_style_id: row.get("lettering_style_id")?,
        framing_style_id: row.get("framing_style_id")?,
        date_format_id: row.get("date_format_id")?,
        postmark_key: row.get("postmark_key")?,
        rate_location: get_parsed(row, "rate_location", RateLocation::parse)?,
        rate_value: row.get("rate_value")?,
        is_manuscript: row.get("is_manuscript")?,
        other_characteristics: row.get("other_characteristics")?,
        audit: get_audit(row)?,
    })
}

fn color_from_row(row: &Row<'_>) -> rusqlite::Result<Color> {
    Ok(Color {
        id: row.get("id")?,
        color_name: row.get("color_name")?,
        color_value: row.get("color_value")?,
        audit: get_audit(row)?,
    })
}

fn publication_from_row(row: &Row<'_>) -> rusqlite::Result<PostmarkPublication> {
    Ok(PostmarkPublication {
        id: row.get("id")?,
        publication_title: row.get("publication_title")?,
        author: row.get("author")?,
        publisher: row.get("publisher")?,
        publication_date: get_date(row, "publication_date")?,
        isbn: row.get("isbn")?,
        edition: row.get("edition")?,
        publication_type: get_parsed(row, "publication_type", PublicationType::parse)?,
        audit: get_audit(row)?,
    })
}

fn image_file_from_row(row: &Row<'_>) -> rusqlite::Result<ImageFile> {
    Ok(ImageFile {
        original_filename: row.get("original_filename")?,
        storage_filename: row.get("storage_filename")?,
        file_checksum: row.get("file_checksum")?,
        mime_type: row.get("mime_type")?,
        image_width: row.get("image_width")?,
        image_height: row.get("image_height")?,
        file_size_bytes: row.get("file_size_bytes")?,
        image_description: row.get("image_description")?,
        display_order: row.get("display_order")?,
        uploaded_by: row.get("uploaded_by")?,
    })
}

fn postmark_image_from_row(row: &Row<'_>) -> rusqlite::Result<PostmarkImage> {
    Ok(PostmarkImage {
        id: row.get("id")?,
        postmark_id: row.get("postmark_id")?,
        image_view: get_parsed(row, "image_view", PostmarkImageView::parse)?,
        file: image_file_from_row(row)?,
        audit: get_audit(row)?,
    })
}

fn postcover_from_row(row: &Row<'_>) -> rusqlite::Result<Postcover> {
    Ok(Postcover {
        id: row.get("id")?,
        owner: row.get("owner_id")?,
        postcover_key: row.get("postcover_key")?,
        description: row.get("description")?,
        audit: get_audit(row)?,
    })
}

// ============================================================================
// SQLITE STORE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthTable {
    Users,
    Groups,
}

/// SQLite-backed store over a borrowed connection (or transaction).
pub struct SqliteStore<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteStore<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn connection(&self) -> &'conn Connection {
        self.conn
    }

    fn query_rows<T, P>(
        &self,
        sql: &str,
        params: P,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Vec<T>>
    where
        P: rusqlite::Params,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, |row| map(row))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_one<T, P>(
        &self,
        sql: &str,
        params: P,
        map: fn(&Row<'_>) -> rusqlite::Result<T>,
    ) -> StoreResult<Option<T>>
    where
        P: rusqlite::Params,
    {
        Ok(self.conn.query_row(sql, params, |row| map(row)).optional()?)
    }

    fn count(&self, sql: &str, id: i64) -> StoreResult<i64> {
        Ok(self.conn.query_row(sql, [id], |row| row.get(0))?)
    }

    fn audit_params(audit: &AuditStamp) -> (UserId, String, UserId, String) {
        (
            audit.created_by,
            audit.created_at.to_rfc3339(),
            audit.modified_by,
            audit.modified_at.to_rfc3339(),
        )
    }

    // ------------------------------------------------------------------------
    // Full-table reads (export, listings)
    // ------------------------------------------------------------------------

    pub fn all_facilities(&self) -> StoreResult<Vec<PostalFacility>> {
        self.query_rows("SELECT * FROM postal_facilities ORDER BY id", [], facility_from_row)
    }

    pub fn all_facility_identities(&self) -> StoreResult<Vec<PostalFacilityIdentity>> {
        self.query_rows(
            "SELECT * FROM postal_facility_identities ORDER BY id",
            [],
            facility_identity_from_row,
        )
    }

    pub fn all_units(&self) -> StoreResult<Vec<AdministrativeUnit>> {
        self.query_rows("SELECT * FROM administrative_units ORDER BY id", [], unit_from_row)
    }

    pub fn all_affiliations(&self) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        self.query_rows(
            "SELECT * FROM jurisdictional_affiliations ORDER BY id",
            [],
            affiliation_from_row,
        )
    }

    pub fn all_responsibilities(&self) -> StoreResult<Vec<UnitResponsibility>> {
        self.query_rows(
            "SELECT * FROM unit_responsibilities ORDER BY id",
            [],
            responsibility_from_row,
        )
    }

    pub fn groups(&self) -> StoreResult<Vec<Group>> {
        self.query_rows("SELECT * FROM auth_groups ORDER BY id", [], group_from_row)
    }

    pub fn users(&self) -> StoreResult<Vec<User>> {
        let mut users = self.query_rows("SELECT * FROM auth_users ORDER BY id", [], user_from_row)?;
        let memberships = self.user_groups()?;
        for user in &mut users {
            if let Some(groups) = memberships.get(&user.id) {
                user.groups = groups.clone();
            }
        }
        Ok(users)
    }

    pub fn user_by_username(&self, username: &str) -> StoreResult<Option<User>> {
        let user = self.query_one(
            "SELECT * FROM auth_users WHERE username = ?1",
            [username],
            user_from_row,
        )?;
        match user {
            Some(mut user) => {
                user.groups = self.user_groups()?.remove(&user.id).unwrap_or_default();
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn user_groups(&self) -> StoreResult<HashMap<UserId, Vec<GroupId>>> {
        let mut stmt = self
            .conn
            .prepare("SELECT user_id, group_id FROM auth_user_groups ORDER BY user_id, group_id")?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, UserId>(0)?, row.get::<_, GroupId>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut by_user: HashMap<UserId, Vec<GroupId>> = HashMap::new();
        for (user_id, group_id) in pairs {
            by_user.entry(user_id).or_default().push(group_id);
        }
        Ok(by_user)
    }

    pub fn postmarks(&self) -> StoreResult<Vec<Postmark>> {
        self.query_rows("SELECT * FROM postmarks ORDER BY postmark_key", [], postmark_from_row)
    }

    pub fn lookups(&self, kind: LookupKind) -> StoreResult<Vec<LookupEntry>> {
        let sql = format!("SELECT * FROM {} ORDER BY name", kind.table());
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LookupEntry {
                    id: row.get("id")?,
                    kind,
                    name: row.get("name")?,
                    description: row.get("description")?,
                    audit: get_audit(row)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn lookup_exists(&self, kind: LookupKind, id: LookupId) -> StoreResult<bool> {
        let sql = format!("SELECT COUNT(*) FROM {} WHERE id = ?1", kind.table());
        Ok(self.count(&sql, id.get())? > 0)
    }

    pub fn colors(&self) -> StoreResult<Vec<Color>> {
        self.query_rows("SELECT * FROM colors ORDER BY color_name", [], color_from_row)
    }

    pub fn color(&self, id: ColorId) -> StoreResult<Option<Color>> {
        self.query_one("SELECT * FROM colors WHERE id = ?1", [id], color_from_row)
    }

    pub fn publications(&self) -> StoreResult<Vec<PostmarkPublication>> {
        self.query_rows(
            "SELECT * FROM postmark_publications ORDER BY publication_date DESC",
            [],
            publication_from_row,
        )
    }

    pub fn publication(&self, id: PublicationId) -> StoreResult<Option<PostmarkPublication>> {
        self.query_one(
            "SELECT * FROM postmark_publications WHERE id = ?1",
            [id],
            publication_from_row,
        )
    }

    pub fn postmark_image(&self, id: i64) -> StoreResult<Option<PostmarkImage>> {
        self.query_one("SELECT * FROM postmark_images WHERE id = ?1", [id], postmark_image_from_row)
    }

    pub fn postmark_images(&self, postmark_id: PostmarkId) -> StoreResult<Vec<PostmarkImage>> {
        self.query_rows(
            "SELECT * FROM postmark_images WHERE postmark_id = ?1 ORDER BY display_order, id",
            [postmark_id],
            postmark_image_from_row,
        )
    }

    pub fn postcover(&self, id: PostcoverId) -> StoreResult<Option<Postcover>> {
        self.query_one("SELECT * FROM postcovers WHERE id = ?1", [id], postcover_from_row)
    }

    pub fn postcovers_owned_by(&self, owner: UserId) -> StoreResult<Vec<Postcover>> {
        self.query_rows(
            "SELECT * FROM postcovers WHERE owner_id = ?1 ORDER BY postcover_key",
            [owner],
            postcover_from_row,
        )
    }

    /// Postmarks joined with the data the search filters look at.
    pub fn postmark_listings(&self) -> StoreResult<Vec<PostmarkListing>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.*, i.facility_name AS listing_facility_name,
                    f.reference_code AS listing_facility_reference
             FROM postmarks p
             JOIN postal_facility_identities i ON i.id = p.facility_identity_id
             JOIN postal_facilities f ON f.id = i.facility_id
             ORDER BY p.postmark_key",
        )?;
        let mut listings = stmt
            .query_map([], |row| {
                Ok(PostmarkListing {
                    postmark: postmark_from_row(row)?,
                    facility_name: row.get("listing_facility_name")?,
                    facility_reference: row.get("listing_facility_reference")?,
                    colors: Vec::new(),
                    dates_seen: Vec::new(),
                    valuations: Vec::new(),
                    image_count: 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let index: HashMap<PostmarkId, usize> = listings
            .iter()
            .enumerate()
            .map(|(i, l)| (l.postmark.id, i))
            .collect();

        let mut stmt = self.conn.prepare(
            "SELECT pc.postmark_id, c.color_name FROM postmark_colors pc
             JOIN colors c ON c.id = pc.color_id ORDER BY c.color_name",
        )?;
        let colors = stmt
            .query_map([], |row| Ok((row.get::<_, PostmarkId>(0)?, row.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (postmark_id, name) in colors {
            if let Some(&i) = index.get(&postmark_id) {
                listings[i].colors.push(name);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT postmark_id, earliest_date_seen, latest_date_seen FROM postmark_dates_seen
             ORDER BY earliest_date_seen",
        )?;
        let dates = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, PostmarkId>("postmark_id")?,
                    get_date(row, "earliest_date_seen")?,
                    get_date(row, "latest_date_seen")?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (postmark_id, earliest, latest) in dates {
            if let Some(&i) = index.get(&postmark_id) {
                listings[i].dates_seen.push((earliest, latest));
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT postmark_id, estimated_value FROM postmark_valuations")?;
        let values = stmt
            .query_map([], |row| Ok((row.get::<_, PostmarkId>(0)?, row.get::<_, f64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (postmark_id, value) in values {
            if let Some(&i) = index.get(&postmark_id) {
                listings[i].valuations.push(value);
            }
        }

        let mut stmt = self
            .conn
            .prepare("SELECT postmark_id, COUNT(*) FROM postmark_images GROUP BY postmark_id")?;
        let counts = stmt
            .query_map([], |row| Ok((row.get::<_, PostmarkId>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (postmark_id, count) in counts {
            if let Some(&i) = index.get(&postmark_id) {
                listings[i].image_count = count as usize;
            }
        }

        Ok(listings)
    }

    pub fn postcover_listings(&self) -> StoreResult<Vec<PostcoverListing>> {
        let covers = self.query_rows("SELECT * FROM postcovers ORDER BY postcover_key", [], postcover_from_row)?;
        let mut stmt = self.conn.prepare(
            "SELECT postcover_id, postmark_id FROM postcover_postmarks ORDER BY postcover_id, position_order",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get::<_, PostcoverId>(0)?, row.get::<_, PostmarkId>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        let mut by_cover: HashMap<PostcoverId, Vec<PostmarkId>> = HashMap::new();
        for (cover_id, postmark_id) in pairs {
            by_cover.entry(cover_id).or_default().push(postmark_id);
        }
        Ok(covers
            .into_iter()
            .map(|postcover| PostcoverListing {
                postmark_ids: by_cover.remove(&postcover.id).unwrap_or_default(),
                postcover,
            })
            .collect())
    }

    // ------------------------------------------------------------------------
    // Writes: access control
    // ------------------------------------------------------------------------

    pub fn insert_group(&self, group: &Group) -> StoreResult<GroupId> {
        self.conn.execute(
            "INSERT INTO auth_groups (id, name, permissions) VALUES (?1, ?2, ?3)",
            params![id_param(group.id.get()), group.name, serde_json::to_string(&group.permissions)?],
        )?;
        Ok(GroupId(self.conn.last_insert_rowid()))
    }

    pub fn insert_user(&self, user: &User) -> StoreResult<UserId> {
        self.conn.execute(
            "INSERT INTO auth_users (
                id, username, password, email, first_name, last_name,
                is_active, is_staff, is_superuser, last_login, date_joined, user_permissions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id_param(user.id.get()),
                user.username,
                user.password,
                user.email,
                user.first_name,
                user.last_name,
                user.is_active,
                user.is_staff,
                user.is_superuser,
                user.last_login.map(|dt| dt.to_rfc3339()),
                user.date_joined.to_rfc3339(),
                serde_json::to_string(&user.user_permissions)?,
            ],
        )?;
        let id = UserId(self.conn.last_insert_rowid());
        for group_id in &user.groups {
            self.conn.execute(
                "INSERT OR IGNORE INTO auth_user_groups (user_id, group_id) VALUES (?1, ?2)",
                params![id, group_id],
            )?;
        }
        Ok(id)
    }

    pub fn update_group(&self, group: &Group) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE auth_groups SET name = ?2, permissions = ?3 WHERE id = ?1",
            params![group.id, group.name, serde_json::to_string(&group.permissions)?],
        )?;
        Ok(())
    }

    /// Rewrite a user row and replace its group memberships.
    pub fn update_user(&self, user: &User) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE auth_users
             SET username = ?2, password = ?3, email = ?4, first_name = ?5, last_name = ?6,
                 is_active = ?7, is_staff = ?8, is_superuser = ?9, last_login = ?10,
                 date_joined = ?11, user_permissions = ?12
             WHERE id = ?1",
            params![
                user.id,
                user.username,
                user.password,
                user.email,
                user.first_name,
                user.last_name,
                user.is_active,
                user.is_staff,
                user.is_superuser,
                user.last_login.map(|dt| dt.to_rfc3339()),
                user.date_joined.to_rfc3339(),
                serde_json::to_string(&user.user_permissions)?,
            ],
        )?;
        self.conn
            .execute("DELETE FROM auth_user_groups WHERE user_id = ?1", [user.id])?;
        for group_id in &user.groups {
            self.conn.execute(
                "INSERT OR IGNORE INTO auth_user_groups (user_id, group_id) VALUES (?1, ?2)",
                params![user.id, group_id],
            )?;
        }
        Ok(())
    }

    /// Name of the row with this id, if any (users: username, groups: name).
    pub fn auth_name(&self, table: AuthTable, id: i64) -> StoreResult<Option<String>> {
        let sql = match table {
            AuthTable::Users => "SELECT username FROM auth_users WHERE id = ?1",
            AuthTable::Groups => "SELECT name FROM auth_groups WHERE id = ?1",
        };
        Ok(self.conn.query_row(sql, [id], |row| row.get(0)).optional()?)
    }

    // ------------------------------------------------------------------------
    // Writes: temporal core
    // ------------------------------------------------------------------------

    pub fn insert_facility(&self, facility: &PostalFacility) -> StoreResult<FacilityId> {
        let (cb, ca, mb, ma) = Self::audit_params(&facility.audit);
        self.conn.execute(
            "INSERT INTO postal_facilities (
                id, reference_code, latitude, longitude,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id_param(facility.id.get()),
                facility.reference_code,
                facility.latitude,
                facility.longitude,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(FacilityId(self.conn.last_insert_rowid()))
    }

    pub fn update_facility(&self, facility: &PostalFacility) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE postal_facilities
             SET latitude = ?2, longitude = ?3, modified_by = ?4, modified_at = ?5
             WHERE id = ?1",
            params![
                facility.id,
                facility.latitude,
                facility.longitude,
                facility.audit.modified_by,
                facility.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_facility_identity(
        &self,
        identity: &PostalFacilityIdentity,
    ) -> StoreResult<FacilityIdentityId> {
        let (cb, ca, mb, ma) = Self::audit_params(&identity.audit);
        self.conn.execute(
            "INSERT INTO postal_facility_identities (
                id, facility_id, effective_from, effective_to, facility_name, facility_type,
                is_operational, discontinuation_reason, latitude, longitude, notes,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id_param(identity.id.get()),
                identity.facility_id,
                date_text(identity.interval.effective_from),
                opt_date_text(identity.interval.effective_to),
                identity.facility_name,
                identity.facility_type.as_str(),
                identity.is_operational,
                identity.discontinuation_reason,
                identity.latitude,
                identity.longitude,
                identity.notes,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(FacilityIdentityId(self.conn.last_insert_rowid()))
    }

    /// Rewrite every mutable column of an existing identity.
    pub fn update_facility_identity(&self, identity: &PostalFacilityIdentity) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE postal_facility_identities
             SET effective_from = ?2, effective_to = ?3, facility_name = ?4, facility_type = ?5,
                 is_operational = ?6, discontinuation_reason = ?7, latitude = ?8, longitude = ?9,
                 notes = ?10, modified_by = ?11, modified_at = ?12
             WHERE id = ?1",
            params![
                identity.id,
                date_text(identity.interval.effective_from),
                opt_date_text(identity.interval.effective_to),
                identity.facility_name,
                identity.facility_type.as_str(),
                identity.is_operational,
                identity.discontinuation_reason,
                identity.latitude,
                identity.longitude,
                identity.notes,
                identity.audit.modified_by,
                identity.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_unit(&self, unit: &AdministrativeUnit) -> StoreResult<UnitId> {
        let (cb, ca, mb, ma) = Self::audit_params(&unit.audit);
        self.conn.execute(
            "INSERT INTO administrative_units (
                id, reference_code, created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id_param(unit.id.get()), unit.reference_code, cb, ca, mb, ma],
        )?;
        Ok(UnitId(self.conn.last_insert_rowid()))
    }

    pub fn insert_unit_identity(
        &self,
        identity: &AdministrativeUnitIdentity,
    ) -> StoreResult<UnitIdentityId> {
        let (cb, ca, mb, ma) = Self::audit_params(&identity.audit);
        self.conn.execute(
            "INSERT INTO administrative_unit_identities (
                id, unit_id, parent_unit_id, effective_from, effective_to, unit_name,
                unit_abbreviation, unit_type, hierarchy_level, change_reason,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                id_param(identity.id.get()),
                identity.unit_id,
                identity.parent_unit_id,
                date_text(identity.interval.effective_from),
                opt_date_text(identity.interval.effective_to),
                identity.unit_name,
                identity.unit_abbreviation,
                identity.unit_type.as_str(),
                identity.hierarchy_level,
                identity.change_reason.as_str(),
                cb, ca, mb, ma,
            ],
        )?;
        Ok(UnitIdentityId(self.conn.last_insert_rowid()))
    }

    pub fn update_unit_identity(&self, identity: &AdministrativeUnitIdentity) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE administrative_unit_identities
             SET parent_unit_id = ?2, effective_from = ?3, effective_to = ?4, unit_name = ?5,
                 unit_abbreviation = ?6, unit_type = ?7, hierarchy_level = ?8,
                 change_reason = ?9, modified_by = ?10, modified_at = ?11
             WHERE id = ?1",
            params![
                identity.id,
                identity.parent_unit_id,
                date_text(identity.interval.effective_from),
                opt_date_text(identity.interval.effective_to),
                identity.unit_name,
                identity.unit_abbreviation,
                identity.unit_type.as_str(),
                identity.hierarchy_level,
                identity.change_reason.as_str(),
                identity.audit.modified_by,
                identity.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn unit_identity(&self, id: UnitIdentityId) -> StoreResult<Option<AdministrativeUnitIdentity>> {
        self.query_one(
            "SELECT * FROM administrative_unit_identities WHERE id = ?1",
            [id],
            unit_identity_from_row,
        )
    }

    pub fn insert_affiliation(&self, affiliation: &JurisdictionalAffiliation) -> StoreResult<AffiliationId> {
        let (cb, ca, mb, ma) = Self::audit_params(&affiliation.audit);
        self.conn.execute(
            "INSERT INTO jurisdictional_affiliations (
                id, facility_identity_id, unit_id, effective_from, effective_to,
                affiliation_source, created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id_param(affiliation.id.get()),
                affiliation.facility_identity_id,
                affiliation.unit_id,
                date_text(affiliation.interval.effective_from),
                opt_date_text(affiliation.interval.effective_to),
                affiliation.affiliation_source,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(AffiliationId(self.conn.last_insert_rowid()))
    }

    pub fn update_affiliation(&self, affiliation: &JurisdictionalAffiliation) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE jurisdictional_affiliations
             SET unit_id = ?2, effective_from = ?3, effective_to = ?4, affiliation_source = ?5,
                 modified_by = ?6, modified_at = ?7
             WHERE id = ?1",
            params![
                affiliation.id,
                affiliation.unit_id,
                date_text(affiliation.interval.effective_from),
                opt_date_text(affiliation.interval.effective_to),
                affiliation.affiliation_source,
                affiliation.audit.modified_by,
                affiliation.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn affiliation(&self, id: AffiliationId) -> StoreResult<Option<JurisdictionalAffiliation>> {
        self.query_one(
            "SELECT * FROM jurisdictional_affiliations WHERE id = ?1",
            [id],
            affiliation_from_row,
        )
    }

    pub fn insert_responsibility(&self, responsibility: &UnitResponsibility) -> StoreResult<ResponsibilityId> {
        let (cb, ca, mb, ma) = Self::audit_params(&responsibility.audit);
        self.conn.execute(
            "INSERT INTO unit_responsibilities (
                id, unit_id, group_id, is_active, notes,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                id_param(responsibility.id.get()),
                responsibility.unit_id,
                responsibility.group_id,
                responsibility.is_active,
                responsibility.notes,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(ResponsibilityId(self.conn.last_insert_rowid()))
    }

    pub fn update_responsibility(&self, responsibility: &UnitResponsibility) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE unit_responsibilities
             SET is_active = ?2, notes = ?3, modified_by = ?4, modified_at = ?5
             WHERE id = ?1",
            params![
                responsibility.id,
                responsibility.is_active,
                responsibility.notes,
                responsibility.audit.modified_by,
                responsibility.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn responsibility(&self, unit_id: UnitId, group_id: GroupId) -> StoreResult<Option<UnitResponsibility>> {
        self.query_one(
            "SELECT * FROM unit_responsibilities WHERE unit_id = ?1 AND group_id = ?2",
            params![unit_id, group_id],
            responsibility_from_row,
        )
    }

    // ------------------------------------------------------------------------
    // Protected deletes
    // ------------------------------------------------------------------------

    pub fn delete_facility(&self, id: FacilityId) -> CatalogResult<()> {
        let identities = self.count(
            "SELECT COUNT(*) FROM postal_facility_identities WHERE facility_id = ?1",
            id.get(),
        )?;
        if identities > 0 {
            return Err(CatalogError::Protected {
                kind: "postal facility",
                id: id.to_string(),
                referenced_by: "postal_facility_identities",
            });
        }
        if self.conn.execute("DELETE FROM postal_facilities WHERE id = ?1", [id])? == 0 {
            return Err(CatalogError::not_found("Postal facility", id));
        }
        Ok(())
    }

    pub fn delete_unit(&self, id: UnitId) -> CatalogResult<()> {
        let checks: [(&str, &'static str); 3] = [
            (
                "SELECT COUNT(*) FROM administrative_unit_identities WHERE unit_id = ?1",
                "administrative_unit_identities",
            ),
            (
                "SELECT COUNT(*) FROM administrative_unit_identities WHERE parent_unit_id = ?1",
                "administrative_unit_identities.parent_unit_id",
            ),
            (
                "SELECT COUNT(*) FROM jurisdictional_affiliations WHERE unit_id = ?1",
                "jurisdictional_affiliations",
            ),
        ];
        for (sql, referenced_by) in checks {
            if self.count(sql, id.get())? > 0 {
                return Err(CatalogError::Protected {
                    kind: "administrative unit",
                    id: id.to_string(),
                    referenced_by,
                });
            }
        }
        if self.conn.execute("DELETE FROM administrative_units WHERE id = ?1", [id])? == 0 {
            return Err(CatalogError::not_found("Administrative unit", id));
        }
        Ok(())
    }

    /// Affiliations reference their unit weakly: removing one never touches the unit.
    pub fn delete_affiliation(&self, id: AffiliationId) -> CatalogResult<()> {
        if self
            .conn
            .execute("DELETE FROM jurisdictional_affiliations WHERE id = ?1", [id])?
            == 0
        {
            return Err(CatalogError::not_found("Jurisdictional affiliation", id));
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Writes: catalog
    // ------------------------------------------------------------------------

    pub fn insert_lookup(&self, entry: &LookupEntry) -> StoreResult<LookupId> {
        let (cb, ca, mb, ma) = Self::audit_params(&entry.audit);
        let sql = format!(
            "INSERT INTO {} (id, name, description, created_by, created_at, modified_by, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            entry.kind.table()
        );
        self.conn.execute(
            &sql,
            params![id_param(entry.id.get()), entry.name, entry.description, cb, ca, mb, ma],
        )?;
        Ok(LookupId(self.conn.last_insert_rowid()))
    }

    pub fn insert_color(&self, color: &Color) -> StoreResult<ColorId> {
        let (cb, ca, mb, ma) = Self::audit_params(&color.audit);
        self.conn.execute(
            "INSERT INTO colors (id, color_name, color_value, created_by, created_at, modified_by, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![id_param(color.id.get()), color.color_name, color.color_value, cb, ca, mb, ma],
        )?;
        Ok(ColorId(self.conn.last_insert_rowid()))
    }

    pub fn insert_postmark(&self, postmark: &Postmark) -> StoreResult<PostmarkId> {
        let (cb, ca, mb, ma) = Self::audit_params(&postmark.audit);
        self.conn.execute(
            "INSERT INTO postmarks (
                id, facility_identity_id, shape_id, lettering_style_id, framing_style_id,
                date_format_id, postmark_key, rate_location, rate_value, is_manuscript,
                other_characteristics, created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                id_param(postmark.id.get()),
                postmark.facility_identity_id,
                postmark.shape_id,
                postmark.lettering_style_id,
                postmark.framing_style_id,
                postmark.date_format_id,
                postmark.postmark_key,
                postmark.rate_location.as_str(),
                postmark.rate_value,
                postmark.is_manuscript,
                postmark.other_characteristics,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(PostmarkId(self.conn.last_insert_rowid()))
    }

    pub fn update_postmark(&self, postmark: &Postmark) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE postmarks
             SET facility_identity_id = ?2, shape_id = ?3, lettering_style_id = ?4,
                 framing_style_id = ?5, date_format_id = ?6, postmark_key = ?7,
                 rate_location = ?8, rate_value = ?9, is_manuscript = ?10,
                 other_characteristics = ?11, modified_by = ?12, modified_at = ?13
             WHERE id = ?1",
            params![
                postmark.id,
                postmark.facility_identity_id,
                postmark.shape_id,
                postmark.lettering_style_id,
                postmark.framing_style_id,
                postmark.date_format_id,
                postmark.postmark_key,
                postmark.rate_location.as_str(),
                postmark.rate_value,
                postmark.is_manuscript,
                postmark.other_characteristics,
                postmark.audit.modified_by,
                postmark.audit.modified_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_postmark_color(&self, link: &PostmarkColor) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&link.audit);
        self.conn.execute(
            "INSERT INTO postmark_colors (postmark_id, color_id, created_by, created_at, modified_by, modified_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![link.postmark_id, link.color_id, cb, ca, mb, ma],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_dates_seen(&self, dates: &PostmarkDatesSeen) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&dates.audit);
        self.conn.execute(
            "INSERT INTO postmark_dates_seen (
                postmark_id, earliest_date_seen, latest_date_seen,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                dates.postmark_id,
                date_text(dates.earliest_date_seen),
                date_text(dates.latest_date_seen),
                cb, ca, mb, ma,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_size(&self, size: &PostmarkSize) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&size.audit);
        self.conn.execute(
            "INSERT INTO postmark_sizes (
                postmark_id, width, height, size_notes,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![size.postmark_id, size.width, size.height, size.size_notes, cb, ca, mb, ma],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_valuation(&self, valuation: &PostmarkValuation) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&valuation.audit);
        self.conn.execute(
            "INSERT INTO postmark_valuations (
                postmark_id, valued_by, estimated_value, valuation_date,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                valuation.postmark_id,
                valuation.valued_by,
                valuation.estimated_value,
                date_text(valuation.valuation_date),
                cb, ca, mb, ma,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_publication(&self, publication: &PostmarkPublication) -> StoreResult<PublicationId> {
        let (cb, ca, mb, ma) = Self::audit_params(&publication.audit);
        self.conn.execute(
            "INSERT INTO postmark_publications (
                id, publication_title, author, publisher, publication_date, isbn, edition,
                publication_type, created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                id_param(publication.id.get()),
                publication.publication_title,
                publication.author,
                publication.publisher,
                date_text(publication.publication_date),
                publication.isbn,
                publication.edition,
                publication.publication_type.as_str(),
                cb, ca, mb, ma,
            ],
        )?;
        Ok(PublicationId(self.conn.last_insert_rowid()))
    }

    pub fn insert_publication_reference(&self, reference: &PublicationReference) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&reference.audit);
        self.conn.execute(
            "INSERT INTO postmark_publication_references (
                postmark_id, publication_id, published_id, reference_location,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                reference.postmark_id,
                reference.publication_id,
                reference.published_id,
                reference.reference_location,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn insert_image(
        &self,
        table: &str,
        owner_column: &str,
        owner_id: i64,
        image_view: &str,
        file: &ImageFile,
        audit: &AuditStamp,
    ) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(audit);
        let sql = format!(
            "INSERT INTO {} (
                {}, image_view, original_filename, storage_filename, file_checksum, mime_type,
                image_width, image_height, file_size_bytes, image_description, display_order,
                uploaded_by, created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            table, owner_column
        );
        self.conn.execute(
            &sql,
            params![
                owner_id,
                image_view,
                file.original_filename,
                file.storage_filename,
                file.file_checksum,
                file.mime_type,
                file.image_width,
                file.image_height,
                file.file_size_bytes,
                file.image_description,
                file.display_order,
                file.uploaded_by,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_postmark_image(&self, image: &PostmarkImage) -> StoreResult<i64> {
        self.insert_image(
            "postmark_images",
            "postmark_id",
            image.postmark_id.get(),
            image.image_view.as_str(),
            &image.file,
            &image.audit,
        )
    }

    pub fn touch_postmark_image(&self, image: &PostmarkImage) -> StoreResult<()> {
        self.conn.execute(
            "UPDATE postmark_images SET modified_by = ?2, modified_at = ?3 WHERE id = ?1",
            params![image.id, image.audit.modified_by, image.audit.modified_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn insert_postcover(&self, postcover: &Postcover) -> StoreResult<PostcoverId> {
        let (cb, ca, mb, ma) = Self::audit_params(&postcover.audit);
        self.conn.execute(
            "INSERT INTO postcovers (
                id, owner_id, postcover_key, description,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                id_param(postcover.id.get()),
                postcover.owner,
                postcover.postcover_key,
                postcover.description,
                cb, ca, mb, ma,
            ],
        )?;
        Ok(PostcoverId(self.conn.last_insert_rowid()))
    }

    pub fn insert_postcover_postmark(&self, link: &PostcoverPostmark) -> StoreResult<i64> {
        let (cb, ca, mb, ma) = Self::audit_params(&link.audit);
        self.conn.execute(
            "INSERT INTO postcover_postmarks (
                postcover_id, postmark_id, position_order, postmark_location,
                created_by, created_at, modified_by, modified_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                link.postcover_id,
                link.postmark_id,
                link.position_order,
                link.postmark_location.as_str(),
                cb, ca, mb, ma,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn postcover_postmarks(&self, postcover_id: PostcoverId) -> StoreResult<Vec<PostcoverPostmark>> {
        self.query_rows(
            "SELECT * FROM postcover_postmarks WHERE postcover_id = ?1 ORDER BY position_order",
            [postcover_id],
            |row| {
                Ok(PostcoverPostmark {
                    id: row.get("id")?,
                    postcover_id: row.get("postcover_id")?,
                    postmark_id: row.get("postmark_id")?,
                    position_order: row.get("position_order")?,
                    postmark_location: get_parsed(row, "postmark_location", PostmarkLocation::parse)?,
                    audit: get_audit(row)?,
                })
            },
        )
    }

    pub fn insert_postcover_image(&self, image: &PostcoverImage) -> StoreResult<i64> {
        self.insert_image(
            "postcover_images",
            "postcover_id",
            image.postcover_id.get(),
            image.image_view.as_str(),
            &image.file,
            &image.audit,
        )
    }

    pub fn postcover_images(&self, postcover_id: PostcoverId) -> StoreResult<Vec<PostcoverImage>> {
        self.query_rows(
            "SELECT * FROM postcover_images WHERE postcover_id = ?1 ORDER BY display_order, id",
            [postcover_id],
            |row| {
                Ok(PostcoverImage {
                    id: row.get("id")?,
                    postcover_id: row.get("postcover_id")?,
                    image_view: get_parsed(row, "image_view", PostcoverImageView::parse)?,
                    file: image_file_from_row(row)?,
                    audit: get_audit(row)?,
                })
            },
        )
    }
}

impl TemporalStore for SqliteStore<'_> {
    fn facility(&self, id: FacilityId) -> StoreResult<Option<PostalFacility>> {
        self.query_one("SELECT * FROM postal_facilities WHERE id = ?1", [id], facility_from_row)
    }

    fn facility_by_reference(&self, reference_code: &str) -> StoreResult<Option<PostalFacility>> {
        self.query_one(
            "SELECT * FROM postal_facilities WHERE reference_code = ?1",
            [reference_code],
            facility_from_row,
        )
    }

    fn facility_identities(&self, facility_id: FacilityId) -> StoreResult<Vec<PostalFacilityIdentity>> {
        self.query_rows(
            "SELECT * FROM postal_facility_identities WHERE facility_id = ?1",
            [facility_id],
            facility_identity_from_row,
        )
    }

    fn facility_identity(&self, id: FacilityIdentityId) -> StoreResult<Option<PostalFacilityIdentity>> {
        self.query_one(
            "SELECT * FROM postal_facility_identities WHERE id = ?1",
            [id],
            facility_identity_from_row,
        )
    }

    fn unit(&self, id: UnitId) -> StoreResult<Option<AdministrativeUnit>> {
        self.query_one("SELECT * FROM administrative_units WHERE id = ?1", [id], unit_from_row)
    }

    fn unit_by_reference(&self, reference_code: &str) -> StoreResult<Option<AdministrativeUnit>> {
        self.query_one(
            "SELECT * FROM administrative_units WHERE reference_code = ?1",
            [reference_code],
            unit_from_row,
        )
    }

    fn unit_identities(&self, unit_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        self.query_rows(
            "SELECT * FROM administrative_unit_identities WHERE unit_id = ?1",
            [unit_id],
            unit_identity_from_row,
        )
    }

    fn child_unit_identities(&self, parent_id: UnitId) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        self.query_rows(
            "SELECT * FROM administrative_unit_identities WHERE parent_unit_id = ?1",
            [parent_id],
            unit_identity_from_row,
        )
    }

    fn all_unit_identities(&self) -> StoreResult<Vec<AdministrativeUnitIdentity>> {
        self.query_rows(
            "SELECT * FROM administrative_unit_identities ORDER BY id",
            [],
            unit_identity_from_row,
        )
    }

    fn affiliations_for_identity(
        &self,
        identity_id: FacilityIdentityId,
    ) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        self.query_rows(
            "SELECT * FROM jurisdictional_affiliations WHERE facility_identity_id = ?1",
            [identity_id],
            affiliation_from_row,
        )
    }

    fn affiliations_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<JurisdictionalAffiliation>> {
        self.query_rows(
            "SELECT * FROM jurisdictional_affiliations WHERE unit_id = ?1",
            [unit_id],
            affiliation_from_row,
        )
    }

    fn responsibilities_for_unit(&self, unit_id: UnitId) -> StoreResult<Vec<UnitResponsibility>> {
        self.query_rows(
            "SELECT * FROM unit_responsibilities WHERE unit_id = ?1",
            [unit_id],
            responsibility_from_row,
        )
    }

    fn responsibilities_for_groups(&self, group_ids: &[GroupId]) -> StoreResult<Vec<UnitResponsibility>> {
        if group_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; group_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM unit_responsibilities WHERE group_id IN ({})",
            placeholders
        );
        self.query_rows(&sql, params_from_iter(group_ids.iter()), responsibility_from_row)
    }

    fn group(&self, id: GroupId) -> StoreResult<Option<Group>> {
        self.query_one("SELECT * FROM auth_groups WHERE id = ?1", [id], group_from_row)
    }

    fn postmark(&self, id: PostmarkId) -> StoreResult<Option<Postmark>> {
        self.query_one("SELECT * FROM postmarks WHERE id = ?1", [id], postmark_from_row)
    }

    fn postmarks_for_identities(&self, identity_ids: &[FacilityIdentityId]) -> StoreResult<Vec<Postmark>> {
        if identity_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; identity_ids.len()].join(", ");
        let sql = format!(
            "SELECT * FROM postmarks WHERE facility_identity_id IN ({}) ORDER BY postmark_key",
            placeholders
        );
        self.query_rows(&sql, params_from_iter(identity_ids.iter()), postmark_from_row)
    }
}

// ============================================================================
// HISTORY (snapshot-on-write)
// ============================================================================

/// Append a history snapshot.
pub fn insert_history_event(conn: &Connection, event: &HistoryEvent) -> StoreResult<()> {
    let snapshot_json = serde_json::to_string(&event.snapshot)?;

    conn.execute(
        "INSERT INTO history_events (
            event_id, timestamp, action, entity_kind, entity_id, snapshot, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.action.as_str(),
            event.kind.as_str(),
            event.entity_id,
            snapshot_json,
            event.actor,
        ],
    )?;

    Ok(())
}

/// History of one entity, newest first.
pub fn get_history_for_entity(
    conn: &Connection,
    kind: VersionedKind,
    entity_id: i64,
) -> StoreResult<Vec<HistoryEvent>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, action, entity_kind, entity_id, snapshot, actor
         FROM history_events
         WHERE entity_kind = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;

    let rows = stmt
        .query_map(params![kind.as_str(), entity_id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, UserId>(6)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut events = Vec::with_capacity(rows.len());
    for (event_id, timestamp, action, entity_id, snapshot, actor) in rows {
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| StoreError::InvalidData {
                table: "history_events",
                reason: format!("bad timestamp '{}': {}", timestamp, e),
            })?
            .with_timezone(&Utc);
        let action = HistoryAction::parse(&action).ok_or_else(|| StoreError::InvalidData {
            table: "history_events",
            reason: format!("unknown action '{}'", action),
        })?;
        events.push(HistoryEvent {
            event_id,
            timestamp,
            action,
            kind,
            entity_id,
            snapshot: serde_json::from_str(&snapshot)?,
            actor,
        });
    }

    Ok(events)
}
