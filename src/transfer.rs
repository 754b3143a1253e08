// 📦 CSV export / import
//
// One file per table, keyed by surrogate id, related rows referenced by id.
// Group permissions, user permissions and user groups are ';'-separated
// lists (user groups by group name). Users are matched on (id, username)
// and groups on (id, name): a match is updated, anything else inserted.
// Every other row is inserted with its exported id.
//
// Import runs in one transaction, in dependency order, and bypasses the
// write-time overlap checks so legacy data loads as-is. Empty or inverted
// windows are kept too; they simply never contain a date.

use chrono::{DateTime, NaiveDate, Utc};
use log::{info, warn};
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use thiserror::Error;

use crate::access::{Group, GroupId, User, UserId};
use crate::audit::AuditStamp;
use crate::catalog::{Color, ColorId, LookupEntry, LookupId, LookupKind, Postmark, PostmarkId, RateLocation};
use crate::db::{AuthTable, SqliteStore};
use crate::entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, AffiliationId, ChangeReason, FacilityId,
    FacilityIdentityId, FacilityType, JurisdictionalAffiliation, PostalFacility,
    PostalFacilityIdentity, ResponsibilityId, UnitId, UnitIdentityId, UnitResponsibility,
    UnitType,
};
use crate::error::StoreError;
use crate::store::TemporalStore;
use crate::temporal::{EffectiveInterval, DATE_FORMAT};

pub const GROUPS_FILE: &str = "groups.csv";
pub const USERS_FILE: &str = "users.csv";
pub const UNITS_FILE: &str = "administrative_units.csv";
pub const UNIT_IDENTITIES_FILE: &str = "administrative_unit_identities.csv";
pub const RESPONSIBILITIES_FILE: &str = "unit_responsibilities.csv";
pub const FACILITIES_FILE: &str = "postal_facilities.csv";
pub const FACILITY_IDENTITIES_FILE: &str = "postal_facility_identities.csv";
pub const AFFILIATIONS_FILE: &str = "jurisdictional_affiliations.csv";
pub const SHAPES_FILE: &str = "postmark_shapes.csv";
pub const LETTERING_STYLES_FILE: &str = "lettering_styles.csv";
pub const FRAMING_STYLES_FILE: &str = "framing_styles.csv";
pub const DATE_FORMATS_FILE: &str = "date_formats.csv";
pub const COLORS_FILE: &str = "colors.csv";
pub const POSTMARKS_FILE: &str = "postmarks.csv";

/// Import order; export writes the same files.
pub const TRANSFER_FILES: [&str; 14] = [
    GROUPS_FILE,
    USERS_FILE,
    UNITS_FILE,
    UNIT_IDENTITIES_FILE,
    RESPONSIBILITIES_FILE,
    FACILITIES_FILE,
    FACILITY_IDENTITIES_FILE,
    AFFILIATIONS_FILE,
    SHAPES_FILE,
    LETTERING_STYLES_FILE,
    FRAMING_STYLES_FILE,
    DATE_FORMATS_FILE,
    COLORS_FILE,
    POSTMARKS_FILE,
];

fn lookup_file(kind: LookupKind) -> &'static str {
    match kind {
        LookupKind::PostmarkShape => SHAPES_FILE,
        LookupKind::LetteringStyle => LETTERING_STYLES_FILE,
        LookupKind::FramingStyle => FRAMING_STYLES_FILE,
        LookupKind::DateFormat => DATE_FORMATS_FILE,
    }
}

const LIST_SEPARATOR: char = ';';

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error in {file}: {source}")]
    Csv {
        file: &'static str,
        #[source]
        source: csv::Error,
    },

    #[error("{file} line {line}: {reason}")]
    InvalidRow {
        file: &'static str,
        line: usize,
        reason: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for TransferError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Store(StoreError::Sqlite(value))
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

/// Rows moved per file, in transfer order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferSummary {
    pub counts: Vec<(&'static str, usize)>,
}

impl TransferSummary {
    pub fn count(&self, file: &str) -> usize {
        self.counts
            .iter()
            .find(|(name, _)| *name == file)
            .map_or(0, |(_, n)| *n)
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }
}

impl fmt::Display for TransferSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (file, count) in &self.counts {
            writeln!(f, "  {:<40} {:>6}", file, count)?;
        }
        write!(f, "  {:<40} {:>6}", "total", self.total())
    }
}

// ============================================================================
// ROWS
// ============================================================================

fn join_list(items: &[String]) -> String {
    items.join(&LIST_SEPARATOR.to_string())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(LIST_SEPARATOR)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_datetime(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

fn parse_day(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| format!("bad date '{}'", raw))
}

/// Built as stored, without the constructor's ordering check.
fn parse_interval(file: &str, line: usize, from: &str, to: &str) -> Result<EffectiveInterval, String> {
    let interval = EffectiveInterval {
        effective_from: parse_day(from)?,
        effective_to: if to.trim().is_empty() { None } else { Some(parse_day(to)?) },
    };
    if let Some(to) = interval.effective_to {
        if to <= interval.effective_from {
            warn!(
                "event=empty_interval module=transfer status=loaded file={} line={} from={} to={}",
                file, line, interval.effective_from, to
            );
        }
    }
    Ok(interval)
}

fn to_text(date: Option<NaiveDate>) -> String {
    date.map(|d| d.format(DATE_FORMAT).to_string()).unwrap_or_default()
}

/// Audit columns shared by every catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuditColumns {
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

impl AuditColumns {
    fn of(audit: &AuditStamp) -> Self {
        AuditColumns {
            created_by: audit.created_by.get(),
            created_at: audit.created_at.to_rfc3339(),
            modified_by: audit.modified_by.get(),
            modified_at: audit.modified_at.to_rfc3339(),
        }
    }

    fn stamp(&self) -> Result<AuditStamp, String> {
        Ok(AuditStamp {
            created_by: UserId(self.created_by),
            created_at: parse_datetime(&self.created_at)?,
            modified_by: UserId(self.modified_by),
            modified_at: parse_datetime(&self.modified_at)?,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GroupRow {
    id: i64,
    name: String,
    permissions: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UserRow {
    id: i64,
    username: String,
    password: String,
    email: String,
    first_name: String,
    last_name: String,
    is_active: bool,
    is_staff: bool,
    is_superuser: bool,
    last_login: String,
    date_joined: String,
    groups: String,
    user_permissions: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitRow {
    id: i64,
    reference_code: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct UnitIdentityRow {
    id: i64,
    unit_id: i64,
    parent_unit_id: Option<i64>,
    effective_from: String,
    effective_to: String,
    unit_name: String,
    unit_abbreviation: String,
    unit_type: String,
    hierarchy_level: i32,
    change_reason: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResponsibilityRow {
    id: i64,
    unit_id: i64,
    group_id: i64,
    is_active: bool,
    notes: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FacilityRow {
    id: i64,
    reference_code: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct FacilityIdentityRow {
    id: i64,
    facility_id: i64,
    effective_from: String,
    effective_to: String,
    facility_name: String,
    facility_type: String,
    is_operational: bool,
    discontinuation_reason: String,
    latitude: Option<f64>,
    longitude: Option<f64>,
    notes: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AffiliationRow {
    id: i64,
    facility_identity_id: i64,
    unit_id: i64,
    effective_from: String,
    effective_to: String,
    affiliation_source: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LookupRow {
    id: i64,
    name: String,
    description: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct ColorRow {
    id: i64,
    color_name: String,
    color_value: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PostmarkRow {
    id: i64,
    facility_identity_id: i64,
    shape_id: i64,
    lettering_style_id: i64,
    framing_style_id: i64,
    date_format_id: i64,
    postmark_key: String,
    rate_location: String,
    rate_value: String,
    is_manuscript: bool,
    other_characteristics: String,
    created_by: i64,
    created_at: String,
    modified_by: i64,
    modified_at: String,
}

/// Splits a row's trailing audit columns out of the row struct.
macro_rules! audit_of {
    ($row:expr) => {
        AuditColumns {
            created_by: $row.created_by,
            created_at: $row.created_at.clone(),
            modified_by: $row.modified_by,
            modified_at: $row.modified_at.clone(),
        }
        .stamp()
    };
}

// ============================================================================
// EXPORT
// ============================================================================

fn write_rows<T: Serialize>(dir: &Path, file: &'static str, rows: &[T]) -> TransferResult<usize> {
    let path = dir.join(file);
    let mut writer = csv::Writer::from_path(&path).map_err(|source| TransferError::Csv { file, source })?;
    for row in rows {
        writer
            .serialize(row)
            .map_err(|source| TransferError::Csv { file, source })?;
    }
    writer.flush().map_err(|source| TransferError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(rows.len())
}

/// Write every transfer file into `dir` (created if missing).
pub fn export_catalog(conn: &Connection, dir: &Path) -> TransferResult<TransferSummary> {
    std::fs::create_dir_all(dir).map_err(|source| TransferError::Io {
        path: dir.display().to_string(),
        source,
    })?;

    // One read transaction so the files are mutually consistent.
    let tx = conn.unchecked_transaction()?;
    let store = SqliteStore::new(&tx);
    let mut summary = TransferSummary::default();

    let groups = store.groups()?;
    let group_names: HashMap<GroupId, String> =
        groups.iter().map(|g| (g.id, g.name.clone())).collect();
    let rows: Vec<GroupRow> = groups
        .iter()
        .map(|g| GroupRow {
            id: g.id.get(),
            name: g.name.clone(),
            permissions: join_list(&g.permissions),
        })
        .collect();
    summary.counts.push((GROUPS_FILE, write_rows(dir, GROUPS_FILE, &rows)?));

    let rows: Vec<UserRow> = store
        .users()?
        .into_iter()
        .map(|u| {
            let groups: Vec<String> = u
                .groups
                .iter()
                .filter_map(|id| group_names.get(id).cloned())
                .collect();
            UserRow {
                id: u.id.get(),
                username: u.username,
                password: u.password,
                email: u.email,
                first_name: u.first_name,
                last_name: u.last_name,
                is_active: u.is_active,
                is_staff: u.is_staff,
                is_superuser: u.is_superuser,
                last_login: u.last_login.map(|dt| dt.to_rfc3339()).unwrap_or_default(),
                date_joined: u.date_joined.to_rfc3339(),
                groups: join_list(&groups),
                user_permissions: join_list(&u.user_permissions),
            }
        })
        .collect();
    summary.counts.push((USERS_FILE, write_rows(dir, USERS_FILE, &rows)?));

    let rows: Vec<UnitRow> = store
        .all_units()?
        .into_iter()
        .map(|u| {
            let a = AuditColumns::of(&u.audit);
            UnitRow {
                id: u.id.get(),
                reference_code: u.reference_code,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary.counts.push((UNITS_FILE, write_rows(dir, UNITS_FILE, &rows)?));

    let rows: Vec<UnitIdentityRow> = store
        .all_unit_identities()?
        .into_iter()
        .map(|i| {
            let a = AuditColumns::of(&i.audit);
            UnitIdentityRow {
                id: i.id.get(),
                unit_id: i.unit_id.get(),
                parent_unit_id: i.parent_unit_id.map(UnitId::get),
                effective_from: to_text(Some(i.interval.effective_from)),
                effective_to: to_text(i.interval.effective_to),
                unit_name: i.unit_name,
                unit_abbreviation: i.unit_abbreviation,
                unit_type: i.unit_type.as_str().to_string(),
                hierarchy_level: i.hierarchy_level,
                change_reason: i.change_reason.as_str().to_string(),
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary
        .counts
        .push((UNIT_IDENTITIES_FILE, write_rows(dir, UNIT_IDENTITIES_FILE, &rows)?));

    let rows: Vec<ResponsibilityRow> = store
        .all_responsibilities()?
        .into_iter()
        .map(|r| {
            let a = AuditColumns::of(&r.audit);
            ResponsibilityRow {
                id: r.id.get(),
                unit_id: r.unit_id.get(),
                group_id: r.group_id.get(),
                is_active: r.is_active,
                notes: r.notes,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary
        .counts
        .push((RESPONSIBILITIES_FILE, write_rows(dir, RESPONSIBILITIES_FILE, &rows)?));

    let rows: Vec<FacilityRow> = store
        .all_facilities()?
        .into_iter()
        .map(|f| {
            let a = AuditColumns::of(&f.audit);
            FacilityRow {
                id: f.id.get(),
                reference_code: f.reference_code,
                latitude: f.latitude,
                longitude: f.longitude,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary.counts.push((FACILITIES_FILE, write_rows(dir, FACILITIES_FILE, &rows)?));

    let rows: Vec<FacilityIdentityRow> = store
        .all_facility_identities()?
        .into_iter()
        .map(|i| {
            let a = AuditColumns::of(&i.audit);
            FacilityIdentityRow {
                id: i.id.get(),
                facility_id: i.facility_id.get(),
                effective_from: to_text(Some(i.interval.effective_from)),
                effective_to: to_text(i.interval.effective_to),
                facility_name: i.facility_name,
                facility_type: i.facility_type.as_str().to_string(),
                is_operational: i.is_operational,
                discontinuation_reason: i.discontinuation_reason,
                latitude: i.latitude,
                longitude: i.longitude,
                notes: i.notes,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary
        .counts
        .push((FACILITY_IDENTITIES_FILE, write_rows(dir, FACILITY_IDENTITIES_FILE, &rows)?));

    let rows: Vec<AffiliationRow> = store
        .all_affiliations()?
        .into_iter()
        .map(|j| {
            let a = AuditColumns::of(&j.audit);
            AffiliationRow {
                id: j.id.get(),
                facility_identity_id: j.facility_identity_id.get(),
                unit_id: j.unit_id.get(),
                effective_from: to_text(Some(j.interval.effective_from)),
                effective_to: to_text(j.interval.effective_to),
                affiliation_source: j.affiliation_source,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary
        .counts
        .push((AFFILIATIONS_FILE, write_rows(dir, AFFILIATIONS_FILE, &rows)?));

    for kind in LookupKind::ALL {
        let file = lookup_file(kind);
        let rows: Vec<LookupRow> = store
            .lookups(kind)?
            .into_iter()
            .map(|l| {
                let a = AuditColumns::of(&l.audit);
                LookupRow {
                    id: l.id.get(),
                    name: l.name,
                    description: l.description,
                    created_by: a.created_by,
                    created_at: a.created_at,
                    modified_by: a.modified_by,
                    modified_at: a.modified_at,
                }
            })
            .collect();
        summary.counts.push((file, write_rows(dir, file, &rows)?));
    }

    let rows: Vec<ColorRow> = store
        .colors()?
        .into_iter()
        .map(|c| {
            let a = AuditColumns::of(&c.audit);
            ColorRow {
                id: c.id.get(),
                color_name: c.color_name,
                color_value: c.color_value,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary.counts.push((COLORS_FILE, write_rows(dir, COLORS_FILE, &rows)?));

    let rows: Vec<PostmarkRow> = store
        .postmarks()?
        .into_iter()
        .map(|p| {
            let a = AuditColumns::of(&p.audit);
            PostmarkRow {
                id: p.id.get(),
                facility_identity_id: p.facility_identity_id.get(),
                shape_id: p.shape_id.get(),
                lettering_style_id: p.lettering_style_id.get(),
                framing_style_id: p.framing_style_id.get(),
                date_format_id: p.date_format_id.get(),
                postmark_key: p.postmark_key,
                rate_location: p.rate_location.as_str().to_string(),
                rate_value: p.rate_value,
                is_manuscript: p.is_manuscript,
                other_characteristics: p.other_characteristics,
                created_by: a.created_by,
                created_at: a.created_at,
                modified_by: a.modified_by,
                modified_at: a.modified_at,
            }
        })
        .collect();
    summary.counts.push((POSTMARKS_FILE, write_rows(dir, POSTMARKS_FILE, &rows)?));

    tx.commit()?;
    info!(
        "event=catalog_exported module=transfer status=ok dir={} rows={}",
        dir.display(),
        summary.total()
    );
    Ok(summary)
}

// ============================================================================
// IMPORT
// ============================================================================

/// Rows of `file` with their 1-based CSV line numbers; None if the file is absent.
fn read_rows<T: DeserializeOwned>(dir: &Path, file: &'static str) -> TransferResult<Option<Vec<(usize, T)>>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let mut reader = csv::Reader::from_path(&path).map_err(|source| TransferError::Csv { file, source })?;
    let mut rows = Vec::new();
    for (index, result) in reader.deserialize().enumerate() {
        let row: T = result.map_err(|source| TransferError::Csv { file, source })?;
        // header is line 1
        rows.push((index + 2, row));
    }
    Ok(Some(rows))
}

fn invalid(file: &'static str, line: usize) -> impl Fn(String) -> TransferError {
    move |reason| TransferError::InvalidRow { file, line, reason }
}

/// Attach a file/line to a failed store write.
fn at_row<T>(file: &'static str, line: usize, result: Result<T, StoreError>) -> TransferResult<T> {
    result.map_err(|e| TransferError::InvalidRow {
        file,
        line,
        reason: e.to_string(),
    })
}

/// Load every transfer file present in `dir`. With `dry_run` the
/// transaction is rolled back after validation.
pub fn import_catalog(conn: &Connection, dir: &Path, dry_run: bool) -> TransferResult<TransferSummary> {
    let tx = conn.unchecked_transaction()?;
    let store = SqliteStore::new(&tx);
    let mut summary = TransferSummary::default();

    if let Some(rows) = read_rows::<GroupRow>(dir, GROUPS_FILE)? {
        for (line, row) in &rows {
            let group = Group {
                id: GroupId(row.id),
                name: row.name.trim().to_string(),
                permissions: split_list(&row.permissions),
            };
            let matched = store.auth_name(AuthTable::Groups, row.id)?.as_deref() == Some(group.name.as_str());
            if matched {
                at_row(GROUPS_FILE, *line, store.update_group(&group))?;
            } else {
                at_row(GROUPS_FILE, *line, store.insert_group(&group))?;
            }
        }
        summary.counts.push((GROUPS_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<UserRow>(dir, USERS_FILE)? {
        let group_ids: HashMap<String, GroupId> =
            store.groups()?.into_iter().map(|g| (g.name, g.id)).collect();
        for (line, row) in &rows {
            let bad = invalid(USERS_FILE, *line);
            let mut groups = Vec::new();
            for name in split_list(&row.groups) {
                let id = group_ids
                    .get(&name)
                    .copied()
                    .ok_or_else(|| bad(format!("unknown group '{}'", name)))?;
                groups.push(id);
            }
            let last_login = if row.last_login.trim().is_empty() {
                None
            } else {
                Some(parse_datetime(&row.last_login).map_err(&bad)?)
            };
            let user = User {
                id: UserId(row.id),
                username: row.username.trim().to_string(),
                password: row.password.clone(),
                email: row.email.clone(),
                first_name: row.first_name.clone(),
                last_name: row.last_name.clone(),
                is_active: row.is_active,
                is_staff: row.is_staff,
                is_superuser: row.is_superuser,
                last_login,
                date_joined: parse_datetime(&row.date_joined).map_err(&bad)?,
                groups,
                user_permissions: split_list(&row.user_permissions),
            };
            let matched = store.auth_name(AuthTable::Users, row.id)?.as_deref() == Some(user.username.as_str());
            if matched {
                at_row(USERS_FILE, *line, store.update_user(&user))?;
            } else {
                at_row(USERS_FILE, *line, store.insert_user(&user))?;
            }
        }
        summary.counts.push((USERS_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<UnitRow>(dir, UNITS_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(UNITS_FILE, *line);
            let unit = AdministrativeUnit {
                id: UnitId(row.id),
                reference_code: row.reference_code.trim().to_string(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(UNITS_FILE, *line, store.insert_unit(&unit))?;
        }
        summary.counts.push((UNITS_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<UnitIdentityRow>(dir, UNIT_IDENTITIES_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(UNIT_IDENTITIES_FILE, *line);
            let identity = AdministrativeUnitIdentity {
                id: UnitIdentityId(row.id),
                unit_id: UnitId(row.unit_id),
                parent_unit_id: row.parent_unit_id.map(UnitId),
                interval: parse_interval(UNIT_IDENTITIES_FILE, *line, &row.effective_from, &row.effective_to)
                    .map_err(&bad)?,
                unit_name: row.unit_name.clone(),
                unit_abbreviation: row.unit_abbreviation.clone(),
                unit_type: UnitType::parse(&row.unit_type).map_err(|e| bad(e.to_string()))?,
                hierarchy_level: row.hierarchy_level,
                change_reason: ChangeReason::parse(&row.change_reason).map_err(|e| bad(e.to_string()))?,
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(UNIT_IDENTITIES_FILE, *line, store.insert_unit_identity(&identity))?;
        }
        summary.counts.push((UNIT_IDENTITIES_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<ResponsibilityRow>(dir, RESPONSIBILITIES_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(RESPONSIBILITIES_FILE, *line);
            let responsibility = UnitResponsibility {
                id: ResponsibilityId(row.id),
                unit_id: UnitId(row.unit_id),
                group_id: GroupId(row.group_id),
                is_active: row.is_active,
                notes: row.notes.clone(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(RESPONSIBILITIES_FILE, *line, store.insert_responsibility(&responsibility))?;
        }
        summary.counts.push((RESPONSIBILITIES_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<FacilityRow>(dir, FACILITIES_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(FACILITIES_FILE, *line);
            let facility = PostalFacility {
                id: FacilityId(row.id),
                reference_code: row.reference_code.trim().to_string(),
                latitude: row.latitude,
                longitude: row.longitude,
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(FACILITIES_FILE, *line, store.insert_facility(&facility))?;
        }
        summary.counts.push((FACILITIES_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<FacilityIdentityRow>(dir, FACILITY_IDENTITIES_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(FACILITY_IDENTITIES_FILE, *line);
            let identity = PostalFacilityIdentity {
                id: FacilityIdentityId(row.id),
                facility_id: FacilityId(row.facility_id),
                interval: parse_interval(FACILITY_IDENTITIES_FILE, *line, &row.effective_from, &row.effective_to)
                    .map_err(&bad)?,
                facility_name: row.facility_name.clone(),
                facility_type: FacilityType::parse(&row.facility_type).map_err(|e| bad(e.to_string()))?,
                is_operational: row.is_operational,
                discontinuation_reason: row.discontinuation_reason.clone(),
                latitude: row.latitude,
                longitude: row.longitude,
                notes: row.notes.clone(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(FACILITY_IDENTITIES_FILE, *line, store.insert_facility_identity(&identity))?;
        }
        summary.counts.push((FACILITY_IDENTITIES_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<AffiliationRow>(dir, AFFILIATIONS_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(AFFILIATIONS_FILE, *line);
            let affiliation = JurisdictionalAffiliation {
                id: AffiliationId(row.id),
                facility_identity_id: FacilityIdentityId(row.facility_identity_id),
                unit_id: UnitId(row.unit_id),
                interval: parse_interval(AFFILIATIONS_FILE, *line, &row.effective_from, &row.effective_to)
                    .map_err(&bad)?,
                affiliation_source: row.affiliation_source.clone(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(AFFILIATIONS_FILE, *line, store.insert_affiliation(&affiliation))?;
        }
        summary.counts.push((AFFILIATIONS_FILE, rows.len()));
    }

    for kind in LookupKind::ALL {
        let file = lookup_file(kind);
        if let Some(rows) = read_rows::<LookupRow>(dir, file)? {
            for (line, row) in &rows {
                let bad = invalid(file, *line);
                let entry = LookupEntry {
                    id: LookupId(row.id),
                    kind,
                    name: row.name.trim().to_string(),
                    description: row.description.clone(),
                    audit: audit_of!(row).map_err(&bad)?,
                };
                at_row(file, *line, store.insert_lookup(&entry))?;
            }
            summary.counts.push((file, rows.len()));
        }
    }

    if let Some(rows) = read_rows::<ColorRow>(dir, COLORS_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(COLORS_FILE, *line);
            let color = Color {
                id: ColorId(row.id),
                color_name: row.color_name.trim().to_string(),
                color_value: row.color_value.clone(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(COLORS_FILE, *line, store.insert_color(&color))?;
        }
        summary.counts.push((COLORS_FILE, rows.len()));
    }

    if let Some(rows) = read_rows::<PostmarkRow>(dir, POSTMARKS_FILE)? {
        for (line, row) in &rows {
            let bad = invalid(POSTMARKS_FILE, *line);
            let postmark = Postmark {
                id: PostmarkId(row.id),
                facility_identity_id: FacilityIdentityId(row.facility_identity_id),
                shape_id: LookupId(row.shape_id),
                lettering_style_id: LookupId(row.lettering_style_id),
                framing_style_id: LookupId(row.framing_style_id),
                date_format_id: LookupId(row.date_format_id),
                postmark_key: row.postmark_key.trim().to_string(),
                rate_location: RateLocation::parse(&row.rate_location).map_err(|e| bad(e.to_string()))?,
                rate_value: row.rate_value.clone(),
                is_manuscript: row.is_manuscript,
                other_characteristics: row.other_characteristics.clone(),
                audit: audit_of!(row).map_err(&bad)?,
            };
            at_row(POSTMARKS_FILE, *line, store.insert_postmark(&postmark))?;
        }
        summary.counts.push((POSTMARKS_FILE, rows.len()));
    }

    if dry_run {
        tx.rollback()?;
        info!(
            "event=catalog_import module=transfer status=dry_run dir={} rows={}",
            dir.display(),
            summary.total()
        );
    } else {
        tx.commit()?;
        info!(
            "event=catalog_import module=transfer status=ok dir={} rows={}",
            dir.display(),
            summary.total()
        );
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;
    use crate::catalog::PostmarkStyle;
    use crate::db::setup_database;
    use crate::resolver::{NamingMode, TemporalResolver};
    use std::collections::BTreeSet;
    use std::fs;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn open_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn seed(conn: &Connection) -> FacilityId {
        let actor = Principal::authenticated(UserId(1), "curator".to_string(), BTreeSet::new(), false);
        let stamp = AuditStamp::created_by(&actor);
        let store = SqliteStore::new(conn);

        let editors = store
            .insert_group(&Group {
                id: GroupId::UNSAVED,
                name: "Virginia editors".to_string(),
                permissions: vec!["change_postmark".to_string(), "add_postmark".to_string()],
            })
            .unwrap();
        store
            .insert_user(&User {
                id: UserId::UNSAVED,
                username: "ada".to_string(),
                password: "pbkdf2_sha256$600000$salt$hash".to_string(),
                email: "ada@example.org".to_string(),
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                is_active: true,
                is_staff: true,
                is_superuser: false,
                last_login: None,
                date_joined: Utc::now(),
                groups: vec![editors],
                user_permissions: vec![],
            })
            .unwrap();

        let virginia = store.insert_unit(&AdministrativeUnit::new("US-VA", stamp.clone()).unwrap()).unwrap();
        store
            .insert_unit_identity(
                &AdministrativeUnitIdentity::new(
                    virginia,
                    None,
                    EffectiveInterval::open(d(1788, 6, 25)),
                    "Virginia",
                    "VA",
                    UnitType::State,
                    2,
                    ChangeReason::Initial,
                    stamp.clone(),
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert_responsibility(&UnitResponsibility::new(virginia, editors, stamp.clone()))
            .unwrap();

        let facility = store
            .insert_facility(&PostalFacility::new("US-VA-RICHMOND-001", Some(37.54), None, stamp.clone()).unwrap())
            .unwrap();
        let identity = store
            .insert_facility_identity(
                &PostalFacilityIdentity::new(
                    facility,
                    EffectiveInterval::new(d(1860, 1, 1), Some(d(1863, 6, 1))).unwrap(),
                    "Richmond",
                    FacilityType::PostOffice,
                    stamp.clone(),
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert_affiliation(
                &JurisdictionalAffiliation::new(
                    identity,
                    virginia,
                    EffectiveInterval::open(d(1860, 1, 1)),
                    "Statehood",
                    stamp.clone(),
                )
                .unwrap(),
            )
            .unwrap();

        let mut style = Vec::new();
        for kind in LookupKind::ALL {
            let entry = LookupEntry::new(kind, "Standard", "most common", stamp.clone()).unwrap();
            style.push(store.insert_lookup(&entry).unwrap());
        }
        store
            .insert_color(&Color::new("Blue", "#00f", stamp.clone()).unwrap())
            .unwrap();
        let style = PostmarkStyle {
            shape_id: style[0],
            lettering_style_id: style[1],
            framing_style_id: style[2],
            date_format_id: style[3],
        };
        store
            .insert_postmark(&Postmark::new(identity, style, "VA-RICH-01", RateLocation::Top, "PAID 3", stamp).unwrap())
            .unwrap();
        facility
    }

    #[test]
    fn test_round_trip_through_directory() {
        let source = open_db();
        let facility = seed(&source);
        let dir = tempfile::tempdir().unwrap();

        let exported = export_catalog(&source, dir.path()).unwrap();
        assert_eq!(exported.count(USERS_FILE), 1);
        assert_eq!(exported.count(AFFILIATIONS_FILE), 1);
        for file in TRANSFER_FILES {
            assert!(dir.path().join(file).exists(), "missing {}", file);
        }

        let groups_csv = fs::read_to_string(dir.path().join(GROUPS_FILE)).unwrap();
        assert!(groups_csv.contains("change_postmark;add_postmark"));
        let users_csv = fs::read_to_string(dir.path().join(USERS_FILE)).unwrap();
        assert!(users_csv.contains("Virginia editors"));

        let target = open_db();
        let imported = import_catalog(&target, dir.path(), false).unwrap();
        assert_eq!(imported, exported);

        let store = SqliteStore::new(&target);
        let resolver = TemporalResolver::new(&store);
        let at = resolver
            .facility_at(facility, d(1862, 1, 1), NamingMode::AsOfTarget)
            .unwrap()
            .unwrap();
        assert_eq!(at.identity.facility_name, "Richmond");
        let jurisdiction = at.jurisdiction.unwrap();
        assert_eq!(jurisdiction.unit_identity.unwrap().unit_abbreviation, "VA");

        let user = store.user_by_username("ada").unwrap().unwrap();
        assert_eq!(user.groups.len(), 1);
        assert_eq!(user.password, "pbkdf2_sha256$600000$salt$hash");

        for kind in LookupKind::ALL {
            assert_eq!(exported.count(lookup_file(kind)), 1);
            let names: Vec<String> = store.lookups(kind).unwrap().into_iter().map(|l| l.name).collect();
            assert_eq!(names, vec!["Standard".to_string()]);
        }
        let colors = store.colors().unwrap();
        assert_eq!(colors.len(), 1);
        assert_eq!(colors[0].color_value, "#0000FF");

        let source_postmarks = SqliteStore::new(&source).postmarks().unwrap();
        let postmarks = store.postmarks().unwrap();
        assert_eq!(postmarks.len(), 1);
        assert_eq!(postmarks[0].id, source_postmarks[0].id);
        assert_eq!(postmarks[0].facility_identity_id, at.identity.id);
        assert_eq!(postmarks[0].shape_id, source_postmarks[0].shape_id);
        assert_eq!(postmarks[0].rate_location, RateLocation::Top);
        assert_eq!(postmarks[0].rate_value, "PAID 3");
    }

    #[test]
    fn test_reimport_updates_matching_auth_rows() {
        let source = open_db();
        seed(&source);
        let dir = tempfile::tempdir().unwrap();
        export_catalog(&source, dir.path()).unwrap();

        let target = open_db();
        // auth files alone can be applied repeatedly
        let auth_only = tempfile::tempdir().unwrap();
        for file in [GROUPS_FILE, USERS_FILE] {
            fs::copy(dir.path().join(file), auth_only.path().join(file)).unwrap();
        }
        import_catalog(&target, auth_only.path(), false).unwrap();
        import_catalog(&target, auth_only.path(), false).unwrap();
        assert_eq!(SqliteStore::new(&target).users().unwrap().len(), 1);
    }

    #[test]
    fn test_bad_row_rolls_back_everything() {
        let source = open_db();
        seed(&source);
        let dir = tempfile::tempdir().unwrap();
        export_catalog(&source, dir.path()).unwrap();

        let path = dir.path().join(FACILITY_IDENTITIES_FILE);
        let broken = fs::read_to_string(&path).unwrap().replace("1860-01-01", "01/01/1860");
        fs::write(&path, broken).unwrap();

        let target = open_db();
        let err = import_catalog(&target, dir.path(), false).unwrap_err();
        assert!(matches!(
            err,
            TransferError::InvalidRow { file: FACILITY_IDENTITIES_FILE, line: 2, .. }
        ));
        let store = SqliteStore::new(&target);
        assert!(store.groups().unwrap().is_empty());
        assert!(store.all_units().unwrap().is_empty());
    }

    #[test]
    fn test_dry_run_commits_nothing() {
        let source = open_db();
        seed(&source);
        let dir = tempfile::tempdir().unwrap();
        export_catalog(&source, dir.path()).unwrap();

        let target = open_db();
        let summary = import_catalog(&target, dir.path(), true).unwrap();
        assert!(summary.total() > 0);
        assert!(SqliteStore::new(&target).all_facilities().unwrap().is_empty());
    }

    #[test]
    fn test_empty_windows_load_and_never_match() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(FACILITIES_FILE),
            "id,reference_code,latitude,longitude,created_by,created_at,modified_by,modified_at\n\
             5,US-VA-LEGACY,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(FACILITY_IDENTITIES_FILE),
            "id,facility_id,effective_from,effective_to,facility_name,facility_type,is_operational,discontinuation_reason,latitude,longitude,notes,created_by,created_at,modified_by,modified_at\n\
             10,5,1850-01-01,1850-01-01,Same Day,POST_OFFICE,true,,,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n\
             11,5,1852-01-01,1851-01-01,Inverted,POST_OFFICE,true,,,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n\
             12,5,1853-01-01,,Current,POST_OFFICE,true,,,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n",
        )
        .unwrap();

        let conn = open_db();
        let summary = import_catalog(&conn, dir.path(), false).unwrap();
        assert_eq!(summary.count(FACILITY_IDENTITIES_FILE), 3);

        let store = SqliteStore::new(&conn);
        let resolver = TemporalResolver::new(&store);
        assert_eq!(resolver.facility_timeline(FacilityId(5)).unwrap().len(), 3);
        assert!(resolver.facility_identity_at(FacilityId(5), d(1850, 1, 1)).unwrap().is_none());
        assert!(resolver.facility_identity_at(FacilityId(5), d(1851, 6, 1)).unwrap().is_none());
        let current = resolver.facility_identity_at(FacilityId(5), d(1900, 1, 1)).unwrap().unwrap();
        assert_eq!(current.id, FacilityIdentityId(12));
    }

    #[test]
    fn test_postmark_with_unknown_lookup_rolls_back() {
        let source = open_db();
        seed(&source);
        let dir = tempfile::tempdir().unwrap();
        export_catalog(&source, dir.path()).unwrap();
        fs::remove_file(dir.path().join(SHAPES_FILE)).unwrap();

        let target = open_db();
        let err = import_catalog(&target, dir.path(), false).unwrap_err();
        assert!(matches!(err, TransferError::InvalidRow { file: POSTMARKS_FILE, line: 2, .. }));
        assert!(SqliteStore::new(&target).all_facilities().unwrap().is_empty());
    }

    #[test]
    fn test_legacy_overlaps_still_load() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join(FACILITIES_FILE),
            "id,reference_code,latitude,longitude,created_by,created_at,modified_by,modified_at\n\
             5,US-VA-LEGACY,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(FACILITY_IDENTITIES_FILE),
            "id,facility_id,effective_from,effective_to,facility_name,facility_type,is_operational,discontinuation_reason,latitude,longitude,notes,created_by,created_at,modified_by,modified_at\n\
             10,5,1850-01-01,,Old Name,POST_OFFICE,true,,,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n\
             11,5,1855-01-01,,New Name,POST_OFFICE,true,,,,,1,2020-01-01T00:00:00+00:00,1,2020-01-01T00:00:00+00:00\n",
        )
        .unwrap();

        let conn = open_db();
        let summary = import_catalog(&conn, dir.path(), false).unwrap();
        assert_eq!(summary.count(FACILITY_IDENTITIES_FILE), 2);

        let store = SqliteStore::new(&conn);
        let current = TemporalResolver::new(&store)
            .current_facility_identity(FacilityId(5))
            .unwrap()
            .unwrap();
        assert_eq!(current.id, FacilityIdentityId(11));
    }
}
