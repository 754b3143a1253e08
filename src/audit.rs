// 🧾 Audit stamping + version history
//
// Every persisted record carries an AuditStamp filled from the acting
// principal. Entity kinds listed in VersionedKind also get a JSON snapshot
// appended to the history table on every write.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::access::{Principal, UserId};

// ============================================================================
// AUDIT STAMP
// ============================================================================

/// Created/modified attribution, composed into each entity struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditStamp {
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub modified_by: UserId,
    pub modified_at: DateTime<Utc>,
}

impl AuditStamp {
    /// Stamp for a record created now by `actor`.
    pub fn created_by(actor: &Principal) -> Self {
        let now = Utc::now();
        AuditStamp {
            created_by: actor.user_id,
            created_at: now,
            modified_by: actor.user_id,
            modified_at: now,
        }
    }

    /// Record a modification by `actor`.
    pub fn touch(&mut self, actor: &Principal) {
        self.modified_by = actor.user_id;
        self.modified_at = Utc::now();
    }
}

// ============================================================================
// VERSIONED KINDS
// ============================================================================

/// Entity kinds that keep a snapshot history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionedKind {
    PostalFacility,
    PostalFacilityIdentity,
    AdministrativeUnit,
    AdministrativeUnitIdentity,
    UnitResponsibility,
    JurisdictionalAffiliation,
    Lookup,
    Color,
    Postmark,
    PostmarkDetail,
    PostmarkImage,
    Publication,
    Postcover,
    PostcoverImage,
}

impl VersionedKind {
    pub const ALL: [VersionedKind; 14] = [
        VersionedKind::PostalFacility,
        VersionedKind::PostalFacilityIdentity,
        VersionedKind::AdministrativeUnit,
        VersionedKind::AdministrativeUnitIdentity,
        VersionedKind::UnitResponsibility,
        VersionedKind::JurisdictionalAffiliation,
        VersionedKind::Lookup,
        VersionedKind::Color,
        VersionedKind::Postmark,
        VersionedKind::PostmarkDetail,
        VersionedKind::PostmarkImage,
        VersionedKind::Publication,
        VersionedKind::Postcover,
        VersionedKind::PostcoverImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionedKind::PostalFacility => "postal_facility",
            VersionedKind::PostalFacilityIdentity => "postal_facility_identity",
            VersionedKind::AdministrativeUnit => "administrative_unit",
            VersionedKind::AdministrativeUnitIdentity => "administrative_unit_identity",
            VersionedKind::UnitResponsibility => "unit_responsibility",
            VersionedKind::JurisdictionalAffiliation => "jurisdictional_affiliation",
            VersionedKind::Lookup => "lookup",
            VersionedKind::Color => "color",
            VersionedKind::Postmark => "postmark",
            VersionedKind::PostmarkDetail => "postmark_detail",
            VersionedKind::PostmarkImage => "postmark_image",
            VersionedKind::Publication => "publication",
            VersionedKind::Postcover => "postcover",
            VersionedKind::PostcoverImage => "postcover_image",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let wanted = raw.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|kind| kind.as_str() == wanted)
    }
}

/// What a write did to the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryAction {
    Created,
    Updated,
    Closed,
    Deleted,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::Updated => "updated",
            HistoryAction::Closed => "closed",
            HistoryAction::Deleted => "deleted",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "created" => Some(HistoryAction::Created),
            "updated" => Some(HistoryAction::Updated),
            "closed" => Some(HistoryAction::Closed),
            "deleted" => Some(HistoryAction::Deleted),
            _ => None,
        }
    }
}

// ============================================================================
// HISTORY EVENT
// ============================================================================

/// Snapshot of a record taken on write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub action: HistoryAction,
    pub kind: VersionedKind,
    pub entity_id: i64,
    pub snapshot: serde_json::Value,
    pub actor: UserId,
}

impl HistoryEvent {
    pub fn new<T: Serialize>(
        action: HistoryAction,
        kind: VersionedKind,
        entity_id: i64,
        record: &T,
        actor: &Principal,
    ) -> Result<Self, serde_json::Error> {
        Ok(HistoryEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            action,
            kind,
            entity_id,
            snapshot: serde_json::to_value(record)?,
            actor: actor.user_id,
        })
    }
}
