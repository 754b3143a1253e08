// 🏛️ Administrative Unit - Stable pointer + time-sliced identities
//
// Dakota Territory, the State of Virginia, a county: each is a stable unit
// whose name, type and parent change over time (renames, splits, annexations).

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::access::GroupId;
use crate::audit::AuditStamp;
use crate::entities::facility::validate_reference_code;
use crate::error::{CatalogError, CatalogResult};
use crate::temporal::{EffectiveInterval, Temporal};

surrogate_id!(
    /// Key of a stable administrative unit
    UnitId
);
surrogate_id!(
    /// Key of one time slice of an administrative unit
    UnitIdentityId
);
surrogate_id!(
    /// Key of a unit → group responsibility
    ResponsibilityId
);

// ============================================================================
// UNIT TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitType {
    Country,
    State,
    Province,
    Territory,
    Prefecture,
    County,
    District,
    Municipality,
}

impl UnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitType::Country => "COUNTRY",
            UnitType::State => "STATE",
            UnitType::Province => "PROVINCE",
            UnitType::Territory => "TERRITORY",
            UnitType::Prefecture => "PREFECTURE",
            UnitType::County => "COUNTY",
            UnitType::District => "DISTRICT",
            UnitType::Municipality => "MUNICIPALITY",
        }
    }

    pub fn parse(raw: &str) -> CatalogResult<Self> {
        match raw.trim() {
            "COUNTRY" => Ok(UnitType::Country),
            "STATE" => Ok(UnitType::State),
            "PROVINCE" => Ok(UnitType::Province),
            "TERRITORY" => Ok(UnitType::Territory),
            "PREFECTURE" => Ok(UnitType::Prefecture),
            "COUNTY" => Ok(UnitType::County),
            "DISTRICT" => Ok(UnitType::District),
            "MUNICIPALITY" => Ok(UnitType::Municipality),
            other => Err(CatalogError::InvalidInput(format!(
                "unknown unit type '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// CHANGE REASON
// ============================================================================

/// Why a new identity slice began
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeReason {
    Initial,
    Renamed,
    Split,
    Merged,
    Reorganized,
    Independence,
    Annexed,
    Dissolved,
}

impl ChangeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeReason::Initial => "INITIAL",
            ChangeReason::Renamed => "RENAMED",
            ChangeReason::Split => "SPLIT",
            ChangeReason::Merged => "MERGED",
            ChangeReason::Reorganized => "REORGANIZED",
            ChangeReason::Independence => "INDEPENDENCE",
            ChangeReason::Annexed => "ANNEXED",
            ChangeReason::Dissolved => "DISSOLVED",
        }
    }

    pub fn parse(raw: &str) -> CatalogResult<Self> {
        match raw.trim() {
            "INITIAL" => Ok(ChangeReason::Initial),
            "RENAMED" => Ok(ChangeReason::Renamed),
            "SPLIT" => Ok(ChangeReason::Split),
            "MERGED" => Ok(ChangeReason::Merged),
            "REORGANIZED" => Ok(ChangeReason::Reorganized),
            "INDEPENDENCE" => Ok(ChangeReason::Independence),
            "ANNEXED" => Ok(ChangeReason::Annexed),
            "DISSOLVED" => Ok(ChangeReason::Dissolved),
            other => Err(CatalogError::InvalidInput(format!(
                "unknown change reason '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// ADMINISTRATIVE UNIT (stable pointer)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeUnit {
    pub id: UnitId,

    /// Stable identifier (e.g. "US-VA", "DAK-TER")
    pub reference_code: String,

    pub audit: AuditStamp,
}

impl AdministrativeUnit {
    pub fn new(reference_code: &str, audit: AuditStamp) -> CatalogResult<Self> {
        Ok(AdministrativeUnit {
            id: UnitId::UNSAVED,
            reference_code: validate_reference_code(reference_code)?,
            audit,
        })
    }
}

// ============================================================================
// ADMINISTRATIVE UNIT IDENTITY (time slice)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdministrativeUnitIdentity {
    pub id: UnitIdentityId,
    pub unit_id: UnitId,

    /// Parent unit during this period (None for top-level units)
    pub parent_unit_id: Option<UnitId>,

    pub interval: EffectiveInterval,
    pub unit_name: String,
    pub unit_abbreviation: String,
    pub unit_type: UnitType,

    /// 1 = country, 2 = state, 3 = county, ...
    pub hierarchy_level: i32,
    pub change_reason: ChangeReason,

    pub audit: AuditStamp,
}

impl AdministrativeUnitIdentity {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        unit_id: UnitId,
        parent_unit_id: Option<UnitId>,
        interval: EffectiveInterval,
        unit_name: &str,
        unit_abbreviation: &str,
        unit_type: UnitType,
        hierarchy_level: i32,
        change_reason: ChangeReason,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        let name = unit_name.trim();
        if name.is_empty() {
            return Err(CatalogError::InvalidInput(
                "unit_name cannot be empty".to_string(),
            ));
        }
        let abbreviation = unit_abbreviation.trim();
        if abbreviation.chars().count() > 10 {
            return Err(CatalogError::InvalidInput(format!(
                "unit_abbreviation '{}' exceeds 10 characters",
                abbreviation
            )));
        }
        if hierarchy_level < 1 {
            return Err(CatalogError::InvalidInput(format!(
                "hierarchy_level must be >= 1, got {}",
                hierarchy_level
            )));
        }
        if parent_unit_id == Some(unit_id) && !unit_id.is_unsaved() {
            return Err(CatalogError::InvalidInput(
                "an administrative unit cannot be its own parent".to_string(),
            ));
        }
        Ok(AdministrativeUnitIdentity {
            id: UnitIdentityId::UNSAVED,
            unit_id,
            parent_unit_id,
            interval,
            unit_name: name.to_string(),
            unit_abbreviation: abbreviation.to_string(),
            unit_type,
            hierarchy_level,
            change_reason,
            audit,
        })
    }

    /// Case-insensitive abbreviation match or name substring match.
    pub fn matches(&self, query: &str) -> bool {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return false;
        }
        self.unit_abbreviation.to_lowercase() == needle
            || self.unit_name.to_lowercase().contains(&needle)
    }
}

impl Temporal for AdministrativeUnitIdentity {
    fn record_id(&self) -> i64 {
        self.id.get()
    }

    fn interval(&self) -> &EffectiveInterval {
        &self.interval
    }
}

impl fmt::Display for AdministrativeUnitIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.unit_name, self.interval)
    }
}

// ============================================================================
// UNIT RESPONSIBILITY
// ============================================================================

/// Group entitled to act on records under a unit's jurisdiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitResponsibility {
    pub id: ResponsibilityId,
    pub unit_id: UnitId,
    pub group_id: GroupId,
    pub is_active: bool,
    pub notes: String,
    pub audit: AuditStamp,
}

impl UnitResponsibility {
    pub fn new(unit_id: UnitId, group_id: GroupId, audit: AuditStamp) -> Self {
        UnitResponsibility {
            id: ResponsibilityId::UNSAVED,
            unit_id,
            group_id,
            is_active: true,
            notes: String::new(),
            audit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Principal, UserId};
    use chrono::NaiveDate;
    use std::collections::BTreeSet;

    fn stamp() -> AuditStamp {
        AuditStamp::created_by(&Principal::authenticated(
            UserId(1),
            "curator".to_string(),
            BTreeSet::new(),
            false,
        ))
    }

    fn virginia() -> AdministrativeUnitIdentity {
        AdministrativeUnitIdentity::new(
            UnitId(2),
            Some(UnitId(1)),
            EffectiveInterval::open(NaiveDate::from_ymd_opt(1788, 6, 25).unwrap()),
            "Virginia",
            "VA",
            UnitType::State,
            2,
            ChangeReason::Initial,
            stamp(),
        )
        .unwrap()
    }

    #[test]
    fn test_enum_parsing() {
        assert_eq!(UnitType::parse("TERRITORY").unwrap(), UnitType::Territory);
        assert!(UnitType::parse("KINGDOM").is_err());
        assert_eq!(ChangeReason::parse("ANNEXED").unwrap(), ChangeReason::Annexed);
        assert_eq!(ChangeReason::Dissolved.as_str(), "DISSOLVED");
    }

    #[test]
    fn test_identity_matches_abbreviation_or_name() {
        let va = virginia();
        assert!(va.matches("va"));
        assert!(va.matches("VA"));
        assert!(va.matches("virg"));
        assert!(va.matches("V"));
        assert!(!va.matches("Texas"));
        assert!(!va.matches(""));
    }

    #[test]
    fn test_identity_validation() {
        let interval = EffectiveInterval::open(NaiveDate::from_ymd_opt(1861, 3, 2).unwrap());

        let too_long = AdministrativeUnitIdentity::new(
            UnitId(3), None, interval, "Dakota Territory", "DAKOTA-TERR",
            UnitType::Territory, 2, ChangeReason::Initial, stamp(),
        );
        assert!(too_long.is_err());

        let bad_level = AdministrativeUnitIdentity::new(
            UnitId(3), None, interval, "Dakota Territory", "DT",
            UnitType::Territory, 0, ChangeReason::Initial, stamp(),
        );
        assert!(bad_level.is_err());

        let own_parent = AdministrativeUnitIdentity::new(
            UnitId(3), Some(UnitId(3)), interval, "Dakota Territory", "DT",
            UnitType::Territory, 2, ChangeReason::Initial, stamp(),
        );
        assert!(own_parent.is_err());
    }

    #[test]
    fn test_responsibility_defaults_active() {
        let resp = UnitResponsibility::new(UnitId(2), GroupId(7), stamp());
        assert!(resp.is_active);
        assert!(resp.id.is_unsaved());
    }
}
