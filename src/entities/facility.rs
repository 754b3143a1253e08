// 🏤 Postal Facility - Stable pointer + time-sliced identities
//
// "The facility is the IDENTITY (never changes), what it was called is a VALUE"
//
// Problem solved:
// - "Richmond PO" became "Richmond Branch" in 1863 → same facility
// - Postmarks point at the identity that was in force when they were struck
// - Moving a facility overrides coordinates for that period only

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::audit::AuditStamp;
use crate::error::{CatalogError, CatalogResult};
use crate::temporal::{EffectiveInterval, Temporal};

surrogate_id!(
    /// Key of a stable postal facility
    FacilityId
);
surrogate_id!(
    /// Key of one time slice of a facility
    FacilityIdentityId
);

// ============================================================================
// FACILITY TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FacilityType {
    PostOffice,
    Branch,
    Station,
    SubStation,
    ContractStation,
    RuralRoute,
    Discontinued,
}

impl FacilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FacilityType::PostOffice => "POST_OFFICE",
            FacilityType::Branch => "BRANCH",
            FacilityType::Station => "STATION",
            FacilityType::SubStation => "SUB_STATION",
            FacilityType::ContractStation => "CONTRACT_STATION",
            FacilityType::RuralRoute => "RURAL_ROUTE",
            FacilityType::Discontinued => "DISCONTINUED",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FacilityType::PostOffice => "Post Office",
            FacilityType::Branch => "Branch Office",
            FacilityType::Station => "Station",
            FacilityType::SubStation => "Sub-Station",
            FacilityType::ContractStation => "Contract Station",
            FacilityType::RuralRoute => "Rural Route",
            FacilityType::Discontinued => "Discontinued",
        }
    }

    pub fn parse(raw: &str) -> CatalogResult<Self> {
        match raw.trim() {
            "POST_OFFICE" => Ok(FacilityType::PostOffice),
            "BRANCH" => Ok(FacilityType::Branch),
            "STATION" => Ok(FacilityType::Station),
            "SUB_STATION" => Ok(FacilityType::SubStation),
            "CONTRACT_STATION" => Ok(FacilityType::ContractStation),
            "RURAL_ROUTE" => Ok(FacilityType::RuralRoute),
            "DISCONTINUED" => Ok(FacilityType::Discontinued),
            other => Err(CatalogError::InvalidInput(format!(
                "unknown facility type '{}'",
                other
            ))),
        }
    }
}

// ============================================================================
// POSTAL FACILITY (stable pointer)
// ============================================================================

/// Stable container for a postal facility.
///
/// Holds no time-varying attributes. The reference code is globally unique
/// and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalFacility {
    pub id: FacilityId,

    /// Stable identifier (e.g. "US-VA-RICHMOND-001")
    pub reference_code: String,

    /// Fallback coordinates, overridden per identity if the facility moved
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,

    pub audit: AuditStamp,
}

impl PostalFacility {
    pub fn new(
        reference_code: &str,
        latitude: Option<f64>,
        longitude: Option<f64>,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        Ok(PostalFacility {
            id: FacilityId::UNSAVED,
            reference_code: validate_reference_code(reference_code)?,
            latitude,
            longitude,
            audit,
        })
    }

    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }
}

/// Reference codes are at most 50 characters, non-empty, no whitespace inside.
pub fn validate_reference_code(raw: &str) -> CatalogResult<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(CatalogError::InvalidInput(
            "reference_code cannot be empty".to_string(),
        ));
    }
    if code.chars().count() > 50 {
        return Err(CatalogError::InvalidInput(format!(
            "reference_code '{}' exceeds 50 characters",
            code
        )));
    }
    if code.chars().any(char::is_whitespace) {
        return Err(CatalogError::InvalidInput(format!(
            "reference_code '{}' must not contain whitespace",
            code
        )));
    }
    Ok(code.to_string())
}

// ============================================================================
// POSTAL FACILITY IDENTITY (time slice)
// ============================================================================

/// What a facility was called, its status and (optionally) where it stood
/// during one period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostalFacilityIdentity {
    pub id: FacilityIdentityId,
    pub facility_id: FacilityId,
    pub interval: EffectiveInterval,

    /// Name as it appeared on postmarks
    pub facility_name: String,
    pub facility_type: FacilityType,
    pub is_operational: bool,
    pub discontinuation_reason: String,

    /// Location override for this period
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub notes: String,

    pub audit: AuditStamp,
}

impl PostalFacilityIdentity {
    pub fn new(
        facility_id: FacilityId,
        interval: EffectiveInterval,
        facility_name: &str,
        facility_type: FacilityType,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        let name = facility_name.trim();
        if name.is_empty() {
            return Err(CatalogError::InvalidInput(
                "facility_name cannot be empty".to_string(),
            ));
        }
        Ok(PostalFacilityIdentity {
            id: FacilityIdentityId::UNSAVED,
            facility_id,
            interval,
            facility_name: name.to_string(),
            facility_type,
            is_operational: true,
            discontinuation_reason: String::new(),
            latitude: None,
            longitude: None,
            notes: String::new(),
            audit,
        })
    }

    /// Override coordinates if both are set, otherwise the facility's own.
    pub fn coordinates(&self, facility: &PostalFacility) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => facility.coordinates(),
        }
    }

    pub fn is_current(&self) -> bool {
        self.interval.is_current()
    }
}

impl Temporal for PostalFacilityIdentity {
    fn record_id(&self) -> i64 {
        self.id.get()
    }

    fn interval(&self) -> &EffectiveInterval {
        &self.interval
    }
}

impl fmt::Display for PostalFacilityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.facility_name, self.interval)
    }
}

// ============================================================================
// TESTS
// ============================================================================
