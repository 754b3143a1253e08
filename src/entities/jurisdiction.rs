// 🗺️ Jurisdictional Affiliation - which unit governs a facility identity, when
//
// Its own timeline: a facility can be renamed without changing jurisdiction,
// and a county can be redistricted without renaming the post office.

use serde::{Deserialize, Serialize};

use crate::audit::AuditStamp;
use crate::entities::admin_unit::UnitId;
use crate::entities::facility::FacilityIdentityId;
use crate::error::{CatalogError, CatalogResult};
use crate::temporal::{EffectiveInterval, Temporal};

surrogate_id!(
    /// Key of a facility identity → unit affiliation
    AffiliationId
);

/// Time-sliced governance edge.
///
/// Owned by the facility identity; the unit is only referenced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JurisdictionalAffiliation {
    pub id: AffiliationId,
    pub facility_identity_id: FacilityIdentityId,
    pub unit_id: UnitId,
    pub interval: EffectiveInterval,

    /// Treaty, Organic Act, Congressional Act, ...
    pub affiliation_source: String,

    pub audit: AuditStamp,
}

impl JurisdictionalAffiliation {
    pub fn new(
        facility_identity_id: FacilityIdentityId,
        unit_id: UnitId,
        interval: EffectiveInterval,
        affiliation_source: &str,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        let source = affiliation_source.trim();
        if source.is_empty() {
            return Err(CatalogError::InvalidInput(
                "affiliation_source cannot be empty".to_string(),
            ));
        }
        Ok(JurisdictionalAffiliation {
            id: AffiliationId::UNSAVED,
            facility_identity_id,
            unit_id,
            interval,
            affiliation_source: source.to_string(),
            audit,
        })
    }
}

impl Temporal for JurisdictionalAffiliation {
    fn record_id(&self) -> i64 {
        self.id.get()
    }

    fn interval(&self) -> &EffectiveInterval {
        &self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::Principal;
    use chrono::NaiveDate;

    #[test]
    fn test_source_is_required_and_trimmed() {
        let stamp = AuditStamp::created_by(&Principal::anonymous());
        let interval = EffectiveInterval::open(NaiveDate::from_ymd_opt(1863, 6, 20).unwrap());

        let affiliation =
            JurisdictionalAffiliation::new(FacilityIdentityId(4), UnitId(2), interval, "  Statehood ", stamp.clone())
                .unwrap();
        assert_eq!(affiliation.affiliation_source, "Statehood");
        assert!(affiliation.id.is_unsaved());
        assert_eq!(affiliation.interval(), &interval);

        let err = JurisdictionalAffiliation::new(FacilityIdentityId(4), UnitId(2), interval, "   ", stamp).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }
}
