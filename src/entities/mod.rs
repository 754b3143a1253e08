// Entity Models
// "Identity persists, values change"
//
// Each temporal family has:
// - A stable pointer (facility / administrative unit) that NEVER changes
// - A timeline of identity slices, each valid over [effective_from, effective_to)
// - Affiliations linking facility identities to governing units over time

pub mod admin_unit;
pub mod facility;
pub mod jurisdiction;

pub use admin_unit::{
    AdministrativeUnit, AdministrativeUnitIdentity, ChangeReason, ResponsibilityId, UnitId,
    UnitIdentityId, UnitResponsibility, UnitType,
};
pub use facility::{
    FacilityId, FacilityIdentityId, FacilityType, PostalFacility, PostalFacilityIdentity,
};
pub use jurisdiction::{AffiliationId, JurisdictionalAffiliation};
