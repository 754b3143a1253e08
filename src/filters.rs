// 🔎 Search filters
//
// Every field is optional; an unset field matches everything. Text fields
// are case-insensitive "contains" unless noted. Filters over related rows
// (colors, dates seen, valuations) match when ANY related row qualifies.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::catalog::{
    LookupId, Postcover, PostmarkId, Postmark, PostmarkPublication, PublicationType, RateLocation,
};
use crate::entities::{FacilityIdentityId, PostalFacilityIdentity};
use crate::error::StoreResult;
use crate::resolver::TemporalResolver;
use crate::store::TemporalStore;
use crate::temporal::today;

fn icontains(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn text_set(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

// ============================================================================
// POSTMARKS
// ============================================================================

/// A postmark joined with everything the postmark filter inspects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostmarkListing {
    pub postmark: Postmark,
    pub facility_name: String,
    pub facility_reference: String,
    pub colors: Vec<String>,
    /// (earliest, latest) pairs
    pub dates_seen: Vec<(NaiveDate, NaiveDate)>,
    pub valuations: Vec<f64>,
    pub image_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostmarkFilter {
    /// Key, facility name, rate value or other characteristics
    pub q: Option<String>,
    pub facility_name: Option<String>,
    pub facility_reference: Option<String>,
    /// Administrative unit abbreviation (exact) or name (contains)
    pub state: Option<String>,
    pub earliest_use_year_min: Option<i32>,
    pub earliest_use_year_max: Option<i32>,
    pub latest_use_year_min: Option<i32>,
    pub latest_use_year_max: Option<i32>,
    /// Color name, exact but case-insensitive
    pub color: Option<String>,
    pub value_min: Option<f64>,
    pub value_max: Option<f64>,
    pub has_images: Option<bool>,

    pub facility_identity: Option<FacilityIdentityId>,
    pub shape: Option<LookupId>,
    pub lettering_style: Option<LookupId>,
    pub framing_style: Option<LookupId>,
    pub date_format: Option<LookupId>,
    pub rate_location: Option<RateLocation>,
    pub rate_value: Option<String>,
    pub is_manuscript: Option<bool>,
}

impl PostmarkFilter {
    /// Filter with the state criterion resolved as of today.
    pub fn apply<S: TemporalStore + ?Sized>(
        &self,
        listings: Vec<PostmarkListing>,
        resolver: &TemporalResolver<'_, S>,
    ) -> StoreResult<Vec<PostmarkListing>> {
        self.apply_at(listings, resolver, today())
    }

    pub fn apply_at<S: TemporalStore + ?Sized>(
        &self,
        listings: Vec<PostmarkListing>,
        resolver: &TemporalResolver<'_, S>,
        date: NaiveDate,
    ) -> StoreResult<Vec<PostmarkListing>> {
        let governed = match text_set(&self.state) {
            Some(state) => Some(resolver.identities_governed_by(state, date)?),
            None => None,
        };

        Ok(listings
            .into_iter()
            .filter(|listing| {
                governed
                    .as_ref()
                    .map_or(true, |ids| ids.contains(&listing.postmark.facility_identity_id))
            })
            .filter(|listing| self.matches(listing))
            .collect())
    }

    /// Every criterion except `state`, which needs the resolver.
    pub fn matches(&self, listing: &PostmarkListing) -> bool {
        let postmark = &listing.postmark;

        if let Some(q) = text_set(&self.q) {
            let hit = icontains(&postmark.postmark_key, q)
                || icontains(&listing.facility_name, q)
                || icontains(&postmark.rate_value, q)
                || icontains(&postmark.other_characteristics, q);
            if !hit {
                return false;
            }
        }
        if let Some(name) = text_set(&self.facility_name) {
            if !icontains(&listing.facility_name, name) {
                return false;
            }
        }
        if let Some(reference) = text_set(&self.facility_reference) {
            if !icontains(&listing.facility_reference, reference) {
                return false;
            }
        }

        let earliest_years = || listing.dates_seen.iter().map(|(e, _)| e.year());
        let latest_years = || listing.dates_seen.iter().map(|(_, l)| l.year());
        if let Some(min) = self.earliest_use_year_min {
            if !earliest_years().any(|y| y >= min) {
                return false;
            }
        }
        if let Some(max) = self.earliest_use_year_max {
            if !earliest_years().any(|y| y <= max) {
                return false;
            }
        }
        if let Some(min) = self.latest_use_year_min {
            if !latest_years().any(|y| y >= min) {
                return false;
            }
        }
        if let Some(max) = self.latest_use_year_max {
            if !latest_years().any(|y| y <= max) {
                return false;
            }
        }

        if let Some(color) = text_set(&self.color) {
            if !listing.colors.iter().any(|c| c.eq_ignore_ascii_case(color)) {
                return false;
            }
        }
        if let Some(min) = self.value_min {
            if !listing.valuations.iter().any(|v| *v >= min) {
                return false;
            }
        }
        if let Some(max) = self.value_max {
            if !listing.valuations.iter().any(|v| *v <= max) {
                return false;
            }
        }
        if let Some(has_images) = self.has_images {
            if (listing.image_count > 0) != has_images {
                return false;
            }
        }

        let exact = [
            self.facility_identity.map(|id| id == postmark.facility_identity_id),
            self.shape.map(|id| id == postmark.shape_id),
            self.lettering_style.map(|id| id == postmark.lettering_style_id),
            self.framing_style.map(|id| id == postmark.framing_style_id),
            self.date_format.map(|id| id == postmark.date_format_id),
            self.rate_location.map(|loc| loc == postmark.rate_location),
            self.rate_value.as_ref().map(|v| *v == postmark.rate_value),
            self.is_manuscript.map(|m| m == postmark.is_manuscript),
        ];
        exact.iter().all(|check| check.unwrap_or(true))
    }
}

// ============================================================================
// FACILITY IDENTITIES
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct FacilityIdentityFilter {
    pub location_name: Option<String>,
    /// Unit currently governing the identity (abbreviation or name)
    pub current_state: Option<String>,
    /// Bounding box on the facility's own coordinates
    pub latitude_min: Option<f64>,
    pub latitude_max: Option<f64>,
    pub longitude_min: Option<f64>,
    pub longitude_max: Option<f64>,
    pub has_coordinates: Option<bool>,
}

impl FacilityIdentityFilter {
    pub fn apply<S: TemporalStore + ?Sized>(
        &self,
        identities: Vec<PostalFacilityIdentity>,
        resolver: &TemporalResolver<'_, S>,
    ) -> StoreResult<Vec<PostalFacilityIdentity>> {
        let governed = match text_set(&self.current_state) {
            Some(state) => Some(resolver.identities_governed_by(state, today())?),
            None => None,
        };

        let mut kept = Vec::new();
        for identity in identities {
            if let Some(ids) = &governed {
                if !ids.contains(&identity.id) {
                    continue;
                }
            }
            if let Some(name) = text_set(&self.location_name) {
                if !icontains(&identity.facility_name, name) {
                    continue;
                }
            }
            let facility = resolver.store().facility(identity.facility_id)?;
            let (lat, lon) = facility
                .as_ref()
                .map_or((None, None), |f| (f.latitude, f.longitude));
            if !self.coordinates_match(lat, lon) {
                continue;
            }
            kept.push(identity);
        }
        Ok(kept)
    }

    fn coordinates_match(&self, lat: Option<f64>, lon: Option<f64>) -> bool {
        if let Some(wanted) = self.has_coordinates {
            if (lat.is_some() && lon.is_some()) != wanted {
                return false;
            }
        }
        let bound = |value: Option<f64>, min: Option<f64>, max: Option<f64>| {
            if min.is_none() && max.is_none() {
                return true;
            }
            match value {
                Some(v) => min.map_or(true, |m| v >= m) && max.map_or(true, |m| v <= m),
                None => false,
            }
        };
        bound(lat, self.latitude_min, self.latitude_max)
            && bound(lon, self.longitude_min, self.longitude_max)
    }
}

// ============================================================================
// POSTCOVERS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostcoverListing {
    pub postcover: Postcover,
    pub postmark_ids: Vec<PostmarkId>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PostcoverFilter {
    pub postcover_key: Option<String>,
    pub description: Option<String>,
    pub has_postmark: Option<PostmarkId>,
    pub postmark_count_min: Option<usize>,
    pub postmark_count_max: Option<usize>,
    pub owner: Option<crate::access::UserId>,
}

impl PostcoverFilter {
    pub fn matches(&self, listing: &PostcoverListing) -> bool {
        let cover = &listing.postcover;
        if let Some(key) = text_set(&self.postcover_key) {
            if !icontains(&cover.postcover_key, key) {
                return false;
            }
        }
        if let Some(description) = text_set(&self.description) {
            if !icontains(&cover.description, description) {
                return false;
            }
        }
        if let Some(postmark_id) = self.has_postmark {
            if !listing.postmark_ids.contains(&postmark_id) {
                return false;
            }
        }
        let count = listing.postmark_ids.len();
        self.postmark_count_min.map_or(true, |min| count >= min)
            && self.postmark_count_max.map_or(true, |max| count <= max)
            && self.owner.map_or(true, |owner| owner == cover.owner)
    }

    pub fn apply(&self, listings: Vec<PostcoverListing>) -> Vec<PostcoverListing> {
        listings.into_iter().filter(|l| self.matches(l)).collect()
    }
}

// ============================================================================
// PUBLICATIONS
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct PublicationFilter {
    pub title: Option<String>,
    pub author: Option<String>,
    pub publisher: Option<String>,
    pub isbn: Option<String>,
    pub year_min: Option<i32>,
    pub year_max: Option<i32>,
    pub publication_type: Option<PublicationType>,
}

impl PublicationFilter {
    pub fn matches(&self, publication: &PostmarkPublication) -> bool {
        let text_checks = [
            (&self.title, &publication.publication_title),
            (&self.author, &publication.author),
            (&self.publisher, &publication.publisher),
            (&self.isbn, &publication.isbn),
        ];
        for (wanted, actual) in text_checks {
            if let Some(wanted) = text_set(wanted) {
                if !icontains(actual, wanted) {
                    return false;
                }
            }
        }
        let year = publication.publication_date.year();
        self.year_min.map_or(true, |min| year >= min)
            && self.year_max.map_or(true, |max| year <= max)
            && self
                .publication_type
                .map_or(true, |t| t == publication.publication_type)
    }

    pub fn apply(&self, publications: Vec<PostmarkPublication>) -> Vec<PostmarkPublication> {
        publications.into_iter().filter(|p| self.matches(p)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::{Principal, UserId};
    use crate::audit::AuditStamp;
    use crate::catalog::PostmarkStyle;
    use crate::entities::{
        AdministrativeUnit, AdministrativeUnitIdentity, ChangeReason, FacilityType,
        JurisdictionalAffiliation, PostalFacility, UnitType,
    };
    use crate::store::MemoryStore;
    use crate::temporal::EffectiveInterval;
    use std::collections::BTreeSet;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn stamp() -> AuditStamp {
        AuditStamp::created_by(&Principal::authenticated(
            UserId(1),
            "curator".to_string(),
            BTreeSet::new(),
            false,
        ))
    }

    fn style() -> PostmarkStyle {
        PostmarkStyle {
            shape_id: LookupId(1),
            lettering_style_id: LookupId(1),
            framing_style_id: LookupId(1),
            date_format_id: LookupId(1),
        }
    }

    fn listing(key: &str, identity: i64, facility_name: &str) -> PostmarkListing {
        let mut postmark = Postmark::new(
            FacilityIdentityId(identity),
            style(),
            key,
            RateLocation::Bottom,
            "PAID 3",
            stamp(),
        )
        .unwrap();
        postmark.id = PostmarkId(identity);
        PostmarkListing {
            postmark,
            facility_name: facility_name.to_string(),
            facility_reference: format!("US-VA-{}", identity),
            colors: vec![],
            dates_seen: vec![],
            valuations: vec![],
            image_count: 0,
        }
    }

    #[test]
    fn test_free_text_and_related_rows() {
        let mut richmond = listing("RICH-001", 1, "Richmond");
        richmond.colors = vec!["Black".to_string()];
        richmond.dates_seen = vec![(d(1861, 4, 1), d(1864, 2, 1))];
        richmond.valuations = vec![25.0, 120.0];
        richmond.image_count = 2;
        let norfolk = listing("NORF-001", 2, "Norfolk");

        let by_text = PostmarkFilter {
            q: Some("rich".to_string()),
            ..Default::default()
        };
        assert!(by_text.matches(&richmond));
        assert!(!by_text.matches(&norfolk));

        let by_color = PostmarkFilter {
            color: Some("BLACK".to_string()),
            ..Default::default()
        };
        assert!(by_color.matches(&richmond));
        assert!(!by_color.matches(&norfolk));

        let by_years = PostmarkFilter {
            earliest_use_year_min: Some(1860),
            latest_use_year_max: Some(1864),
            ..Default::default()
        };
        assert!(by_years.matches(&richmond));
        assert!(!by_years.matches(&norfolk));

        let by_value = PostmarkFilter {
            value_min: Some(100.0),
            ..Default::default()
        };
        assert!(by_value.matches(&richmond));

        let without_images = PostmarkFilter {
            has_images: Some(false),
            ..Default::default()
        };
        assert!(!without_images.matches(&richmond));
        assert!(without_images.matches(&norfolk));

        let blank = PostmarkFilter {
            q: Some("   ".to_string()),
            ..Default::default()
        };
        assert!(blank.matches(&norfolk));
    }

    #[test]
    fn test_exact_fields() {
        let richmond = listing("RICH-001", 1, "Richmond");
        let filter = PostmarkFilter {
            rate_location: Some(RateLocation::Top),
            ..Default::default()
        };
        assert!(!filter.matches(&richmond));

        let filter = PostmarkFilter {
            facility_identity: Some(FacilityIdentityId(1)),
            is_manuscript: Some(false),
            ..Default::default()
        };
        assert!(filter.matches(&richmond));
    }

    #[test]
    fn test_state_uses_affiliations_in_force() {
        let store = MemoryStore::new();
        let virginia = store
            .insert_unit(AdministrativeUnit::new("US-VA", stamp()).unwrap())
            .unwrap();
        store
            .insert_unit_identity(
                AdministrativeUnitIdentity::new(
                    virginia,
                    None,
                    EffectiveInterval::open(d(1788, 6, 25)),
                    "Virginia",
                    "VA",
                    UnitType::State,
                    2,
                    ChangeReason::Initial,
                    stamp(),
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert_affiliation(
                JurisdictionalAffiliation::new(
                    FacilityIdentityId(1),
                    virginia,
                    EffectiveInterval::open(d(1800, 1, 1)),
                    "Statehood",
                    stamp(),
                )
                .unwrap(),
            )
            .unwrap();
        store
            .insert_affiliation(
                JurisdictionalAffiliation::new(
                    FacilityIdentityId(2),
                    virginia,
                    EffectiveInterval::new(d(1800, 1, 1), Some(d(1863, 6, 20))).unwrap(),
                    "Before West Virginia",
                    stamp(),
                )
                .unwrap(),
            )
            .unwrap();

        let resolver = TemporalResolver::new(&store);
        let listings = vec![listing("A", 1, "Richmond"), listing("B", 2, "Wheeling")];

        let filter = PostmarkFilter {
            state: Some("va".to_string()),
            ..Default::default()
        };
        let kept = filter.apply_at(listings.clone(), &resolver, d(1900, 1, 1)).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].postmark.postmark_key, "A");

        let kept = filter.apply_at(listings.clone(), &resolver, d(1850, 1, 1)).unwrap();
        assert_eq!(kept.len(), 2);

        let unknown = PostmarkFilter {
            state: Some("Atlantis".to_string()),
            ..Default::default()
        };
        assert!(unknown.apply_at(listings, &resolver, d(1900, 1, 1)).unwrap().is_empty());
    }

    #[test]
    fn test_facility_identity_bounding_box() {
        let store = MemoryStore::new();
        let placed = store
            .insert_facility(PostalFacility::new("US-VA-1", Some(37.5), Some(-77.4), stamp()).unwrap())
            .unwrap();
        let unplaced = store
            .insert_facility(PostalFacility::new("US-VA-2", None, None, stamp()).unwrap())
            .unwrap();
        let identities: Vec<PostalFacilityIdentity> = [(placed, "Richmond"), (unplaced, "Nowhere")]
            .iter()
            .map(|(id, name)| {
                PostalFacilityIdentity::new(
                    *id,
                    EffectiveInterval::open(d(1800, 1, 1)),
                    name,
                    FacilityType::PostOffice,
                    stamp(),
                )
                .unwrap()
            })
            .collect();
        let resolver = TemporalResolver::new(&store);

        let filter = FacilityIdentityFilter {
            latitude_min: Some(37.0),
            latitude_max: Some(38.0),
            ..Default::default()
        };
        let kept = filter.apply(identities.clone(), &resolver).unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].facility_name, "Richmond");

        let filter = FacilityIdentityFilter {
            has_coordinates: Some(false),
            ..Default::default()
        };
        let kept = filter.apply(identities, &resolver).unwrap();
        assert_eq!(kept[0].facility_name, "Nowhere");
    }

    #[test]
    fn test_postcover_counts_and_publications() {
        let cover = Postcover::new(UserId(1), "COVER-1", "Civil War patriotic", stamp()).unwrap();
        let listing = PostcoverListing {
            postcover: cover,
            postmark_ids: vec![PostmarkId(4), PostmarkId(9)],
        };
        let filter = PostcoverFilter {
            has_postmark: Some(PostmarkId(9)),
            postmark_count_min: Some(2),
            ..Default::default()
        };
        assert!(filter.matches(&listing));
        let filter = PostcoverFilter {
            postmark_count_max: Some(1),
            ..Default::default()
        };
        assert!(!filter.matches(&listing));

        let publication = PostmarkPublication::new(
            "Confederate States Catalog",
            "Dietz",
            "Dietz Press",
            d(1959, 1, 1),
            PublicationType::Catalog,
            stamp(),
        )
        .unwrap();
        let filter = PublicationFilter {
            author: Some("dietz".to_string()),
            year_min: Some(1950),
            year_max: Some(1960),
            ..Default::default()
        };
        assert!(filter.matches(&publication));
        let filter = PublicationFilter {
            publication_type: Some(PublicationType::Book),
            ..Default::default()
        };
        assert!(!filter.matches(&publication));
    }
}
