// 📮 Catalog records - postmarks, covers and their leaf data
//
// None of these carry temporal logic. A postmark points at the facility
// identity in force when it was struck; everything else hangs off the
// postmark or the cover.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{self, Read};

use crate::access::UserId;
use crate::audit::AuditStamp;
use crate::entities::FacilityIdentityId;
use crate::error::{CatalogError, CatalogResult};

surrogate_id!(PostmarkId);
surrogate_id!(PostcoverId);
surrogate_id!(PublicationId);
surrogate_id!(ColorId);
surrogate_id!(
    /// Key into one of the lookup tables (shape, lettering, framing, date format)
    LookupId
);

/// Closed set of string-coded choices, stored by code.
macro_rules! choice_enum {
    ($name:ident { $($variant:ident => $code:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $code)]
                $variant,
            )+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $code,)+
                }
            }

            pub fn parse(raw: &str) -> CatalogResult<Self> {
                match raw.trim() {
                    $($code => Ok($name::$variant),)+
                    other => Err(CatalogError::InvalidInput(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

choice_enum!(RateLocation {
    Top => "TOP",
    Bottom => "BOTTOM",
    Left => "LEFT",
    Right => "RIGHT",
    Center => "CENTER",
    None => "NONE",
});

choice_enum!(PublicationType {
    Book => "BOOK",
    Catalog => "CATALOG",
    Journal => "JOURNAL",
    Website => "WEBSITE",
    Newsletter => "NEWSLETTER",
});

choice_enum!(PostmarkImageView {
    Full => "FULL",
    Detail => "DETAIL",
    Comparison => "COMPARISON",
});

choice_enum!(PostcoverImageView {
    Front => "FRONT",
    Back => "BACK",
    Interior => "INTERIOR",
    Detail => "DETAIL",
});

choice_enum!(PostmarkLocation {
    Front => "FRONT",
    Back => "BACK",
    FrontUpperRight => "FRONT_UPPER_RIGHT",
    FrontUpperLeft => "FRONT_UPPER_LEFT",
    BackUpperRight => "BACK_UPPER_RIGHT",
    BackUpperLeft => "BACK_UPPER_LEFT",
    BackLowerLeft => "BACK_LOWER_LEFT",
    BackLowerRight => "BACK_LOWER_RIGHT",
});

fn required(field: &str, value: &str) -> CatalogResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::InvalidInput(format!("{} cannot be empty", field)));
    }
    Ok(trimmed.to_string())
}

// ============================================================================
// LOOKUP TABLES
// ============================================================================

/// The four name/description lookup tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LookupKind {
    PostmarkShape,
    LetteringStyle,
    FramingStyle,
    DateFormat,
}

impl LookupKind {
    pub const ALL: [LookupKind; 4] = [
        LookupKind::PostmarkShape,
        LookupKind::LetteringStyle,
        LookupKind::FramingStyle,
        LookupKind::DateFormat,
    ];

    pub fn table(&self) -> &'static str {
        match self {
            LookupKind::PostmarkShape => "postmark_shapes",
            LookupKind::LetteringStyle => "lettering_styles",
            LookupKind::FramingStyle => "framing_styles",
            LookupKind::DateFormat => "date_formats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub id: LookupId,
    pub kind: LookupKind,
    pub name: String,
    pub description: String,
    pub audit: AuditStamp,
}

impl LookupEntry {
    pub fn new(kind: LookupKind, name: &str, description: &str, audit: AuditStamp) -> CatalogResult<Self> {
        Ok(LookupEntry {
            id: LookupId::UNSAVED,
            kind,
            name: required("name", name)?,
            description: description.trim().to_string(),
            audit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub id: ColorId,
    pub color_name: String,
    /// `#RRGGBB`
    pub color_value: String,
    pub audit: AuditStamp,
}

impl Color {
    pub fn new(color_name: &str, color_value: &str, audit: AuditStamp) -> CatalogResult<Self> {
        Ok(Color {
            id: ColorId::UNSAVED,
            color_name: required("color_name", color_name)?,
            color_value: normalize_hex_color(color_value)?,
            audit,
        })
    }
}

/// Accepts `#RGB` or `#RRGGBB` (any case), returns upper-case `#RRGGBB`.
pub fn normalize_hex_color(raw: &str) -> CatalogResult<String> {
    let value = raw.trim();
    let digits = value.strip_prefix('#').ok_or_else(|| {
        CatalogError::InvalidInput(format!("color value '{}' must start with '#'", value))
    })?;
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CatalogError::InvalidInput(format!(
            "color value '{}' is not hexadecimal",
            value
        )));
    }
    let expanded = match digits.len() {
        3 => digits.chars().flat_map(|c| [c, c]).collect::<String>(),
        6 => digits.to_string(),
        _ => {
            return Err(CatalogError::InvalidInput(format!(
                "color value '{}' must have 3 or 6 hex digits",
                value
            )))
        }
    };
    Ok(format!("#{}", expanded.to_ascii_uppercase()))
}

// ============================================================================
// POSTMARK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postmark {
    pub id: PostmarkId,

    /// The facility identity when this postmark was used
    pub facility_identity_id: FacilityIdentityId,

    pub shape_id: LookupId,
    pub lettering_style_id: LookupId,
    pub framing_style_id: LookupId,
    pub date_format_id: LookupId,

    pub postmark_key: String,
    pub rate_location: RateLocation,

    /// "5c", "10c", "Free", "Paid", ...
    pub rate_value: String,

    /// Hand-written or hand-stamped vs printed
    pub is_manuscript: bool,
    pub other_characteristics: String,

    pub audit: AuditStamp,
}

/// Lookup references chosen for a new postmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostmarkStyle {
    pub shape_id: LookupId,
    pub lettering_style_id: LookupId,
    pub framing_style_id: LookupId,
    pub date_format_id: LookupId,
}

impl Postmark {
    pub fn new(
        facility_identity_id: FacilityIdentityId,
        style: PostmarkStyle,
        postmark_key: &str,
        rate_location: RateLocation,
        rate_value: &str,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        Ok(Postmark {
            id: PostmarkId::UNSAVED,
            facility_identity_id,
            shape_id: style.shape_id,
            lettering_style_id: style.lettering_style_id,
            framing_style_id: style.framing_style_id,
            date_format_id: style.date_format_id,
            postmark_key: required("postmark_key", postmark_key)?,
            rate_location,
            rate_value: rate_value.trim().to_string(),
            is_manuscript: false,
            other_characteristics: String::new(),
            audit,
        })
    }

    pub fn style(&self) -> PostmarkStyle {
        PostmarkStyle {
            shape_id: self.shape_id,
            lettering_style_id: self.lettering_style_id,
            framing_style_id: self.framing_style_id,
            date_format_id: self.date_format_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkColor {
    pub id: i64,
    pub postmark_id: PostmarkId,
    pub color_id: ColorId,
    pub audit: AuditStamp,
}

/// Observed usage window of a postmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkDatesSeen {
    pub id: i64,
    pub postmark_id: PostmarkId,
    pub earliest_date_seen: NaiveDate,
    pub latest_date_seen: NaiveDate,
    pub audit: AuditStamp,
}

impl PostmarkDatesSeen {
    pub fn new(
        postmark_id: PostmarkId,
        earliest_date_seen: NaiveDate,
        latest_date_seen: NaiveDate,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        if latest_date_seen < earliest_date_seen {
            return Err(CatalogError::InvalidInput(format!(
                "latest_date_seen ({}) is before earliest_date_seen ({})",
                latest_date_seen, earliest_date_seen
            )));
        }
        Ok(PostmarkDatesSeen {
            id: 0,
            postmark_id,
            earliest_date_seen,
            latest_date_seen,
            audit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkSize {
    pub id: i64,
    pub postmark_id: PostmarkId,
    /// Millimetres
    pub width: f64,
    pub height: f64,
    pub size_notes: String,
    pub audit: AuditStamp,
}

impl PostmarkSize {
    pub fn new(postmark_id: PostmarkId, width: f64, height: f64, size_notes: &str, audit: AuditStamp) -> CatalogResult<Self> {
        if !(width > 0.0 && height > 0.0) {
            return Err(CatalogError::InvalidInput(format!(
                "postmark size must be positive, got {}x{}",
                width, height
            )));
        }
        Ok(PostmarkSize {
            id: 0,
            postmark_id,
            width,
            height,
            size_notes: size_notes.trim().to_string(),
            audit,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkValuation {
    pub id: i64,
    pub postmark_id: PostmarkId,
    pub valued_by: UserId,
    pub estimated_value: f64,
    pub valuation_date: NaiveDate,
    pub audit: AuditStamp,
}

impl PostmarkValuation {
    pub fn new(
        postmark_id: PostmarkId,
        valued_by: UserId,
        estimated_value: f64,
        valuation_date: NaiveDate,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        if !(estimated_value >= 0.0) {
            return Err(CatalogError::InvalidInput(format!(
                "estimated_value must be non-negative, got {}",
                estimated_value
            )));
        }
        Ok(PostmarkValuation {
            id: 0,
            postmark_id,
            valued_by,
            estimated_value,
            valuation_date,
            audit,
        })
    }
}

// ============================================================================
// PUBLICATIONS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkPublication {
    pub id: PublicationId,
    pub publication_title: String,
    pub author: String,
    pub publisher: String,
    pub publication_date: NaiveDate,
    pub isbn: String,
    pub edition: String,
    pub publication_type: PublicationType,
    pub audit: AuditStamp,
}

impl PostmarkPublication {
    pub fn new(
        publication_title: &str,
        author: &str,
        publisher: &str,
        publication_date: NaiveDate,
        publication_type: PublicationType,
        audit: AuditStamp,
    ) -> CatalogResult<Self> {
        Ok(PostmarkPublication {
            id: PublicationId::UNSAVED,
            publication_title: required("publication_title", publication_title)?,
            author: required("author", author)?,
            publisher: required("publisher", publisher)?,
            publication_date,
            isbn: String::new(),
            edition: String::new(),
            publication_type,
            audit,
        })
    }
}

/// Where a publication lists a postmark (unique per postmark, publication, published id)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicationReference {
    pub id: i64,
    pub postmark_id: PostmarkId,
    pub publication_id: PublicationId,
    pub published_id: String,
    pub reference_location: String,
    pub audit: AuditStamp,
}

// ============================================================================
// IMAGES
// ============================================================================

/// File metadata shared by postmark and cover images.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageFile {
    pub original_filename: String,
    /// Unique name under the media storage location
    pub storage_filename: String,
    /// SHA-256, lowercase hex
    pub file_checksum: String,
    pub mime_type: String,
    pub image_width: i64,
    pub image_height: i64,
    pub file_size_bytes: i64,
    pub image_description: String,
    pub display_order: i64,
    pub uploaded_by: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostmarkImage {
    pub id: i64,
    pub postmark_id: PostmarkId,
    pub image_view: PostmarkImageView,
    pub file: ImageFile,
    pub audit: AuditStamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcoverImage {
    pub id: i64,
    pub postcover_id: PostcoverId,
    pub image_view: PostcoverImageView,
    pub file: ImageFile,
    pub audit: AuditStamp,
}

/// An uploaded image before it is written to storage.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_filename: String,
    pub mime_type: String,
    pub image_width: i64,
    pub image_height: i64,
    pub bytes: Vec<u8>,
    pub image_description: String,
    pub display_order: i64,
}

impl ImageUpload {
    /// Checksum the bytes and pick a storage name.
    pub fn describe(&self, uploaded_by: UserId) -> CatalogResult<ImageFile> {
        let original_filename = required("original_filename", &self.original_filename)?;
        if !self.mime_type.starts_with("image/") {
            return Err(CatalogError::InvalidInput(format!(
                "mime type '{}' is not an image",
                self.mime_type
            )));
        }
        if self.image_width <= 0 || self.image_height <= 0 {
            return Err(CatalogError::InvalidInput(format!(
                "image dimensions must be positive, got {}x{}",
                self.image_width, self.image_height
            )));
        }
        let file_checksum = generate_checksum(self.bytes.as_slice())
            .map_err(|e| CatalogError::InvalidInput(format!("unreadable upload: {}", e)))?;
        Ok(ImageFile {
            storage_filename: storage_filename(&original_filename),
            original_filename,
            file_checksum,
            mime_type: self.mime_type.clone(),
            image_width: self.image_width,
            image_height: self.image_height,
            file_size_bytes: self.bytes.len() as i64,
            image_description: self.image_description.trim().to_string(),
            display_order: self.display_order,
            uploaded_by,
        })
    }
}

/// SHA-256 of everything the reader yields, read in 4 KiB blocks.
pub fn generate_checksum<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = [0u8; 4096];
    loop {
        let read = reader.read(&mut block)?;
        if read == 0 {
            break;
        }
        hasher.update(&block[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Random storage name keeping the original (lowercased) extension.
pub fn storage_filename(original_filename: &str) -> String {
    let id = uuid::Uuid::new_v4();
    match original_filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() && ext.len() <= 5 => {
            format!("{}.{}", id, ext.to_ascii_lowercase())
        }
        _ => id.to_string(),
    }
}

/// Where uploaded image bytes go. Provided by the host application.
pub trait FileStorage {
    fn put(&self, storage_filename: &str, bytes: &[u8]) -> io::Result<()>;
    fn delete(&self, storage_filename: &str) -> io::Result<()>;
}

// ============================================================================
// POSTCOVERS
// ============================================================================

/// Physical cover/envelope owned by a collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Postcover {
    pub id: PostcoverId,
    pub owner: UserId,
    pub postcover_key: String,
    pub description: String,
    pub audit: AuditStamp,
}

impl Postcover {
    pub fn new(owner: UserId, postcover_key: &str, description: &str, audit: AuditStamp) -> CatalogResult<Self> {
        Ok(Postcover {
            id: PostcoverId::UNSAVED,
            owner,
            postcover_key: required("postcover_key", postcover_key)?,
            description: description.trim().to_string(),
            audit,
        })
    }
}

/// A postmark struck on a cover, at a position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostcoverPostmark {
    pub id: i64,
    pub postcover_id: PostcoverId,
    pub postmark_id: PostmarkId,
    pub position_order: i64,
    pub postmark_location: PostmarkLocation,
    pub audit: AuditStamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choice_enums() {
        assert_eq!(RateLocation::parse("CENTER").unwrap(), RateLocation::Center);
        assert_eq!(PostmarkLocation::parse("BACK_LOWER_LEFT").unwrap().as_str(), "BACK_LOWER_LEFT");
        let err = PublicationType::parse("PAMPHLET").unwrap_err();
        assert!(err.to_string().contains("PublicationType"));
    }

    #[test]
    fn test_normalize_hex_color() {
        assert_eq!(normalize_hex_color("#ff0000").unwrap(), "#FF0000");
        assert_eq!(normalize_hex_color("#abc").unwrap(), "#AABBCC");
        assert!(normalize_hex_color("ff0000").is_err());
        assert!(normalize_hex_color("#ff00").is_err());
        assert!(normalize_hex_color("#gg0000").is_err());
    }

    #[test]
    fn test_checksum_known_value() {
        // SHA-256("abc")
        assert_eq!(
            generate_checksum(&b"abc"[..]).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_checksum_spans_blocks() {
        let data = vec![7u8; 4096 * 3 + 17];
        let streamed = generate_checksum(data.as_slice()).unwrap();
        let direct = format!("{:x}", Sha256::digest(&data));
        assert_eq!(streamed, direct);
    }

    #[test]
    fn test_storage_filename_keeps_extension() {
        let name = storage_filename("Cover Front.JPG");
        assert!(name.ends_with(".jpg"));
        assert_ne!(storage_filename("a.png"), storage_filename("a.png"));
        assert!(!storage_filename("noext").contains('.'));
    }

    #[test]
    fn test_dates_seen_order() {
        let audit = crate::audit::AuditStamp::created_by(&crate::access::Principal::anonymous());
        let early = NaiveDate::from_ymd_opt(1861, 1, 1).unwrap();
        let late = NaiveDate::from_ymd_opt(1862, 1, 1).unwrap();
        assert!(PostmarkDatesSeen::new(PostmarkId(1), early, late, audit.clone()).is_ok());
        assert!(PostmarkDatesSeen::new(PostmarkId(1), late, early, audit).is_err());
    }

    #[test]
    fn test_upload_describe() {
        let upload = ImageUpload {
            original_filename: "richmond.png".to_string(),
            mime_type: "image/png".to_string(),
            image_width: 640,
            image_height: 480,
            bytes: b"abc".to_vec(),
            image_description: " strike ".to_string(),
            display_order: 1,
        };
        let file = upload.describe(UserId(9)).unwrap();
        assert_eq!(file.file_size_bytes, 3);
        assert_eq!(file.image_description, "strike");
        assert!(file.storage_filename.ends_with(".png"));
        assert_eq!(file.file_checksum.len(), 64);

        let not_image = ImageUpload {
            mime_type: "application/pdf".to_string(),
            ..upload
        };
        assert!(not_image.describe(UserId(9)).is_err());
    }
}
