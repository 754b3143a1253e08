// Postal History Catalog - Core Library
// Exposes all modules for use in CLI, API server, and tests

#[macro_use]
mod ids;

pub mod access;
pub mod audit;
pub mod catalog;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod filters;
pub mod logging;
pub mod resolver;
pub mod service;
pub mod store;
pub mod temporal;
pub mod transfer;

// Re-export commonly used types
pub use access::{authorize, authorize_regional, Action, Group, GroupId, Principal, User, UserId};
pub use audit::{AuditStamp, HistoryAction, HistoryEvent, VersionedKind};
pub use catalog::{
    Color, ColorId, FileStorage, ImageUpload, LookupEntry, LookupId, LookupKind, Postcover,
    PostcoverId, Postmark, PostmarkId, PostmarkPublication, PostmarkStyle, PublicationId,
};
pub use config::{AppConfig, ConfigError};
pub use db::{get_history_for_entity, insert_history_event, setup_database, SqliteStore};
pub use entities::{
    AdministrativeUnit, AdministrativeUnitIdentity, AffiliationId, ChangeReason, FacilityId,
    FacilityIdentityId, FacilityType, JurisdictionalAffiliation, PostalFacility,
    PostalFacilityIdentity, ResponsibilityId, UnitId, UnitIdentityId, UnitResponsibility,
    UnitType,
};
pub use error::{CatalogError, CatalogResult, StoreError, StoreResult};
pub use filters::{
    FacilityIdentityFilter, PostcoverFilter, PostcoverListing, PostmarkFilter, PostmarkListing,
    PublicationFilter,
};
pub use logging::init_logging;
pub use resolver::{FacilityAtDate, Jurisdiction, NamingMode, TemporalResolver};
pub use service::CatalogService;
pub use store::{MemoryStore, TemporalStore};
pub use temporal::{EffectiveInterval, Temporal};
pub use transfer::{export_catalog, import_catalog, TransferError, TransferSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
