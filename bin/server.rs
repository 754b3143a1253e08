// Postal History Catalog - Web Server
// Read-only REST API over the temporal resolver, with Axum

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::NaiveDate;
use log::{error, info, warn};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

use postal_history::config::AppConfig;
use postal_history::logging::init_logging;
use postal_history::temporal::{parse_date, parse_date_or_today};
use postal_history::{
    setup_database, AdministrativeUnit, AdministrativeUnitIdentity, CatalogError, FacilityAtDate,
    FacilityId, FacilityIdentityId, Group, Jurisdiction, NamingMode, PostalFacility,
    PostalFacilityIdentity, PostmarkFilter, PostmarkId, PostmarkListing, SqliteStore, StoreError,
    TemporalResolver, TemporalStore, UnitId,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
}

impl AppState {
    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ApiError> {
        self.db.lock().map_err(|_| ApiError::from(StoreError::LockPoisoned))
    }
}

/// API Response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            error: None,
        }
    }
}

impl ApiResponse<()> {
    fn failed(message: String) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message),
        }
    }
}

/// Handler failure, rendered as an ApiResponse with the matching status
enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<CatalogError> for ApiError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::InvalidInput(reason) => ApiError::BadRequest(reason),
            CatalogError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => {
                error!("event=request_failed module=server status=error error={}", m);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };
        (status, Json(ApiResponse::failed(message))).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug, Default, Deserialize)]
struct DateQuery {
    date: Option<String>,
    mode: Option<String>,
}

/// Identity-at-date response
#[derive(Serialize)]
struct IdentityAtDateResponse {
    date: NaiveDate,
    facility: PostalFacility,
    identity: PostalFacilityIdentity,
    jurisdiction: Option<Jurisdiction>,
}

impl From<FacilityAtDate> for IdentityAtDateResponse {
    fn from(resolved: FacilityAtDate) -> Self {
        Self {
            date: resolved.date,
            facility: resolved.facility,
            identity: resolved.identity,
            jurisdiction: resolved.jurisdiction,
        }
    }
}

fn facility_or_404(store: &SqliteStore<'_>, id: i64) -> Result<PostalFacility, ApiError> {
    store
        .facility(FacilityId(id))?
        .ok_or_else(|| ApiError::NotFound(format!("Postal facility {} not found", id)))
}

fn unit_or_404(store: &SqliteStore<'_>, id: i64) -> Result<AdministrativeUnit, ApiError> {
    store
        .unit(UnitId(id))?
        .ok_or_else(|| ApiError::NotFound(format!("Administrative unit {} not found", id)))
}

fn naming_mode(raw: Option<&str>) -> Result<NamingMode, ApiError> {
    match raw {
        None => Ok(NamingMode::AsOfTarget),
        Some(value) => NamingMode::parse(value).ok_or_else(|| {
            ApiError::BadRequest(format!("Invalid mode '{}', use affiliation or as-of", value))
        }),
    }
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/postal-facilities/:id/identities-timeline
async fn facility_timeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<PostalFacilityIdentity>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let facility = facility_or_404(&store, id)?;
    let timeline = TemporalResolver::new(&store).facility_timeline(facility.id)?;
    Ok(Json(ApiResponse::ok(timeline)))
}

/// GET /api/postal-facilities/:id/identity-at-date?date=YYYY-MM-DD
async fn facility_identity_at_date(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DateQuery>,
) -> ApiResult<IdentityAtDateResponse> {
    let date = parse_date(query.date.as_deref().unwrap_or_default())?;
    let mode = naming_mode(query.mode.as_deref())?;

    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let facility = facility_or_404(&store, id)?;
    let resolved = TemporalResolver::new(&store)
        .facility_at(facility.id, date, mode)?
        .ok_or_else(|| {
            ApiError::NotFound(format!(
                "No identity found for facility {} on {}",
                facility.reference_code, date
            ))
        })?;
    Ok(Json(ApiResponse::ok(resolved.into())))
}

/// GET /api/postal-facility-identities/:id/jurisdiction?date=&mode=affiliation|as-of
async fn identity_jurisdiction(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<DateQuery>,
) -> ApiResult<Jurisdiction> {
    let date = parse_date_or_today(query.date.as_deref())?;
    let mode = naming_mode(query.mode.as_deref())?;

    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let identity_id = FacilityIdentityId(id);
    if store.facility_identity(identity_id)?.is_none() {
        return Err(ApiError::NotFound(format!("Facility identity {} not found", id)));
    }
    let jurisdiction = TemporalResolver::new(&store)
        .jurisdiction(identity_id, date, mode)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("No jurisdiction for facility identity {} on {}", id, date))
        })?;
    Ok(Json(ApiResponse::ok(jurisdiction)))
}

/// GET /api/administrative-units/:id/identities-timeline
async fn unit_timeline(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<AdministrativeUnitIdentity>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let unit = unit_or_404(&store, id)?;
    let timeline = TemporalResolver::new(&store).unit_timeline(unit.id)?;
    Ok(Json(ApiResponse::ok(timeline)))
}

/// GET /api/administrative-units/:id/children
async fn unit_children(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<AdministrativeUnit>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let unit = unit_or_404(&store, id)?;
    let children = TemporalResolver::new(&store).child_units(unit.id)?;
    Ok(Json(ApiResponse::ok(children)))
}

/// GET /api/administrative-units/:id/facilities
async fn unit_facilities(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<PostalFacility>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let unit = unit_or_404(&store, id)?;
    let facilities = TemporalResolver::new(&store).facilities_in_unit(unit.id)?;
    Ok(Json(ApiResponse::ok(facilities)))
}

/// GET /api/administrative-units/:id/responsible-groups
async fn unit_responsible_groups(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Group>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let unit = unit_or_404(&store, id)?;
    let groups = TemporalResolver::new(&store).unit_responsible_groups(unit.id)?;
    Ok(Json(ApiResponse::ok(groups)))
}

/// GET /api/postmarks/:id/responsible-groups
async fn postmark_responsible_groups(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<Vec<Group>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let postmark = store
        .postmark(PostmarkId(id))?
        .ok_or_else(|| ApiError::NotFound(format!("Postmark {} not found", id)))?;
    let groups = TemporalResolver::new(&store).postmark_responsible_groups(&postmark)?;
    Ok(Json(ApiResponse::ok(groups)))
}

/// GET /api/postmarks?q=&facility_name=&state=&color=&has_images=...
async fn list_postmarks(
    State(state): State<AppState>,
    Query(filter): Query<PostmarkFilter>,
) -> ApiResult<Vec<PostmarkListing>> {
    let conn = state.lock()?;
    let store = SqliteStore::new(&conn);
    let listings = store.postmark_listings()?;
    let filtered = filter.apply(listings, &TemporalResolver::new(&store))?;
    Ok(Json(ApiResponse::ok(filtered)))
}

/// Fallback for unknown routes
async fn not_found() -> impl IntoResponse {
    ApiError::NotFound("No such endpoint".to_string())
}

// ============================================================================
// Main Server
// ============================================================================

fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/postal-facilities/:id/identities-timeline", get(facility_timeline))
        .route("/postal-facilities/:id/identity-at-date", get(facility_identity_at_date))
        .route("/postal-facility-identities/:id/jurisdiction", get(identity_jurisdiction))
        .route("/administrative-units/:id/identities-timeline", get(unit_timeline))
        .route("/administrative-units/:id/children", get(unit_children))
        .route("/administrative-units/:id/facilities", get(unit_facilities))
        .route("/administrative-units/:id/responsible-groups", get(unit_responsible_groups))
        .route("/postmarks", get(list_postmarks))
        .route("/postmarks/:id/responsible-groups", get(postmark_responsible_groups))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .fallback(not_found)
        .layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use anyhow::Context;

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let _logger = init_logging(&config.log_level, config.log_dir.as_deref())
        .context("Failed to start logging")?;

    println!("🌐 Postal History Catalog - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if !config.db_path.exists() {
        warn!(
            "event=db_missing module=server status=creating path={}",
            config.db_path.display()
        );
    }
    let conn = Connection::open(&config.db_path)
        .with_context(|| format!("Failed to open database {}", config.db_path.display()))?;
    setup_database(&conn).context("Failed to prepare schema")?;
    println!("✓ Database opened: {}", config.db_path.display());

    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.server_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.server_addr))?;

    info!(
        "event=server_start module=server status=ok addr={}",
        config.server_addr
    );
    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/health", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await.context("Server stopped")?;
    Ok(())
}
