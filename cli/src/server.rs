use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use chrono::{Local, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use glyco_core::aggregate::{GlucoseOverview, QuickSummaryEntry, TrendView};
use glyco_core::cgm::CgmSummary;
use glyco_core::error::EngineError;
use glyco_core::models::{
    CgmAnnotations, DateWindow, DeviceHistoryRecord, DeviceSample, DeviceVendor, ExerciseEntry,
    GlucoseInterval, GlucoseReading, MealCategory, ReadingUpsert, UserGlucoseProfile,
    VendorCredentials, validate_exercise_minutes, validate_glucose_value, validate_insulin_units,
};
use glyco_core::reconcile::{CgmVendorClient, JobReport};
use glyco_core::service::{GlucoseService, WindowQuery};

use crate::config::Settings;
use crate::scheduler;
use crate::vendor::VendorRouter;

const BODY_LIMIT: usize = 2 * 1024 * 1024; // 2 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<GlucoseService>,
    client: Arc<dyn CgmVendorClient>,
    settings: Arc<Settings>,
    api_key: Option<String>,
}

// --- Request / Response types ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileRequest {
    glucose_interval: GlucoseInterval,
    #[serde(default)]
    device: Option<DeviceVendor>,
    #[serde(default)]
    active: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogReadingRequest {
    user_id: i64,
    date: NaiveDate,
    category: MealCategory,
    glucose: Option<f64>,
    #[serde(rename = "glucose2hr")]
    glucose_2hr: Option<f64>,
    insulin_units: Option<f64>,
    is_meal_exists: Option<bool>,
    time: Option<i64>,
}

#[derive(Deserialize)]
struct CgmSummaryRequest {
    #[serde(flatten)]
    query: WindowQuery,
    #[serde(flatten)]
    annotations: CgmAnnotations,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WindowParams {
    from_date: i64,
    to_date: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RollingParams {
    #[serde(default = "default_days")]
    days: i64,
    anchor: Option<i64>,
    glucose_interval: Option<GlucoseInterval>,
}

fn default_days() -> i64 {
    7
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RollingAverageResponse {
    user_id: i64,
    days: i64,
    average_glucose: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExerciseRequest {
    date: NaiveDate,
    duration_minutes: f64,
}

#[derive(Serialize)]
struct WrittenResponse {
    written: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

#[derive(Debug)]
enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(err) => {
                error!("Internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<EngineError>() {
            Some(e) if e.is_bad_request() => Self::BadRequest(e.to_string()),
            Some(e) => Self::NotFound(e.to_string()),
            None => Self::Internal(err),
        }
    }
}

fn bad_request(err: &anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Profiles ---

async fn get_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<UserGlucoseProfile>, ApiError> {
    Ok(Json(state.svc.get_profile(user_id)?))
}

async fn put_profile(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<UserGlucoseProfile>, ApiError> {
    let profile = UserGlucoseProfile {
        user_id,
        glucose_interval: req.glucose_interval,
        device: req.device.unwrap_or(DeviceVendor::None),
        active: req.active.unwrap_or(true),
    };
    Ok(Json(state.svc.set_profile(&profile)?))
}

// --- Readings ---

async fn log_reading(
    State(state): State<AppState>,
    Json(req): Json<LogReadingRequest>,
) -> Result<(StatusCode, Json<GlucoseReading>), ApiError> {
    for value in [req.glucose, req.glucose_2hr].into_iter().flatten() {
        validate_glucose_value(value).map_err(|e| bad_request(&e))?;
    }
    if let Some(units) = req.insulin_units {
        validate_insulin_units(units).map_err(|e| bad_request(&e))?;
    }
    if req.glucose.is_none() && req.glucose_2hr.is_none() && req.insulin_units.is_none() {
        return Err(ApiError::BadRequest(
            "Provide at least one of glucose, glucose2hr or insulinUnits".to_string(),
        ));
    }

    let mut upsert = ReadingUpsert::new(req.user_id, req.date, req.category);
    upsert.glucose = req.glucose;
    upsert.glucose_2hr = req.glucose_2hr;
    upsert.insulin_units = req.insulin_units;
    upsert.is_meal_exists = req.is_meal_exists;
    upsert.time = req.time;

    let reading = state.svc.log_glucose(&upsert)?;
    Ok((StatusCode::CREATED, Json(reading)))
}

// --- Aggregation ---

async fn overview(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Json<GlucoseOverview>, ApiError> {
    Ok(Json(state.svc.overview(&query, false)?))
}

async fn quick_summary(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Json<Vec<QuickSummaryEntry>>, ApiError> {
    Ok(Json(state.svc.quick_summary(&query)?))
}

async fn trend(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Json<TrendView>, ApiError> {
    Ok(Json(state.svc.trend(&query)?))
}

async fn rolling_average(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<RollingParams>,
) -> Result<Json<RollingAverageResponse>, ApiError> {
    let anchor = params
        .anchor
        .unwrap_or_else(|| Utc::now().timestamp_millis());
    let average_glucose =
        state
            .svc
            .rolling_average(user_id, params.days, anchor, params.glucose_interval)?;
    Ok(Json(RollingAverageResponse {
        user_id,
        days: params.days,
        average_glucose,
    }))
}

async fn cgm_summary(
    State(state): State<AppState>,
    Json(req): Json<CgmSummaryRequest>,
) -> Result<Json<CgmSummary>, ApiError> {
    Ok(Json(state.svc.cgm_summary(&req.query, req.annotations)?))
}

// --- Device history and exercise ---

async fn add_device_history(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(samples): Json<Vec<DeviceSample>>,
) -> Result<(StatusCode, Json<WrittenResponse>), ApiError> {
    for sample in &samples {
        validate_glucose_value(sample.value).map_err(|e| bad_request(&e))?;
    }
    let written = state.svc.add_device_history(user_id, samples)?;
    Ok((StatusCode::CREATED, Json(WrittenResponse { written })))
}

async fn device_graph(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<WindowParams>,
) -> Result<Json<Vec<DeviceHistoryRecord>>, ApiError> {
    let window = DateWindow::new(params.from_date, params.to_date)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    Ok(Json(state.svc.device_graph(user_id, &window)?))
}

async fn log_exercise(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(req): Json<ExerciseRequest>,
) -> Result<(StatusCode, Json<ExerciseEntry>), ApiError> {
    validate_exercise_minutes(req.duration_minutes).map_err(|e| bad_request(&e))?;
    let entry = ExerciseEntry {
        user_id,
        date: req.date,
        duration_minutes: req.duration_minutes,
    };
    state.svc.log_exercise(&entry)?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn put_vendor(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(credentials): Json<VendorCredentials>,
) -> Result<StatusCode, ApiError> {
    if credentials.vendor == DeviceVendor::None {
        return Err(ApiError::BadRequest(
            "vendor must be Libre or Dexcom".to_string(),
        ));
    }
    if credentials.access_token.trim().is_empty() {
        return Err(ApiError::BadRequest("accessToken is required".to_string()));
    }
    state.svc.set_vendor_credentials(user_id, &credentials)?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Export ---

async fn export_table(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Response, ApiError> {
    let csv = state.svc.export_table_csv(&query)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

async fn export_quick(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Response, ApiError> {
    let csv = state.svc.export_quick_summary_csv(&query)?;
    Ok(([(header::CONTENT_TYPE, "text/csv; charset=utf-8")], csv).into_response())
}

async fn export_text(
    State(state): State<AppState>,
    Json(query): Json<WindowQuery>,
) -> Result<Response, ApiError> {
    let text = state.svc.export_text_snapshot(&query)?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], text).into_response())
}

// --- Jobs ---

async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<JobReport>>, ApiError> {
    let jobs = scheduler::select_jobs(&name, Arc::clone(&state.client))
        .map_err(|e| bad_request(&e))?;
    let ctx = scheduler::job_context(
        state.svc.store(),
        &state.settings,
        Local::now().naive_local(),
    );
    let reports = scheduler::run_once(&jobs, &ctx)
        .await
        .context("job run failed")?;
    Ok(Json(reports))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/users/{id}/profile", get(get_profile).put(put_profile))
        .route("/api/readings", post(log_reading))
        .route("/api/overview", post(overview))
        .route("/api/quick-summary", post(quick_summary))
        .route("/api/trend", post(trend))
        .route("/api/users/{id}/rolling-average", get(rolling_average))
        .route("/api/cgm-summary", post(cgm_summary))
        .route(
            "/api/users/{id}/device-history",
            post(add_device_history).get(device_graph),
        )
        .route("/api/users/{id}/exercise", post(log_exercise))
        .route("/api/users/{id}/vendor", put(put_vendor))
        .route("/api/export/table.csv", post(export_table))
        .route("/api/export/quick.csv", post(export_quick))
        .route("/api/export/text", post(export_text))
        .route("/api/jobs/{name}", post(run_job))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

pub struct ServeOptions {
    pub port: u16,
    pub bind: String,
    pub api_key: Option<String>,
    pub settings: Settings,
    /// Run the daily jobs alongside the API.
    pub schedule: bool,
}

pub async fn start_server(svc: GlucoseService, options: ServeOptions) -> anyhow::Result<()> {
    let ServeOptions {
        port,
        bind,
        api_key,
        settings,
        schedule,
    } = options;

    let client: Arc<dyn CgmVendorClient> = Arc::new(VendorRouter::new(&settings)?);
    let svc = Arc::new(svc);

    if schedule {
        scheduler::spawn_daily(svc.store(), Arc::clone(&client), settings.clone());
        info!(hour = settings.job_hour, "Daily jobs enabled");
    }

    let state = AppState {
        svc,
        client,
        settings: Arc::new(settings),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {}...{} (see api_key file in data directory)",
            &key[..4.min(key.len())],
            &key[key.len().saturating_sub(4)..],
        );
    } else {
        warn!("Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(%bind, "Listening on a public address with no authentication");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    info!("Listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}
