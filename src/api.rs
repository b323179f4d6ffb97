use crate::config::ApiConfig;
use crate::identity::{AuthError, Identity, IdentityClient};
use crate::orchestrator::{FoodLog, HistoryError, Submission, SubmitError};
use crate::record_store::{FoodRecord, NutritionTotals, PgRecordStore};
use anyhow::{Context, Result};
use axum::{
    extract::{DefaultBodyLimit, Multipart, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub food_log: Arc<FoodLog>,
    pub identity: Arc<IdentityClient>,
    pub record_store: Arc<PgRecordStore>,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

/// Email/password credentials for sign-up and sign-in
#[derive(Debug, Deserialize)]
pub struct AuthRequest {
    pub email: String,
    pub password: String,
}

/// Successful authentication response
#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub email: String,
    pub id_token: String,
    pub expires_in: u64,
}

/// A food record in API responses
#[derive(Debug, Serialize)]
pub struct MealResponse {
    pub id: Uuid,
    pub image_url: String,
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fat: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl From<FoodRecord> for MealResponse {
    fn from(r: FoodRecord) -> Self {
        Self {
            id: r.id,
            image_url: r.image_url,
            calories: r.calories,
            protein: r.protein,
            carbs: r.carbs,
            fat: r.fat,
            description: r.description,
            created_at: r.created_at,
        }
    }
}

/// Meal history response
#[derive(Debug, Serialize)]
pub struct MealHistoryResponse {
    pub meals: Vec<MealResponse>,
    pub count: usize,
}

/// Query parameters for the nutrition summary
#[derive(Debug, Deserialize)]
pub struct SummaryQuery {
    /// Window start (ISO 8601); defaults to midnight UTC today
    pub since: Option<DateTime<Utc>>,
}

/// Nutrition summary response
#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub since: DateTime<Utc>,
    #[serde(flatten)]
    pub totals: NutritionTotals,
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/v1/auth/signup", post(sign_up))
        .route("/api/v1/auth/signin", post(sign_in))
        .route("/api/v1/meals", post(submit_meal).get(meal_history))
        .route("/api/v1/meals/summary", get(nutrition_summary))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "meallog-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    // Check database connectivity
    match sqlx::query("SELECT 1")
        .fetch_one(state.record_store.pool())
        .await
    {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "database": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "database": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Register a new user
#[instrument(skip(state, request))]
async fn sign_up(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state
        .identity
        .sign_up(&request.email, &request.password)
        .await
        .map_err(auth_error_response)?;

    Ok(Json(AuthResponse {
        user_id: session.identity.id,
        email: session.identity.email,
        id_token: session.id_token,
        expires_in: session.expires_in,
    }))
}

/// Sign in an existing user
#[instrument(skip(state, request))]
async fn sign_in(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let session = state
        .identity
        .sign_in(&request.email, &request.password)
        .await
        .map_err(auth_error_response)?;

    Ok(Json(AuthResponse {
        user_id: session.identity.id,
        email: session.identity.email,
        id_token: session.id_token,
        expires_in: session.expires_in,
    }))
}

/// Submit a food image for analysis
#[instrument(skip(state, headers, multipart))]
async fn submit_meal(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<MealResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let (image_bytes, image_name, content_type) = read_image_part(multipart).await?;

    let record = state
        .food_log
        .submit(Submission {
            user_id: identity.id,
            image_bytes,
            image_name,
            content_type,
        })
        .await
        .map_err(submit_error_response)?;

    Ok(Json(record.into()))
}

/// Load the authenticated user's meal history
#[instrument(skip(state, headers))]
async fn meal_history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MealHistoryResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let records = state
        .food_log
        .load_history(&identity.id)
        .await
        .map_err(history_error_response)?;

    let meals: Vec<MealResponse> = records.into_iter().map(Into::into).collect();
    let count = meals.len();

    Ok(Json(MealHistoryResponse { meals, count }))
}

/// Aggregate nutrition totals for the authenticated user
#[instrument(skip(state, headers))]
async fn nutrition_summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let identity = authenticate(&state, &headers).await?;

    let since = params.since.unwrap_or_else(|| start_of_day_utc(Utc::now()));

    let totals = state
        .food_log
        .daily_summary(&identity.id, since)
        .await
        .map_err(history_error_response)?;

    Ok(Json(SummaryResponse { since, totals }))
}

/// Resolve the identity behind the request's bearer token
async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Missing bearer token".to_string(),
                    code: "AUTH_FAILED".to_string(),
                }),
            )
        })?;

    state
        .identity
        .verify_token(token)
        .await
        .map_err(auth_error_response)
}

/// Read the `image` part out of a multipart upload
async fn read_image_part(mut multipart: Multipart) -> Result<(Vec<u8>, String, String), ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: format!("Invalid multipart body: {e}"),
                code: "INVALID_INPUT".to_string(),
            }),
        )
    })? {
        if field.name() != Some("image") {
            continue;
        }

        let image_name = field.file_name().unwrap_or("upload").to_string();
        // Fall back to the file extension when the part declares no type
        let content_type = field.content_type().map(ToString::to_string).unwrap_or_else(|| {
            mime_guess::from_path(&image_name)
                .first_or_octet_stream()
                .to_string()
        });

        let image_bytes = field
            .bytes()
            .await
            .map_err(|e| {
                (
                    StatusCode::BAD_REQUEST,
                    Json(ErrorResponse {
                        error: format!("Failed to read image part: {e}"),
                        code: "INVALID_INPUT".to_string(),
                    }),
                )
            })?
            .to_vec();

        return Ok((image_bytes, image_name, content_type));
    }

    Err((
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Missing image field".to_string(),
            code: "INVALID_INPUT".to_string(),
        }),
    ))
}

/// Midnight UTC of the given instant's date
fn start_of_day_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(NaiveTime::MIN).and_utc()
}

fn auth_error_response(err: AuthError) -> ApiError {
    let status = match err {
        AuthError::EmailInUse
        | AuthError::InvalidEmail
        | AuthError::WeakPassword
        | AuthError::OperationNotAllowed => StatusCode::BAD_REQUEST,
        AuthError::UserNotFound | AuthError::InvalidCredentials | AuthError::InvalidToken => {
            StatusCode::UNAUTHORIZED
        }
        AuthError::Provider(_) | AuthError::Transport(_) => StatusCode::BAD_GATEWAY,
    };

    error!(error = %err, "Authentication failed");

    (
        status,
        Json(ErrorResponse {
            error: err.user_message().to_string(),
            code: "AUTH_FAILED".to_string(),
        }),
    )
}

fn submit_error_response(err: SubmitError) -> ApiError {
    let (status, code) = match err {
        SubmitError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        SubmitError::UploadFailed(_) => (StatusCode::BAD_GATEWAY, "UPLOAD_FAILED"),
        SubmitError::AnalysisUnavailable(_) => (StatusCode::BAD_GATEWAY, "ANALYSIS_UNAVAILABLE"),
        SubmitError::AnalysisMalformed(_) => (StatusCode::BAD_GATEWAY, "ANALYSIS_MALFORMED"),
        SubmitError::PersistenceFailed(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "PERSISTENCE_FAILED")
        }
    };

    (
        status,
        Json(ErrorResponse {
            error: err.user_message().to_string(),
            code: code.to_string(),
        }),
    )
}

fn history_error_response(err: HistoryError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.user_message().to_string(),
            code: "HISTORY_UNAVAILABLE".to_string(),
        }),
    )
}

/// Start the API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
