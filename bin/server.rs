// Budget Tracker - Web Server
// JSON API for the dashboard, built with Axum

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tower_http::cors::CorsLayer;

use budget_tracker::{
    alerts, available_years, create_alert, delete_alert, entities::list_goals, evaluate_alerts,
    find_by_code, find_import, import_history, import_programming_bytes, list_active_alerts, list_procurements,
    list_programming, list_programming_full, open_database, summary_by_goal, summary_by_unit,
    Config, ProgrammingFilter, SheetFormat,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<Connection>>,
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
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: (),
            error: Some(message.into()),
        }
    }
}

fn ok_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::failure(message))).into_response()
}

fn internal_error(context: &str, err: anyhow::Error) -> Response {
    log::error!("{}: {:#}", context, err);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{}: {}", context, err))
}

fn lock_db(state: &AppState) -> Result<MutexGuard<'_, Connection>, Response> {
    state.db.lock().map_err(|_| {
        log::error!("database mutex poisoned");
        error_response(StatusCode::INTERNAL_SERVER_ERROR, "Database unavailable")
    })
}

/// Explicit year, or the newest year with data
fn resolve_year(conn: &Connection, year: Option<i32>) -> anyhow::Result<Option<i32>> {
    match year {
        Some(year) => Ok(Some(year)),
        None => Ok(available_years(conn)?.into_iter().next()),
    }
}

// ============================================================================
// Request types
// ============================================================================

#[derive(Deserialize)]
struct ProgrammingQuery {
    year: Option<i32>,
    unit: Option<String>,
    goal: Option<String>,
    #[serde(default)]
    full: bool,
}

#[derive(Deserialize)]
struct SummaryQuery {
    year: Option<i32>,
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct ImportQuery {
    year: i32,
    format: Option<String>,
    name: Option<String>,
}

#[derive(Deserialize)]
struct YearQuery {
    year: Option<i32>,
}

#[derive(Deserialize)]
struct LimitQuery {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct NewAlertRequest {
    name: String,
    unit_code: Option<String>,
    threshold: Option<f64>,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/programming?year=&unit=&goal=&full=
async fn get_programming(
    State(state): State<AppState>,
    Query(query): Query<ProgrammingQuery>,
) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let filter = ProgrammingFilter {
        year: query.year,
        unit_code: query.unit,
        goal_code: query.goal,
    };

    if query.full {
        match list_programming_full(&conn, &filter) {
            Ok(rows) => ok_response(rows),
            Err(e) => internal_error("Error listing programming", e),
        }
    } else {
        match list_programming(&conn, &filter) {
            Ok(rows) => ok_response(rows),
            Err(e) => internal_error("Error listing programming", e),
        }
    }
}

/// GET /api/summary/units?year=
async fn get_unit_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let result = resolve_year(&conn, query.year).and_then(|year| match year {
        Some(year) => summary_by_unit(&conn, year),
        None => Ok(Vec::new()),
    });

    match result {
        Ok(summary) => ok_response(summary),
        Err(e) => internal_error("Error building unit summary", e),
    }
}

/// GET /api/summary/goals?year=&limit=
async fn get_goal_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let limit = query.limit.unwrap_or(10);
    let result = resolve_year(&conn, query.year).and_then(|year| match year {
        Some(year) => summary_by_goal(&conn, year, limit),
        None => Ok(Vec::new()),
    });

    match result {
        Ok(summary) => ok_response(summary),
        Err(e) => internal_error("Error building goal summary", e),
    }
}

/// POST /api/programming/import?year=&format=&name= - body is the uploaded file
async fn post_import(
    State(state): State<AppState>,
    Query(query): Query<ImportQuery>,
    body: Bytes,
) -> Response {
    let format = match query.format.as_deref() {
        None => SheetFormat::Xlsx,
        Some(raw) => match SheetFormat::from_extension(raw) {
            Some(format) => format,
            None => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("Unsupported format: {}", raw),
                )
            }
        },
    };

    if body.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "Empty upload");
    }

    let mut conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let source_name = query
        .name
        .unwrap_or_else(|| format!("upload.{}", format.extension()));
    let outcome = import_programming_bytes(&mut conn, &body, format, &source_name, query.year);

    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    let error = if outcome.success {
        None
    } else {
        Some(outcome.message.clone())
    };

    (
        status,
        Json(ApiResponse {
            success: outcome.success,
            data: outcome,
            error,
        }),
    )
        .into_response()
}

/// GET /api/procurements?year=
async fn get_procurements(
    State(state): State<AppState>,
    Query(query): Query<YearQuery>,
) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match list_procurements(&conn, query.year) {
        Ok(views) => ok_response(views),
        Err(e) => internal_error("Error listing procurements", e),
    }
}

/// GET /api/procurements/:code
async fn get_procurement(State(state): State<AppState>, Path(code): Path<String>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    // Decode URL-encoded code
    let decoded_code = urlencoding::decode(&code)
        .map(|c| c.into_owned())
        .unwrap_or(code);

    match find_by_code(&conn, &decoded_code) {
        Ok(Some(record)) => ok_response(record),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("No procurement with code {}", decoded_code),
        ),
        Err(e) => internal_error("Error loading procurement", e),
    }
}

/// GET /api/alerts
async fn get_alerts(State(state): State<AppState>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match list_active_alerts(&conn) {
        Ok(alerts) => ok_response(alerts),
        Err(e) => internal_error("Error listing alerts", e),
    }
}

/// POST /api/alerts
async fn post_alert(State(state): State<AppState>, Json(request): Json<NewAlertRequest>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let threshold = request.threshold.unwrap_or(alerts::DEFAULT_THRESHOLD);
    match create_alert(&conn, &request.name, request.unit_code.as_deref(), threshold) {
        Ok(alert) => (StatusCode::CREATED, Json(ApiResponse::ok(alert))).into_response(),
        Err(e) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

/// DELETE /api/alerts/:id
async fn remove_alert(State(state): State<AppState>, Path(id): Path<i64>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match delete_alert(&conn, id) {
        Ok(true) => ok_response(id),
        Ok(false) => error_response(StatusCode::NOT_FOUND, format!("No alert with id {}", id)),
        Err(e) => internal_error("Error deleting alert", e),
    }
}

/// GET /api/alerts/check?year=
async fn check_alerts(State(state): State<AppState>, Query(query): Query<YearQuery>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    let result = resolve_year(&conn, query.year).and_then(|year| match year {
        Some(year) => evaluate_alerts(&conn, year),
        None => Ok(Vec::new()),
    });

    match result {
        Ok(checks) => ok_response(checks),
        Err(e) => internal_error("Error checking alerts", e),
    }
}

/// GET /api/imports?limit=
async fn get_imports(State(state): State<AppState>, Query(query): Query<LimitQuery>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match import_history(&conn, query.limit.unwrap_or(50)) {
        Ok(entries) => ok_response(entries),
        Err(e) => internal_error("Error listing imports", e),
    }
}

/// GET /api/imports/:batch_id
async fn get_import(State(state): State<AppState>, Path(batch_id): Path<String>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match find_import(&conn, &batch_id) {
        Ok(Some(entry)) => ok_response(entry),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("No import with batch id {}", batch_id)),
        Err(e) => internal_error("Error loading import", e),
    }
}

/// GET /api/goals
async fn get_goals(State(state): State<AppState>) -> Response {
    let conn = match lock_db(&state) {
        Ok(conn) => conn,
        Err(resp) => return resp,
    };

    match list_goals(&conn) {
        Ok(goals) => ok_response(goals),
        Err(e) => internal_error("Error listing goals", e),
    }
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    println!("🌐 Budget Tracker - Web Server");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = Config::from_env();
    let conn = open_database(&config.database_path)?;
    println!("✓ Database opened: {}", config.database_path.display());

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/programming", get(get_programming))
        .route("/programming/import", post(post_import))
        .route("/summary/units", get(get_unit_summary))
        .route("/summary/goals", get(get_goal_summary))
        .route("/procurements", get(get_procurements))
        .route("/procurements/:code", get(get_procurement))
        .route("/alerts", get(get_alerts).post(post_alert))
        .route("/alerts/check", get(check_alerts))
        .route("/alerts/:id", delete(remove_alert))
        .route("/imports", get(get_imports))
        .route("/imports/:batch_id", get(get_import))
        .route("/goals", get(get_goals))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;

    println!("\n🚀 Server running on http://{}", config.server_addr);
    println!("   API: http://{}/api/programming", config.server_addr);
    println!("\n   Press Ctrl+C to stop\n");

    axum::serve(listener, app).await?;
    Ok(())
}
