// spendlog - Web Server
// JSON API plus CSV import/export over the shared SQLite store.

use std::path::Path as FsPath;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use spendlog::{
    add_entry, create_session, create_user, database_path, delete_entry, delete_session,
    edit_entry, export_entries_to_csv, get_entry, get_monthly_stats, get_paginated_entries,
    get_summary, import_entries, list_categories, list_places, open_database, parse_csv_rows,
    session_user, verify_credentials, EntryFilter, EntryPatch, EntryType, NewEntry, User,
};

/// Shared application state
#[derive(Clone)]
struct AppState {
    db: Arc<Mutex<rusqlite::Connection>>,
}

/// API response wrapper
#[derive(Serialize)]
struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn error(message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        }
    }
}

/// Filter fields as they arrive on the query string. Everything is a string
/// there; numbers that fail to parse are treated as absent.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterQuery {
    page: Option<String>,
    page_size: Option<String>,
    category_id: Option<String>,
    place_id: Option<String>,
    date: Option<String>,
    month: Option<String>,
    year: Option<String>,
}

impl FilterQuery {
    fn entry_filter(&self) -> EntryFilter {
        EntryFilter {
            category_id: self.category_id.as_deref().and_then(|s| s.parse().ok()),
            place_id: self.place_id.as_deref().and_then(|s| s.parse().ok()),
            month: self
                .month
                .as_deref()
                .and_then(|s| s.parse().ok())
                .filter(|m| (1..=12).contains(m)),
            year: self.year.as_deref().and_then(|s| s.parse().ok()),
        }
    }

    fn page(&self) -> u32 {
        self.page
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
    }

    fn page_size(&self) -> u32 {
        self.page_size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10)
    }
}

#[derive(Deserialize)]
struct Credentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryBody {
    #[serde(rename = "type")]
    entry_type: EntryType,
    amount: f64,
    category_name: String,
    place_name: Option<String>,
    date: NaiveDate,
    description: Option<String>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct EntryPatchBody {
    #[serde(rename = "type")]
    entry_type: Option<EntryType>,
    amount: Option<f64>,
    category_name: Option<String>,
    place_name: Option<String>,
    date: Option<NaiveDate>,
    description: Option<String>,
}

#[derive(Serialize)]
struct ImportResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

// ============================================================================
// Session helpers
// ============================================================================

fn session_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        (name == "session").then(|| value.to_string())
    })
}

fn current_user(state: &AppState, headers: &HeaderMap) -> Option<User> {
    let token = session_token(headers)?;
    let conn = state.db.lock().unwrap();
    session_user(&conn, &token).ok().flatten()
}

fn require_session(state: &AppState, headers: &HeaderMap) -> Result<User, Response> {
    match current_user(state, headers) {
        Some(user) => Ok(user),
        None => Err((
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error("Unauthorized")),
        )
            .into_response()),
    }
}

fn internal_error(e: anyhow::Error) -> Response {
    eprintln!("Internal error: {:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ApiResponse::<()>::error("Internal error")),
    )
        .into_response()
}

fn session_cookie(token: &str) -> String {
    format!("session={}; Path=/; HttpOnly; SameSite=Lax", token)
}

const CLEARED_SESSION_COOKIE: &str = "session=; Path=/; HttpOnly; Max-Age=0";

// ============================================================================
// Auth handlers
// ============================================================================

/// POST /api/signup - Create an account and log it in
async fn signup(State(state): State<AppState>, Json(body): Json<Credentials>) -> Response {
    let conn = state.db.lock().unwrap();
    match create_user(&conn, &body.email, &body.password) {
        Ok(user) => match create_session(&conn, user.id) {
            Ok(token) => (
                StatusCode::OK,
                [(header::SET_COOKIE, session_cookie(&token))],
                Json(ApiResponse::ok(user)),
            )
                .into_response(),
            Err(e) => internal_error(e),
        },
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("Email already registered")),
        )
            .into_response(),
    }
}

/// POST /api/login - Issue a session cookie
async fn login(State(state): State<AppState>, Json(body): Json<Credentials>) -> Response {
    let conn = state.db.lock().unwrap();
    match verify_credentials(&conn, &body.email, &body.password) {
        Ok(Some(user)) => match create_session(&conn, user.id) {
            Ok(token) => (
                StatusCode::OK,
                [(header::SET_COOKIE, session_cookie(&token))],
                Json(ApiResponse::ok(user)),
            )
                .into_response(),
            Err(e) => internal_error(e),
        },
        Ok(None) => (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()>::error("Invalid email or password")),
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

/// POST /api/logout - Revoke the session
async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(token) = session_token(&headers) {
        let conn = state.db.lock().unwrap();
        let _ = delete_session(&conn, &token);
    }
    (
        StatusCode::OK,
        [(header::SET_COOKIE, CLEARED_SESSION_COOKIE)],
        Json(ApiResponse::ok("OK")),
    )
        .into_response()
}

// ============================================================================
// Query handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/summary - Income/expense totals for the filtered set
async fn summary(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match get_summary(&conn, user.id, &query.entry_filter(), today) {
        Ok(summary) => Json(ApiResponse::ok(summary)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/stats - Monthly statistics for the dashboard
async fn monthly_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match get_monthly_stats(&conn, user.id, &query.entry_filter(), today) {
        Ok(stats) => Json(ApiResponse::ok(stats)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/entries - Paginated entry listing, newest first
async fn list_entries(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match get_paginated_entries(
        &conn,
        user.id,
        query.page(),
        query.page_size(),
        &query.entry_filter(),
        today,
    ) {
        Ok(page) => Json(ApiResponse::ok(page)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/categories - All known categories, for the filter bar
async fn categories(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_session(&state, &headers) {
        return resp;
    }
    let conn = state.db.lock().unwrap();
    match list_categories(&conn) {
        Ok(categories) => Json(ApiResponse::ok(categories)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// GET /api/places - All known places, for the filter bar
async fn places(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(resp) = require_session(&state, &headers) {
        return resp;
    }
    let conn = state.db.lock().unwrap();
    match list_places(&conn) {
        Ok(places) => Json(ApiResponse::ok(places)).into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Mutation handlers
// ============================================================================

/// POST /api/entries - Add an entry
async fn create_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<EntryBody>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    if body.amount < 0.0 {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("Amount must be non-negative")),
        )
            .into_response();
    }

    let conn = state.db.lock().unwrap();
    let new = NewEntry {
        user_id: user.id,
        entry_type: body.entry_type,
        amount: body.amount,
        category_name: body.category_name,
        place_name: body.place_name,
        date: body.date,
        description: body.description,
    };
    match add_entry(&conn, &new) {
        Ok(entry) => Json(ApiResponse::ok(entry)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// Look up an entry and make sure it belongs to the session user.
fn owned_entry(
    conn: &rusqlite::Connection,
    user: &User,
    id: i64,
) -> Result<(), Response> {
    match get_entry(conn, id) {
        Ok(Some(entry)) if entry.user_id == user.id => Ok(()),
        Ok(_) => Err((
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::error("Entry not found")),
        )
            .into_response()),
        Err(e) => Err(internal_error(e)),
    }
}

/// PUT /api/entries/:id - Partial update
async fn update_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(body): Json<EntryPatchBody>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    if matches!(body.amount, Some(amount) if amount < 0.0) {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::<()>::error("Amount must be non-negative")),
        )
            .into_response();
    }

    let conn = state.db.lock().unwrap();
    if let Err(resp) = owned_entry(&conn, &user, id) {
        return resp;
    }

    let patch = EntryPatch {
        entry_type: body.entry_type,
        amount: body.amount,
        category_name: body.category_name,
        place_name: body.place_name,
        date: body.date,
        description: body.description,
    };
    match edit_entry(&conn, id, &patch) {
        Ok(entry) => Json(ApiResponse::ok(entry)).into_response(),
        Err(e) => internal_error(e),
    }
}

/// DELETE /api/entries/:id
async fn remove_entry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    let conn = state.db.lock().unwrap();
    if let Err(resp) = owned_entry(&conn, &user, id) {
        return resp;
    }

    match delete_entry(&conn, id) {
        Ok(()) => Json(ApiResponse::ok("OK")).into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// CSV handlers
// ============================================================================

/// POST /api/entries/import - CSV text body in, batch outcome out
async fn import_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Response {
    // No session: fail before touching any row
    let user = match current_user(&state, &headers) {
        Some(user) => user,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ImportResponse {
                    success: false,
                    error: Some("Unauthorized".to_string()),
                }),
            )
                .into_response()
        }
    };

    // Structural parse failure is reported before any row processing
    let rows = match parse_csv_rows(&body) {
        Ok(rows) => rows,
        Err(e) => {
            eprintln!("CSV parse error: {:#}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ImportResponse {
                    success: false,
                    error: Some("CSV parse error".to_string()),
                }),
            )
                .into_response();
        }
    };

    let conn = state.db.lock().unwrap();
    let outcome = import_entries(&conn, user.id, &rows);
    Json(ImportResponse {
        success: outcome.success,
        error: None,
    })
    .into_response()
}

/// GET /api/entries/export - CSV download of the filtered entry set
async fn export_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FilterQuery>,
) -> Response {
    let user = match require_session(&state, &headers) {
        Ok(user) => user,
        Err(resp) => return resp,
    };

    // page and date arrive from the filter bar but do not affect the export
    let _ = (query.page.as_ref(), query.date.as_ref());

    let conn = state.db.lock().unwrap();
    let today = Local::now().date_naive();
    match export_entries_to_csv(&conn, user.id, &query.entry_filter(), today) {
        Ok(csv) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=entries.csv",
                ),
            ],
            csv,
        )
            .into_response(),
        Err(e) => internal_error(e),
    }
}

// ============================================================================
// Pages
// ============================================================================

/// GET / - Serve the dashboard page
async fn serve_index() -> impl IntoResponse {
    Html(include_str!("../web/index.html"))
}

/// GET /login - Serve the login page
async fn serve_login() -> impl IntoResponse {
    Html(include_str!("../web/login.html"))
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() {
    println!("spendlog server {}", spendlog::VERSION);

    let db_path = database_path();
    let conn = open_database(FsPath::new(&db_path)).expect("Failed to open database");
    println!("✓ Database ready at {}", db_path);

    // Create shared state
    let state = AppState {
        db: Arc::new(Mutex::new(conn)),
    };

    // Build API routes
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/summary", get(summary))
        .route("/stats", get(monthly_stats))
        .route("/entries", get(list_entries).post(create_entry))
        .route("/entries/:id", put(update_entry).delete(remove_entry))
        .route("/entries/import", post(import_csv))
        .route("/entries/export", get(export_csv))
        .route("/categories", get(categories))
        .route("/places", get(places))
        .with_state(state.clone());

    // Build main router
    let app = Router::new()
        .route("/", get(serve_index))
        .route("/login", get(serve_login))
        .nest("/api", api_routes)
        .nest_service("/static", ServeDir::new("web"))
        .layer(CorsLayer::permissive());

    // Start server
    let addr = std::env::var("SPENDLOG_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    println!("✓ Listening on http://{}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
