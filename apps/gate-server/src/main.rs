//! gate-server: HTTP front end for the link gate.
//!
//! Serves the creation form, the JSON API, uploaded cover images and the
//! gate pages visitors walk through before the content link is revealed.
//! - Storage: in-memory, SQLite (default feature) or DynamoDB (`dynamo` feature).
//! - Images: written under `BLOB_DIR` and served back from `/blobs/*key`.
//! - Visitor total: `/api/stats`, plus server-sent events on `/api/stats/stream`.
//!   While anyone is subscribed the stored total is re-read every
//!   `STATS_POLL_SECS`, so increments from other instances are pushed too.
//!
//! Run:
//! ```bash
//! # pretty logs (default); PORT optional
//! cargo run -p gate-server
//!
//! # with Dynamo adapter enabled (requires env vars)
//! STORAGE_PROVIDER=dynamo \
//! DYNAMO_TABLE_LINKS=links \
//! DYNAMO_TABLE_STATS=stats \
//!   cargo run -p gate-server --features dynamo
//! ```
//!
//! Configuration: See `config.rs` for all environment variables.

mod config;
mod pages;
mod session;
mod store;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::http::HeaderValue;
use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use domain::gate::{countdown_key, Entry, GateFlow, Navigation, Phase, PreviewAction};
use domain::service::LinkRegistry;
use domain::token::NanoidTokenGenerator;
use domain::{Clock, CoreError, ImageUpload, Link, NewLink, SessionStore, ShareBase, Token};
use fs_blob::FsBlobStore;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::session::CookieSession;
use crate::store::AnyRepo;

#[derive(Clone)]
struct StdClock;
impl Clock for StdClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

type Registry = LinkRegistry<AnyRepo, AnyRepo, FsBlobStore, NanoidTokenGenerator, StdClock>;

#[derive(Clone)]
struct AppState {
    registry: Arc<Registry>,
    blobs: FsBlobStore,
    clock: StdClock,
    public_origin: Option<String>,
    share_path: String,
}

impl AppState {
    fn new(cfg: &config::Config, repo: AnyRepo, blobs: FsBlobStore) -> Self {
        let registry = LinkRegistry::new(
            repo.clone(),
            repo,
            blobs.clone(),
            NanoidTokenGenerator::new(),
            StdClock,
        )
        .with_max_image_bytes(cfg.max_image_bytes);
        Self {
            registry: Arc::new(registry),
            blobs,
            clock: StdClock,
            public_origin: cfg.public_origin.clone(),
            share_path: cfg.share_path.clone(),
        }
    }

    /// Share URL base: configured origin, else the request's Host header.
    fn share_base(&self, headers: &HeaderMap) -> ShareBase {
        let origin = match &self.public_origin {
            Some(o) => o.clone(),
            None => headers
                .get(header::HOST)
                .and_then(|v| v.to_str().ok())
                .map(http_common::origin_from_host)
                .unwrap_or_default(),
        };
        ShareBase::new(origin, self.share_path.clone())
    }
}

#[tokio::main]
async fn main() {
    // Load and validate config first (fail fast on misconfiguration)
    let cfg = match config::Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_tracing(&cfg);
    cfg.warn_if_ephemeral();

    let repo = match AnyRepo::from_config(&cfg) {
        Ok(r) => r,
        Err(e) => {
            error!(err = ?e, "failed to initialise storage");
            std::process::exit(1);
        }
    };
    let blobs = match FsBlobStore::new(&cfg.blob_dir, cfg.public_origin.clone().unwrap_or_default()) {
        Ok(b) => b,
        Err(e) => {
            error!(err = ?e, dir = %cfg.blob_dir.display(), "failed to initialise blob store");
            std::process::exit(1);
        }
    };
    info!(storage = repo.name(), blob_dir = %cfg.blob_dir.display(), "storage ready");
    if let Some(tables) = &cfg.dynamo_tables {
        info!(links = %tables.links, stats = %tables.stats, "dynamo tables");
    }

    let state = AppState::new(&cfg, repo, blobs);
    spawn_stats_poller(state.registry.clone(), cfg.stats_poll);

    // Request ID header name
    let x_request_id = axum::http::HeaderName::from_static("x-request-id");

    let mut app = router(state, &cfg)
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                    request_id = %request_id,
                )
            }),
        )
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    // CORS - already validated in Config::from_env()
    let cors = if cfg.cors_allow_origin == HeaderValue::from_static("*") {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::list([cfg.cors_allow_origin.clone()]))
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers([header::CONTENT_TYPE])
    };
    app = app.layer(cors);

    let addr: SocketAddr = ([0, 0, 0, 0], cfg.port).into();
    info!(%addr, "gate-server listening");
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(err = ?e, %addr, "bind failed");
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        error!(err = ?e, "server error");
        std::process::exit(1);
    }
}

fn router(state: AppState, cfg: &config::Config) -> Router {
    // Multipart framing on top of the image itself
    let body_limit = cfg.max_image_bytes.saturating_add(64 * 1024);

    let mut app = Router::new()
        .route("/", get(home))
        .route("/create", post(create_form))
        .route("/api/links", post(create_link))
        .route("/api/links/:token", get(get_link))
        .route("/api/stats", get(get_stats))
        .route("/api/stats/stream", get(stats_stream))
        .route("/blobs/*key", get(get_blob))
        .route("/v/:token", get(gate_view))
        .route("/v/:token/shortcut/:action", get(gate_shortcut))
        .route("/v/:token/wait", get(gate_wait))
        .route("/v/:token/go", get(gate_go));
    if cfg.share_path != "/" {
        app = app.route(&cfg.share_path, get(home));
    }
    app.layer(DefaultBodyLimit::max(body_limit)).with_state(state)
}

/// Re-read the stored visitor total on an interval while anyone is
/// subscribed. Other instances sharing the store only become visible here.
fn spawn_stats_poller(registry: Arc<Registry>, every: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if registry.subscriber_count() == 0 {
                continue;
            }
            match registry.refresh_visitor_total() {
                Ok(true) => debug!("visitor total changed in store"),
                Ok(false) => {}
                Err(e) => warn!(err = ?e, "visitor total refresh failed"),
            }
        }
    })
}

fn init_tracing(cfg: &config::Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    match cfg.log_format {
        config::LogFormat::Json => {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_target(true)
                        .with_timer(fmt::time::SystemTime)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
        config::LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_writer(std::io::stdout),
                )
                .init();
        }
    }
}

// ============================================================================
// Error mapping
// ============================================================================

fn status_for(e: &CoreError) -> StatusCode {
    match e {
        CoreError::Validation(_) | CoreError::InvalidToken(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound => StatusCode::NOT_FOUND,
        CoreError::Storage(_) => StatusCode::BAD_GATEWAY,
        CoreError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        CoreError::AlreadyExists | CoreError::InvalidTransition(_) => StatusCode::CONFLICT,
    }
}

fn json_core_error(e: &CoreError) -> Response {
    let body = match e {
        CoreError::Validation(msg) => http_common::json_error_with_message("validation", msg),
        CoreError::InvalidToken(_) => http_common::json_err("invalid_token"),
        CoreError::NotFound => http_common::json_err("not_found"),
        CoreError::Storage(_) => http_common::json_err("storage"),
        CoreError::Persistence(_) => http_common::json_err("unavailable"),
        CoreError::AlreadyExists => http_common::json_error_with_message("conflict", "token taken"),
        CoreError::InvalidTransition(msg) => {
            http_common::json_error_with_message("invalid_transition", msg)
        }
    };
    (status_for(e), Json(body)).into_response()
}

// ============================================================================
// Creation
// ============================================================================

#[derive(Serialize)]
struct LinkOut {
    token: String,
    content_url: String,
    ads_url: String,
    image_url: String,
    created_at: String,
    created_at_ms: u64,
}

impl From<&Link> for LinkOut {
    fn from(link: &Link) -> Self {
        Self {
            token: link.token.as_str().to_string(),
            content_url: link.content_url.clone(),
            ads_url: link.ads_url.clone(),
            image_url: link.image_url.clone(),
            created_at: http_common::system_time_to_rfc3339(link.created_at),
            created_at_ms: http_common::system_time_to_millis(link.created_at),
        }
    }
}

#[derive(Serialize)]
struct CreatedOut {
    token: String,
    share_url: String,
    link: LinkOut,
}

/// Collect `content_url`, `ads_url` and `image` from a multipart body. An
/// empty file field (no file chosen) counts as no image.
async fn read_new_link(mut multipart: Multipart) -> Result<NewLink, (StatusCode, String)> {
    let mut input = NewLink::default();
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(f)) => f,
            Ok(None) => break,
            Err(e) => return Err((e.status(), e.body_text())),
        };
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "content_url" | "ads_url" => {
                let text = field.text().await.map_err(|e| (e.status(), e.body_text()))?;
                if name == "content_url" {
                    input.content_url = text;
                } else {
                    input.ads_url = text;
                }
            }
            "image" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(|e| (e.status(), e.body_text()))?;
                if !bytes.is_empty() {
                    input.image = Some(ImageUpload {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
            }
            _ => {}
        }
    }
    Ok(input)
}

async fn create_link(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> impl IntoResponse {
    let input = match read_new_link(multipart).await {
        Ok(i) => i,
        Err((status, msg)) => {
            warn!(%status, msg = %msg, "multipart rejected");
            let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "payload_too_large"
            } else {
                "bad_request"
            };
            return (status, Json(http_common::json_error_with_message(code, &msg))).into_response();
        }
    };
    match state.registry.create(input, &state.share_base(&headers)) {
        Ok(created) => {
            info!(token = %created.link.token, "create ok");
            let out = CreatedOut {
                token: created.link.token.as_str().to_string(),
                share_url: created.share_url.clone(),
                link: LinkOut::from(&created.link),
            };
            (StatusCode::CREATED, Json(out)).into_response()
        }
        Err(e) => {
            warn!(err = ?e, "create failed");
            json_core_error(&e)
        }
    }
}

async fn create_form(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> impl IntoResponse {
    let input = match read_new_link(multipart).await {
        Ok(i) => i,
        Err((status, msg)) => {
            warn!(%status, msg = %msg, "multipart rejected");
            return (status, Html(pages::create_error_page(&msg, false))).into_response();
        }
    };
    match state.registry.create(input, &state.share_base(&headers)) {
        Ok(created) => {
            info!(token = %created.link.token, "create ok");
            (StatusCode::CREATED, Html(pages::created_page(&created.share_url))).into_response()
        }
        Err(e) => {
            warn!(err = ?e, "create failed");
            let message = match &e {
                CoreError::Validation(msg) => msg.clone(),
                CoreError::Storage(_) => "Image upload failed.".to_string(),
                _ => "Error creating link.".to_string(),
            };
            (status_for(&e), Html(pages::create_error_page(&message, e.is_retryable())))
                .into_response()
        }
    }
}

// ============================================================================
// Read API
// ============================================================================

async fn get_link(State(state): State<AppState>, Path(token): Path<String>) -> impl IntoResponse {
    let token = match Token::new(token) {
        Ok(t) => t,
        Err(e) => {
            warn!("bad token in path");
            return json_core_error(&e);
        }
    };
    match state.registry.get(&token) {
        Ok(link) => (StatusCode::OK, Json(LinkOut::from(&link))).into_response(),
        Err(CoreError::NotFound) => {
            warn!(token = %token, "resolve 404");
            json_core_error(&CoreError::NotFound)
        }
        Err(e) => {
            error!(token = %token, err = ?e, "resolve error");
            json_core_error(&e)
        }
    }
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.registry.visitor_total() {
        Ok(stats) => (StatusCode::OK, Json(stats)).into_response(),
        Err(e) => {
            error!(err = ?e, "stats read failed");
            json_core_error(&e)
        }
    }
}

/// Server-sent `total` events. The stream owns the subscription, so a client
/// disconnect drops it and unsubscribes.
async fn stats_stream(State(state): State<AppState>) -> Response {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<u64>();
    let subscription = match state.registry.subscribe_visitor_total(move |total| {
        let _ = tx.send(total);
    }) {
        Ok(s) => s,
        Err(e) => {
            error!(err = ?e, "stats subscribe failed");
            return json_core_error(&e);
        }
    };
    let stream = UnboundedReceiverStream::new(rx).map(move |total| {
        let _held = &subscription;
        Ok::<_, Infallible>(Event::default().event("total").data(total.to_string()))
    });
    sse(stream).into_response()
}

fn sse<S>(stream: S) -> Sse<S>
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn get_blob(State(state): State<AppState>, Path(key): Path<String>) -> impl IntoResponse {
    match state.blobs.read(&key) {
        // Uploaded bytes are untrusted: never sniffed, never run as a document
        Ok(Some(bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, fs_blob::content_type_for(&key)),
                (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                (header::CONTENT_SECURITY_POLICY, "sandbox"),
            ],
            bytes,
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, Json(http_common::json_err("not_found"))).into_response(),
        Err(e) => {
            warn!(key = %key, err = ?e, "blob read refused");
            (StatusCode::BAD_REQUEST, Json(http_common::json_err("bad_request"))).into_response()
        }
    }
}

// ============================================================================
// Gate
// ============================================================================

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, Html(pages::not_found_page())).into_response()
}

/// Resolve the token and load a fresh flow. `Err` carries the page to render
/// when the gate cannot continue.
fn load_flow(
    state: &AppState,
    token: String,
    session: &CookieSession,
    entry: Entry,
) -> Result<GateFlow, Response> {
    let token = Token::new(token).map_err(|_| not_found())?;
    let mut flow = GateFlow::new(token);
    match flow.load(state.registry.as_ref(), session, entry) {
        Ok(Phase::Loaded) => Ok(flow),
        Ok(_) => Err(not_found()),
        Err(e) => {
            error!(token = %flow.token(), err = ?e, "gate load failed");
            Err((status_for(&e), Html(pages::unavailable_page())).into_response())
        }
    }
}

fn transition_refused(flow: &GateFlow, e: CoreError) -> Response {
    warn!(token = %flow.token(), err = ?e, "gate transition refused");
    (StatusCode::CONFLICT, Html(pages::unavailable_page())).into_response()
}

/// Gate pages depend on the session, so back navigation must refetch them.
fn gate_page(html: String) -> Response {
    ([(header::CACHE_CONTROL, "no-store")], Html(html)).into_response()
}

/// `Location` value for a stored URL. Non-ASCII bytes are percent-encoded;
/// anything else a header cannot carry is an error.
fn location_value(url: &str) -> Result<HeaderValue, header::InvalidHeaderValue> {
    let mut out = String::with_capacity(url.len());
    for b in url.bytes() {
        if b.is_ascii() {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    HeaderValue::try_from(out)
}

/// 303 to `url`. A URL that cannot be sent as a header is answered with an
/// error page instead.
fn redirect_to(token: &Token, url: &str) -> Response {
    match location_value(url) {
        Ok(location) => (StatusCode::SEE_OTHER, [(header::LOCATION, location)]).into_response(),
        Err(e) => {
            error!(token = %token, err = %e, "stored url is not a valid redirect target");
            (StatusCode::BAD_GATEWAY, Html(pages::unavailable_page())).into_response()
        }
    }
}

/// Back to the preview page, which counts a new view and offers "Continue"
/// again. Used whenever no countdown is running for this session.
fn back_to_preview(token: &Token) -> Response {
    redirect_to(token, &format!("/v/{}", token.as_str()))
}

async fn gate_view(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Response {
    let session = CookieSession::from_headers(&headers);
    let flow = match load_flow(&state, token, &session, Entry::FirstView) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match flow.link() {
        Some(link) => gate_page(pages::preview_page(link)),
        None => not_found(),
    }
}

async fn gate_shortcut(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((token, action)): Path<(String, String)>,
) -> Response {
    let Some(action) = PreviewAction::parse(&action) else {
        return not_found();
    };
    let session = CookieSession::from_headers(&headers);
    let flow = match load_flow(&state, token, &session, Entry::Resume) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    match flow.shortcut(action) {
        Ok(nav) => redirect_to(flow.token(), nav.url()),
        Err(e) => transition_refused(&flow, e),
    }
}

/// `remaining` is only the refresh hint written by the countdown page. Its
/// presence marks a countdown refresh; the seconds shown come from the
/// session's recorded start.
#[derive(Deserialize)]
struct WaitQuery {
    remaining: Option<u32>,
}

/// Without `remaining` this is "Continue": start the countdown and record
/// its start in the session. With it, resume the recorded countdown, or
/// send the visitor back to the preview when there is none.
async fn gate_wait(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
    Query(q): Query<WaitQuery>,
) -> Response {
    let mut session = CookieSession::from_headers(&headers);
    let mut flow = match load_flow(&state, token, &session, Entry::Resume) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    let now = state.clock.now();
    let remaining = if q.remaining.is_none() {
        flow.start_countdown(&mut session, now)
    } else if session.get(&countdown_key(flow.token())).is_none() {
        return back_to_preview(flow.token());
    } else {
        flow.resume_countdown(&session, now)
    };
    let remaining = match remaining {
        Ok(r) => r,
        Err(e) => return transition_refused(&flow, e),
    };
    let mut resp = match flow.link() {
        Some(link) => gate_page(pages::countdown_page(link, remaining, flow.click_step())),
        None => return not_found(),
    };
    session.apply(resp.headers_mut());
    resp
}

async fn gate_go(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(token): Path<String>,
) -> Response {
    let mut session = CookieSession::from_headers(&headers);
    let mut flow = match load_flow(&state, token, &session, Entry::Resume) {
        Ok(f) => f,
        Err(resp) => return resp,
    };
    if session.get(&countdown_key(flow.token())).is_none() {
        return back_to_preview(flow.token());
    }
    if let Err(e) = flow.resume_countdown(&session, state.clock.now()) {
        return transition_refused(&flow, e);
    }
    // Refused while the countdown is still running
    let nav = match flow.get_link(&mut session) {
        Ok(n) => n,
        Err(e) => return transition_refused(&flow, e),
    };
    match &nav {
        Navigation::Ads(_) => info!(token = %flow.token(), "get link -> ads"),
        Navigation::Content(_) => info!(token = %flow.token(), "get link -> content"),
    }
    let mut resp = redirect_to(flow.token(), nav.url());
    if resp.status() == StatusCode::SEE_OTHER {
        session.apply(resp.headers_mut());
    }
    resp
}

async fn home(State(state): State<AppState>) -> impl IntoResponse {
    let total = match state.registry.visitor_total() {
        Ok(s) => s.total,
        Err(e) => {
            warn!(err = ?e, "visitor total unavailable");
            0
        }
    };
    Html(pages::home_page(total))
}
