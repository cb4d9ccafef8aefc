use axum::{
    Extension, Router,
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Request, State, multipart::MultipartError},
    http::{HeaderValue, StatusCode, header},
    middleware::{Next, from_fn, from_fn_with_state},
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
};
use doc_session::{InMemorySessionStorage, PostgresSessionStorage, Session, SessionStorage};
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::{
    config::Config,
    error::AppError,
    extract::extract_text_blocking,
    llm::{LanguageModel, OpenRouterModel, TimeoutModel},
    models::{AskRequest, AskResponse, SESSION_STATE_KEY, SessionState, SummaryResult, UploadedDocument},
    report::render_summary_blocking,
    session_cookie::{CookieSigner, SessionId},
    summarizer::{answer_question, summarize_document},
};

const INDEX_HTML: &str = include_str!("../static/index.html");

/// Upper bound between expired-session sweeps.
const SESSION_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Clone)]
pub struct AppState {
    pub session_storage: Arc<dyn SessionStorage>,
    pub model: Arc<dyn LanguageModel>,
    pub cookie_signer: Arc<CookieSigner>,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
}

pub async fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    spawn_session_sweeper(
        app_state.session_storage.clone(),
        SESSION_SWEEP_INTERVAL.min(config.session_ttl),
    );
    Ok(build_router(app_state))
}

async fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let model = TimeoutModel::new(
        Arc::new(OpenRouterModel::new(
            &config.openrouter_api_key,
            config.llm_model.clone(),
        )),
        config.llm_timeout,
    );
    let cookie_signer = CookieSigner::new(&config.session_secret)
        .map_err(|e| anyhow::anyhow!("Invalid session secret: {e}"))?;

    Ok(AppState {
        session_storage: create_session_storage(config).await?,
        model: Arc::new(model),
        cookie_signer: Arc::new(cookie_signer),
        upload_dir: config.upload_dir.clone(),
        max_upload_bytes: config.max_upload_bytes,
    })
}

async fn create_session_storage(config: &Config) -> anyhow::Result<Arc<dyn SessionStorage>> {
    if let Some(database_url) = &config.database_url {
        info!("Using PostgreSQL session storage");
        match PostgresSessionStorage::connect(database_url, Some(config.session_ttl)).await {
            Ok(storage) => return Ok(Arc::new(storage)),
            Err(e) => error!(
                "Failed to connect to PostgreSQL: {}. Falling back to in-memory storage.",
                e
            ),
        }
    } else {
        info!("Using in-memory session storage (set DATABASE_URL to use PostgreSQL)");
    }

    Ok(Arc::new(InMemorySessionStorage::with_ttl(config.session_ttl)?))
}

/// Periodically frees sessions whose clients never came back.
fn spawn_session_sweeper(storage: Arc<dyn SessionStorage>, every: Duration) {
    let every = every.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            match storage.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => warn!("Session sweep failed: {}", e),
            }
        }
    });
}

pub fn build_router(app_state: AppState) -> Router {
    let body_limit = app_state.max_upload_bytes;

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .route("/upload", post(upload_document))
        .route("/ask", post(ask_question))
        .route("/download_summary", get(download_summary))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(app_state.clone(), session_middleware))
        .layer(from_fn(correlation_id_middleware))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Middleware to add correlation ID to all requests
async fn correlation_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = Uuid::new_v4().to_string();

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        request.headers_mut().insert("x-correlation-id", value);
    }

    let span = tracing::info_span!("http_request", correlation_id = %correlation_id);
    next.run(request).instrument(span).await
}

/// Resolves the signed session cookie and issues one for new clients.
async fn session_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let session = state.cookie_signer.resolve(request.headers());
    request.extensions_mut().insert(session.clone());

    let mut response = next.run(request).await;

    if session.is_new {
        if let Some(cookie) = state.cookie_signer.set_cookie_header(&session.id) {
            response.headers_mut().append(header::SET_COOKIE, cookie);
        }
    }
    response
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn upload_document(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    mut multipart: Multipart,
) -> ApiResult<SummaryResult> {
    let (file_name, bytes) = read_file_field(&mut multipart).await?;
    info!(
        session_id = %session.id,
        file_name = %file_name,
        bytes = bytes.len(),
        "Received document upload"
    );

    let stored_path = store_upload(&state.upload_dir, &file_name, &bytes).await?;

    let text = extract_text_blocking(stored_path.clone())
        .await
        .map_err(|e| {
            warn!(file_name = %file_name, error = %e, "PDF could not be read");
            AppError::ExtractionFailed
        })?;
    if text.is_empty() {
        warn!(file_name = %file_name, "PDF contains no extractable text");
        return Err(AppError::ExtractionFailed);
    }

    let document = UploadedDocument {
        file_name,
        stored_path,
        text,
    };

    let summary = summarize_document(state.model.as_ref(), &document.text)
        .await
        .map_err(|e| {
            error!(session_id = %session.id, error = %e, "Summarization failed");
            AppError::from(e)
        })?;

    save_session_state(
        &state,
        &session,
        SessionState {
            document_text: Some(document.text),
            summary: Some(summary.clone()),
        },
    )
    .await?;

    info!(
        session_id = %session.id,
        file_name = %document.file_name,
        path = %document.stored_path.display(),
        "Document summarized"
    );
    Ok(Json(summary))
}

/// Pull the `file` field out of the form. A field without a filename is not
/// a file upload.
async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes), AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(upload_error)?
    {
        if field.name() != Some("file") {
            continue;
        }
        let Some(file_name) = field.file_name().map(str::to_string) else {
            return Err(AppError::MissingFile);
        };
        if file_name.is_empty() {
            return Err(AppError::EmptyFilename);
        }
        let bytes = field.bytes().await.map_err(upload_error)?;
        return Ok((file_name, bytes));
    }
    Err(AppError::MissingFile)
}

fn upload_error(e: MultipartError) -> AppError {
    let detail = e.body_text();
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %detail, "Upload exceeds the body limit");
        AppError::UploadTooLarge
    } else {
        AppError::InvalidUpload(detail)
    }
}

/// Write the upload under `upload_dir`, keyed by the client's filename.
/// An existing file with the same name is overwritten.
async fn store_upload(upload_dir: &Path, file_name: &str, bytes: &[u8]) -> Result<PathBuf, AppError> {
    let base_name = Path::new(file_name)
        .file_name()
        .ok_or_else(|| AppError::InvalidUpload(format!("unusable filename '{file_name}'")))?;
    let path = upload_dir.join(base_name);

    tokio::fs::create_dir_all(upload_dir)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to create upload directory: {e}")))?;
    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| AppError::Internal(format!("Failed to store upload: {e}")))?;

    Ok(path)
}

async fn ask_question(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
    body: Bytes,
) -> ApiResult<AskResponse> {
    let document_text = load_session_state(&state, &session)
        .await?
        .document_text
        .ok_or(AppError::NoDocument)?;

    let question = serde_json::from_slice::<AskRequest>(&body)
        .ok()
        .and_then(|request| request.question)
        .filter(|q| !q.trim().is_empty())
        .ok_or(AppError::MissingQuestion)?;

    info!(
        session_id = %session.id,
        question_chars = question.len(),
        "Answering question"
    );

    let answer = answer_question(state.model.as_ref(), &document_text, &question).await;
    Ok(Json(AskResponse { answer }))
}

async fn download_summary(
    State(state): State<AppState>,
    Extension(session): Extension<SessionId>,
) -> Result<Response, AppError> {
    let summary = load_session_state(&state, &session)
        .await?
        .summary
        .ok_or(AppError::NoSummary)?;

    let pdf = render_summary_blocking(summary).await.map_err(|e| {
        error!(session_id = %session.id, error = %e, "Failed to render summary PDF");
        AppError::Internal(e.to_string())
    })?;

    info!(session_id = %session.id, bytes = pdf.len(), "Serving summary PDF");
    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"summary.pdf\"",
            ),
        ],
        pdf,
    )
        .into_response())
}

async fn load_session_state(state: &AppState, session: &SessionId) -> Result<SessionState, AppError> {
    let stored = state.session_storage.get(&session.id).await.map_err(|e| {
        error!("Failed to load session {}: {}", session.id, e);
        AppError::from(e)
    })?;

    Ok(stored
        .and_then(|s| s.context.get::<SessionState>(SESSION_STATE_KEY))
        .unwrap_or_default())
}

async fn save_session_state(
    state: &AppState,
    session: &SessionId,
    session_state: SessionState,
) -> Result<(), AppError> {
    let stored = state
        .session_storage
        .get(&session.id)
        .await?
        .unwrap_or_else(|| Session::new(session.id.clone()));

    stored.context.set(SESSION_STATE_KEY, &session_state)?;
    state.session_storage.save(stored).await.map_err(|e| {
        error!("Failed to save session {}: {}", session.id, e);
        AppError::from(e)
    })
}
