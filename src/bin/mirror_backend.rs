#![forbid(unsafe_code)]

//! Read-only Axum backend for the web UI.
//!
//! Requests never reach the remote source and never modify the project. The
//! loaded project is swapped out whenever `mirror` saves new files, so the UI
//! follows CLI edits without a restart.

use std::{
    fs,
    net::{IpAddr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use anyhow::{Context, Result, anyhow};
use axum::{
    Json, Router,
    body::Body,
    extract::{Path as AxumPath, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use mime_guess::{MimeGuess, mime::Mime};
use newtube_mirror::config::{RuntimeOverrides, resolve_runtime_config};
use newtube_mirror::playlist::Playlist;
use newtube_mirror::project::{CATALOG_FILE, PLAYLISTS_SUBDIR, Project};
use newtube_mirror::security::ensure_not_root;
use newtube_mirror::video::{Video, decode_data_uri};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    signal,
};
use tokio_util::io::ReaderStream;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone)]
struct BackendArgs {
    archive_root: PathBuf,
    www_root: PathBuf,
    port: u16,
    listen_host: IpAddr,
}

impl BackendArgs {
    fn parse() -> Result<Self> {
        let overrides = parse_overrides(std::env::args().skip(1))?;
        let runtime = resolve_runtime_config(overrides)?;
        Ok(Self {
            listen_host: parse_host_arg(&runtime.mirror_host)?,
            archive_root: runtime.archive_root,
            www_root: runtime.www_root,
            port: runtime.mirror_port,
        })
    }
}

fn parse_overrides<I>(iter: I) -> Result<RuntimeOverrides>
where
    I: IntoIterator<Item = String>,
{
    let mut overrides = RuntimeOverrides::default();
    let mut args = iter.into_iter();
    while let Some(arg) = args.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((flag, value)) if flag.starts_with("--") => (flag.to_string(), Some(value.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = || {
            inline
                .clone()
                .or_else(|| args.next())
                .ok_or_else(|| anyhow!("{flag} requires a value"))
        };
        match flag.as_str() {
            "--root" => overrides.archive_root = Some(PathBuf::from(value()?)),
            "--www-root" => overrides.www_root = Some(PathBuf::from(value()?)),
            "--port" => overrides.mirror_port = Some(parse_port_arg(&value()?)?),
            "--host" => {
                let host = value()?;
                parse_host_arg(&host)?;
                overrides.mirror_host = Some(host);
            }
            "--env-file" => overrides.env_path = Some(PathBuf::from(value()?)),
            _ => return Err(anyhow!("unknown argument: {arg}")),
        }
    }
    Ok(overrides)
}

fn parse_port_arg(value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .context("expected a numeric port between 0 and 65535")
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/MIRROR_HOST")
}

/// The loaded project plus the file stamps it was loaded from.
struct ProjectHandle {
    root: PathBuf,
    current: RwLock<Arc<Project>>,
    stamp: Mutex<Vec<(PathBuf, SystemTime)>>,
}

impl ProjectHandle {
    fn open(root: &Path) -> Result<Self> {
        let stamp = file_stamps(root);
        let project = Project::open(root)?;
        Ok(Self {
            root: root.to_path_buf(),
            current: RwLock::new(Arc::new(project)),
            stamp: Mutex::new(stamp),
        })
    }

    /// Returns the current project, reloading it first when the catalog or
    /// a playlist file changed on disk. A failed reload keeps serving the
    /// previous state. Blocks on filesystem work.
    fn refresh(&self) -> Arc<Project> {
        let latest = file_stamps(&self.root);
        let mut stamp = self.stamp.lock();
        if *stamp != latest {
            let reloaded = self.current.read().reload();
            match reloaded {
                Ok(project) => {
                    info!("reloaded project after on-disk changes");
                    *self.current.write() = Arc::new(project);
                    *stamp = latest;
                }
                Err(err) => warn!("keeping previous project state: {err:#}"),
            }
        }
        self.current.read().clone()
    }
}

/// Current project for a request, refreshed on the blocking pool.
async fn snapshot(state: &AppState) -> Arc<Project> {
    let handle = state.project.clone();
    match tokio::task::spawn_blocking(move || handle.refresh()).await {
        Ok(project) => project,
        Err(err) => {
            warn!("project refresh task failed: {err}");
            state.project.current.read().clone()
        }
    }
}

fn file_stamps(root: &Path) -> Vec<(PathBuf, SystemTime)> {
    let mut stamps = Vec::new();
    let mut push = |path: PathBuf| {
        if let Ok(modified) = fs::metadata(&path).and_then(|meta| meta.modified()) {
            stamps.push((path, modified));
        }
    };
    push(root.join(CATALOG_FILE));
    if let Ok(entries) = fs::read_dir(root.join(PLAYLISTS_SUBDIR)) {
        for entry in entries.flatten() {
            push(entry.path());
        }
    }
    stamps.sort();
    stamps
}

#[derive(Clone)]
struct AppState {
    project: Arc<ProjectHandle>,
    www_root: Arc<PathBuf>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSummary {
    /// 1-based display index, as accepted by the CLI.
    index: usize,
    id: String,
    label: String,
    source_id: Option<String>,
    video_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistDetail {
    index: usize,
    id: String,
    label: String,
    source_id: Option<String>,
    entries: Vec<PlaylistEntry>,
    /// Annotations after the last video.
    trailing_labels: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistEntry {
    position: usize,
    /// Annotation lines shown before this entry.
    labels: Vec<String>,
    video: VideoPayload,
}

/// Public view of a catalog record: file locations stay on the server.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoPayload {
    id: String,
    label: String,
    description: String,
    channel: String,
    channel_name: String,
    published_at: Option<DateTime<Utc>>,
    url: String,
    available: bool,
    has_thumbnail: bool,
    captions: Vec<String>,
    playlists: Vec<String>,
}

impl VideoPayload {
    fn new(project: &Project, video: &Video) -> Self {
        Self {
            id: video.id.clone(),
            label: video.label.clone(),
            description: video.description.clone(),
            channel: video.channel.clone(),
            channel_name: video.channel_name.clone(),
            published_at: video.published_at,
            url: video.url(),
            available: video.is_complete(),
            has_thumbnail: video.thumbnail.is_some(),
            captions: caption_languages(video),
            playlists: project
                .playlists
                .playlists_containing(&video.id)
                .into_iter()
                .map(|playlist| playlist.id.clone())
                .collect(),
        }
    }
}

/// Language tags of `<id>.<lang>.<ext>` caption files.
fn caption_languages(video: &Video) -> Vec<String> {
    video
        .caption_refs
        .iter()
        .flatten()
        .filter_map(|file_ref| caption_language(&video.id, file_ref))
        .collect()
}

fn caption_language(video_id: &str, file_ref: &str) -> Option<String> {
    let name = file_ref.rsplit('/').next()?;
    let rest = name.strip_prefix(video_id)?.strip_prefix('.')?;
    let (lang, _ext) = rest.rsplit_once('.')?;
    (!lang.is_empty()).then(|| lang.to_string())
}

fn playlist_detail(project: &Project, index: usize, playlist: &Playlist) -> PlaylistDetail {
    let labels = playlist.labels();
    let lines = |text: &String| text.split('\n').map(str::to_string).collect::<Vec<_>>();
    let entries = playlist
        .videos()
        .iter()
        .enumerate()
        .filter_map(|(position, id)| {
            let video = project.catalog.get(id)?;
            Some(PlaylistEntry {
                position: position + 1,
                labels: labels.get(&position).map(lines).unwrap_or_default(),
                video: VideoPayload::new(project, video),
            })
        })
        .collect();
    PlaylistDetail {
        index,
        id: playlist.id.clone(),
        label: playlist.label.clone(),
        source_id: playlist.source_id.clone(),
        entries,
        trailing_labels: labels
            .range(playlist.len()..)
            .flat_map(|(_, text)| lines(text))
            .collect(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let BackendArgs {
        archive_root,
        www_root,
        port,
        listen_host,
    } = BackendArgs::parse()?;

    ensure_not_root("mirror_backend")?;

    let state = AppState {
        project: Arc::new(ProjectHandle::open(&archive_root)?),
        www_root: Arc::new(www_root),
    };
    let app = router(state);

    let addr = SocketAddr::new(listen_host, port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/playlists", get(list_playlists))
        .route("/api/playlists/{id}", get(get_playlist))
        .route("/api/videos", get(list_videos))
        .route("/api/videos/{id}", get(get_video))
        .route("/api/videos/{id}/media", get(stream_media))
        .route("/api/videos/{id}/captions/{lang}", get(stream_caption))
        .route("/api/videos/{id}/thumbnail", get(get_thumbnail))
        .route("/api/missing", get(list_missing))
        .route("/api/orphans", get(list_orphans))
        .fallback(static_fallback)
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!("failed to install Ctrl+C handler: {}", err);
    }
}

async fn static_fallback(State(state): State<AppState>, req: Request<Body>) -> Response {
    let path = req.uri().path();
    if path == "/api" || path.starts_with("/api/") {
        return ApiError::not_found("endpoint not found").into_response();
    }

    match serve_www_path(&state.www_root, path).await {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

async fn list_playlists(State(state): State<AppState>) -> Json<Vec<PlaylistSummary>> {
    let project = snapshot(&state).await;
    let summaries = project
        .playlists
        .iter()
        .enumerate()
        .map(|(index, playlist)| PlaylistSummary {
            index: index + 1,
            id: playlist.id.clone(),
            label: playlist.label.clone(),
            source_id: playlist.source_id.clone(),
            video_count: playlist.len(),
        })
        .collect();
    Json(summaries)
}

/// Accepts a playlist id or its 1-based display index.
async fn get_playlist(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<PlaylistDetail>> {
    let project = snapshot(&state).await;
    let playlist = project
        .playlists
        .resolve(&id)
        .map_err(|_| ApiError::not_found("playlist not found"))?;
    let index = project
        .playlists
        .iter()
        .position(|candidate| candidate.id == playlist.id)
        .map_or(0, |position| position + 1);
    Ok(Json(playlist_detail(&project, index, playlist)))
}

async fn list_videos(State(state): State<AppState>) -> Json<Vec<VideoPayload>> {
    let project = snapshot(&state).await;
    Json(
        project
            .catalog
            .iter()
            .map(|video| VideoPayload::new(&project, video))
            .collect(),
    )
}

async fn get_video(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<VideoPayload>> {
    let project = snapshot(&state).await;
    let video = find_video(&project, &id)?;
    Ok(Json(VideoPayload::new(&project, video)))
}

async fn list_missing(State(state): State<AppState>) -> Json<Vec<VideoPayload>> {
    let project = snapshot(&state).await;
    Json(
        project
            .missing()
            .into_iter()
            .map(|video| VideoPayload::new(&project, video))
            .collect(),
    )
}

async fn list_orphans(State(state): State<AppState>) -> Json<Vec<VideoPayload>> {
    let project = snapshot(&state).await;
    Json(
        project
            .orphans()
            .into_iter()
            .map(|video| VideoPayload::new(&project, video))
            .collect(),
    )
}

async fn stream_media(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let path = {
        let project = snapshot(&state).await;
        let video = find_video(&project, &id)?;
        let file_ref = video
            .file_ref
            .as_deref()
            .ok_or_else(|| ApiError::not_found("media not pulled yet"))?;
        project_file(&project, file_ref)?
    };
    stream_file(path, None, Some(&headers)).await
}

async fn stream_caption(
    State(state): State<AppState>,
    AxumPath((id, lang)): AxumPath<(String, String)>,
) -> ApiResult<Response> {
    ensure_safe_path_segment(&lang)?;
    let path = {
        let project = snapshot(&state).await;
        let video = find_video(&project, &id)?;
        let file_ref = video
            .caption_refs
            .iter()
            .flatten()
            .find(|file_ref| caption_language(&video.id, file_ref).as_deref() == Some(lang.as_str()))
            .ok_or_else(|| ApiError::not_found("caption not found"))?;
        project_file(&project, file_ref)?
    };
    let mime = path
        .extension()
        .is_some_and(|ext| ext == "vtt")
        .then(|| "text/vtt".parse().ok())
        .flatten();
    stream_file(path, mime, None).await
}

async fn get_thumbnail(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Response> {
    let project = snapshot(&state).await;
    let video = find_video(&project, &id)?;
    let (mime, bytes) = video
        .thumbnail
        .as_deref()
        .and_then(decode_data_uri)
        .ok_or_else(|| ApiError::not_found("thumbnail not available"))?;
    Ok(([(header::CONTENT_TYPE, mime)], bytes).into_response())
}

fn find_video<'a>(project: &'a Project, id: &str) -> ApiResult<&'a Video> {
    ensure_safe_path_segment(id)?;
    project
        .catalog
        .get(id)
        .ok_or_else(|| ApiError::not_found("video not found"))
}

/// Resolves a stored file reference, refusing anything that leaves the project.
fn project_file(project: &Project, file_ref: &str) -> ApiResult<PathBuf> {
    let relative = Path::new(file_ref);
    if relative
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(project.resolve_file(file_ref))
}

/// Validates that a single dynamic path segment never escapes its base folder.
fn ensure_safe_path_segment(value: &str) -> ApiResult<()> {
    if value.is_empty()
        || Path::new(value)
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }

    Ok(())
}

async fn serve_www_path(root: &Path, request_path: &str) -> ApiResult<Response> {
    let target = resolve_www_path(root, request_path)?;
    let metadata = tokio::fs::metadata(&target).await;

    match metadata {
        Ok(meta) if meta.is_dir() => stream_file(root.join("index.html"), None, None).await,
        Ok(_) => stream_file(target, None, None).await,
        Err(_) if should_fallback_to_index(request_path) => {
            stream_file(root.join("index.html"), None, None).await
        }
        Err(_) => Err(ApiError::not_found("file not found")),
    }
}

fn resolve_www_path(root: &Path, request_path: &str) -> ApiResult<PathBuf> {
    let trimmed = request_path.trim_start_matches('/');
    if trimmed.is_empty() {
        return Ok(root.join("index.html"));
    }
    let candidate = Path::new(trimmed);
    if candidate
        .components()
        .any(|component| !matches!(component, Component::Normal(_)))
    {
        return Err(ApiError::not_found("file not found"));
    }
    Ok(root.join(candidate))
}

/// Client-side routes (no extension) get the SPA entry point.
fn should_fallback_to_index(request_path: &str) -> bool {
    let trimmed = request_path.trim_start_matches('/');
    trimmed.is_empty() || Path::new(trimmed).extension().is_none()
}

async fn stream_file(
    path: PathBuf,
    mime: Option<Mime>,
    headers: Option<&HeaderMap>,
) -> ApiResult<Response> {
    let mut file = File::open(&path)
        .await
        .map_err(|_| ApiError::not_found("file not found"))?;
    let size = file
        .metadata()
        .await
        .map_err(|_| ApiError::not_found("file not found"))?
        .len();

    let guessed = mime.or_else(|| MimeGuess::from_path(&path).first());
    let range = headers
        .and_then(|headers| headers.get(header::RANGE))
        .and_then(|value| parse_range_header(value, size));

    let mut response = match range {
        Some((start, _)) if start >= size => {
            let mut response = Response::new(Body::empty());
            *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
            if let Ok(value) = format!("bytes */{size}").parse() {
                response.headers_mut().insert(header::CONTENT_RANGE, value);
            }
            response
        }
        Some((start, end)) => {
            let end = end.min(size.saturating_sub(1));
            let length = end - start + 1;
            file.seek(std::io::SeekFrom::Start(start))
                .await
                .map_err(|_| ApiError::not_found("file not found"))?;
            let mut response = Body::from_stream(ReaderStream::new(file.take(length))).into_response();
            *response.status_mut() = StatusCode::PARTIAL_CONTENT;
            let headers = response.headers_mut();
            if let Ok(value) = format!("bytes {start}-{end}/{size}").parse() {
                headers.insert(header::CONTENT_RANGE, value);
            }
            headers.insert(header::CONTENT_LENGTH, length.into());
            response
        }
        None => Body::from_stream(ReaderStream::new(file)).into_response(),
    };

    response
        .headers_mut()
        .insert(header::ACCEPT_RANGES, header::HeaderValue::from_static("bytes"));
    if let Some(mime) = guessed
        && let Ok(value) = mime.to_string().parse()
    {
        response.headers_mut().insert(header::CONTENT_TYPE, value);
    }

    Ok(response)
}

fn parse_range_header(value: &header::HeaderValue, size: u64) -> Option<(u64, u64)> {
    let value = value.to_str().ok()?.trim();
    let range = value.strip_prefix("bytes=")?.trim();
    let (start_str, end_str) = range.split_once('-')?;

    if start_str.is_empty() {
        // "-N" asks for the last N bytes.
        let suffix_len: u64 = end_str.parse().ok()?;
        if suffix_len == 0 {
            return None;
        }
        return Some((size.saturating_sub(suffix_len), size.saturating_sub(1)));
    }

    let start: u64 = start_str.parse().ok()?;
    let end = if end_str.is_empty() {
        size.saturating_sub(1)
    } else {
        end_str.parse().ok()?
    };
    (end >= start).then_some((start, end))
}
