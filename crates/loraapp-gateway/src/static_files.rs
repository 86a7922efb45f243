//! Static file responder for paths outside `/api`.
//!
//! Files are read from the configured directory on every request. Paths
//! that would leave the directory, missing files and a missing directory
//! all answer 404.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::handler::Handler;
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use percent_encoding::percent_decode_str;

const INDEX: &str = "index.html";

/// Adds the static responder as fallback of `router`.
///
/// With `dir` of `None` every unmatched path answers 404.
pub fn with_static_files(router: Router, dir: Option<PathBuf>) -> Router {
    match dir {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), "serving static files");
            router.fallback_service(serve_static.with_state(Arc::new(dir)))
        }
        None => router.fallback(not_found),
    }
}

async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn serve_static(State(root): State<Arc<PathBuf>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let Some(path) = resolve(&root, uri.path()) else {
        tracing::debug!(path = uri.path(), "static path rejected");
        return StatusCode::NOT_FOUND.into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(contents) => {
            let body = if method == Method::HEAD {
                Body::empty()
            } else {
                Body::from(contents)
            };
            ([(header::CONTENT_TYPE, content_type(&path))], body).into_response()
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "failed to read static file");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

/// Maps a request path to a file under `root`, or `None` when a segment,
/// once percent-decoded, is anything but a plain file name.
fn resolve(root: &Path, request_path: &str) -> Option<PathBuf> {
    let relative = request_path.trim_start_matches('/');
    let mut resolved = root.to_path_buf();

    for segment in relative.split('/') {
        let segment = percent_decode_str(segment).decode_utf8().ok()?;
        if segment.contains(['/', '\\']) {
            return None;
        }
        let mut components = Path::new(segment.as_ref()).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => resolved.push(name),
            (Some(Component::CurDir), None) | (None, None) => {}
            _ => return None,
        }
    }

    if relative.is_empty() || relative.ends_with('/') {
        resolved.push(INDEX);
    }
    Some(resolved)
}

fn content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("js") | Some("mjs") => "text/javascript; charset=utf-8",
        Some("json") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}
