//! File transmission primitive shared by the file-backed stages.
//!
//! Files are streamed from disk rather than read into memory; the open
//! handle lives inside the response body and is released when the body is
//! dropped, including when the client goes away mid-transfer.

use axum::{
    body::Body,
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::Response,
};
use percent_encoding::percent_decode_str;
use std::borrow::Cow;
use std::path::{Component, Path, PathBuf};
use tokio_util::io::ReaderStream;

use crate::error::FileError;

const INDEX_FILE: &str = "index.html";

/// Streams the file at `path`.
///
/// `overrides` replace the headers derived from the file, so callers can pin
/// e.g. `Content-Type` regardless of the extension.
///
/// # Returns
///
/// `FileError::NotFound` if the path is missing or not a regular file.
pub async fn send_file(
    path: &Path,
    method: &Method,
    overrides: &[(HeaderName, &'static str)],
) -> Result<Response, FileError> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(FileError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Err(FileError::NotFound);
    }

    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime.as_ref())
        .header(header::CONTENT_LENGTH, metadata.len());

    if let Some(headers) = builder.headers_mut() {
        for (name, value) in overrides {
            headers.insert(name.clone(), HeaderValue::from_static(*value));
        }
    }

    let body = if *method == Method::HEAD {
        Body::empty()
    } else {
        Body::from_stream(ReaderStream::new(file))
    };

    builder
        .body(body)
        .map_err(|e| FileError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))
}

/// Returns true when `path` names an existing regular file.
///
/// Errors count as "no".
pub async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|metadata| metadata.is_file())
        .unwrap_or(false)
}

/// Resolves `url_path` below `root` to a regular file, falling back to the
/// directory's `index.html`.
pub async fn resolve_file(root: &Path, url_path: &str) -> Option<PathBuf> {
    let candidate = safe_join(root, url_path, false)?;
    if is_file(&candidate).await {
        return Some(candidate);
    }

    let index = candidate.join(INDEX_FILE);
    is_file(&index).await.then_some(index)
}

/// Joins a URL path below `root`, refusing anything that could leave it.
///
/// Rejects parent-directory segments and, unless `allow_hidden` is set, any
/// segment starting with a dot.
pub fn safe_join(root: &Path, url_path: &str, allow_hidden: bool) -> Option<PathBuf> {
    let relative = Path::new(url_path.trim_start_matches('/'));
    for component in relative.components() {
        match component {
            Component::Normal(name) => {
                if !allow_hidden && name.to_str().map_or(true, |s| s.starts_with('.')) {
                    return None;
                }
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(root.join(relative))
}

/// Percent-decodes a request path. Invalid UTF-8 sequences are replaced.
pub fn decode_path(path: &str) -> Cow<'_, str> {
    percent_decode_str(path).decode_utf8_lossy()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_send_file_streams_bytes_with_mime() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("style.css");
        fs::write(&path, "body { color: red }").unwrap();

        let response = send_file(&path, &Method::GET, &[]).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "text/css");
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "19");

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"body { color: red }");
    }

    #[tokio::test]
    async fn test_send_file_overrides_headers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.js.gz");
        fs::write(&path, [0x1f, 0x8b]).unwrap();

        let response = send_file(
            &path,
            &Method::GET,
            &[(header::CONTENT_TYPE, "application/javascript")],
        )
        .await
        .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/javascript"
        );
    }

    #[tokio::test]
    async fn test_send_file_head_has_no_body() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.html");
        fs::write(&path, "<html></html>").unwrap();

        let response = send_file(&path, &Method::HEAD, &[]).await.unwrap();
        assert_eq!(response.headers().get(header::CONTENT_LENGTH).unwrap(), "13");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_send_file_missing_and_directory() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            send_file(&dir.path().join("nope"), &Method::GET, &[]).await,
            Err(FileError::NotFound)
        ));
        assert!(matches!(
            send_file(dir.path(), &Method::GET, &[]).await,
            Err(FileError::NotFound)
        ));
    }

    #[test]
    fn test_safe_join() {
        let root = Path::new("/srv");
        assert_eq!(safe_join(root, "/a/b.js", false), Some(PathBuf::from("/srv/a/b.js")));
        assert_eq!(safe_join(root, "/", false), Some(PathBuf::from("/srv")));
        assert_eq!(safe_join(root, "/a/../../etc/passwd", false), None);
        assert_eq!(safe_join(root, "/.env", false), None);
        assert_eq!(safe_join(root, "/.well-known/x", true), Some(PathBuf::from("/srv/.well-known/x")));
    }

    #[tokio::test]
    async fn test_resolve_file_prefers_file_then_index() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "docs").unwrap();
        fs::write(dir.path().join("app.js"), "js").unwrap();

        assert_eq!(resolve_file(dir.path(), "/app.js").await, Some(dir.path().join("app.js")));
        assert_eq!(
            resolve_file(dir.path(), "/docs").await,
            Some(dir.path().join("docs/index.html"))
        );
        assert_eq!(resolve_file(dir.path(), "/missing.js").await, None);
    }

    #[test]
    fn test_decode_path() {
        assert_eq!(decode_path("/my%20file.json"), "/my file.json");
        assert_eq!(decode_path("/plain"), "/plain");
    }
}
