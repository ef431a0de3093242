//! Static directory mounts keyed by URL prefix.

use axum::{
    body::Body,
    http::{Method, Request},
};
use std::path::PathBuf;

use crate::files::{decode_path, resolve_file, send_file};
use crate::pipeline::{Outcome, Stage, StageFuture};

#[derive(Debug, Clone)]
pub struct Mount {
    prefix: String,
    root: PathBuf,
}

impl Mount {
    pub fn new(prefix: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        let prefix = prefix.into();
        let prefix = prefix.trim_end_matches('/').to_string();
        Self {
            prefix,
            root: root.into(),
        }
    }

    /// The remainder of `path` below this mount, if the prefix covers it.
    ///
    /// Matching is segment-aligned and ignores ASCII case: `/static` covers
    /// `/static`, `/Static/app.css` and `/static/app.css` but not
    /// `/staticfiles`.
    fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        let head = path.get(..self.prefix.len())?;
        if !head.eq_ignore_ascii_case(&self.prefix) {
            return None;
        }
        let rest = &path[self.prefix.len()..];
        if rest.is_empty() || rest.starts_with('/') {
            Some(rest)
        } else {
            None
        }
    }
}

/// Ordered static mounts; only the first matching prefix is consulted.
pub struct StaticMounts {
    mounts: Vec<Mount>,
}

impl StaticMounts {
    pub fn new(mounts: Vec<Mount>) -> Self {
        Self { mounts }
    }

    /// Resolves `path` to a file on disk through the first matching mount.
    pub async fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = decode_path(path);
        let (mount, rest) = self
            .mounts
            .iter()
            .find_map(|mount| mount.strip(&path).map(|rest| (mount, rest)))?;

        resolve_file(&mount.root, rest).await
    }
}

impl Stage for StaticMounts {
    fn name(&self) -> &'static str {
        "static"
    }

    fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
        Box::pin(async move {
            if req.method() != Method::GET && req.method() != Method::HEAD {
                return Outcome::Declined(req);
            }
            let Some(path) = self.resolve(req.uri().path()).await else {
                return Outcome::Declined(req);
            };

            match send_file(&path, req.method(), &[]).await {
                Ok(response) => Outcome::Handled(response),
                Err(_) => Outcome::Declined(req),
            }
        })
    }
}
