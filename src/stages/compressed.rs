//! Serves precompressed `.gz` siblings for configured suffixes.
//!
//! The suffix is compared against the whole request target, query included,
//! so `/app.js?v=2` does not match a `.js` suffix. The file lookup itself
//! uses the percent-decoded target.

use axum::{
    body::Body,
    http::{header, Request},
};
use std::path::PathBuf;

use crate::files::{decode_path, safe_join, send_file};
use crate::pipeline::{Outcome, Stage, StageFuture};

pub struct CompressedAssets {
    suffixes: Vec<String>,
    root: PathBuf,
}

impl CompressedAssets {
    pub fn new(suffixes: Vec<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            suffixes,
            root: root.into(),
        }
    }

    /// Path of the `.gz` file that answers `target`, if any suffix matches.
    pub fn compressed_path(&self, target: &str) -> Option<PathBuf> {
        if !self.suffixes.iter().any(|suffix| target.ends_with(suffix.as_str())) {
            return None;
        }
        safe_join(&self.root, &format!("{}.gz", decode_path(target)), false)
    }
}

impl Stage for CompressedAssets {
    fn name(&self) -> &'static str {
        "compressed"
    }

    fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
        Box::pin(async move {
            let target = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let Some(path) = self.compressed_path(target) else {
                return Outcome::Declined(req);
            };

            let overrides = [
                (header::CONTENT_ENCODING, "gzip"),
                (header::CONTENT_TYPE, "application/javascript"),
            ];
            match send_file(&path, req.method(), &overrides).await {
                Ok(response) => Outcome::Handled(response),
                Err(e) => {
                    tracing::debug!(file = %path.display(), error = %e, "No compressed asset");
                    Outcome::Declined(req)
                }
            }
        })
    }
}
