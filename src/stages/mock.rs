//! Mock fixture lookup.
//!
//! A request for `/api/users` is answered from `<mock root>/api/users` or,
//! failing that, `<mock root>/api/users.json`.

use axum::{body::Body, http::Request};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::timeout;

use crate::files::{decode_path, is_file, safe_join, send_file};
use crate::pipeline::{Outcome, Stage, StageFuture};

pub struct MockResolver {
    root: PathBuf,
    lookup_timeout: Duration,
}

impl MockResolver {
    pub fn new(root: impl Into<PathBuf>, lookup_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            lookup_timeout,
        }
    }

    /// Finds the fixture for `url_path`, trying the exact path first and the
    /// `.json` sibling second.
    pub async fn resolve(&self, url_path: &str) -> Option<PathBuf> {
        let url_path = decode_path(url_path);
        let exact = safe_join(&self.root, &url_path, true)?;
        if self.exists(&exact).await {
            return Some(exact);
        }

        let with_json = safe_join(&self.root, &format!("{url_path}.json"), true)?;
        if self.exists(&with_json).await {
            return Some(with_json);
        }

        None
    }

    async fn exists(&self, path: &Path) -> bool {
        timeout(self.lookup_timeout, is_file(path))
            .await
            .unwrap_or(false)
    }
}

impl Stage for MockResolver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
        Box::pin(async move {
            let Some(path) = self.resolve(req.uri().path()).await else {
                return Outcome::Declined(req);
            };

            match send_file(&path, req.method(), &[]).await {
                Ok(response) => {
                    tracing::info!(uri = %req.uri(), file = %path.display(), "Serving mock");
                    Outcome::Handled(response)
                }
                Err(e) => {
                    tracing::debug!(file = %path.display(), error = %e, "Mock vanished before it could be sent");
                    Outcome::Declined(req)
                }
            }
        })
    }
}
