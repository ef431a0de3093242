//! Serves the build tool's output directory.
//!
//! Only requests under the configured public path are considered; the rest of
//! the URL is looked up below the output directory.

use axum::{
    body::Body,
    http::{Method, Request},
};
use std::path::PathBuf;

use crate::config::BuildConfig;
use crate::files::{decode_path, resolve_file, send_file};
use crate::pipeline::{Outcome, Stage, StageFuture};

pub struct BuildOutput {
    root: PathBuf,
    public_path: String,
}

impl BuildOutput {
    pub fn new(root: impl Into<PathBuf>, public_path: &str) -> Self {
        let mut public_path = format!("/{}", public_path.trim_matches('/'));
        if public_path.len() > 1 {
            public_path.push('/');
        }
        Self {
            root: root.into(),
            public_path,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(&config.output_path, &config.public_path)
    }

    pub async fn resolve(&self, path: &str) -> Option<PathBuf> {
        let path = decode_path(path);
        let rest = path.strip_prefix(self.public_path.as_str())?;
        resolve_file(&self.root, rest).await
    }
}

impl Stage for BuildOutput {
    fn name(&self) -> &'static str {
        "build"
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
