//! Terminal stage: mounted sub-applications and the single-page fallback.

use axum::{
    body::Body,
    http::{Method, Request, Uri},
};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::config::AppRef;
use crate::files::send_file;
use crate::pipeline::{Outcome, Stage, StageFuture};

enum Entry {
    Mount(Arc<dyn Stage>),
    Document { path: PathBuf, url: Uri },
}

/// Offers the request to each configured app in order.
///
/// A mounted app may decline. An entry document answers every `GET`/`HEAD`
/// request: the request is rewritten to the document's URL, handed to the
/// build output first when one is attached, and otherwise served from disk.
pub struct AppStage {
    entries: Vec<Entry>,
    build: Option<Arc<dyn Stage>>,
}

impl AppStage {
    pub fn new(apps: Vec<AppRef>, build: Option<Arc<dyn Stage>>) -> Self {
        let entries = apps
            .into_iter()
            .map(|app| match app {
                AppRef::Mount(stage) => Entry::Mount(stage),
                AppRef::EntryDocument(path) => {
                    let url = entry_url(&path);
                    Entry::Document { path, url }
                }
            })
            .collect();
        Self { entries, build }
    }

    /// Rewrites entry documents below `root` to their project-relative URL,
    /// e.g. `<root>/public/app/index.html` becomes `/public/app/index.html`.
    pub fn relative_to(mut self, root: &Path) -> Self {
        for entry in &mut self.entries {
            if let Entry::Document { path, url } = entry {
                if let Some(relative) = relative_url(root, path) {
                    *url = relative;
                }
            }
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn serve_document(&self, path: &Path, url: &Uri, mut req: Request<Body>) -> Outcome {
        *req.uri_mut() = url.clone();

        if let Some(build) = &self.build {
            match build.handle(req).await {
                Outcome::Handled(response) => return Outcome::Handled(response),
                Outcome::Declined(returned) => req = returned,
            }
        }

        match send_file(path, req.method(), &[]).await {
            Ok(response) => Outcome::Handled(response),
            Err(e) => {
                tracing::warn!(file = %path.display(), error = %e, "Cannot serve single page app");
                Outcome::Declined(req)
            }
        }
    }
}

const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn relative_url(root: &Path, path: &Path) -> Option<Uri> {
    let relative = path.strip_prefix(root).ok()?;
    let mut url = String::new();
    for component in relative.components() {
        let Component::Normal(segment) = component else {
            return None;
        };
        url.push('/');
        url.extend(utf8_percent_encode(segment.to_str()?, SEGMENT));
    }
    if url.is_empty() {
        return None;
    }
    url.parse().ok()
}

/// URL the request is rewritten to before it reaches the build output, when
/// the document lies outside the project root.
fn entry_url(path: &Path) -> Uri {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(|name| format!("/{name}").parse().ok())
        .unwrap_or_else(|| Uri::from_static("/"))
}

impl Stage for AppStage {
    fn name(&self) -> &'static str {
        "app"
    }

    fn handle(&self, mut req: Request<Body>) -> StageFuture<'_> {
        Box::pin(async move {
            for entry in &self.entries {
                let outcome = match entry {
                    Entry::Mount(stage) => stage.handle(req).await,
                    Entry::Document { path, url } => {
                        if req.method() != Method::GET && req.method() != Method::HEAD {
                            continue;
                        }
                        self.serve_document(path, url, req).await
                    }
                };
                match outcome {
                    Outcome::Handled(response) => return Outcome::Handled(response),
                    Outcome::Declined(returned) => req = returned,
                }
            }
            Outcome::Declined(req)
        })
    }
}
