//! Builds a [`Pipeline`] from a server descriptor.
//!
//! Stage order never depends on the descriptor; optional fields only switch
//! individual stages on or off:
//!
//! 1. mock fixtures
//! 2. build output
//! 3. precompressed assets
//! 4. static mounts
//! 5. proxy
//! 6. apps / single page fallback

use std::path::PathBuf;
use std::sync::Arc;

use super::{Pipeline, Stage};
use crate::config::{AppRef, ServerDescriptor};
use crate::stages::{
    upstream_client, AppStage, CompressedAssets, MockResolver, Mount, ProxyRouter, RoutePattern,
    StaticMounts, Target,
};

/// Resources shared by every pipeline of a process.
#[derive(Clone, Default)]
pub struct AssemblyContext {
    /// Build-output handler, present when the build tool is configured.
    pub build_output: Option<Arc<dyn Stage>>,
}

/// Assembles the stage chain for one (already path-resolved) descriptor.
pub fn assemble(descriptor: &ServerDescriptor, ctx: &AssemblyContext) -> Pipeline {
    let mut stages: Vec<Box<dyn Stage>> = Vec::new();

    if let Some(mock_path) = &descriptor.mock_path {
        tracing::info!(path = %mock_path.display(), "Using mock data");
        stages.push(Box::new(MockResolver::new(mock_path, descriptor.timeout())));
    }

    let build = ctx
        .build_output
        .clone()
        .filter(|_| descriptor.use_build_tool);
    if let Some(build) = &build {
        stages.push(Box::new(build.clone()));
    }

    if let Some(suffixes) = descriptor.compress_files.as_ref().filter(|s| !s.is_empty()) {
        let root = descriptor
            .project_root
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));
        tracing::info!(suffixes = ?suffixes, root = %root.display(), "Serving precompressed assets");
        stages.push(Box::new(CompressedAssets::new(suffixes.clone(), root)));
    }

    if let Some(public_paths) = descriptor.public_paths.as_ref().filter(|p| !p.is_empty()) {
        let mounts = public_paths
            .iter()
            .map(|(prefix, dir)| {
                tracing::info!(prefix = %prefix, dir = %dir.display(), "Serving static data");
                Mount::new(prefix.as_str(), dir)
            })
            .collect();
        stages.push(Box::new(StaticMounts::new(mounts)));
    }

    if let Some(proxy) = descriptor.proxy.as_ref().filter(|p| !p.is_empty()) {
        let routes: Vec<_> = proxy
            .iter()
            .filter_map(|(pattern, target)| match Target::parse(target) {
                Ok(target) => {
                    tracing::info!(pattern = %pattern, target = %target, "Proxying");
                    Some((RoutePattern::parse(pattern), target))
                }
                Err(e) => {
                    tracing::error!(pattern = %pattern, error = %e, "Skipping proxy route");
                    None
                }
            })
            .collect();
        if !routes.is_empty() {
            stages.push(Box::new(ProxyRouter::new(
                routes,
                upstream_client(),
                descriptor.timeout(),
            )));
        }
    }

    let apps = descriptor.app_refs();
    for app in &apps {
        match app {
            AppRef::Mount(stage) => tracing::info!(app = stage.name(), "Using the specified app"),
            AppRef::EntryDocument(path) => {
                tracing::info!(document = %path.display(), "Serving single page app")
            }
        }
    }
    let mut app_stage = AppStage::new(apps, build);
    if let Some(root) = &descriptor.project_root {
        app_stage = app_stage.relative_to(root);
    }
    if !app_stage.is_empty() {
        stages.push(Box::new(app_stage));
    }

    Pipeline::new(descriptor.socket_addr(), stages)
}
