use devfront::{
    assemble,
    config::{load_descriptors, BuildConfig},
    server, AssemblyContext, ConfigError, Stage,
};
use std::{path::Path, process::ExitCode, sync::Arc};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "devfront=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cwd = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            tracing::error!(error = %e, "Cannot determine working directory");
            return ExitCode::FAILURE;
        }
    };

    let (descriptors, ctx) = match load(&cwd) {
        Ok(loaded) => loaded,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!("Starting {} dev server(s)", descriptors.len());
    let pipelines = descriptors
        .iter()
        .map(|descriptor| assemble(descriptor, &ctx))
        .collect();

    if server::serve_all(pipelines).await > 0 {
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

fn load(dir: &Path) -> Result<(Vec<devfront::ServerDescriptor>, AssemblyContext), ConfigError> {
    let descriptors = load_descriptors(dir)?;
    let build_output = BuildConfig::load(dir)?.map(|config| {
        tracing::info!(output = %config.output_path.display(), "Build output enabled");
        Arc::new(devfront::stages::BuildOutput::from_config(&config)) as Arc<dyn Stage>
    });
    Ok((descriptors, AssemblyContext { build_output }))
}
