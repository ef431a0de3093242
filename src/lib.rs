pub mod config;
pub mod error;
pub mod files;
pub mod pipeline;
pub mod server;
pub mod stages;

pub use config::{AppRef, BuildConfig, ServerDescriptor};
pub use error::{ConfigError, ProxyError, ServerError};
pub use pipeline::{assemble, AssemblyContext, Outcome, Pipeline, Stage, StageFuture};
