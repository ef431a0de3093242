//! The individual dispatch stages, in pipeline order.

pub mod app;
pub mod build_output;
pub mod compressed;
pub mod mock;
pub mod proxy;
pub mod static_mount;

pub use app::AppStage;
pub use build_output::BuildOutput;
pub use compressed::CompressedAssets;
pub use mock::MockResolver;
pub use proxy::{upstream_client, ProxyRouter, RoutePattern, Target, UpstreamClient};
pub use static_mount::{Mount, StaticMounts};
