use indexmap::IndexMap;
use serde::{Deserialize, Deserializer};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use crate::error::ConfigError;
use crate::pipeline::Stage;

/// File name of the server configuration, looked up in the working directory.
pub const SERVER_CONFIG_FILE: &str = "devserver.config.json";

/// File name of the optional build-tool configuration.
pub const BUILD_CONFIG_FILE: &str = "build.config.json";

pub const DEFAULT_PORT: u16 = 3000;

/// Default bound for upstream requests and mock lookups.
pub const DEFAULT_TIMEOUT_MS: u64 = 30000;

/// One server's declarative configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    pub mock_path: Option<PathBuf>,
    pub compress_files: Option<Vec<String>>,
    pub project_root: Option<PathBuf>,
    pub public_paths: Option<IndexMap<String, PathBuf>>,
    pub proxy: Option<IndexMap<String, String>>,
    pub app: Option<AppRef>,
    pub apps: Option<Vec<AppRef>>,
    #[serde(default)]
    pub use_build_tool: bool,
    pub port: Option<u16>,
    pub host: Option<IpAddr>,
    pub timeout_ms: Option<u64>,
}

impl ServerDescriptor {
    pub fn port(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_PORT)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        let host = self.host.unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        SocketAddr::new(host, self.port())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    /// The terminal-stage entries in order. A singular `app` replaces `apps`.
    pub fn app_refs(&self) -> Vec<AppRef> {
        match (&self.app, &self.apps) {
            (Some(app), _) => vec![app.clone()],
            (None, Some(apps)) => apps.clone(),
            (None, None) => Vec::new(),
        }
    }

    /// Makes every relative filesystem path absolute against `base`.
    pub fn resolve(mut self, base: &Path) -> Self {
        let join = |p: PathBuf| if p.is_absolute() { p } else { base.join(p) };

        self.mock_path = self.mock_path.map(join);
        self.project_root = Some(self.project_root.map(join).unwrap_or_else(|| base.to_path_buf()));
        self.public_paths = self
            .public_paths
            .map(|paths| paths.into_iter().map(|(prefix, dir)| (prefix, join(dir))).collect());

        let resolve_app = |app: AppRef| match app {
            AppRef::EntryDocument(doc) => AppRef::EntryDocument(join(doc)),
            mount => mount,
        };
        self.app = self.app.map(resolve_app);
        self.apps = self
            .apps
            .map(|apps| apps.into_iter().map(resolve_app).collect());
        self
    }
}

/// A terminal-stage entry: either a caller-supplied sub-application or the
/// path of a single-page entry document.
#[derive(Clone)]
pub enum AppRef {
    Mount(Arc<dyn Stage>),
    EntryDocument(PathBuf),
}

impl fmt::Debug for AppRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppRef::Mount(stage) => f.debug_tuple("Mount").field(&stage.name()).finish(),
            AppRef::EntryDocument(path) => f.debug_tuple("EntryDocument").field(path).finish(),
        }
    }
}

impl<'de> Deserialize<'de> for AppRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PathBuf::deserialize(deserializer).map(AppRef::EntryDocument)
    }
}

/// Contents of the server configuration file: one descriptor or many.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ConfigSet {
    Many(Vec<ServerDescriptor>),
    One(Box<ServerDescriptor>),
}

impl ConfigSet {
    pub fn into_descriptors(self) -> Vec<ServerDescriptor> {
        match self {
            ConfigSet::Many(descriptors) => descriptors,
            ConfigSet::One(descriptor) => vec![*descriptor],
        }
    }
}

/// Loads the server descriptors from `dir`, resolving their paths against it.
///
/// A missing configuration file yields a single default descriptor.
pub fn load_descriptors(dir: &Path) -> Result<Vec<ServerDescriptor>, ConfigError> {
    let path = dir.join(SERVER_CONFIG_FILE);
    let set = match read_json::<ConfigSet>(&path)? {
        Some(set) => set,
        None => {
            tracing::info!(path = %path.display(), "No server config found, using defaults");
            ConfigSet::One(Box::default())
        }
    };

    Ok(set
        .into_descriptors()
        .into_iter()
        .map(|descriptor| descriptor.resolve(dir))
        .collect())
}

/// Build-tool settings; presence of the file enables the build-output stage
/// for descriptors that opt in with `useBuildTool`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildConfig {
    #[serde(default = "default_output_path")]
    pub output_path: PathBuf,
    #[serde(default = "default_public_path")]
    pub public_path: String,
}

fn default_output_path() -> PathBuf {
    PathBuf::from("dist")
}

fn default_public_path() -> String {
    "/".to_string()
}

impl BuildConfig {
    pub fn load(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let config = read_json::<BuildConfig>(&dir.join(BUILD_CONFIG_FILE))?;
        Ok(config.map(|mut config| {
            if config.output_path.is_relative() {
                config.output_path = dir.join(&config.output_path);
            }
            config
        }))
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    serde_json::from_str(&content)
        .map(Some)
        .map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_single_descriptor_normalizes_to_one() {
        let set: ConfigSet = serde_json::from_str(r#"{"port": 4000, "mockPath": "mocks"}"#).unwrap();
        let descriptors = set.into_descriptors();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].port(), 4000);
        assert_eq!(descriptors[0].mock_path, Some(PathBuf::from("mocks")));
    }

    #[test]
    fn test_descriptor_list_keeps_order() {
        let set: ConfigSet =
            serde_json::from_str(r#"[{"port": 4001}, {}, {"port": 4003}]"#).unwrap();
        let ports: Vec<u16> = set.into_descriptors().iter().map(|d| d.port()).collect();
        assert_eq!(ports, vec![4001, DEFAULT_PORT, 4003]);
    }

    #[test]
    fn test_ordered_mappings_preserve_declaration_order() {
        let descriptor: ServerDescriptor = serde_json::from_str(
            r#"{"publicPaths": {"/z": "z", "/a": "a", "/m": "m"},
                "proxy": {"/api/*": "http://localhost:9000", "/auth": "http://localhost:9001"}}"#,
        )
        .unwrap();

        let prefixes: Vec<&str> = descriptor
            .public_paths
            .as_ref()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(prefixes, vec!["/z", "/a", "/m"]);

        let patterns: Vec<&str> = descriptor.proxy.as_ref().unwrap().keys().map(String::as_str).collect();
        assert_eq!(patterns, vec!["/api/*", "/auth"]);
    }

    #[test]
    fn test_singular_app_replaces_apps() {
        let descriptor: ServerDescriptor =
            serde_json::from_str(r#"{"app": "index.html", "apps": ["a.html", "b.html"]}"#).unwrap();
        let refs = descriptor.app_refs();
        assert_eq!(refs.len(), 1);
        assert!(matches!(&refs[0], AppRef::EntryDocument(p) if p == Path::new("index.html")));
    }

    #[test]
    fn test_resolve_makes_paths_absolute() {
        let base = Path::new("/srv/project");
        let descriptor: ServerDescriptor = serde_json::from_str(
            r#"{"mockPath": "mocks", "publicPaths": {"/static": "public"}, "app": "/abs/index.html"}"#,
        )
        .unwrap();
        let descriptor = descriptor.resolve(base);

        assert_eq!(descriptor.mock_path, Some(base.join("mocks")));
        assert_eq!(descriptor.project_root, Some(base.to_path_buf()));
        assert_eq!(descriptor.public_paths.unwrap()["/static"], base.join("public"));
        assert!(matches!(
            descriptor.app,
            Some(AppRef::EntryDocument(ref p)) if p == Path::new("/abs/index.html")
        ));
    }

    #[test]
    fn test_defaults() {
        let descriptor = ServerDescriptor::default();
        assert_eq!(descriptor.port(), 3000);
        assert_eq!(descriptor.timeout(), Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert_eq!(descriptor.socket_addr().to_string(), "0.0.0.0:3000");
        assert!(descriptor.app_refs().is_empty());
    }

    #[test]
    fn test_missing_config_yields_default_descriptor() {
        let dir = TempDir::new().unwrap();
        let descriptors = load_descriptors(dir.path()).unwrap();
        assert_eq!(descriptors.len(), 1);
        assert_eq!(descriptors[0].port(), DEFAULT_PORT);
    }

    #[test]
    fn test_malformed_config_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SERVER_CONFIG_FILE), "{ not json").unwrap();
        assert!(matches!(
            load_descriptors(dir.path()),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_build_config_absent_and_present() {
        let dir = TempDir::new().unwrap();
        assert!(BuildConfig::load(dir.path()).unwrap().is_none());

        std::fs::write(dir.path().join(BUILD_CONFIG_FILE), r#"{"publicPath": "/assets/"}"#).unwrap();
        let config = BuildConfig::load(dir.path()).unwrap().unwrap();
        assert_eq!(config.output_path, dir.path().join("dist"));
        assert_eq!(config.public_path, "/assets/");
    }
}
