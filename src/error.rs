use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::{error::Error as StdError, net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Error, Debug)]
pub enum FileError {
    #[error("File not found")]
    NotFound,

    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("{}", chain(.0))]
    Upstream(#[from] hyper_util::client::legacy::Error),

    #[error("Upstream did not respond within {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Invalid proxy target: {0}")]
    InvalidTarget(String),
}

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Body of the response sent when an upstream cannot be reached.
#[derive(Debug, Serialize)]
pub struct ProxyFailure {
    pub error: &'static str,
    pub reason: String,
}

impl ProxyFailure {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            error: "proxy_error",
            reason: reason.into(),
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        (StatusCode::BAD_GATEWAY, Json(ProxyFailure::new(self.to_string()))).into_response()
    }
}

/// Renders an error together with its source chain, e.g.
/// `client error (Connect): tcp connect error: Connection refused`.
fn chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.ends_with(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}
