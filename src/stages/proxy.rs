//! Reverse proxy to upstream services.
//!
//! Matching requests are forwarded verbatim (method, headers, body, path and
//! query) and the upstream response is streamed back untouched. When the
//! upstream cannot be reached the client gets a `502` carrying a small JSON
//! envelope instead.

use axum::{
    body::Body,
    http::{uri::PathAndQuery, Request, Uri},
    response::{IntoResponse, Response},
};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use std::time::Duration;
use tokio::time::timeout;

use crate::error::ProxyError;
use crate::pipeline::{Outcome, Stage, StageFuture};

/// Pooled upstream client; cheap to clone, safe to share between requests.
pub type UpstreamClient = Client<HttpConnector, Body>;

pub fn upstream_client() -> UpstreamClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

/// A request-path pattern.
///
/// Literal text matches case-insensitively, `:name` matches one non-empty
/// path segment, `*` matches any run of characters (including `/`). A single
/// trailing slash on either side is ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(u8),
    Param,
    Wildcard,
}

impl RoutePattern {
    pub fn parse(pattern: &str) -> Self {
        let trimmed = trim_trailing_slash(pattern);
        let bytes = trimmed.as_bytes();
        let mut tokens = Vec::with_capacity(bytes.len());
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'*' if tokens.last() == Some(&Token::Wildcard) => {}
                b'*' => tokens.push(Token::Wildcard),
                b':' if i + 1 < bytes.len() && is_param_char(bytes[i + 1]) => {
                    while i + 1 < bytes.len() && is_param_char(bytes[i + 1]) {
                        i += 1;
                    }
                    tokens.push(Token::Param);
                }
                b => tokens.push(Token::Literal(b.to_ascii_lowercase())),
            }
            i += 1;
        }
        Self { tokens }
    }

    pub fn matches(&self, path: &str) -> bool {
        let trimmed = trim_trailing_slash(path);
        match_tokens(&self.tokens, path.as_bytes())
            || (trimmed.len() < path.len() && match_tokens(&self.tokens, trimmed.as_bytes()))
    }
}

fn is_param_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn trim_trailing_slash(s: &str) -> &str {
    if s.len() > 1 {
        s.strip_suffix('/').unwrap_or(s)
    } else {
        s
    }
}

/// Matches by tracking every reachable byte offset token by token, so the
/// cost stays linear in the pattern length times the path length.
fn match_tokens(tokens: &[Token], path: &[u8]) -> bool {
    let mut reachable = vec![false; path.len() + 1];
    reachable[0] = true;

    for token in tokens {
        let mut next = vec![false; path.len() + 1];
        match token {
            Token::Literal(b) => {
                for (i, c) in path.iter().enumerate() {
                    next[i + 1] = reachable[i] && c.to_ascii_lowercase() == *b;
                }
            }
            Token::Param => {
                // `open` is set while some reachable start lies inside the current segment.
                let mut open = false;
                for (i, c) in path.iter().enumerate() {
                    if *c == b'/' {
                        open = false;
                    } else {
                        open |= reachable[i];
                        next[i + 1] = open;
                    }
                }
            }
            Token::Wildcard => {
                let mut seen = false;
                for (i, slot) in next.iter_mut().enumerate() {
                    seen |= reachable[i];
                    *slot = seen;
                }
            }
        }
        if !next.contains(&true) {
            return false;
        }
        reachable = next;
    }
    reachable[path.len()]
}

/// An upstream target: scheme and authority plus an optional base path.
#[derive(Debug, Clone)]
pub struct Target {
    origin: String,
    base_path: String,
}

impl Target {
    pub fn parse(target: &str) -> Result<Self, ProxyError> {
        let url = url::Url::parse(target)
            .map_err(|e| ProxyError::InvalidTarget(format!("{target}: {e}")))?;
        if url.scheme() != "http" {
            return Err(ProxyError::InvalidTarget(format!(
                "{target}: only http upstreams are supported"
            )));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::InvalidTarget(format!("{target}: URL has no host")))?;
        let origin = match url.port() {
            Some(port) => format!("http://{host}:{port}"),
            None => format!("http://{host}"),
        };
        let base_path = url.path().trim_end_matches('/').to_string();
        Ok(Self { origin, base_path })
    }

    /// The upstream URI for an incoming request target.
    pub fn uri_for(&self, path_and_query: &str) -> Result<Uri, ProxyError> {
        format!("{}{}{}", self.origin, self.base_path, path_and_query)
            .parse()
            .map_err(|e| ProxyError::InvalidTarget(format!("{}: {e}", self.origin)))
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.origin, self.base_path)
    }
}

/// Ordered (pattern → target) bindings sharing one upstream client.
pub struct ProxyRouter {
    routes: Vec<(RoutePattern, Target)>,
    client: UpstreamClient,
    upstream_timeout: Duration,
}

impl ProxyRouter {
    pub fn new(
        routes: Vec<(RoutePattern, Target)>,
        client: UpstreamClient,
        upstream_timeout: Duration,
    ) -> Self {
        Self {
            routes,
            client,
            upstream_timeout,
        }
    }

    pub fn route_for(&self, path: &str) -> Option<&Target> {
        self.routes
            .iter()
            .find(|(pattern, _)| pattern.matches(path))
            .map(|(_, target)| target)
    }

    /// Forwards `req` to `target`, returning the upstream response with its
    /// body streamed through.
    pub async fn forward(&self, target: &Target, req: Request<Body>) -> Result<Response, ProxyError> {
        let (mut parts, body) = req.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        parts.uri = target.uri_for(path_and_query)?;
        let upstream_req = Request::from_parts(parts, body);

        let upstream = timeout(self.upstream_timeout, self.client.request(upstream_req)).await;
        let response: Response<Incoming> = match upstream {
            Ok(result) => result?,
            Err(_) => return Err(ProxyError::Timeout(self.upstream_timeout)),
        };

        let (parts, body) = response.into_parts();
        let body = body.map_err(|e| {
            tracing::error!(error = %e, "Upstream failed mid-response");
            e
        });
        Ok(Response::from_parts(parts, Body::new(body)))
    }
}

impl Stage for ProxyRouter {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
        Box::pin(async move {
            let Some(target) = self.route_for(req.uri().path()) else {
                return Outcome::Declined(req);
            };

            let method = req.method().clone();
            let uri = req.uri().clone();
            tracing::info!(%method, %uri, %target, "Proxying request");

            match self.forward(target, req).await {
                Ok(response) => Outcome::Handled(response),
                Err(e) => {
                    tracing::error!(%method, %uri, %target, error = %e, "Proxy error");
                    Outcome::Handled(e.into_response())
                }
            }
        })
    }
}
