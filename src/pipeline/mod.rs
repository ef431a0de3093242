//! Request dispatch pipeline.
//!
//! A pipeline is an ordered list of stages. Each request is offered to the
//! stages one after another; the first stage that handles it produces the
//! response, a stage that declines hands the request back unchanged so the
//! next one can try. A request nobody handles gets a `404 Not Found`.

pub mod assembler;

pub use assembler::{assemble, AssemblyContext};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

/// Result of offering a request to a stage.
pub enum Outcome {
    /// The stage produced the final response.
    Handled(Response),
    /// The stage passes; the request is returned for the next stage.
    Declined(Request<Body>),
}

/// Boxed future returned by [`Stage::handle`].
pub type StageFuture<'a> = Pin<Box<dyn Future<Output = Outcome> + Send + 'a>>;

/// A single handler in the dispatch pipeline.
///
/// Stages are shared between concurrently running requests and therefore
/// must not keep per-request state.
pub trait Stage: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Either handles the request or declines it.
    fn handle(&self, req: Request<Body>) -> StageFuture<'_>;
}

impl<S: Stage + ?Sized> Stage for Arc<S> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
        (**self).handle(req)
    }
}

/// One server's ordered stage list and the address it listens on.
pub struct Pipeline {
    addr: SocketAddr,
    stages: Vec<Box<dyn Stage>>,
}

impl Pipeline {
    pub fn new(addr: SocketAddr, stages: Vec<Box<dyn Stage>>) -> Self {
        Self { addr, stages }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Names of the enabled stages in dispatch order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    /// Runs the request through the stages in order.
    pub async fn dispatch(&self, mut req: Request<Body>) -> Response {
        for stage in &self.stages {
            match stage.handle(req).await {
                Outcome::Handled(response) => {
                    tracing::trace!(stage = stage.name(), "Request handled");
                    return response;
                }
                Outcome::Declined(returned) => req = returned,
            }
        }

        tracing::debug!(method = %req.method(), uri = %req.uri(), "No stage matched");
        not_found()
    }
}

/// Axum fallback handler bound to a shared pipeline.
pub async fn dispatch(
    axum::extract::State(pipeline): axum::extract::State<Arc<Pipeline>>,
    req: Request<Body>,
) -> Response {
    pipeline.dispatch(req).await
}

pub fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not Found").into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixed {
        prefix: &'static str,
        body: &'static str,
        calls: Arc<AtomicUsize>,
    }

    impl Stage for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn handle(&self, req: Request<Body>) -> StageFuture<'_> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if req.uri().path().starts_with(self.prefix) {
                    Outcome::Handled(self.body.into_response())
                } else {
                    Outcome::Declined(req)
                }
            })
        }
    }

    fn pipeline(calls: &Arc<AtomicUsize>) -> Pipeline {
        let stage = |prefix, body| {
            Box::new(Fixed {
                prefix,
                body,
                calls: calls.clone(),
            }) as Box<dyn Stage>
        };
        Pipeline::new(
            "127.0.0.1:0".parse().unwrap(),
            vec![stage("/a", "first"), stage("/a", "shadowed"), stage("/b", "second")],
        )
    }

    async fn body(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_first_match_stops_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = pipeline(&calls).dispatch(get("/a/x")).await;
        assert_eq!(body(response).await, "first");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_declined_request_reaches_later_stage() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = pipeline(&calls).dispatch(get("/b")).await;
        assert_eq!(body(response).await, "second");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = pipeline(&calls).dispatch(get("/nothing")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_pipeline_is_not_found() {
        let pipeline = Pipeline::new("127.0.0.1:0".parse().unwrap(), Vec::new());
        let response = pipeline.dispatch(get("/")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
