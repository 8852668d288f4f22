//! Request dispatch
//!
//! Routes are tried in registration order and the first one whose method
//! matches exactly and whose path matcher accepts the request path wins.
//! Unsupported methods get 400 whatever the path; a supported method with no
//! matching path gets 404; a failing handler gets 500 with an empty body.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Method, Request, Response};
use crate::config::MatchKind;
use crate::error::HandlerError;

/// Application logic mapped to a (method, path) pair
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produce a response for a request
    ///
    /// # Errors
    ///
    /// Returns `HandlerError` when the handler cannot complete; the
    /// dispatcher answers 500 and keeps the connection open.
    async fn handle(&self, request: &Request) -> Result<Response, HandlerError>;
}

/// Handler wrapping a synchronous closure
pub struct FnHandler<F>(F);

/// Wrap a closure as a [`Handler`]
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&Request) -> Result<Response, HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Result<Response, HandlerError> + Send + Sync,
{
    async fn handle(&self, request: &Request) -> Result<Response, HandlerError> {
        (self.0)(request)
    }
}

/// Decides whether a route applies to a request path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathMatcher {
    /// Path must be equal
    Exact(String),
    /// Path must start with this prefix on a segment boundary
    Prefix(String),
}

impl PathMatcher {
    /// Build a matcher from its configured form
    #[must_use]
    pub fn from_config(kind: MatchKind, path: impl Into<String>) -> Self {
        match kind {
            MatchKind::Exact => Self::Exact(path.into()),
            MatchKind::Prefix => Self::Prefix(path.into()),
        }
    }

    /// Whether `path` is accepted
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Exact(expected) => path == expected,
            Self::Prefix(prefix) => match path.strip_prefix(prefix.as_str()) {
                Some(rest) => rest.is_empty() || prefix.ends_with('/') || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

struct Route {
    method: Method,
    matcher: PathMatcher,
    handler: Arc<dyn Handler>,
}

/// Ordered handler table
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; later registrations lose to earlier ones
    #[must_use]
    pub fn route(self, method: Method, matcher: PathMatcher, handler: impl Handler + 'static) -> Self {
        self.route_shared(method, matcher, Arc::new(handler))
    }

    /// Register a handler that is shared with other routes
    #[must_use]
    pub fn route_shared(
        mut self,
        method: Method,
        matcher: PathMatcher,
        handler: Arc<dyn Handler>,
    ) -> Self {
        self.routes.push(Route {
            method,
            matcher,
            handler,
        });
        self
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve and run the handler for a request
    pub async fn dispatch(&self, request: &Request) -> Response {
        if !request.method().is_supported() {
            debug!("Unsupported method {}", request.method());
            return Response::bad_request();
        }

        let path = request.path();
        let Some(route) = self
            .routes
            .iter()
            .find(|route| &route.method == request.method() && route.matcher.matches(path))
        else {
            debug!("No route for {} {}", request.method(), path);
            return Response::not_found();
        };

        match route.handler.handle(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Handler failed for {} {}: {}", request.method(), path, e);
                Response::internal_error()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::HTTP_11;
    use http::StatusCode;

    fn fixed(body: &'static str) -> impl Handler {
        handler_fn(move |_| Ok(Response::new(StatusCode::OK, body)))
    }

    fn get(target: &str) -> Request {
        Request::new(Method::Get, target, HTTP_11)
    }

    #[test]
    fn test_prefix_matcher() {
        let matcher = PathMatcher::Prefix("/kv".to_string());

        assert!(matcher.matches("/kv"));
        assert!(matcher.matches("/kv/key1"));
        assert!(!matcher.matches("/kvx"));
        assert!(!matcher.matches("/"));

        let root = PathMatcher::Prefix("/".to_string());
        assert!(root.matches("/"));
        assert!(root.matches("/index.html"));
    }

    #[test]
    fn test_exact_matcher() {
        let matcher = PathMatcher::from_config(MatchKind::Exact, "/echo");

        assert!(matcher.matches("/echo"));
        assert!(!matcher.matches("/echo/more"));
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let router = Router::new()
            .route(Method::Get, PathMatcher::Prefix("/kv".into()), fixed("kv"))
            .route(Method::Get, PathMatcher::Prefix("/".into()), fixed("files"));

        let response = router.dispatch(&get("/kv/a")).await;
        assert_eq!(response.body().as_ref(), b"kv");

        let response = router.dispatch(&get("/index.html")).await;
        assert_eq!(response.body().as_ref(), b"files");
    }

    #[tokio::test]
    async fn test_query_string_ignored_for_matching() {
        let router =
            Router::new().route(Method::Get, PathMatcher::Exact("/kv".into()), fixed("kv"));

        let response = router.dispatch(&get("/kv?key=a")).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unsupported_method_is_bad_request() {
        let router = Router::new().route(Method::Get, PathMatcher::Prefix("/".into()), fixed("x"));
        let request = Request::new(Method::from_token("DELETE"), "/x", HTTP_11);

        let response = router.dispatch(&request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(!response.closes_connection());
    }

    #[tokio::test]
    async fn test_unmatched_path_is_not_found() {
        let router =
            Router::new().route(Method::Get, PathMatcher::Exact("/a".into()), fixed("a"));

        assert_eq!(
            router.dispatch(&get("/b")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_method_must_match_exactly() {
        let router =
            Router::new().route(Method::Post, PathMatcher::Exact("/a".into()), fixed("a"));

        assert_eq!(
            router.dispatch(&get("/a")).await.status(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_handler_failure_is_internal_error() {
        let router = Router::new().route(
            Method::Get,
            PathMatcher::Prefix("/".into()),
            handler_fn(|_| Err(HandlerError::Other("store offline".to_string()))),
        );

        let response = router.dispatch(&get("/")).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.body().is_empty());
        assert!(!response.closes_connection());
    }

    #[tokio::test]
    async fn test_empty_router() {
        let router = Router::new();

        assert!(router.is_empty());
        assert_eq!(
            router.dispatch(&get("/")).await.status(),
            StatusCode::NOT_FOUND
        );
    }
}
