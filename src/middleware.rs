//! The shared middleware stack.
//!
//! Applied once to the whole router: request IDs, tracing spans, and CORS.
//! Handlers carry no per-endpoint header plumbing.

use axum::Router;
use tower_http::request_id::{
    MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer,
};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::Config;
use crate::cors::build_cors_layer;

/// Request-ID generator producing UUIDs.
#[derive(Clone, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let request_id = Uuid::new_v4().to_string().parse().ok()?;
        Some(RequestId::new(request_id))
    }
}

/// Apply the shared middleware stack to a router.
pub fn apply(router: Router, config: &Config) -> Router {
    let router = router
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    match build_cors_layer(&config.cors) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_request_uuid() {
        let mut maker = MakeRequestUuid;
        let request = axum::http::Request::builder().body(()).unwrap();
        let id = maker.make_request_id(&request).unwrap();
        assert!(!id.header_value().is_empty());
    }

    #[test]
    fn test_apply_builds_with_and_without_cors() {
        let plain = Config::default();
        let _router = apply(Router::new(), &plain);

        let mut with_cors = Config::default();
        with_cors.cors = crate::cors::CorsConfig::permissive();
        let _router = apply(Router::new(), &with_cors);
    }
}
