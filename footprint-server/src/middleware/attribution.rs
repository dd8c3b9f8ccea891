//! Attribution middleware for axum
//!
//! Every request runs as one unit of work: the actor is read from a request
//! header, the rest of the stack runs inside that actor's attribution
//! context, and once the response is produced an activity event is
//! recorded for mutating methods.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use footprint_core::{ActorExtractor, AttributionInterceptor, Operation};

use crate::config::DEFAULT_ACTOR_HEADER;

/// Reads the actor id from a single request header.
#[derive(Debug, Clone)]
pub struct HeaderActorExtractor {
    header: HeaderName,
}

impl HeaderActorExtractor {
    pub fn new(header: HeaderName) -> Self {
        Self { header }
    }

    /// Parse `header` as a header name.
    pub fn from_name(header: &str) -> Result<Self, axum::http::header::InvalidHeaderName> {
        Ok(Self::new(HeaderName::try_from(header)?))
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }
}

impl Default for HeaderActorExtractor {
    fn default() -> Self {
        Self::new(HeaderName::from_static(DEFAULT_ACTOR_HEADER))
    }
}

impl ActorExtractor<HeaderMap> for HeaderActorExtractor {
    fn extract_actor_id(&self, headers: &HeaderMap) -> Option<String> {
        headers
            .get(&self.header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    }
}

/// Attribution middleware function
///
/// Use with `axum::middleware::from_fn_with_state(interceptor, attribution_middleware)`.
pub async fn attribution_middleware(
    State(interceptor): State<AttributionInterceptor<HeaderMap>>,
    request: Request,
    next: Next,
) -> Response {
    let operation = Operation::new(request.uri().path(), request.method().as_str());
    let context = interceptor.begin(request.headers());
    interceptor.run(context, operation, next.run(request)).await
}
