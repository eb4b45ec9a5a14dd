//! Request tracing middleware.
//!
//! Opens one span per request carrying the peer address and `x-request-id`,
//! records the ids of an incoming W3C `traceparent` when one parses, and
//! records the response status and latency.

use axum::{body::Body, extract::ConnectInfo, http::Request, response::Response};
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};

/// Tracing layer that creates spans for each request
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();
        let span = request_span(&req);

        Box::pin(
            async move {
                let started = Instant::now();
                let result = inner.call(req).await;

                let outcome = match &result {
                    Ok(response) => {
                        Span::current().record("http.status_code", response.status().as_u16());
                        if response.status().is_success() { "OK" } else { "ERROR" }
                    }
                    Err(_) => "ERROR",
                };
                Span::current().record("otel.status_code", outcome);
                let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
                debug!(elapsed_ms, "Request completed");

                result
            }
            .instrument(span),
        )
    }
}

/// Span for one request. A valid `traceparent` is recorded on it as
/// `trace.id` / `trace.parent_id`.
fn request_span<B>(req: &Request<B>) -> Span {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let span = info_span!(
        "graphql_gateway_request",
        http.method = %req.method(),
        http.target = %req.uri().path(),
        client.address = %peer,
        request.id = %request_id,
        trace.id = tracing::field::Empty,
        trace.parent_id = tracing::field::Empty,
        trace.sampled = tracing::field::Empty,
        http.status_code = tracing::field::Empty,
        otel.kind = "server",
        otel.status_code = tracing::field::Empty,
    );

    if let Some(parent) = TraceParent::from_request(req) {
        span.record("trace.id", parent.trace_id.as_str());
        span.record("trace.parent_id", parent.parent_id.as_str());
        span.record("trace.sampled", parent.sampled);
    }
    span
}

/// Caller-supplied correlation id, recorded on the request span
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A parsed W3C `traceparent` header:
/// `version-trace_id-parent_id-trace_flags`, all lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceParent {
    pub trace_id: String,
    pub parent_id: String,
    pub sampled: bool,
}

impl TraceParent {
    pub fn parse(value: &str) -> Option<Self> {
        let mut parts = value.trim().split('-');
        let (version, trace_id, parent_id, flags) =
            (parts.next()?, parts.next()?, parts.next()?, parts.next()?);
        if parts.next().is_some()
            || !is_hex(version, 2)
            || version == "ff"
            || !is_hex(trace_id, 32)
            || !is_hex(parent_id, 16)
            || !is_hex(flags, 2)
        {
            return None;
        }
        // All-zero ids are invalid
        if trace_id.bytes().all(|b| b == b'0') || parent_id.bytes().all(|b| b == b'0') {
            return None;
        }

        let flags = u8::from_str_radix(flags, 16).ok()?;
        Some(Self {
            trace_id: trace_id.to_string(),
            parent_id: parent_id.to_string(),
            sampled: flags & 0x01 == 0x01,
        })
    }

    fn from_request<B>(req: &Request<B>) -> Option<Self> {
        Self::parse(req.headers().get("traceparent")?.to_str().ok()?)
    }
}

fn is_hex(s: &str, len: usize) -> bool {
    s.len() == len && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::get, Router};
    use parking_lot::Mutex;
    use std::collections::BTreeMap;
    use std::fmt;
    use std::sync::Arc;
    use tower::ServiceExt;
    use tracing::field::{Field, Visit};
    use tracing::span::{Attributes, Id, Record};
    use tracing_subscriber::layer::{Context as LayerContext, SubscriberExt};
    use tracing_subscriber::Layer as SubscriberLayer;

    /// Collects every span field value it sees
    #[derive(Clone, Default)]
    struct FieldCapture(Arc<Mutex<BTreeMap<String, String>>>);

    struct Collect<'a>(&'a mut BTreeMap<String, String>);

    impl Visit for Collect<'_> {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.insert(field.name().to_string(), format!("{:?}", value));
        }

        fn record_str(&mut self, field: &Field, value: &str) {
            self.0.insert(field.name().to_string(), value.to_string());
        }
    }

    impl<S: tracing::Subscriber> SubscriberLayer<S> for FieldCapture {
        fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: LayerContext<'_, S>) {
            attrs.record(&mut Collect(&mut self.0.lock()));
        }

        fn on_record(&self, _id: &Id, values: &Record<'_>, _ctx: LayerContext<'_, S>) {
            values.record(&mut Collect(&mut self.0.lock()));
        }
    }

    fn captured_fields(req: &Request<Body>) -> BTreeMap<String, String> {
        let capture = FieldCapture::default();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        tracing::subscriber::with_default(subscriber, || {
            let _span = request_span(req);
        });
        let fields = capture.0.lock().clone();
        fields
    }

    #[test]
    fn test_parse_sampled_traceparent() {
        let parent =
            TraceParent::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01").unwrap();
        assert_eq!(parent.trace_id, "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(parent.parent_id, "b7ad6b7169203331");
        assert!(parent.sampled);

        let unsampled =
            TraceParent::parse("00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-00").unwrap();
        assert!(!unsampled.sampled);
    }

    #[test]
    fn test_reject_malformed_traceparent() {
        for value in [
            "",
            "00-short-id-01",
            "00-0AF7651916CD43DD8448EB211C80319C-b7ad6b7169203331-01",
            "00-00000000000000000000000000000000-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-0000000000000000-01",
            "ff-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01-extra",
        ] {
            assert!(TraceParent::parse(value).is_none(), "{value}");
        }
    }

    #[test]
    fn test_trace_ids_recorded_on_request_span() {
        let req = Request::builder()
            .uri("/graphql")
            .header(REQUEST_ID_HEADER, "req-7")
            .header(
                "traceparent",
                "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
            )
            .body(Body::empty())
            .unwrap();

        let fields = captured_fields(&req);
        assert_eq!(fields["trace.id"], "0af7651916cd43dd8448eb211c80319c");
        assert_eq!(fields["trace.parent_id"], "b7ad6b7169203331");
        assert_eq!(fields["trace.sampled"], "true");
        assert_eq!(fields["request.id"], "req-7");
        assert_eq!(fields["http.target"], "/graphql");
    }

    #[test]
    fn test_no_trace_ids_without_traceparent() {
        let req = Request::builder().uri("/graphql").body(Body::empty()).unwrap();
        let fields = captured_fields(&req);
        assert!(!fields.contains_key("trace.id"));
        assert!(fields.contains_key("http.method"));
    }

    #[test]
    fn test_from_request_without_header() {
        let req = Request::builder().body(Body::empty()).unwrap();
        assert!(TraceParent::from_request(&req).is_none());
    }

    #[tokio::test]
    async fn test_layer_passes_response_through() {
        let app = Router::new()
            .route("/", get(|| async { StatusCode::ACCEPTED }))
            .layer(TracingLayer::new());

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "req-1")
                    .header(
                        "traceparent",
                        "00-0af7651916cd43dd8448eb211c80319c-b7ad6b7169203331-01",
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
