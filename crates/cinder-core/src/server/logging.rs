//! Request logging middleware with request IDs and timing.

use std::task::{Context, Poll};
use std::time::Instant;

use futures::future::BoxFuture;
use http::{HeaderValue, Request, Response};
use tower::{Layer, Service};
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

/// Header carrying the request ID in both directions.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// A `Layer` that tags each request with an ID and logs its outcome.
#[derive(Debug, Clone)]
pub struct RequestLoggerLayer;

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, service: S) -> Self::Service {
        RequestLoggerService { service }
    }
}

/// A `Service` that logs requests and echoes the request ID on the response.
#[derive(Debug, Clone)]
pub struct RequestLoggerService<S> {
    service: S,
}

impl<S, B, R> Service<Request<B>> for RequestLoggerService<S>
where
    S: Service<Request<B>, Response = Response<R>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<B>) -> Self::Future {
        let request_id = request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);
        let header_value = HeaderValue::from_str(&request_id).ok();

        if let Some(ref value) = header_value {
            request.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
        }

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let start_time = Instant::now();

        let span = tracing::info_span!("request", request_id = %request_id, method = %method, path = %path);

        // Header values may carry the API key; only names are logged.
        span.in_scope(|| {
            debug!(headers = ?request.headers().keys().map(http::HeaderName::as_str).collect::<Vec<_>>(), "Received request");
        });

        let future = self.service.call(request);
        Box::pin(
            async move {
                let result = future.await;
                let duration_ms = start_time.elapsed().as_millis();

                match result {
                    Ok(mut response) => {
                        let status = response.status();
                        if status.is_server_error() {
                            warn!(status = status.as_u16(), duration_ms, "Request failed");
                        } else {
                            info!(status = status.as_u16(), duration_ms, "Request completed");
                        }
                        if let Some(value) = header_value {
                            response.headers_mut().insert(REQUEST_ID_HEADER, value);
                        }
                        Ok(response)
                    }
                    Err(e) => {
                        warn!(duration_ms, "Request errored before a response was produced");
                        Err(e)
                    }
                }
            }
            .instrument(span),
        )
    }
}
