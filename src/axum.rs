//! Utilities for using this crate with the `axum` web framework.
//!
//! A thin extractor plus a single dispatch function, with all the actual routing/signature/
//! content-negotiation logic staying in the framework-agnostic core (`Federation::fetch`) rather
//! than duplicated here.

use crate::{federation::Federation, FetchOptions, HttpRequest, HttpResponse};
use axum::{
    body::{to_bytes, Body},
    extract::Request,
    response::Response,
};

/// Convert an axum [`Request`] into the framework-agnostic [`HttpRequest`], reconstructing the
/// full URL from `federation`'s configured origin since axum's `Uri` only carries path and query.
///
/// `max_body_bytes` bounds how much of the request body is buffered; inbox deliveries are small
/// JSON-LD documents, so a generous but finite cap avoids an unbounded read from a slow or
/// malicious peer.
pub async fn into_request<T>(
    federation: &Federation<T>,
    request: Request,
    max_body_bytes: usize,
) -> Result<HttpRequest, Response> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, max_body_bytes)
        .await
        .map_err(|err| axum::response::IntoResponse::into_response((axum::http::StatusCode::BAD_REQUEST, err.to_string())))?;

    let mut url = federation.base_url().clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    Ok(HttpRequest {
        method: parts.method,
        url,
        headers: parts.headers,
        body: bytes,
    })
}

/// Convert a framework-agnostic [`HttpResponse`] into an axum [`Response`].
pub fn into_response(response: HttpResponse) -> Response {
    let mut builder = axum::http::Response::builder().status(response.status);
    if let Some(headers) = builder.headers_mut() {
        *headers = response.headers;
    }
    builder
        .body(Body::from(response.body))
        .expect("status and headers copied from a valid HttpResponse")
}

/// Dispatch an axum request through `federation`, returning an axum response.
///
/// ```ignore
/// async fn catch_all(request: axum::extract::Request) -> axum::response::Response {
///     fedireg::axum::handle(&federation, request, app_data.clone(), 1_000_000).await
/// }
/// ```
pub async fn handle<T: Clone + Send + Sync + 'static>(
    federation: &Federation<T>,
    request: Request,
    data: T,
    max_body_bytes: usize,
) -> Response {
    handle_with(federation, request, data, max_body_bytes, FetchOptions::default()).await
}

/// Like [`handle`], overriding the default 404/406/401 responses per `options`.
pub async fn handle_with<T: Clone + Send + Sync + 'static>(
    federation: &Federation<T>,
    request: Request,
    data: T,
    max_body_bytes: usize,
    options: FetchOptions,
) -> Response {
    match into_request(federation, request, max_body_bytes).await {
        Ok(request) => into_response(federation.fetch_with(request, data, options).await),
        Err(response) => response,
    }
}
