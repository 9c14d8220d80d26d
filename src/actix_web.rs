//! Utilities for using this crate with the `actix-web` framework.
//!
//! actix-web still speaks the `http` 0.2.x crate internally (aliased here as `http02`) while the
//! rest of this crate speaks `http` 1.x; `http_compat` bridges the two.

mod http_compat {
    use std::str::FromStr;

    pub fn header_value(v: &http02::HeaderValue) -> http::HeaderValue {
        http::HeaderValue::from_bytes(v.as_bytes()).expect("actix-web header values are valid http 1.x values")
    }

    pub fn header_map<'a, H>(m: H) -> http::HeaderMap
    where
        H: IntoIterator<Item = (&'a http02::HeaderName, &'a http02::HeaderValue)>,
    {
        let mut new_map = http::HeaderMap::new();
        for (n, v) in m {
            new_map.insert(
                http::HeaderName::from_bytes(n.as_str().as_bytes()).expect("valid header name"),
                header_value(v),
            );
        }
        new_map
    }

    pub fn method(m: &http02::Method) -> http::Method {
        http::Method::from_bytes(m.as_str().as_bytes()).expect("actix-web methods are valid http 1.x methods")
    }

    pub fn status(s: http::StatusCode) -> actix_web::http::StatusCode {
        actix_web::http::StatusCode::from_u16(s.as_u16()).expect("valid status code")
    }

    pub fn header_name(n: &http::HeaderName) -> http02::HeaderName {
        http02::HeaderName::from_bytes(n.as_str().as_bytes()).expect("valid header name")
    }

    pub fn header_value_out(v: &http::HeaderValue) -> http02::HeaderValue {
        http02::HeaderValue::from_bytes(v.as_bytes()).expect("valid header value")
    }
}

use crate::{federation::Federation, FetchOptions, HttpRequest, HttpResponse};
use actix_web::{web::Bytes, HttpRequest as ActixRequest, HttpResponse as ActixResponse};

/// Convert an actix-web request plus its already-extracted body into the framework-agnostic
/// [`HttpRequest`], reconstructing the full URL from `federation`'s configured origin.
pub fn into_request<T>(federation: &Federation<T>, request: &ActixRequest, body: Bytes) -> HttpRequest {
    let mut url = federation.base_url().clone();
    url.set_path(request.uri().path());
    url.set_query(request.uri().query());

    HttpRequest {
        method: http_compat::method(request.method()),
        url,
        headers: http_compat::header_map(request.headers()),
        body: body.into(),
    }
}

/// Convert a framework-agnostic [`HttpResponse`] into an actix-web response.
pub fn into_response(response: HttpResponse) -> ActixResponse {
    let mut builder = ActixResponse::build(http_compat::status(response.status));
    for (name, value) in &response.headers {
        builder.insert_header((http_compat::header_name(name), http_compat::header_value_out(value)));
    }
    builder.body(response.body)
}

/// Dispatch an actix-web request through `federation`, returning an actix-web response.
///
/// ```ignore
/// async fn catch_all(request: actix_web::HttpRequest, body: actix_web::web::Bytes) -> actix_web::HttpResponse {
///     fedireg::actix_web::handle(&federation, &request, body, app_data.clone()).await
/// }
/// ```
pub async fn handle<T: Clone + Send + Sync + 'static>(
    federation: &Federation<T>,
    request: &ActixRequest,
    body: Bytes,
    data: T,
) -> ActixResponse {
    handle_with(federation, request, body, data, FetchOptions::default()).await
}

/// Like [`handle`], overriding the default 404/406/401 responses per `options`.
pub async fn handle_with<T: Clone + Send + Sync + 'static>(
    federation: &Federation<T>,
    request: &ActixRequest,
    body: Bytes,
    data: T,
    options: FetchOptions,
) -> ActixResponse {
    into_response(federation.fetch_with(into_request(federation, request, body), data, options).await)
}
