//! Request handlers for the mounted auth surface.

pub(crate) mod callback;
pub(crate) mod initiate;
pub(crate) mod link;
pub(crate) mod session;

use std::collections::HashMap;

use axum::Json;
use axum::body::Body;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use url::Url;

use gau_core::Cookies;

/// Request data the handlers care about, extracted once by the dispatcher.
pub(crate) struct RequestContext {
    pub headers: HeaderMap,
    pub query: HashMap<String, String>,
    /// The server's own origin for this request, derived from the `Host`
    /// header (and `X-Forwarded-Proto` when present).
    pub origin: Url,
}

impl RequestContext {
    pub(crate) fn from_parts(parts: &Parts) -> Self {
        let query = parts
            .uri
            .query()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .into_owned()
                    .collect()
            })
            .unwrap_or_default();

        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.host())
            .unwrap_or("localhost");
        let scheme = parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.scheme_str())
            .unwrap_or("http");
        let origin = Url::parse(&format!("{scheme}://{host}"))
            .unwrap_or_else(|_| Url::parse("http://localhost").expect("static url"));

        Self {
            headers: parts.headers.clone(),
            query,
            origin,
        }
    }

    pub(crate) fn cookie_header(&self) -> Option<&str> {
        self.headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
    }

    pub(crate) fn origin_header(&self) -> Option<&str> {
        self.headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
    }

    pub(crate) fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }

    pub(crate) fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    /// `scheme://host` without a trailing slash, for URI composition.
    pub(crate) fn origin_string(&self) -> String {
        let origin = self.origin.as_str();
        origin.strip_suffix('/').unwrap_or(origin).to_string()
    }
}

pub(crate) fn json_response(status: StatusCode, body: &Value) -> Response {
    (status, Json(body)).into_response()
}

pub(crate) fn redirect_response(location: &str) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::FOUND)
        .body(Body::empty())
        .unwrap_or_default();
    if let Ok(value) = axum::http::HeaderValue::from_str(location) {
        response.headers_mut().insert(header::LOCATION, value);
    }
    response
}

pub(crate) fn html_response(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Append every staged cookie operation as a `Set-Cookie` header.
pub(crate) fn append_cookies(response: &mut Response, cookies: &Cookies) {
    for value in cookies.to_header_values() {
        if let Ok(value) = axum::http::HeaderValue::from_str(&value) {
            response.headers_mut().append(header::SET_COOKIE, value);
        }
    }
}

/// Session token resolution: cookie first, then `Authorization: Bearer`,
/// then (only where allowed) a `token` query parameter.
pub(crate) fn session_token(
    ctx: &RequestContext,
    cookies: &Cookies,
    allow_query: bool,
) -> Option<String> {
    if let Some(token) = cookies.get(gau_core::cookies::SESSION_COOKIE_NAME) {
        return Some(token.to_string());
    }
    if let Some(token) = ctx.bearer_token() {
        return Some(token.to_string());
    }
    if allow_query {
        return ctx.query("token").map(str::to_string);
    }
    None
}
