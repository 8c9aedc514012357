//! Path dispatch for the mounted auth surface.

use std::sync::Arc;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tower_http::trace::TraceLayer;

use crate::auth::Auth;
use crate::cors::{apply_cors, handle_preflight, verify_request_origin};
use crate::error::AppError;
use crate::handlers::{RequestContext, callback, initiate, json_response, link, session};

/// Convenience mount: a single fallback route feeding [`handle`], so the
/// host can merge this into its own `Router` as-is.
pub fn router(auth: Arc<Auth>) -> Router {
    Router::new()
        .fallback(dispatch)
        .layer(TraceLayer::new_for_http())
        .with_state(auth)
}

async fn dispatch(State(auth): State<Arc<Auth>>, request: Request) -> Response {
    handle(&auth, request).await
}

/// Route a request under the configured base path. Every response, success
/// or failure, passes through CORS header injection.
pub async fn handle(auth: &Auth, request: Request) -> Response {
    let (parts, _body) = request.into_parts();
    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let ctx = RequestContext::from_parts(&parts);

    let mut response = route(auth, &ctx, &method, &path).await;
    apply_cors(auth, ctx.origin_header(), &mut response);
    response
}

async fn route(auth: &Auth, ctx: &RequestContext, method: &Method, path: &str) -> Response {
    // Preflight is answered before any routing or origin check.
    if method == Method::OPTIONS {
        return handle_preflight(auth, ctx.origin_header());
    }

    let Some(rest) = path.strip_prefix(auth.base_path()) else {
        return not_found();
    };
    if !rest.is_empty() && !rest.starts_with('/') {
        return not_found();
    }
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    if method != Method::GET && method != Method::POST {
        return json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &serde_json::json!({ "error": "Method Not Allowed" }),
        );
    }

    if method == Method::POST {
        let request_origin = ctx.origin_string();
        if !verify_request_origin(auth, ctx.origin_header(), &request_origin) {
            let message = if auth.development() {
                "Origin not allowed"
            } else {
                "Forbidden"
            };
            return AppError::forbidden(message).into_response();
        }
    }

    match segments.as_slice() {
        ["session"] if *method == Method::GET => session::handle_session(auth, ctx).await,
        ["signout"] if *method == Method::POST => session::handle_sign_out(auth, ctx).await,
        ["unlink", provider_id] if *method == Method::POST => {
            unwrap(link::handle_unlink(auth, ctx, provider_id).await)
        }
        ["link", provider_id] if *method == Method::GET => {
            unwrap(link::handle_link(auth, ctx, provider_id).await)
        }
        [provider_id, "callback"] if *method == Method::GET => {
            callback::handle_callback(auth, ctx, provider_id).await
        }
        [provider_id] if *method == Method::GET => {
            unwrap(initiate::handle_sign_in(auth, ctx, provider_id).await)
        }
        _ => not_found(),
    }
}

fn unwrap(result: Result<Response, AppError>) -> Response {
    match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    }
}

fn not_found() -> Response {
    json_response(
        StatusCode::NOT_FOUND,
        &serde_json::json!({ "error": "Not found" }),
    )
}
