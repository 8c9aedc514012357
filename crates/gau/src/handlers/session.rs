//! Session lookup and sign-out.

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::json;
use tracing::error;

use gau_core::CookieOptions;
use gau_core::cookies::SESSION_COOKIE_NAME;

use crate::auth::Auth;
use crate::handlers::{RequestContext, append_cookies, json_response, session_token};

/// Current-session lookup. An absent token is not an error: clients get a
/// null session plus the configured provider ids so they can render a
/// provider picker without a second round trip.
pub(crate) async fn handle_session(auth: &Auth, ctx: &RequestContext) -> Response {
    let cookies = auth.request_cookies(ctx.cookie_header());
    let providers = auth.provider_ids();

    let Some(token) = session_token(ctx, &cookies, false) else {
        return null_session(StatusCode::OK, &providers);
    };

    match auth.validate_session(&token).await {
        Ok(Some(data)) => match serde_json::to_value(&data) {
            Ok(mut value) => {
                value["providers"] = json!(providers);
                json_response(StatusCode::OK, &value)
            }
            Err(err) => {
                error!(error = %err, "session serialization failed");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &json!({ "error": "Failed to validate session" }),
                )
            }
        },
        Ok(None) => null_session(StatusCode::UNAUTHORIZED, &providers),
        Err(err) => {
            error!(error = %err, "session validation failed");
            json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &json!({ "error": "Failed to validate session" }),
            )
        }
    }
}

pub(crate) async fn handle_sign_out(auth: &Auth, ctx: &RequestContext) -> Response {
    let mut cookies = auth.request_cookies(ctx.cookie_header());
    cookies.delete(
        SESSION_COOKIE_NAME,
        CookieOptions {
            same_site: Some(auth.cross_site_same_site()),
            secure: Some(!auth.development()),
            ..CookieOptions::default()
        },
    );

    let mut response = json_response(StatusCode::OK, &json!({ "message": "Signed out" }));
    append_cookies(&mut response, &cookies);
    response
}

fn null_session(status: StatusCode, providers: &[String]) -> Response {
    json_response(
        status,
        &json!({
            "user": null,
            "session": null,
            "accounts": null,
            "providers": providers,
        }),
    )
}
