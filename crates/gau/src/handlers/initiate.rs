//! Sign-in and link redirect initiation.

use axum::http::StatusCode;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use tracing::warn;
use url::Url;

use gau_core::cookies::{
    CALLBACK_URI_COOKIE_NAME, CSRF_COOKIE_NAME, LINKING_TOKEN_COOKIE_NAME, PKCE_COOKIE_NAME,
};
use gau_core::{AuthorizationOptions, PkcePair, generate_nonce};

use crate::auth::Auth;
use crate::cors::url_host;
use crate::error::AppError;
use crate::handlers::{RequestContext, append_cookies, json_response, redirect_response};

pub(crate) async fn handle_sign_in(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
) -> Result<Response, AppError> {
    prepare_oauth_redirect(auth, ctx, provider_id, None).await
}

/// Shared initiation path for sign-in and linking: validate the redirect
/// target, mint CSRF/PKCE material, persist the transaction in cookies,
/// and send the client to the provider.
pub(crate) async fn prepare_oauth_redirect(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
    linking_token: Option<String>,
) -> Result<Response, AppError> {
    let provider = auth
        .provider(provider_id)
        .ok_or_else(|| AppError::bad_request("Provider not found"))?;

    let redirect_to = ctx.query("redirectTo");
    if let Some(target) = redirect_to {
        validate_redirect_target(auth, ctx, target)?;
    }

    let nonce = generate_nonce();
    let pkce = PkcePair::generate();

    // The redirect target rides inside `state` so it survives the round
    // trip without server-side storage.
    let state = match redirect_to {
        Some(target) => format!("{nonce}.{}", URL_SAFE_NO_PAD.encode(target)),
        None => nonce.clone(),
    };

    let mut callback_uri = ctx.query("callbackUri").map(str::to_string);
    if callback_uri.is_none() && provider.requires_redirect_uri() {
        callback_uri = Some(format!(
            "{}{}/{}/callback",
            ctx.origin_string(),
            auth.base_path(),
            provider_id
        ));
    }

    let mut scopes_override = None;
    if let Some(profile_name) = ctx.query("profile") {
        let Some(selected) = auth.scope_profile(provider_id, profile_name) else {
            return Err(AppError::bad_request(format!(
                "Unknown profile \"{profile_name}\" for provider \"{provider_id}\""
            )));
        };
        if let Some(redirect_uri) = &selected.redirect_uri {
            callback_uri = Some(redirect_uri.clone());
        }
        scopes_override = selected.scopes.clone();
    }

    let options = AuthorizationOptions {
        scopes: scopes_override,
        redirect_uri: callback_uri.clone(),
    };
    let authorization_url = match provider
        .authorization_url(&state, &pkce.verifier, &options)
        .await
    {
        Ok(url) => url,
        Err(err) => {
            warn!(provider = provider_id, error = %err, "authorization URL construction failed");
            return Err(AppError::internal("Could not create authorization URL"));
        }
    };

    let mut cookies = auth.request_cookies(ctx.cookie_header());
    let transaction = auth.transaction_cookie_options();
    cookies.set(CSRF_COOKIE_NAME, &nonce, transaction.clone());
    cookies.set(PKCE_COOKIE_NAME, &pkce.verifier, transaction.clone());
    if let Some(token) = &linking_token {
        cookies.set(LINKING_TOKEN_COOKIE_NAME, token, transaction.clone());
    }
    if let Some(uri) = &callback_uri {
        cookies.set(CALLBACK_URI_COOKIE_NAME, uri, transaction);
    }

    let mut response = if ctx.query("redirect") == Some("false") {
        json_response(
            StatusCode::OK,
            &serde_json::json!({ "url": authorization_url.as_str() }),
        )
    } else {
        redirect_response(authorization_url.as_str())
    };
    append_cookies(&mut response, &cookies);
    Ok(response)
}

/// Reject redirect targets that could bounce the user (and later the
/// session token) to a host this deployment does not trust.
fn validate_redirect_target(
    auth: &Auth,
    ctx: &RequestContext,
    target: &str,
) -> Result<(), AppError> {
    if target.starts_with("//") {
        return Err(AppError::bad_request("Invalid \"redirectTo\" URL"));
    }
    let parsed = Url::options()
        .base_url(Some(&ctx.origin))
        .parse(target)
        .map_err(|_| AppError::bad_request("Invalid \"redirectTo\" URL"))?;

    // Custom schemes (native deep links) are allowed through; only http(s)
    // targets are subject to the host check.
    if !matches!(parsed.scheme(), "http" | "https") {
        return Ok(());
    }

    let redirect_host = url_host(&parsed);
    let same_host = redirect_host == url_host(&ctx.origin);
    if !same_host && !auth.trust_hosts().contains(&redirect_host) {
        return Err(AppError::bad_request("Untrusted redirect host"));
    }
    Ok(())
}
