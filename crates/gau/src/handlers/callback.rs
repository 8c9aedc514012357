//! The callback leg of the exchange: CSRF and PKCE checks, user
//! resolution and linking, account persistence, session issuance.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde_json::Map;
use tracing::{error, warn};

use gau_core::cookies::{
    CALLBACK_URI_COOKIE_NAME, CSRF_COOKIE_NAME, LINKING_TOKEN_COOKIE_NAME, PKCE_COOKIE_NAME,
    SESSION_COOKIE_NAME,
};
use gau_core::{
    Account, AccountTokens, AdapterError, CookieOptions, Cookies, NewUser, ProviderProfile,
    TokenSet, User, UserUpdate,
};

use crate::auth::{Auth, AutoLink, RoleContext};
use crate::delivery::{Delivery, fragment_page, resolve_delivery};
use crate::error::AppError;
use crate::events::AuthEvent;
use crate::handlers::{RequestContext, append_cookies, html_response, json_response, redirect_response};

/// Transaction cookie values captured before cleanup is staged.
struct Transaction {
    csrf: Option<String>,
    verifier: Option<String>,
    callback_uri: Option<String>,
    linking_token: Option<String>,
}

pub(crate) async fn handle_callback(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
) -> Response {
    let mut cookies = auth.request_cookies(ctx.cookie_header());
    let transaction = Transaction {
        csrf: cookies.get(CSRF_COOKIE_NAME).map(str::to_string),
        verifier: cookies.get(PKCE_COOKIE_NAME).map(str::to_string),
        callback_uri: cookies.get(CALLBACK_URI_COOKIE_NAME).map(str::to_string),
        linking_token: cookies.get(LINKING_TOKEN_COOKIE_NAME).map(str::to_string),
    };

    // The transaction is consumed the moment a callback arrives; cleanup
    // rides on every response from here, success or failure.
    cookies.delete(CSRF_COOKIE_NAME, CookieOptions::default());
    cookies.delete(PKCE_COOKIE_NAME, CookieOptions::default());
    if transaction.callback_uri.is_some() {
        cookies.delete(CALLBACK_URI_COOKIE_NAME, CookieOptions::default());
    }
    if transaction.linking_token.is_some() {
        cookies.delete(LINKING_TOKEN_COOKIE_NAME, CookieOptions::default());
    }

    let result = run_callback(auth, ctx, provider_id, &transaction, &mut cookies).await;
    let mut response = match result {
        Ok(response) => response,
        Err(err) => err.into_response(),
    };
    append_cookies(&mut response, &cookies);
    response
}

async fn run_callback(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
    transaction: &Transaction,
    cookies: &mut Cookies,
) -> Result<Response, AppError> {
    let provider = auth
        .provider(provider_id)
        .ok_or_else(|| AppError::bad_request("Provider not found"))?;

    let (Some(code), Some(state)) = (ctx.query("code"), ctx.query("state")) else {
        return Err(AppError::bad_request("Missing code or state"));
    };

    let (nonce, redirect_to) = split_state(state);

    match &transaction.csrf {
        Some(saved) if saved == nonce => {}
        _ => return Err(AppError::forbidden("Invalid CSRF token")),
    }

    let verifier = transaction
        .verifier
        .as_deref()
        .ok_or_else(|| AppError::bad_request("Missing PKCE code verifier"))?;

    // A linking transaction whose session has since expired aborts
    // silently: no error, just the cleanup redirect.
    let linking_user = match &transaction.linking_token {
        Some(token) => match auth.validate_session(token).await? {
            Some(session) => Some(session.user),
            None => return Ok(redirect_response(&redirect_to)),
        },
        None => None,
    };
    let is_linking = linking_user.is_some();

    let outcome = provider
        .validate_callback(code, verifier, transaction.callback_uri.as_deref())
        .await?;
    let profile = outcome.profile;
    let tokens = outcome.tokens;

    let account_owner = auth
        .adapter()
        .get_user_by_account(provider_id, &profile.id)
        .await?;
    let account_exists = account_owner.is_some();

    let mut user = if let Some(link_user) = linking_user {
        if let Some(owner) = &account_owner
            && owner.id != link_user.id
        {
            return Err(AppError::conflict("Account already linked to another user"));
        }
        link_user
    } else if let Some(owner) = account_owner {
        owner
    } else {
        resolve_or_create_user(auth, provider_id, &profile).await?
    };

    self_heal_email(auth, &mut user, &profile).await;

    if !account_exists {
        persist_account(auth, &user, provider_id, &profile, &tokens).await?;
    } else {
        rotate_account_tokens(auth, &user, provider_id, &profile, &tokens).await;
    }

    let session_token = auth.create_session(&user.id, Map::new(), None)?;
    auth.emit(AuthEvent::SignInCompleted {
        user_id: user.id.clone(),
        provider: provider_id.to_string(),
        linked: is_linking,
    })
    .await;

    let redirect_url = ctx
        .origin
        .join(&redirect_to)
        .unwrap_or_else(|_| ctx.origin.clone());

    match resolve_delivery(auth, &ctx.origin, &redirect_url) {
        Delivery::Fragment => Ok(html_response(fragment_page(&redirect_url, &session_token))),
        Delivery::Cookie => {
            cookies.set(
                SESSION_COOKIE_NAME,
                &session_token,
                auth.session_cookie_options(),
            );
            if ctx.query("redirect") == Some("false") {
                let accounts = auth.adapter().get_accounts(&user.id).await?;
                let mut user_value = serde_json::to_value(&user)?;
                user_value["accounts"] = serde_json::to_value(&accounts)?;
                Ok(json_response(
                    StatusCode::OK,
                    &serde_json::json!({ "user": user_value }),
                ))
            } else {
                Ok(redirect_response(&redirect_to))
            }
        }
    }
}

/// Split `state` into its nonce and the embedded redirect target.
/// Malformed encoding falls back to `/`, never a hard failure.
fn split_state(state: &str) -> (&str, String) {
    match state.split_once('.') {
        Some((nonce, encoded)) => {
            let redirect_to = URL_SAFE_NO_PAD
                .decode(encoded.as_bytes())
                .ok()
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .filter(|target| !target.is_empty())
                .unwrap_or_else(|| "/".to_string());
            (nonce, redirect_to)
        }
        None => (state, "/".to_string()),
    }
}

async fn resolve_or_create_user(
    auth: &Auth,
    provider_id: &str,
    profile: &ProviderProfile,
) -> Result<User, AppError> {
    if let Some(email) = &profile.email {
        let permitted = match auth.auto_link() {
            AutoLink::Always => true,
            AutoLink::VerifiedEmail => profile.email_verified == Some(true),
            AutoLink::Never => false,
        };
        if permitted
            && let Some(existing) = auth.adapter().get_user_by_email(email).await?
        {
            // Adopt the existing user, promoting its verified flag when the
            // provider has now confirmed the email.
            if profile.email_verified == Some(true) && existing.email_verified != Some(true) {
                let update = UserUpdate {
                    email_verified: Some(Some(true)),
                    ..UserUpdate::default()
                };
                return Ok(auth.adapter().update_user(&existing.id, update).await?);
            }
            return Ok(existing);
        }
    }

    let roles = auth.roles();
    let role = roles
        .resolve_on_create
        .as_ref()
        .and_then(|resolve| {
            resolve(&RoleContext {
                provider_id,
                profile,
            })
        })
        .unwrap_or_else(|| roles.default_role.clone());

    auth.adapter()
        .create_user(NewUser {
            id: None,
            name: profile.name.clone(),
            email: profile.email.clone(),
            email_verified: profile.email_verified,
            image: profile.avatar.clone(),
            role: Some(role),
        })
        .await
        .map_err(|err| {
            error!(provider = provider_id, error = %err, "user creation failed");
            AppError::internal("Failed to create user")
        })
}

/// Repair records created before an email was confirmed: adopt a missing
/// primary email, or flip the verified flag when the provider confirms the
/// same address. Best-effort.
async fn self_heal_email(auth: &Auth, user: &mut User, profile: &ProviderProfile) {
    let Some(provider_email) = &profile.email else {
        return;
    };

    let mut update = UserUpdate::default();
    if user.email.is_none() {
        update.email = Some(Some(provider_email.clone()));
        update.email_verified = Some(Some(profile.email_verified.unwrap_or(false)));
    } else if user.email.as_deref() == Some(provider_email.as_str())
        && profile.email_verified == Some(true)
        && user.email_verified != Some(true)
    {
        update.email_verified = Some(Some(true));
    } else {
        return;
    }

    match auth.adapter().update_user(&user.id, update).await {
        Ok(updated) => *user = updated,
        Err(err) => {
            warn!(user_id = %user.id, error = %err, "profile self-heal failed");
            auth.emit(AuthEvent::SelfHealFailed {
                user_id: user.id.clone(),
                reason: err.to_string(),
            })
            .await;
        }
    }
}

async fn persist_account(
    auth: &Auth,
    user: &User,
    provider_id: &str,
    profile: &ProviderProfile,
    tokens: &TokenSet,
) -> Result<(), AppError> {
    auth.adapter()
        .link_account(Account {
            user_id: user.id.clone(),
            provider: provider_id.to_string(),
            provider_account_id: profile.id.clone(),
            access_token: Some(tokens.access_token.clone()),
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone(),
            expires_at: tokens.expires_at,
            scope: tokens.scope.clone(),
            token_type: tokens.token_type.clone(),
        })
        .await
        .map_err(|err| {
            error!(provider = provider_id, user_id = %user.id, error = %err, "account linking failed");
            AppError::internal("Failed to link account")
        })
}

/// Absorb token rotation on repeat sign-in. Failures never fail the
/// request; the tokens can be refreshed again later.
async fn rotate_account_tokens(
    auth: &Auth,
    user: &User,
    provider_id: &str,
    profile: &ProviderProfile,
    tokens: &TokenSet,
) {
    let rotation = AccountTokens {
        access_token: Some(tokens.access_token.clone()),
        refresh_token: tokens.refresh_token.clone(),
        id_token: tokens.id_token.clone(),
        expires_at: tokens.expires_at,
        scope: tokens.scope.clone(),
    };
    match auth
        .adapter()
        .update_account(provider_id, &profile.id, rotation)
        .await
    {
        Ok(()) | Err(AdapterError::Unsupported(_)) => {}
        Err(err) => {
            warn!(provider = provider_id, user_id = %user.id, error = %err, "token rotation update failed");
            auth.emit(AuthEvent::AccountUpdateFailed {
                user_id: user.id.clone(),
                provider: provider_id.to_string(),
                reason: err.to_string(),
            })
            .await;
        }
    }
}
