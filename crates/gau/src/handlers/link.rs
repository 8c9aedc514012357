//! Account linking and unlinking for an already-authenticated user.

use axum::http::StatusCode;
use axum::response::Response;
use tracing::warn;

use gau_core::UserUpdate;

use crate::auth::Auth;
use crate::error::AppError;
use crate::events::AuthEvent;
use crate::handlers::initiate::prepare_oauth_redirect;
use crate::handlers::{RequestContext, json_response, session_token};

/// Start a link flow: same redirect preparation as sign-in, but threaded
/// with the initiating session's token so the callback knows whose account
/// set to extend.
pub(crate) async fn handle_link(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
) -> Result<Response, AppError> {
    let cookies = auth.request_cookies(ctx.cookie_header());
    let token = session_token(ctx, &cookies, true)
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))?;
    if auth.validate_session(&token).await?.is_none() {
        return Err(AppError::unauthorized("Unauthorized"));
    }
    prepare_oauth_redirect(auth, ctx, provider_id, Some(token)).await
}

pub(crate) async fn handle_unlink(
    auth: &Auth,
    ctx: &RequestContext,
    provider_id: &str,
) -> Result<Response, AppError> {
    let cookies = auth.request_cookies(ctx.cookie_header());
    let token = session_token(ctx, &cookies, false)
        .ok_or_else(|| AppError::unauthorized("Unauthorized"))?;
    let Some(session) = auth.validate_session(&token).await? else {
        return Err(AppError::unauthorized("Unauthorized"));
    };

    // A user must always retain at least one sign-in method.
    if session.accounts.len() <= 1 {
        return Err(AppError::bad_request("Cannot unlink the last account"));
    }
    let account = session
        .accounts
        .iter()
        .find(|account| account.provider == provider_id)
        .ok_or_else(|| {
            AppError::bad_request(format!(
                "Provider \"{provider_id}\" not linked to this account"
            ))
        })?;

    auth.adapter()
        .unlink_account(provider_id, &account.provider_account_id)
        .await?;

    // The removed account may have been the source of the primary email.
    // Clearing it is a deliberate simplification; no attempt is made to
    // re-derive an address from the remaining accounts.
    let remaining = auth.adapter().get_accounts(&session.user.id).await?;
    if !remaining.is_empty() && session.user.email.is_some() {
        let update = UserUpdate {
            email: Some(None),
            email_verified: Some(Some(false)),
            ..UserUpdate::default()
        };
        if let Err(err) = auth.adapter().update_user(&session.user.id, update).await {
            warn!(user_id = %session.user.id, error = %err, "stale email clearing failed");
            auth.emit(AuthEvent::EmailClearFailed {
                user_id: session.user.id.clone(),
                reason: err.to_string(),
            })
            .await;
        }
    }

    Ok(json_response(
        StatusCode::OK,
        &serde_json::json!({ "message": "Account unlinked successfully" }),
    ))
}
