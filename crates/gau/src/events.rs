//! Structured diagnostic events.
//!
//! Best-effort operations (token refresh, profile self-healing, stale-email
//! clearing, account token rotation) swallow their failures. The hook makes
//! those failures observable so hosts can track rates without scraping logs.

use async_trait::async_trait;
use serde::Serialize;

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthEvent {
    SignInCompleted {
        user_id: String,
        provider: String,
        linked: bool,
    },
    RefreshFailed {
        user_id: String,
        provider: String,
        reason: String,
    },
    SelfHealFailed {
        user_id: String,
        reason: String,
    },
    AccountUpdateFailed {
        user_id: String,
        provider: String,
        reason: String,
    },
    EmailClearFailed {
        user_id: String,
        reason: String,
    },
}

#[async_trait]
pub trait AuthEvents: Send + Sync {
    async fn emit(&self, event: AuthEvent);
}

/// Default hook that drops every event.
pub struct NoopEvents;

#[async_trait]
impl AuthEvents for NoopEvents {
    async fn emit(&self, _event: AuthEvent) {}
}
