//! Storage adapter contract. Persistence of users and accounts lives
//! behind this trait; the core never retries adapter failures.

use async_trait::async_trait;

use crate::types::{Account, NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Field-level user patch. The outer `Option` selects the field, the inner
/// value may clear it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UserUpdate {
    pub name: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub email_verified: Option<Option<bool>>,
    pub image: Option<Option<String>>,
    pub role: Option<Option<String>>,
}

/// Rotated token material applied to an existing account row.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AccountTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_at: Option<i64>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait Adapter: Send + Sync {
    async fn get_user(&self, id: &str) -> Result<Option<User>, AdapterError>;

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AdapterError>;

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, AdapterError>;

    async fn get_accounts(&self, user_id: &str) -> Result<Vec<Account>, AdapterError>;

    /// Joined fetch; `None` when the user does not exist.
    async fn get_user_and_accounts(
        &self,
        user_id: &str,
    ) -> Result<Option<(User, Vec<Account>)>, AdapterError> {
        match self.get_user(user_id).await? {
            Some(user) => {
                let accounts = self.get_accounts(user_id).await?;
                Ok(Some((user, accounts)))
            }
            None => Ok(None),
        }
    }

    /// Create a user, generating an id when the input carries none.
    async fn create_user(&self, user: NewUser) -> Result<User, AdapterError>;

    /// Apply a patch to an existing user; fails if the user is absent.
    async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User, AdapterError>;

    async fn delete_user(&self, id: &str) -> Result<(), AdapterError>;

    async fn link_account(&self, account: Account) -> Result<(), AdapterError>;

    async fn unlink_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<(), AdapterError>;

    /// Update stored tokens on an existing account row. The default refuses,
    /// which disables token-rotation persistence for adapters that cannot
    /// express in-place updates.
    async fn update_account(
        &self,
        _provider: &str,
        _provider_account_id: &str,
        _tokens: AccountTokens,
    ) -> Result<(), AdapterError> {
        Err(AdapterError::Unsupported("update_account"))
    }
}
