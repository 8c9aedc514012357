//! In-memory storage adapter for prototyping and tests.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use rand::distr::{Alphanumeric, SampleString};

use gau_core::{AccountTokens, Adapter, AdapterError, Account, NewUser, User, UserUpdate};

const GENERATED_ID_LEN: usize = 21;

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, User>,
    accounts: Vec<Account>,
}

/// `Adapter` over process memory. Supports in-place account updates, so
/// token-rotation persistence is enabled.
#[derive(Default)]
pub struct MemoryAdapter {
    state: RwLock<MemoryState>,
}

impl MemoryAdapter {
    pub fn new() -> Self {
        Self::default()
    }
}

fn generate_id() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), GENERATED_ID_LEN)
}

fn lock_poisoned() -> AdapterError {
    AdapterError::Backend("memory store lock poisoned".to_string())
}

#[async_trait]
impl Adapter for MemoryAdapter {
    async fn get_user(&self, id: &str) -> Result<Option<User>, AdapterError> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        Ok(state.users.get(id).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, AdapterError> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        Ok(state
            .users
            .values()
            .find(|user| user.email.as_deref() == Some(email))
            .cloned())
    }

    async fn get_user_by_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<Option<User>, AdapterError> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        let Some(account) = state
            .accounts
            .iter()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
        else {
            return Ok(None);
        };
        Ok(state.users.get(&account.user_id).cloned())
    }

    async fn get_accounts(&self, user_id: &str) -> Result<Vec<Account>, AdapterError> {
        let state = self.state.read().map_err(|_| lock_poisoned())?;
        Ok(state
            .accounts
            .iter()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let id = user.id.unwrap_or_else(generate_id);
        if state.users.contains_key(&id) {
            return Err(AdapterError::Backend(format!("user `{id}` already exists")));
        }
        let user = User {
            id: id.clone(),
            name: user.name,
            email: user.email,
            email_verified: user.email_verified,
            image: user.image,
            role: user.role,
        };
        state.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: &str, update: UserUpdate) -> Result<User, AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let user = state
            .users
            .get_mut(id)
            .ok_or_else(|| AdapterError::NotFound(format!("user `{id}`")))?;
        if let Some(name) = update.name {
            user.name = name;
        }
        if let Some(email) = update.email {
            user.email = email;
        }
        if let Some(email_verified) = update.email_verified {
            user.email_verified = email_verified;
        }
        if let Some(image) = update.image {
            user.image = image;
        }
        if let Some(role) = update.role {
            user.role = role;
        }
        Ok(user.clone())
    }

    async fn delete_user(&self, id: &str) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        state.users.remove(id);
        state.accounts.retain(|a| a.user_id != id);
        Ok(())
    }

    async fn link_account(&self, account: Account) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let duplicate = state.accounts.iter().any(|a| {
            a.provider == account.provider && a.provider_account_id == account.provider_account_id
        });
        if duplicate {
            return Err(AdapterError::Backend(format!(
                "account ({}, {}) already linked",
                account.provider, account.provider_account_id
            )));
        }
        state.accounts.push(account);
        Ok(())
    }

    async fn unlink_account(
        &self,
        provider: &str,
        provider_account_id: &str,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let before = state.accounts.len();
        state
            .accounts
            .retain(|a| !(a.provider == provider && a.provider_account_id == provider_account_id));
        if state.accounts.len() == before {
            return Err(AdapterError::NotFound(format!(
                "account ({provider}, {provider_account_id})"
            )));
        }
        Ok(())
    }

    async fn update_account(
        &self,
        provider: &str,
        provider_account_id: &str,
        tokens: AccountTokens,
    ) -> Result<(), AdapterError> {
        let mut state = self.state.write().map_err(|_| lock_poisoned())?;
        let account = state
            .accounts
            .iter_mut()
            .find(|a| a.provider == provider && a.provider_account_id == provider_account_id)
            .ok_or_else(|| {
                AdapterError::NotFound(format!("account ({provider}, {provider_account_id})"))
            })?;
        if let Some(access_token) = tokens.access_token {
            account.access_token = Some(access_token);
        }
        if let Some(refresh_token) = tokens.refresh_token {
            account.refresh_token = Some(refresh_token);
        }
        if let Some(id_token) = tokens.id_token {
            account.id_token = Some(id_token);
        }
        if let Some(expires_at) = tokens.expires_at {
            account.expires_at = Some(expires_at);
        }
        if let Some(scope) = tokens.scope {
            account.scope = Some(scope);
        }
        Ok(())
    }
}
