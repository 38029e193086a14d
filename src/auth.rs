// ABOUTME: Token-table authenticator backing the auth collaborator seam.
// ABOUTME: Resolves opaque bearer tokens declared in config to chat identities.

use std::collections::HashMap;
use std::str::FromStr;

use anyhow::{Context, Result};
use async_trait::async_trait;

use styx_core::policy::Role;
use styx_core::traits::{AuthenticatedUser, Authenticator};

use crate::config::UserEntry;

/// Resolves tokens against the table declared in `[auth] users`. Credential
/// issuance and password handling live outside this service; the relay only
/// ever sees the resolved identity tuple.
pub struct TokenAuthenticator {
    by_token: HashMap<String, AuthenticatedUser>,
}

impl TokenAuthenticator {
    pub fn from_entries(entries: &[UserEntry]) -> Result<Self> {
        let mut by_token = HashMap::new();
        for entry in entries {
            let role = Role::from_str(&entry.role)
                .with_context(|| format!("Invalid role for user {}", entry.user_id))?;
            by_token.insert(
                entry.token.clone(),
                AuthenticatedUser {
                    user_id: entry.user_id.clone(),
                    username: entry.username.clone(),
                    role,
                    is_restricted_account: entry.restricted,
                },
            );
        }
        Ok(Self { by_token })
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(&self, token: &str) -> Result<Option<AuthenticatedUser>> {
        Ok(self.by_token.get(token).cloned())
    }
}
