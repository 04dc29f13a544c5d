// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Resolution of an authenticated identity to a stored user and account.

use super::email::resolve_name_with_fallback;
use super::social::{MappedProfile, ProviderTokens, SocialProvider};
use crate::db::AuthStore;
use crate::error::AppError;
use crate::models::{Account, NewAccount, NewUser, User, CREDENTIAL_PROVIDER_ID};
use std::sync::Arc;

/// A user together with the account used to sign in.
#[derive(Debug, Clone, PartialEq)]
pub struct UserAccountPair {
    pub user: User,
    pub account: Account,
}

pub struct AccountResolver {
    store: Arc<dyn AuthStore>,
}

impl AccountResolver {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self { store }
    }

    /// Find or create the user and account for a social sign-in.
    ///
    /// Lookup order is the provider account, then the user by email. A
    /// repeated sign-in with the same subject never creates duplicates.
    pub async fn resolve_social(
        &self,
        provider: SocialProvider,
        profile: &MappedProfile,
        tokens: Option<&ProviderTokens>,
    ) -> Result<UserAccountPair, AppError> {
        if let Some(account) = self
            .store
            .get_account_by_provider(provider.id(), &profile.account_id)
            .await?
        {
            let user = self.existing_user(&account.user_id).await?;
            let user = self.fill_missing_name(user, profile.name.as_deref()).await?;
            tracing::debug!(provider = %provider, user_id = %user.id, "Existing account signed in");
            return Ok(UserAccountPair { user, account });
        }

        // Binding to an existing user by email needs the provider's word
        // that the address belongs to this subject.
        if !profile.email_verified
            && self.store.get_user_by_email(&profile.email).await?.is_some()
        {
            tracing::warn!(
                provider = %provider,
                "Refusing to link unverified provider email to existing user"
            );
            return Err(AppError::Forbidden(format!(
                "{provider} account not linked: email is not verified"
            )));
        }

        let user = self
            .find_or_create_user(
                &profile.email,
                profile.name.as_deref(),
                profile.image.clone(),
                profile.email_verified,
            )
            .await?;

        let account = self
            .store
            .create_account(NewAccount {
                user_id: user.id.clone(),
                provider_id: provider.id().to_string(),
                provider_account_id: profile.account_id.clone(),
                access_token: tokens.map(|t| t.access_token.clone()),
                refresh_token: tokens.and_then(|t| t.refresh_token.clone()),
            })
            .await?;

        tracing::info!(provider = %provider, user_id = %user.id, "Linked new provider account");
        Ok(UserAccountPair { user, account })
    }

    /// Find or create the user and credential account behind a verified
    /// magic link.
    pub async fn resolve_credential(&self, email: &str) -> Result<UserAccountPair, AppError> {
        let user = self.find_or_create_user(email, None, None, true).await?;

        let account = match self
            .store
            .get_account_by_provider(CREDENTIAL_PROVIDER_ID, &user.id)
            .await?
        {
            Some(account) => account,
            None => {
                self.store
                    .create_account(NewAccount {
                        user_id: user.id.clone(),
                        provider_id: CREDENTIAL_PROVIDER_ID.to_string(),
                        provider_account_id: user.id.clone(),
                        access_token: None,
                        refresh_token: None,
                    })
                    .await?
            }
        };

        Ok(UserAccountPair { user, account })
    }

    /// User and most recent account, if both exist.
    pub async fn resolve_by_user_id(
        &self,
        user_id: &str,
    ) -> Result<Option<UserAccountPair>, AppError> {
        let Some(user) = self.store.get_user_by_id(user_id).await? else {
            return Ok(None);
        };

        Ok(self
            .store
            .get_account_by_user_id(&user.id)
            .await?
            .map(|account| UserAccountPair { user, account }))
    }

    async fn find_or_create_user(
        &self,
        email: &str,
        name: Option<&str>,
        image: Option<String>,
        email_verified: bool,
    ) -> Result<User, AppError> {
        if let Some(user) = self.store.get_user_by_email(email).await? {
            return self.fill_missing_name(user, name).await;
        }

        let user = self
            .store
            .create_user(NewUser {
                email: email.to_string(),
                name: resolve_name_with_fallback(name, email),
                image,
                email_verified,
            })
            .await?;

        tracing::info!(user_id = %user.id, "Created user");
        Ok(user)
    }

    async fn existing_user(&self, user_id: &str) -> Result<User, AppError> {
        self.store.get_user_by_id(user_id).await?.ok_or_else(|| {
            AppError::Database(format!("account references missing user {user_id}"))
        })
    }

    async fn fill_missing_name(&self, mut user: User, name: Option<&str>) -> Result<User, AppError> {
        if user.name.as_deref().is_some_and(|n| !n.trim().is_empty()) {
            return Ok(user);
        }

        if let Some(name) = resolve_name_with_fallback(name, &user.email) {
            self.store.update_user_name(&user.id, &name).await?;
            user.name = Some(name);
        }

        Ok(user)
    }
}
