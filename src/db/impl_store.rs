// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! [`AuthStore`](super::AuthStore) implementation shared by the sqlx backends.
//!
//! Both dialects take `?` placeholders and decode the same row types, so every
//! method body is identical apart from the schema and the auth-state upsert.
//! The backend type needs a `pool` field holding its sqlx pool.

macro_rules! impl_auth_store {
    (
        store: $store:ty,
        backend: $backend:literal,
        schema: $schema:expr,
        upsert_auth_state: $upsert_auth_state:expr $(,)?
    ) => {
        #[::async_trait::async_trait]
        impl $crate::db::AuthStore for $store {
            fn backend(&self) -> &'static str {
                $backend
            }

            async fn initialize(&self) -> Result<(), $crate::error::AppError> {
                for statement in $schema {
                    sqlx::query(statement).execute(&self.pool).await?;
                }
                Ok(())
            }

            async fn is_healthy(&self) -> bool {
                sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
            }

            async fn shutdown(&self) {
                self.pool.close().await;
                tracing::info!(backend = $backend, "Auth store closed");
            }

            // ─── Users ───────────────────────────────────────────────────

            async fn get_user_by_id(
                &self,
                user_id: &str,
            ) -> Result<Option<$crate::models::User>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::User>($crate::db::sql::SELECT_USER_BY_ID)
                    .bind(user_id)
                    .fetch_optional(&self.pool)
                    .await?)
            }

            async fn get_user_by_email(
                &self,
                email: &str,
            ) -> Result<Option<$crate::models::User>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::User>($crate::db::sql::SELECT_USER_BY_EMAIL)
                    .bind($crate::db::email_key(email))
                    .fetch_optional(&self.pool)
                    .await?)
            }

            async fn create_user(
                &self,
                user: $crate::models::NewUser,
            ) -> Result<$crate::models::User, $crate::error::AppError> {
                let user = $crate::models::User {
                    id: $crate::db::new_id(),
                    email: $crate::db::email_key(&user.email),
                    name: user.name,
                    image: user.image,
                    email_verified: user.email_verified,
                    created_at: $crate::time_utils::now_utc(),
                };

                let result = sqlx::query($crate::db::sql::INSERT_USER)
                    .bind(&user.id)
                    .bind(&user.email)
                    .bind(&user.name)
                    .bind(&user.image)
                    .bind(user.email_verified)
                    .bind(user.created_at)
                    .execute(&self.pool)
                    .await;

                match result {
                    Ok(_) => Ok(user),
                    Err(e) if $crate::db::is_unique_violation(&e) => self
                        .get_user_by_email(&user.email)
                        .await?
                        .ok_or_else(|| {
                            $crate::error::AppError::Database(
                                "user missing after email conflict".into(),
                            )
                        }),
                    Err(e) => Err(e.into()),
                }
            }

            async fn update_user_name(
                &self,
                user_id: &str,
                name: &str,
            ) -> Result<(), $crate::error::AppError> {
                sqlx::query($crate::db::sql::UPDATE_USER_NAME)
                    .bind(name)
                    .bind(user_id)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }

            async fn delete_user(&self, user_id: &str) -> Result<u64, $crate::error::AppError> {
                let mut tx = self.pool.begin().await?;
                let mut deleted = 0;

                for statement in [
                    $crate::db::sql::DELETE_USER_SESSIONS,
                    $crate::db::sql::DELETE_USER_ACCOUNTS,
                    $crate::db::sql::DELETE_USER,
                ] {
                    deleted += sqlx::query(statement)
                        .bind(user_id)
                        .execute(&mut *tx)
                        .await?
                        .rows_affected();
                }

                tx.commit().await?;
                Ok(deleted)
            }

            // ─── Accounts ────────────────────────────────────────────────

            async fn get_account_by_user_id(
                &self,
                user_id: &str,
            ) -> Result<Option<$crate::models::Account>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::Account>(
                    $crate::db::sql::SELECT_LATEST_ACCOUNT_BY_USER,
                )
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?)
            }

            async fn get_accounts_by_user_id(
                &self,
                user_id: &str,
            ) -> Result<Vec<$crate::models::Account>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::Account>(
                    $crate::db::sql::SELECT_ACCOUNTS_BY_USER,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?)
            }

            async fn get_account_by_provider(
                &self,
                provider_id: &str,
                provider_account_id: &str,
            ) -> Result<Option<$crate::models::Account>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::Account>(
                    $crate::db::sql::SELECT_ACCOUNT_BY_PROVIDER,
                )
                .bind(provider_id)
                .bind(provider_account_id)
                .fetch_optional(&self.pool)
                .await?)
            }

            async fn create_account(
                &self,
                account: $crate::models::NewAccount,
            ) -> Result<$crate::models::Account, $crate::error::AppError> {
                let account = $crate::models::Account {
                    id: $crate::db::new_id(),
                    user_id: account.user_id,
                    provider_id: account.provider_id,
                    provider_account_id: account.provider_account_id,
                    access_token: account.access_token,
                    refresh_token: account.refresh_token,
                    created_at: $crate::time_utils::now_utc(),
                };

                let result = sqlx::query($crate::db::sql::INSERT_ACCOUNT)
                    .bind(&account.id)
                    .bind(&account.user_id)
                    .bind(&account.provider_id)
                    .bind(&account.provider_account_id)
                    .bind(&account.access_token)
                    .bind(&account.refresh_token)
                    .bind(account.created_at)
                    .execute(&self.pool)
                    .await;

                match result {
                    Ok(_) => Ok(account),
                    Err(e) if $crate::db::is_unique_violation(&e) => self
                        .get_account_by_provider(&account.provider_id, &account.provider_account_id)
                        .await?
                        .ok_or_else(|| {
                            $crate::error::AppError::Database(
                                "account missing after conflict".into(),
                            )
                        }),
                    Err(e) => Err(e.into()),
                }
            }

            // ─── PKCE auth states ────────────────────────────────────────

            async fn save_auth_state(
                &self,
                state: &str,
                code_verifier: &str,
                expires_at: ::chrono::DateTime<::chrono::Utc>,
            ) -> Result<(), $crate::error::AppError> {
                sqlx::query($upsert_auth_state)
                    .bind(state)
                    .bind(code_verifier)
                    .bind($crate::time_utils::now_utc())
                    .bind(expires_at)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }

            async fn get_auth_state(
                &self,
                state: &str,
            ) -> Result<$crate::models::AuthStateLookup, $crate::error::AppError> {
                let row: Option<(String, ::chrono::DateTime<::chrono::Utc>)> =
                    sqlx::query_as($crate::db::sql::SELECT_AUTH_STATE)
                        .bind(state)
                        .fetch_optional(&self.pool)
                        .await?;

                Ok(match row {
                    None => $crate::models::AuthStateLookup::NotFound,
                    Some((_, expires_at)) if expires_at <= $crate::time_utils::now_utc() => {
                        $crate::models::AuthStateLookup::Expired
                    }
                    Some((code_verifier, _)) => $crate::models::AuthStateLookup::Code(code_verifier),
                })
            }

            async fn delete_auth_state(&self, state: &str) -> Result<bool, $crate::error::AppError> {
                let result = sqlx::query($crate::db::sql::DELETE_AUTH_STATE)
                    .bind(state)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected() == 1)
            }

            async fn purge_expired_auth_states(&self) -> Result<u64, $crate::error::AppError> {
                let result = sqlx::query($crate::db::sql::PURGE_AUTH_STATES)
                    .bind($crate::time_utils::now_utc())
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            }

            // ─── Magic links ─────────────────────────────────────────────

            async fn insert_magic_link(
                &self,
                link: &$crate::models::MagicLink,
            ) -> Result<(), $crate::error::AppError> {
                let mut tx = self.pool.begin().await?;

                sqlx::query($crate::db::sql::SUPERSEDE_MAGIC_LINKS)
                    .bind(true)
                    .bind(link.created_at)
                    .bind(&link.email)
                    .bind(false)
                    .bind(link.created_at)
                    .execute(&mut *tx)
                    .await?;

                sqlx::query($crate::db::sql::INSERT_MAGIC_LINK)
                    .bind(&link.token_hash)
                    .bind(&link.email)
                    .bind(&link.intent)
                    .bind(link.created_at)
                    .bind(link.expires_at)
                    .bind(link.used)
                    .bind(link.used_at)
                    .execute(&mut *tx)
                    .await?;

                tx.commit().await?;
                Ok(())
            }

            async fn find_active_magic_link(
                &self,
                email: &str,
            ) -> Result<Option<$crate::models::MagicLink>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::MagicLink>(
                    $crate::db::sql::SELECT_ACTIVE_MAGIC_LINK,
                )
                .bind($crate::db::email_key(email))
                .bind(false)
                .bind($crate::time_utils::now_utc())
                .fetch_optional(&self.pool)
                .await?)
            }

            async fn consume_magic_link(
                &self,
                token_hash: &str,
                now: ::chrono::DateTime<::chrono::Utc>,
            ) -> Result<Option<$crate::models::MagicLink>, $crate::error::AppError> {
                let updated = sqlx::query($crate::db::sql::CONSUME_MAGIC_LINK)
                    .bind(true)
                    .bind(now)
                    .bind(token_hash)
                    .bind(false)
                    .bind(now)
                    .execute(&self.pool)
                    .await?
                    .rows_affected();

                if updated != 1 {
                    return Ok(None);
                }

                Ok(sqlx::query_as::<_, $crate::models::MagicLink>(
                    $crate::db::sql::SELECT_MAGIC_LINK,
                )
                .bind(token_hash)
                .fetch_optional(&self.pool)
                .await?)
            }

            async fn purge_expired_magic_links(&self) -> Result<u64, $crate::error::AppError> {
                let result = sqlx::query($crate::db::sql::PURGE_MAGIC_LINKS)
                    .bind($crate::time_utils::now_utc())
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            }

            // ─── Sessions ────────────────────────────────────────────────

            async fn create_session(
                &self,
                session: &$crate::models::Session,
            ) -> Result<(), $crate::error::AppError> {
                sqlx::query($crate::db::sql::INSERT_SESSION)
                    .bind(&session.token_hash)
                    .bind(&session.user_id)
                    .bind(session.created_at)
                    .bind(session.expires_at)
                    .execute(&self.pool)
                    .await?;
                Ok(())
            }

            async fn get_session(
                &self,
                token_hash: &str,
            ) -> Result<Option<$crate::models::Session>, $crate::error::AppError> {
                Ok(sqlx::query_as::<_, $crate::models::Session>($crate::db::sql::SELECT_SESSION)
                    .bind(token_hash)
                    .bind($crate::time_utils::now_utc())
                    .fetch_optional(&self.pool)
                    .await?)
            }

            async fn delete_session(&self, token_hash: &str) -> Result<bool, $crate::error::AppError> {
                let result = sqlx::query($crate::db::sql::DELETE_SESSION)
                    .bind(token_hash)
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }

            async fn cleanup_expired_sessions(&self) -> Result<u64, $crate::error::AppError> {
                let result = sqlx::query($crate::db::sql::PURGE_SESSIONS)
                    .bind($crate::time_utils::now_utc())
                    .execute(&self.pool)
                    .await?;
                Ok(result.rows_affected())
            }
        }
    };
}
