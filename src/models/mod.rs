// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod auth_state;
pub mod magic_link;
pub mod payload;
pub mod session;
pub mod user;

pub use auth_state::AuthStateLookup;
pub use magic_link::{MagicLink, MagicLinkIntent};
pub use payload::{Payload, Role};
pub use session::Session;
pub use user::{Account, NewAccount, NewUser, User, CREDENTIAL_PROVIDER_ID};
