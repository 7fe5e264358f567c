// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth2 authorization code + PKCE login and token lifecycle.
//!
//! A login begins in [`attempt::AuthSessionStore`], which holds the CSRF state and
//! code verifier until the callback returns. The [`oauth::OAuthApi`] exchanges the
//! code for a [`token::TokenSet`], and [`token::TokenStore`] keeps that set fresh.

pub mod attempt;
pub mod oauth;
pub mod persist;
pub mod pkce;
pub mod token;
