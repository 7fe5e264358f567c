// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;

use super::*;
use crate::auth::persist;
use crate::test_support::FakeOAuth;

const MARGIN: Duration = Duration::from_secs(60);

fn store_with(oauth: &Arc<FakeOAuth>) -> Arc<TokenStore> {
    let oauth: Arc<dyn OAuthApi> = Arc::clone(oauth) as Arc<dyn OAuthApi>;
    Arc::new(TokenStore::new("s-1", oauth))
}

fn expired(access: &str, refresh: Option<&str>) -> TokenSet {
    TokenSet::new(access, refresh.map(str::to_owned), Some(Duration::ZERO))
}

#[tokio::test(start_paused = true)]
async fn fresh_token_is_returned_without_refresh() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(TokenSet::new("at-0", Some("rt-0".into()), Some(Duration::from_secs(3600)))).await;

    assert_eq!(store.ensure_valid(MARGIN).await?, "at-0");
    assert_eq!(oauth.refresh_count(), 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn refreshes_inside_the_margin() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(TokenSet::new("at-0", Some("rt-0".into()), Some(Duration::from_secs(120)))).await;

    assert_eq!(store.ensure_valid(MARGIN).await?, "at-0");
    tokio::time::advance(Duration::from_secs(61)).await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-1");
    assert_eq!(oauth.refresh_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn short_lived_token_is_not_refreshed_on_every_call() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new().with_lifetime(Some(Duration::from_secs(30))));
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-1");
    tokio::time::advance(Duration::from_secs(10)).await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-1");
    assert_eq!(oauth.refresh_count(), 1);

    // Past half its lifetime the reserve kicks in.
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-2");
    Ok(())
}

#[yare::parameterized(
    long_lived_early   = { 3600, 100, true },
    long_lived_margin  = { 3600, 3541, false },
    short_lived_early  = { 30, 14, true },
    short_lived_half   = { 30, 15, false },
    zero_lifetime      = { 0, 0, false },
)]
fn freshness_reserve_is_capped_at_half_lifetime(lifetime: u64, elapsed: u64, fresh: bool) {
    let tokens = TokenSet::new("at", None, Some(Duration::from_secs(lifetime)));
    let now = tokens.obtained_at + Duration::from_secs(elapsed);
    assert_eq!(tokens.is_fresh_at(now, MARGIN), fresh);
}

#[tokio::test(start_paused = true)]
async fn token_without_expiry_is_used_until_rejected() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(TokenSet::new("headless", Some("rt".into()), None)).await;

    tokio::time::advance(Duration::from_secs(86_400)).await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "headless");

    store.invalidate("headless").await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-1");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_refresh() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new().with_refresh_delay(Duration::from_millis(100)));
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    let results = join_all((0..8).map(|_| store.ensure_valid(MARGIN))).await;

    assert_eq!(oauth.refresh_count(), 1);
    for result in results {
        assert_eq!(result?, "refreshed-1");
    }
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn waiters_share_a_transient_failure() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new().with_refresh_delay(Duration::from_millis(100)));
    oauth.fail_refresh(AuthError::Network("connection reset".into()));
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    let results = join_all((0..4).map(|_| store.ensure_valid(MARGIN))).await;

    assert_eq!(oauth.refresh_count(), 1);
    for result in results {
        assert_eq!(result, Err(AuthError::Network("connection reset".into())));
    }
    // Transient failures keep the tokens for a later retry.
    assert!(store.is_authenticated().await);

    // A later call makes a fresh attempt rather than replaying the old failure.
    let _ = store.ensure_valid(MARGIN).await;
    assert_eq!(oauth.refresh_count(), 2);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn rejected_refresh_clears_tokens() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    oauth.fail_refresh(AuthError::RefreshRejected);
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    assert_eq!(store.ensure_valid(MARGIN).await, Err(AuthError::Unauthenticated));
    assert!(store.current().await.is_none());
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn expired_without_refresh_token_requires_login() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(expired("at-0", None)).await;

    assert_eq!(store.ensure_valid(MARGIN).await, Err(AuthError::Unauthenticated));
    assert_eq!(oauth.refresh_count(), 0);
    assert!(!store.is_authenticated().await);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn empty_store_is_unauthenticated() {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    assert_eq!(store.ensure_valid(MARGIN).await, Err(AuthError::Unauthenticated));
}

#[tokio::test(start_paused = true)]
async fn refresh_keeps_refresh_token_when_none_is_returned() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    store.ensure_valid(MARGIN).await?;
    let current = store.current().await.ok_or_else(|| anyhow::anyhow!("tokens missing"))?;
    assert_eq!(current.access_token, "refreshed-1");
    assert_eq!(current.refresh_token.as_deref(), Some("rt-0"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn invalidate_ignores_other_tokens() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new());
    let store = store_with(&oauth);
    store.set(TokenSet::new("at-0", Some("rt-0".into()), Some(Duration::from_secs(3600)))).await;

    store.invalidate("at-stale").await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "at-0");

    store.invalidate("at-0").await;
    assert_eq!(store.ensure_valid(MARGIN).await?, "refreshed-1");
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn login_during_refresh_wins() -> anyhow::Result<()> {
    let oauth = Arc::new(FakeOAuth::new().with_refresh_delay(Duration::from_millis(100)));
    let store = store_with(&oauth);
    store.set(expired("at-0", Some("rt-0"))).await;

    let task = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.ensure_valid(MARGIN).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(oauth.refresh_count(), 1);

    store.set(TokenSet::new("login-at", Some("login-rt".into()), Some(Duration::from_secs(3600)))).await;

    assert_eq!(task.await??, "login-at");
    let current = store.current().await.ok_or_else(|| anyhow::anyhow!("tokens missing"))?;
    assert_eq!(current.access_token, "login-at");
    assert_eq!(current.refresh_token.as_deref(), Some("login-rt"));
    Ok(())
}

#[test]
fn debug_hides_token_values() {
    let tokens = TokenSet::new("secret-access", Some("secret-refresh".into()), None);
    let debug = format!("{tokens:?}");
    assert!(!debug.contains("secret-access"));
    assert!(!debug.contains("secret-refresh"));
}

#[tokio::test]
async fn persistence_follows_set_and_clear() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("tokens.json");
    let oauth: Arc<dyn OAuthApi> = Arc::new(FakeOAuth::new());
    let file = Arc::new(TokenFile::new(path.clone()));
    let store = TokenStore::new("s-1", oauth).with_persistence(Some(file));

    store.set(TokenSet::new("at", Some("rt".into()), None)).await;
    let saved = persist::load(&path)?.ok_or_else(|| anyhow::anyhow!("not persisted"))?;
    assert_eq!(saved.access_token, "at");

    store.clear().await;
    assert!(persist::load(&path)?.is_none());
    Ok(())
}
