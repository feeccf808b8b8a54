mod common;

use common::{test_config, TestContext, PASSWORD};
use identity_service::{
    models::{AuthKind, NewUser},
    services::{ErrorKind, ProviderTokens, SessionTokenKind, TokenCodec},
    store::{AuthTypeLookup, Store},
    utils::{hash_password, Password},
};
use std::sync::Arc;
use tokio_test::{assert_err, assert_ok};

fn password() -> Password {
    Password::new(PASSWORD)
}

async fn stored_pair(ctx: &TestContext, user_id: i64) -> Option<identity_service::models::TokenPair> {
    let mut tx = ctx.store.begin().await.unwrap();
    tx.find_token_pair_for_user(user_id).await.unwrap()
}

fn codec(ctx: &TestContext) -> TokenCodec {
    TokenCodec::new(Arc::new(ctx.store.clone()), &ctx.state.config.jwt)
}

#[tokio::test]
async fn test_sign_up_login_refresh_flow() {
    let ctx = TestContext::new().await;
    let signed_up = ctx.sign_up("ada@example.com").await;
    let user = ctx.user("ada@example.com").await;

    let login = assert_ok!(ctx.state.sessions.login("ada@example.com", &password()).await);
    assert_ne!(login.access_token, signed_up.access_token);
    assert_ne!(login.refresh_token, signed_up.refresh_token);

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.access_token, login.access_token);
    assert_eq!(pair.refresh_token, login.refresh_token);
    assert_eq!(ctx.store.table_sizes().await.token_pairs, 1);

    let refreshed = assert_ok!(ctx.state.sessions.refresh(&login.refresh_token).await);
    assert_ne!(refreshed.access_token, login.access_token);

    let subject = assert_ok!(ctx.state.sessions.authenticate(&refreshed.access_token).await);
    assert_eq!(subject.user.uuid, user.uuid);
    assert_eq!(subject.auth_kind, AuthKind::Local);
    assert!(subject.token_api.is_none());
}

#[tokio::test]
async fn test_login_rejects_bad_credentials() {
    let ctx = TestContext::new().await;
    ctx.sign_up("ada@example.com").await;

    let err = assert_err!(
        ctx.state
            .sessions
            .login("ada@example.com", &Password::new("wrong password"))
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let err = assert_err!(ctx.state.sessions.login("nobody@example.com", &password()).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_login_without_domain_grant_is_denied() {
    let ctx = TestContext::new().await;
    let hash = hash_password(&password(), 1).unwrap().into_string();

    let mut tx = ctx.store.begin().await.unwrap();
    let user = tx
        .insert_user(&NewUser::new("outsider@example.com", hash))
        .await
        .unwrap();
    let local = tx
        .find_auth_type(&AuthTypeLookup::Kind(AuthKind::Local))
        .await
        .unwrap()
        .unwrap();
    tx.link_auth_type(user.id, local.id).await.unwrap();
    tx.commit().await.unwrap();

    let err = ctx
        .state
        .sessions
        .login("outsider@example.com", &password())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authorization);
    assert!(stored_pair(&ctx, user.id).await.is_none());
}

#[tokio::test]
async fn test_tokens_of_deleted_user_are_rejected() {
    let ctx = TestContext::new().await;
    let tokens = ctx.sign_up("ada@example.com").await;
    let user = ctx.user("ada@example.com").await;
    assert!(ctx.store.remove_user(user.uuid).await);

    let err = assert_err!(ctx.state.sessions.authenticate(&tokens.access_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let err = assert_err!(
        codec(&ctx)
            .parse_unvalidated(&tokens.refresh_token, SessionTokenKind::Refresh)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_refresh_with_superseded_token_writes_nothing() {
    let ctx = TestContext::new().await;
    let old = ctx.sign_up("ada@example.com").await;
    let current = ctx
        .state
        .sessions
        .login("ada@example.com", &password())
        .await
        .unwrap();
    let user = ctx.user("ada@example.com").await;

    let err = assert_err!(ctx.state.sessions.refresh(&old.refresh_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.access_token, current.access_token);
    assert_eq!(pair.refresh_token, current.refresh_token);
}

#[tokio::test]
async fn test_refresh_keeps_unexpired_refresh_token() {
    let ctx = TestContext::new().await;
    let tokens = ctx.sign_up("ada@example.com").await;
    let user = ctx.user("ada@example.com").await;

    let refreshed = ctx.state.sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert_eq!(refreshed.refresh_token, tokens.refresh_token);
    assert_ne!(refreshed.access_token, tokens.access_token);

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.access_token, refreshed.access_token);
    assert_eq!(pair.refresh_token, tokens.refresh_token);
}

#[tokio::test]
async fn test_refresh_rotates_expired_refresh_token() {
    let ctx = TestContext::with_expired_refresh().await;
    let tokens = ctx.sign_up("ada@example.com").await;
    let user = ctx.user("ada@example.com").await;

    let refreshed = ctx.state.sessions.refresh(&tokens.refresh_token).await.unwrap();
    assert_ne!(refreshed.refresh_token, tokens.refresh_token);

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.access_token, refreshed.access_token);
    assert_eq!(pair.refresh_token, refreshed.refresh_token);

    // The rotated-out value no longer matches the stored pair.
    let err = assert_err!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_logout_deletes_exact_pair() {
    let ctx = TestContext::new().await;
    let tokens = ctx.sign_up("ada@example.com").await;
    let user = ctx.user("ada@example.com").await;

    assert_ok!(
        ctx.state
            .sessions
            .logout(&tokens.access_token, &tokens.refresh_token)
            .await
    );
    assert!(stored_pair(&ctx, user.id).await.is_none());

    let err = assert_err!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_stale_logout_leaves_current_session() {
    let ctx = TestContext::new().await;
    let old = ctx.sign_up("ada@example.com").await;
    let current = ctx
        .state
        .sessions
        .login("ada@example.com", &password())
        .await
        .unwrap();
    let user = ctx.user("ada@example.com").await;

    let err = assert_err!(
        ctx.state
            .sessions
            .logout(&old.access_token, &old.refresh_token)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    // Mixed halves of two sessions do not match either.
    let err = assert_err!(
        ctx.state
            .sessions
            .logout(&current.access_token, &old.refresh_token)
            .await
    );
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.refresh_token, current.refresh_token);
}

#[tokio::test]
async fn test_oauth_login_registers_new_user() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));

    let tokens = assert_ok!(ctx.state.sessions.login_oauth2("code-1").await);
    let sizes = ctx.store.table_sizes().await;
    assert_eq!(sizes.users, 1);
    assert_eq!(sizes.grants, 1);
    assert_eq!(sizes.token_pairs, 1);
    assert!(ctx.email.sent().is_empty());

    let user = ctx.user("grace@example.com").await;
    let mut tx = ctx.store.begin().await.unwrap();
    let activation = tx.find_activation_for_user(user.id).await.unwrap().unwrap();
    assert!(activation.is_activated);
    let auth_type = tx.find_user_auth_type(user.id).await.unwrap().unwrap();
    assert_eq!(auth_type.kind(), Some(AuthKind::Google));
    let profile = tx.find_profile(user.id).await.unwrap().unwrap();
    assert_eq!(profile.name, "Grace");
    drop(tx);

    let subject = assert_ok!(ctx.state.sessions.authenticate(&tokens.access_token).await);
    assert_eq!(subject.auth_kind, AuthKind::Google);
    assert_eq!(subject.token_api.as_deref(), Some("g-access"));

    let refresh_subject = codec(&ctx)
        .parse_unvalidated(&tokens.refresh_token, SessionTokenKind::Refresh)
        .await
        .unwrap();
    assert_eq!(refresh_subject.token_api.as_deref(), Some("g-refresh"));
}

#[tokio::test]
async fn test_oauth_login_links_existing_account() {
    let ctx = TestContext::new().await;
    ctx.sign_up("ada@example.com").await;
    ctx.register_google("code-1", "ada@example.com", "g-access", Some("g-refresh"));

    ctx.state.sessions.login_oauth2("code-1").await.unwrap();

    let user = ctx.user("ada@example.com").await;
    assert_eq!(user.password_hash, "g-access");
    assert_eq!(ctx.store.table_sizes().await.users, 1);
    assert_eq!(ctx.store.table_sizes().await.token_pairs, 1);

    let mut tx = ctx.store.begin().await.unwrap();
    let auth_type = tx.find_user_auth_type(user.id).await.unwrap().unwrap();
    assert_eq!(auth_type.kind(), Some(AuthKind::Google));
}

#[tokio::test]
async fn test_oauth_login_with_unknown_code_fails() {
    let ctx = TestContext::new().await;
    let err = assert_err!(ctx.state.sessions.login_oauth2("bogus").await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert_eq!(ctx.store.table_sizes().await.users, 0);
}

#[tokio::test]
async fn test_federated_refresh_uses_provider() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();
    ctx.oauth.register_refresh(
        "g-refresh",
        ProviderTokens {
            access_token: "g-access-2".to_string(),
            refresh_token: None,
        },
    );

    let refreshed = assert_ok!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(ctx.user("grace@example.com").await.password_hash, "g-access-2");

    let subject = assert_ok!(ctx.state.sessions.authenticate(&refreshed.access_token).await);
    assert_eq!(subject.token_api.as_deref(), Some("g-access-2"));
}

#[tokio::test]
async fn test_federated_refresh_stores_new_provider_refresh_token() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();
    let user = ctx.user("grace@example.com").await;
    ctx.oauth.register_refresh(
        "g-refresh",
        ProviderTokens {
            access_token: "g-access-2".to_string(),
            refresh_token: Some("g-refresh-2".to_string()),
        },
    );

    // Our refresh token is still valid, yet the provider issued a new one.
    let refreshed = assert_ok!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_ne!(refreshed.refresh_token, tokens.refresh_token);

    let refresh_subject = codec(&ctx)
        .parse_unvalidated(&refreshed.refresh_token, SessionTokenKind::Refresh)
        .await
        .unwrap();
    assert_eq!(refresh_subject.token_api.as_deref(), Some("g-refresh-2"));

    let pair = stored_pair(&ctx, user.id).await.unwrap();
    assert_eq!(pair.refresh_token, refreshed.refresh_token);
    assert_eq!(pair.access_token, refreshed.access_token);

    let err = assert_err!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_federated_refresh_keeps_token_when_provider_repeats_it() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();
    ctx.oauth.register_refresh(
        "g-refresh",
        ProviderTokens {
            access_token: "g-access-2".to_string(),
            refresh_token: Some("g-refresh".to_string()),
        },
    );

    let refreshed = assert_ok!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(refreshed.refresh_token, tokens.refresh_token);
}

#[tokio::test]
async fn test_federated_refresh_without_provider_refresh_token_fails() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", None);
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();

    let err = assert_err!(ctx.state.sessions.refresh(&tokens.refresh_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_federated_session_rejected_once_provider_forgets_it() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();

    ctx.oauth.invalidate("g-access");
    let err = assert_err!(ctx.state.sessions.authenticate(&tokens.access_token).await);
    assert_eq!(err.kind(), ErrorKind::Authentication);
}

#[tokio::test]
async fn test_federated_logout_revokes_provider_token() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();

    ctx.state
        .sessions
        .logout(&tokens.access_token, &tokens.refresh_token)
        .await
        .unwrap();
    assert_eq!(ctx.oauth.revoked(), vec!["g-access".to_string()]);
    assert_eq!(ctx.store.table_sizes().await.token_pairs, 0);
}

#[tokio::test]
async fn test_federated_logout_survives_revoke_failure() {
    let ctx = TestContext::new().await;
    ctx.register_google("code-1", "grace@example.com", "g-access", Some("g-refresh"));
    let tokens = ctx.state.sessions.login_oauth2("code-1").await.unwrap();
    ctx.oauth.set_fail_revoke(true);

    assert_ok!(
        ctx.state
            .sessions
            .logout(&tokens.access_token, &tokens.refresh_token)
            .await
    );
    assert!(ctx.oauth.revoked().is_empty());
    assert_eq!(ctx.store.table_sizes().await.token_pairs, 0);
}

#[tokio::test]
async fn test_rbac_model_check_passes_on_seeded_store() {
    let ctx = TestContext::new().await;
    assert_eq!(assert_ok!(ctx.state.sessions.check_rbac_model().await), 0);

    ctx.sign_up("ada@example.com").await;
    assert_eq!(assert_ok!(ctx.state.sessions.check_rbac_model().await), 1);
}

#[tokio::test]
async fn test_rbac_model_check_fails_for_unknown_domain() {
    let mut config = test_config();
    config.rbac.domain = "crn".to_string();
    let ctx = TestContext::with_config(config).await;

    let err = assert_err!(ctx.state.sessions.check_rbac_model().await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_rbac_model_check_fails_for_missing_roles() {
    let ctx = TestContext::new().await;
    assert!(ctx.store.remove_role(ctx.admin_role.id).await);
    let err = assert_err!(ctx.state.sessions.check_rbac_model().await);
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let ctx = TestContext::new().await;
    assert!(ctx.store.remove_role(ctx.default_role.id).await);
    let err = assert_err!(ctx.state.sessions.check_rbac_model().await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
