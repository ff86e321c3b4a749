//! E2E tests for the server auth callback

mod common;

use common::{ORIGIN, TestServer, location, session_for, set_cookie};
use hive_platform::auth::provider::OtpType;
use serde_json::json;

#[tokio::test]
async fn test_code_grant_sets_cookie_and_follows_next() {
    let server = TestServer::new().await;
    server.provider.add_code("abc123", session_for("u1", json!({})));

    let response = server
        .client
        .get(&server.url("/auth/callback?code=abc123&next=/platform/sites/42"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), format!("{ORIGIN}/platform/sites/42"));

    let cookie = set_cookie(&response, "sb-auth-token").expect("session cookie set");
    assert!(cookie.starts_with("sb-auth-token=base64-"));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Lax"));

    assert_eq!(server.provider.calls(), vec!["exchange_grant:code"]);
}

#[tokio::test]
async fn test_external_next_falls_back_to_dashboard() {
    let server = TestServer::new().await;
    server.provider.add_code("abc123", session_for("u1", json!({})));

    for next in ["https://evil.example", "//evil.example", "%2F%2Fevil.example"] {
        let response = server
            .client
            .get(&server.url(&format!("/auth/callback?code=abc123&next={next}")))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 303);
        assert_eq!(location(&response), format!("{ORIGIN}/platform"), "next={next}");
    }
}

#[tokio::test]
async fn test_location_ignores_forwarded_host() {
    let server = TestServer::new().await;
    server.provider.add_code("abc123", session_for("u1", json!({})));

    let response = server
        .client
        .get(&server.url("/auth/callback?code=abc123"))
        .header("X-Forwarded-Host", "evil.example")
        .header("Origin", "https://evil.example")
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), format!("{ORIGIN}/platform"));
}

#[tokio::test]
async fn test_code_verifier_cookie_is_used_and_cleared() {
    let server = TestServer::new().await;
    server.provider.add_code("abc123", session_for("u1", json!({})));

    let response = server
        .client
        .get(&server.url("/auth/callback?code=abc123"))
        .header("Cookie", "sb-auth-token-code-verifier=verifier-1")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 303);
    assert_eq!(
        server.provider.code_verifiers(),
        vec![Some("verifier-1".to_string())]
    );
    let cleared = set_cookie(&response, "sb-auth-token-code-verifier").expect("verifier cleared");
    assert!(cleared.starts_with("sb-auth-token-code-verifier=;"));
}

#[tokio::test]
async fn test_recovery_code_lands_on_settings() {
    let server = TestServer::new().await;
    server
        .provider
        .add_otp("hash-1", OtpType::Recovery, session_for("u1", json!({})));

    let response = server
        .client
        .get(&server.url("/auth/callback?token_hash=hash-1&type=recovery"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), format!("{ORIGIN}/platform/settings"));
    assert!(set_cookie(&response, "sb-auth-token").is_some());
    assert_eq!(
        server.provider.calls(),
        vec!["verify_one_time_code:recovery"]
    );
}

#[tokio::test]
async fn test_invite_with_pending_profile_ignores_next() {
    let server = TestServer::new().await;
    server.provider.add_otp(
        "hash-2",
        OtpType::Invite,
        session_for("u2", json!({ "must_set_password": true })),
    );

    let response = server
        .client
        .get(&server.url("/auth/callback?token_hash=hash-2&type=invite&next=/platform/sites/42"))
        .send()
        .await
        .unwrap();

    assert_eq!(location(&response), format!("{ORIGIN}/platform/settings"));
}

#[tokio::test]
async fn test_callback_without_grant_redirects_without_exchange() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/auth/callback?next=/platform/sites/7"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), format!("{ORIGIN}/platform/sites/7"));
    assert!(set_cookie(&response, "sb-auth-token").is_none());
    assert!(server.provider.calls().is_empty());

    // A type without a hash is not a grant either.
    let response = server
        .client
        .get(&server.url("/auth/callback?type=recovery"))
        .send()
        .await
        .unwrap();
    assert_eq!(location(&response), format!("{ORIGIN}/platform"));
    assert!(server.provider.calls().is_empty());
}

#[tokio::test]
async fn test_callback_error_redirects_to_login() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/auth/callback?error_code=otp_expired"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 303);
    assert_eq!(location(&response), format!("{ORIGIN}/login?error=otp_expired"));
    assert!(server.provider.calls().is_empty());
}

#[tokio::test]
async fn test_failed_exchange_propagates_provider_error() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(&server.url("/auth/callback?code=unknown"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 502);
    assert!(set_cookie(&response, "sb-auth-token").is_none());
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(
        body["error"],
        "invalid flow state, no valid flow state found"
    );
}
