use super::*;

fn cfg() -> AuthConfig {
    AuthConfig {
        secret: "devsecret".into(),
        ttl_seconds: 60,
    }
}

#[test]
fn minted_token_verifies_to_subject() {
    let token = mint_session_token(&cfg(), "ext_42").expect("token");
    assert_eq!(verify_session_token(&cfg(), &token).expect("verify"), "ext_42");
}

#[test]
fn token_signed_with_other_secret_is_rejected() {
    let other = AuthConfig {
        secret: "othersecret".into(),
        ttl_seconds: 60,
    };
    let token = mint_session_token(&other, "ext_42").expect("token");
    assert!(verify_session_token(&cfg(), &token).is_err());
}

#[test]
fn expired_token_is_rejected() {
    let expired = AuthConfig {
        secret: "devsecret".into(),
        ttl_seconds: -3600,
    };
    let token = mint_session_token(&expired, "ext_42").expect("token");
    assert!(verify_session_token(&cfg(), &token).is_err());
}
