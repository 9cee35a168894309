mod common;

use axum::http::StatusCode;
use common::{
    body_json, location, raw_set_cookie, session_cookie, TestApp, FRONTEND_URL, GOOD_CODE,
    GOOD_EMAIL, STRATEGY,
};

#[tokio::test]
async fn challenge_redirects_to_provider_with_state() {
    let app = TestApp::spawn().await;

    let response = app.get(&format!("/auth/{}", STRATEGY), None).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("https://idp.test/google/authorize?state="));
    let set_cookie = raw_set_cookie(&response);
    assert!(set_cookie.starts_with("__session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Lax"));
    assert!(set_cookie.contains("Path=/"));
}

#[tokio::test]
async fn unknown_strategy_is_not_found() {
    let app = TestApp::spawn().await;
    let response = app.get("/auth/github", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn first_login_provisions_and_authenticates() {
    let app = TestApp::spawn().await;

    let response = app.login_with(GOOD_CODE).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), FRONTEND_URL);
    let cookie = session_cookie(&response).expect("callback commits the session");

    let me = app.get("/users/me", Some(&cookie)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let body = body_json(me).await;
    assert_eq!(body["email"], GOOD_EMAIL);
    assert!(body["user_id"].as_str().unwrap().starts_with("user_"));

    assert_eq!(app.provisioner.calls(), 1);
    assert_eq!(app.bootstrapper.applied().len(), 1);
    assert_eq!(app.repo.users_with_email(GOOD_EMAIL), 1);
    assert_eq!(app.repo.links().len(), 1);
}

#[tokio::test]
async fn repeat_login_returns_same_user_without_provisioning() {
    let app = TestApp::spawn().await;

    let first = app.login_with(GOOD_CODE).await;
    let first_cookie = session_cookie(&first).unwrap();
    let first_user = body_json(app.get("/users/me", Some(&first_cookie)).await).await;

    let second = app.login_with(GOOD_CODE).await;
    let second_cookie = session_cookie(&second).unwrap();
    let second_user = body_json(app.get("/users/me", Some(&second_cookie)).await).await;

    assert_eq!(first_user["user_id"], second_user["user_id"]);
    assert_eq!(app.provisioner.calls(), 1);
    assert_eq!(app.bootstrapper.calls(), 1);
    assert_eq!(app.repo.links().len(), 1);
}

#[tokio::test]
async fn provisioning_failure_redirects_to_login_with_error() {
    let app = TestApp::spawn().await;
    app.bootstrapper.fail_all(true);

    let response = app.login_with(GOOD_CODE).await;

    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with(&format!("{}/login?error=", FRONTEND_URL)));
    let cookie = session_cookie(&response).expect("error is flashed into the session");

    let me = app.get("/users/me", Some(&cookie)).await;
    assert_eq!(me.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.repo.user_count(), 0);
    assert!(app.repo.links().is_empty());
}

#[tokio::test]
async fn unknown_code_is_not_authenticated() {
    let app = TestApp::spawn().await;

    let response = app.login_with("bogus").await;

    assert!(location(&response).contains("/login?error="));
    assert_eq!(app.provisioner.calls(), 0);
}

#[tokio::test]
async fn callback_with_forged_state_is_rejected() {
    let app = TestApp::spawn().await;
    let (cookie, _) = app.start_login().await;

    let response = app
        .get(
            &format!(
                "/auth/{}/callback?code={}&state=00000000-0000-0000-0000-000000000000",
                STRATEGY, GOOD_CODE
            ),
            Some(&cookie),
        )
        .await;

    assert!(location(&response).contains("/login?error="));
    assert_eq!(app.repo.user_count(), 0);
}

#[tokio::test]
async fn callback_without_session_is_rejected() {
    let app = TestApp::spawn().await;
    let (_, state) = app.start_login().await;

    let response = app
        .get(
            &format!("/auth/{}/callback?code={}&state={}", STRATEGY, GOOD_CODE, state),
            None,
        )
        .await;

    assert!(location(&response).contains("/login?error="));
    assert_eq!(app.provisioner.calls(), 0);
}

#[tokio::test]
async fn me_requires_session() {
    let app = TestApp::spawn().await;

    let response = app.get("/users/me", None).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Not authenticated");

    let response = app.get("/users/me", Some("__session=forged.value")).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_session_cookie() {
    let app = TestApp::spawn().await;
    let cookie = session_cookie(&app.login_with(GOOD_CODE).await).unwrap();

    let response = app.post("/auth/logout", Some(&cookie)).await;

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let set_cookie = raw_set_cookie(&response);
    assert!(set_cookie.starts_with("__session=;"));
    assert!(set_cookie.contains("Max-Age=0"));
}
