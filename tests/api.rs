use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use playground_accounts::{
    app,
    config::AuthConfig,
    db::{establish_connection, DbConnection},
    mailer::{MailError, Mailer},
    models::SharedLink,
    state::AppState,
    store,
};
use serde_json::{json, Value};
use tower::ServiceExt;

#[derive(Default)]
struct RecordingMailer {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMailer {
    fn last_code(&self, email: &str) -> String {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(to, _)| to == email)
            .map(|(_, code)| code.clone())
            .expect("no otp sent to this address")
    }

    fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_otp(&self, to: &str, code: &str) -> Result<(), MailError> {
        self.sent.lock().unwrap().push((to.to_string(), code.to_string()));
        Ok(())
    }
}

struct RejectingMailer;

#[async_trait]
impl Mailer for RejectingMailer {
    async fn send_otp(&self, _to: &str, _code: &str) -> Result<(), MailError> {
        Err(MailError::Rejected {
            status: 503,
            body: "unavailable".into(),
        })
    }
}

fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

struct TestApp {
    router: Router,
    db: DbConnection,
    mailer: Arc<RecordingMailer>,
}

fn auth_config() -> AuthConfig {
    let mut auth = AuthConfig::new("test-secret");
    auth.bcrypt_cost = 4;
    auth
}

fn test_app() -> TestApp {
    let db = establish_connection(":memory:").unwrap();
    let mailer = Arc::new(RecordingMailer::default());
    let state = AppState::new(db.clone(), auth_config(), mailer.clone());
    TestApp {
        router: app(state),
        db,
        mailer,
    }
}

impl TestApp {
    async fn call(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
            None => req.body(Body::empty()).unwrap(),
        };

        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, None, Some(body)).await
    }

    async fn register(&self, username: &str, email: &str, password: &str) -> (StatusCode, Value) {
        self.post(
            "/api/register",
            json!({ "username": username, "email": email, "password": password }),
        )
        .await
    }

    /// Registers and verifies an account, returning its session token.
    async fn signup(&self, username: &str, email: &str, password: &str) -> String {
        let (status, _) = self.register(username, email, password).await;
        assert_eq!(status, StatusCode::OK);
        let otp = self.mailer.last_code(email);
        let (status, body) = self
            .post(
                "/api/verify-otp",
                json!({ "email": email, "otp": otp, "password": password }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "verify failed: {body}");
        body["token"].as_str().unwrap().to_string()
    }

    async fn user(&self, email: &str) -> playground_accounts::models::User {
        store::find_by_email(&self.db, email).await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn health_is_ok() {
    let app = test_app();
    let (status, body) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn registration_requires_otp_before_login() {
    let app = test_app();

    let (status, body) = app.register("alice123", "a@example.com", "longpass1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["msg"],
        "Registration successful, please check your email for the OTP to verify your email address."
    );
    assert!(!app.user("a@example.com").await.is_email_verified);

    let (status, body) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "longpass1" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Email not verified");

    let (status, body) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "a@example.com", "otp": "zzzzzz", "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid OTP");

    let otp = app.mailer.last_code("a@example.com");
    let (status, body) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "a@example.com", "otp": otp, "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice123");
    assert!(body["token"].is_string());

    let verified = app.user("a@example.com").await;
    assert!(verified.is_email_verified);
    assert!(verified.otp_hash.is_none() && verified.otp_expires.is_none());

    let before = Utc::now();
    let (status, body) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "longpass1" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice123");
    assert!(app.user("a@example.com").await.last_login.unwrap() >= before);

    let (status, _) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "wrongpass" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn verification_installs_the_password_given_at_verification() {
    let app = test_app();
    app.register("alice123", "a@example.com", "firstpass").await;
    let otp = app.mailer.last_code("a@example.com");
    app.post(
        "/api/verify-otp",
        json!({ "email": "a@example.com", "otp": otp, "password": "secondpass" }),
    )
    .await;

    let (status, _) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "firstpass" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "secondpass" }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn registration_validates_input() {
    let app = test_app();

    let (status, _) = app.register("abc", "a@example.com", "longpass1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = app.register("alice123", "not-an-email", "longpass1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid email format");
    let (status, body) = app.register("alice123", "a@example.com", "short").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Password must be at least 8 characters long");

    assert_eq!(app.mailer.sent_count(), 0);
}

#[tokio::test]
async fn reregistering_unverified_email_reissues_otp() {
    let app = test_app();
    app.register("alice123", "a@example.com", "longpass1").await;
    let first = app.mailer.last_code("a@example.com");
    let id = app.user("a@example.com").await.id;

    let (status, body) = app.register("alice123", "A@Example.com", "longpass1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Email not verified.");
    assert_eq!(app.mailer.sent_count(), 2);
    assert_eq!(app.user("a@example.com").await.id, id);

    let second = app.mailer.last_code("a@example.com");
    if first != second {
        let (status, body) = app
            .post(
                "/api/verify-otp",
                json!({ "email": "a@example.com", "otp": first, "password": "longpass1" }),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["msg"], "Invalid OTP");
    }
    let (status, _) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "a@example.com", "otp": second, "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn duplicate_verified_email_or_username_is_rejected() {
    let app = test_app();
    app.signup("alice123", "a@example.com", "longpass1").await;

    let (status, body) = app.register("other123", "a@example.com", "longpass1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email already in use");

    let (status, body) = app.register("alice123", "b@example.com", "longpass1").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Username already taken");
}

#[tokio::test]
async fn expired_otp_is_rejected_even_when_correct() {
    let app = test_app();
    app.register("alice123", "a@example.com", "longpass1").await;
    let otp = app.mailer.last_code("a@example.com");

    let user = app.user("a@example.com").await;
    let hash = user.otp_hash.unwrap();
    store::set_otp(&app.db, user.id, &hash, Utc::now() - Duration::minutes(1))
        .await
        .unwrap();

    let (status, body) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "a@example.com", "otp": otp, "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "OTP has expired");
}

#[tokio::test]
async fn verify_otp_edge_cases() {
    let app = test_app();

    let (status, body) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "a@example.com", "otp": "", "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "OTP is required");

    let (status, body) = app
        .post(
            "/api/verify-otp",
            json!({ "email": "nobody@example.com", "otp": "abcdef", "password": "longpass1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "User not found");
}

#[tokio::test]
async fn resend_otp_respects_forgot_password_flag() {
    let app = test_app();
    app.register("alice123", "a@example.com", "longpass1").await;

    let (status, body) = app.post("/api/resend-otp", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "OTP resent successfully");

    let otp = app.mailer.last_code("a@example.com");
    app.post(
        "/api/verify-otp",
        json!({ "email": "a@example.com", "otp": otp, "password": "longpass1" }),
    )
    .await;

    let (status, body) = app.post("/api/resend-otp", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email is already verified");

    let (status, _) = app
        .post("/api/resend-otp?forgot-password=true", json!({ "email": "a@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    // only the literal "false" reads as unset
    let (status, body) = app
        .post("/api/resend-otp?forgot-password=false", json!({ "email": "a@example.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email is already verified");

    let (status, _) = app
        .post("/api/resend-otp?forgot-password=", json!({ "email": "a@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.post("/api/resend-otp", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email is required");
}

#[tokio::test]
async fn wrong_email_removes_only_unverified_accounts() {
    let app = test_app();
    app.register("alice123", "a@example.com", "longpass1").await;
    app.signup("bobby123", "b@example.com", "longpass1").await;

    let (status, body) = app
        .call(Method::DELETE, "/api/wrong-email", None, Some(json!({ "email": "b@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email is already verified");

    let (status, _) = app
        .call(Method::DELETE, "/api/wrong-email", None, Some(json!({ "email": "a@example.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(store::find_by_email(&app.db, "a@example.com").await.unwrap().is_none());

    let (status, _) = app.post("/api/check-email-exists", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, body) = app.post("/api/check-email-exists", json!({ "email": "b@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Email exists");
}

#[tokio::test]
async fn password_reset_flow() {
    let app = test_app();
    app.signup("alice123", "a@example.com", "longpass1").await;

    let (status, body) = app.post("/api/forgot-password", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "OTP sent to your email");
    let otp = app.mailer.last_code("a@example.com");

    let (status, body) = app
        .post("/api/reset-password", json!({ "email": "a@example.com", "otp": otp }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "OTP verified successfully");

    let (status, _) = app
        .post(
            "/api/update-password",
            json!({ "email": "a@example.com", "otp": otp, "password": "brandnew99" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // the code is consumed by the update
    let (status, _) = app
        .post("/api/reset-password", json!({ "email": "a@example.com", "otp": otp }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post("/api/login", json!({ "email": "a@example.com", "password": "brandnew99" }))
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn forgot_password_needs_verified_email() {
    let app = test_app();
    app.register("alice123", "a@example.com", "longpass1").await;

    let (status, body) = app.post("/api/forgot-password", json!({ "email": "a@example.com" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email not verified");
}

#[tokio::test]
async fn protected_requires_valid_token() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;

    let (status, body) = app.call(Method::GET, "/api/protected", None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["msg"], "No token provided");

    let (status, body) = app.call(Method::GET, "/api/protected", Some("forged"), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["msg"], "Invalid or expired token");

    let (status, body) = app.call(Method::GET, "/api/protected", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice123");
    assert!(body.get("email").is_none());

    let (_, body) = app
        .call(Method::GET, "/api/protected?email=true", Some(&token), None)
        .await;
    assert_eq!(body["email"], "a@example.com");
}

#[tokio::test]
async fn protected_refreshes_stale_last_login() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;

    let stale = Utc::now() - Duration::minutes(30);
    let user = app.user("a@example.com").await;
    store::set_last_login(&app.db, user.id, stale).await.unwrap();

    app.call(Method::GET, "/api/protected", Some(&token), None).await;
    let refreshed = app.user("a@example.com").await.last_login.unwrap();
    assert!(refreshed > stale + Duration::minutes(29));

    let logs = store::log_count(&app.db, user.id).await.unwrap();
    app.call(Method::GET, "/api/protected", Some(&token), None).await;
    assert_eq!(store::log_count(&app.db, user.id).await.unwrap(), logs);
}

#[tokio::test]
async fn account_settings() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;
    app.signup("bobby123", "b@example.com", "longpass1").await;

    let (status, body) = app
        .call(Method::PUT, "/api/change-username", None, Some(json!({ "newUsername": "alice456" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["msg"], "No token provided");

    let (status, body) = app
        .call(Method::PUT, "/api/change-username", Some(&token), Some(json!({ "newUsername": "bobby123" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Username is already taken");

    let (status, _) = app
        .call(Method::PUT, "/api/change-username", Some(&token), Some(json!({ "newUsername": "alice456" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(Method::PUT, "/api/change-email", Some(&token), Some(json!({ "newEmail": "b@example.com" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Email is already taken");

    let (status, _) = app
        .call(Method::PUT, "/api/change-email", Some(&token), Some(json!({ "newEmail": "C@Example.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.user("c@example.com").await.username, "alice456");

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/change-password",
            Some(&token),
            Some(json!({ "newPassword": "newpass123", "confirmPassword": "different1" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "New password and confirm password do not match");

    let (status, body) = app
        .call(
            Method::PUT,
            "/api/change-password",
            Some(&token),
            Some(json!({ "newPassword": "newpass123", "confirmPassword": "newpass123" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["username"], "alice456");
    let new_token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(Method::POST, "/api/verify-password", Some(&new_token), Some(json!({ "password": "longpass1" })))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["msg"], "Incorrect password");

    let (status, body) = app
        .call(Method::POST, "/api/verify-password", Some(&new_token), Some(json!({ "password": "newpass123" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Password verified");
}

#[tokio::test]
async fn delete_account_removes_user_and_logs() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;
    let id = app.user("a@example.com").await.id;
    let logs = store::log_count(&app.db, id).await.unwrap();

    let (status, _) = app.call(Method::DELETE, "/api/account", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(store::find_by_id(&app.db, id).await.unwrap().is_none());
    assert_eq!(store::log_count(&app.db, id).await.unwrap(), logs + 1);

    let (status, body) = app.call(Method::GET, "/api/protected", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"], "User not found");
}

#[tokio::test]
async fn usage_counters() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;
    let id = app.user("a@example.com").await.id;
    let logs = store::log_count(&app.db, id).await.unwrap();

    let (status, body) = app
        .post("/api/runCode/count", json!({ "username": "alice123", "language": "python" }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
    app.post("/api/generateCode/count", json!({ "username": "alice123", "language": "csharp" }))
        .await;
    app.post("/api/refactorCode/count", json!({ "username": "alice123", "language": "HtmlJsCss" }))
        .await;
    assert_eq!(store::log_count(&app.db, id).await.unwrap(), logs + 3);

    let (status, body) = app
        .post("/api/runCode/count", json!({ "username": "alice123", "language": "cobol" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Unsupported language");

    let (status, _) = app
        .post("/api/runCode/count", json!({ "username": "nobody99", "language": "python" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app.call(Method::GET, "/api/user/usage", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["runCodeCount"]["py"], 1);
    assert_eq!(body["generateCodeCount"]["cs"], 1);
    assert_eq!(body["refactorCodeCount"]["HtmlJsCss"], 1);
    assert_eq!(body["runCodeCount"]["rust"], 0);
}

#[tokio::test]
async fn recording_a_shared_link_is_idempotent() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;
    let id = app.user("a@example.com").await.id;
    let link = json!({ "username": "alice123", "shareId": "py-1234", "title": "hello", "expiryTime": "10" });

    let (status, _) = app.post("/api/sharedLink/count", link.clone()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let logs = store::log_count(&app.db, id).await.unwrap();

    let (status, _) = app.post("/api/sharedLink/count", link).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(store::log_count(&app.db, id).await.unwrap(), logs);

    let (status, body) = app.call(Method::POST, "/api/user/sharedLinks", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let links = body["sharedLinks"].as_array().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["shareId"], "py-1234");
    assert_eq!(links[0]["title"], "hello");

    let (status, body) = app
        .post("/api/sharedLink/count", json!({ "username": "alice123", "title": "x" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Missing required fields: username, shareId, or title");

    let (status, _) = app
        .post(
            "/api/sharedLink/count",
            json!({ "username": "alice123", "shareId": "py-5678", "title": "x", "expiryTime": 0 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn listing_prunes_expired_links() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;

    let user = app.user("a@example.com").await;
    let links = [
        SharedLink {
            share_id: "old".into(),
            title: "gone".into(),
            expiry_time: Utc::now() - Duration::minutes(5),
        },
        SharedLink {
            share_id: "live".into(),
            title: "kept".into(),
            expiry_time: Utc::now() + Duration::minutes(30),
        },
    ];
    for link in &links {
        store::add_shared_link(&app.db, user.id, link).await.unwrap();
    }

    let (_, first) = app.call(Method::POST, "/api/user/sharedLinks", Some(&token), None).await;
    let (_, second) = app.call(Method::POST, "/api/user/sharedLinks", Some(&token), None).await;
    assert_eq!(first, second);
    let links = first["sharedLinks"].as_array().unwrap();
    assert_eq!(links.len(), 1);
    assert_eq!(links[0]["shareId"], "live");

    assert_eq!(app.user("a@example.com").await.shared_links.len(), 1);
}

#[tokio::test]
async fn shared_links_can_be_deleted_by_id_alone() {
    let app = test_app();
    let token = app.signup("alice123", "a@example.com", "longpass1").await;
    for id in ["one", "two", "three"] {
        app.post(
            "/api/sharedLink/count",
            json!({ "username": "alice123", "shareId": id, "title": id, "expiryTime": 60 }),
        )
        .await;
    }

    let (status, body) = app
        .call(Method::DELETE, "/api/sharedLink", None, Some(json!({ "shareId": "one" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["msg"], "Shared link deleted successfully");

    let (status, body) = app
        .call(Method::DELETE, "/api/sharedLink", None, Some(json!({ "shareId": "one" })))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"], "Shared link not found");

    let (status, body) = app.call(Method::DELETE, "/api/sharedLink", None, Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "ShareId is required");

    let (status, _) = app.call(Method::DELETE, "/api/user/sharedLink/two", None, None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(Method::DELETE, "/api/user/sharedLink/three", Some("forged"), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .call(Method::DELETE, "/api/user/sharedLink/three", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .call(Method::DELETE, "/api/user/sharedLink/missing", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["msg"], "User or Shared link not found");

    assert!(app.user("a@example.com").await.shared_links.is_empty());
}

#[tokio::test]
async fn failed_mail_leaves_pending_user_behind() {
    let db = establish_connection(":memory:").unwrap();
    let state = AppState::new(db.clone(), auth_config(), Arc::new(RejectingMailer));
    let router = app(state);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "username": "alice123", "email": "a@example.com", "password": "longpass1" })
                .to_string(),
        ))
        .unwrap();
    let resp = router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["msg"], "Server error");

    let user = store::find_by_email(&db, "a@example.com").await.unwrap().unwrap();
    assert!(!user.is_email_verified);
    assert!(user.otp_hash.is_some());
}

#[tokio::test]
async fn malformed_bodies_get_a_msg() {
    let app = test_app();
    app.signup("alice123", "a@example.com", "longpass1").await;

    let send = |req: Request<Body>| {
        let router = app.router.clone();
        async move {
            let resp = router.oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            (status, serde_json::from_slice::<Value>(&bytes).unwrap())
        }
    };

    let broken = Request::post("/api/register")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(broken).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid request body");

    let untyped = Request::post("/api/login")
        .body(Body::from(r#"{"email":"a@example.com","password":"longpass1"}"#))
        .unwrap();
    let (status, body) = send(untyped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Expected a JSON request body");

    let mistyped = json_request(
        Method::POST,
        "/api/runCode/count",
        json!({ "username": 123, "language": "python" }),
    );
    let (status, body) = send(mistyped).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid request body");
}

#[tokio::test]
async fn fractional_expiry_is_truncated() {
    let app = test_app();
    app.signup("alice123", "a@example.com", "longpass1").await;

    let (status, _) = app
        .post(
            "/api/sharedLink/count",
            json!({ "username": "alice123", "shareId": "half", "title": "t", "expiryTime": 30.5 }),
        )
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let link = &app.user("a@example.com").await.shared_links[0];
    let minutes = (link.expiry_time - Utc::now()).num_minutes();
    assert!((29..=30).contains(&minutes));

    let (status, body) = app
        .post(
            "/api/sharedLink/count",
            json!({ "username": "alice123", "shareId": "tiny", "title": "t", "expiryTime": 0.5 }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["msg"], "Invalid expiry time");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_writes_for_one_user_all_land() {
    let app = test_app();
    app.signup("alice123", "a@example.com", "longpass1").await;

    let mut tasks = Vec::new();
    for i in 0..40 {
        let router = app.router.clone();
        tasks.push(tokio::spawn(async move {
            let link = json_request(
                Method::POST,
                "/api/sharedLink/count",
                json!({ "username": "alice123", "shareId": format!("s{i}"), "title": "t", "expiryTime": 60 }),
            );
            let run = json_request(
                Method::POST,
                "/api/runCode/count",
                json!({ "username": "alice123", "language": "python" }),
            );
            let a = router.clone().oneshot(link).await.unwrap().status();
            let b = router.oneshot(run).await.unwrap().status();
            (a, b)
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), (StatusCode::NO_CONTENT, StatusCode::NO_CONTENT));
    }

    let user = app.user("a@example.com").await;
    assert_eq!(user.shared_links.len(), 40);
    assert_eq!(user.run_counts.py, 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_identical_registrations_all_succeed() {
    let app = test_app();
    let body = json!({ "username": "alice123", "email": "a@example.com", "password": "longpass1" });

    let mut tasks = Vec::new();
    for _ in 0..10 {
        let router = app.router.clone();
        let req = json_request(Method::POST, "/api/register", body.clone());
        tasks.push(tokio::spawn(async move { router.oneshot(req).await.unwrap().status() }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), StatusCode::OK);
    }

    let user = app.user("a@example.com").await;
    assert_eq!(user.username, "alice123");
    assert!(!user.is_email_verified);
    assert_eq!(app.mailer.sent_count(), 10);
}
