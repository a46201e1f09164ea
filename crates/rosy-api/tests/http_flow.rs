use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

use rosy_api::clock::ManualClock;
use rosy_api::codes::{CodeService, DEFAULT_MAX_ATTEMPTS, InMemoryCodeStore};
use rosy_api::flow::FlowController;
use rosy_api::mailer::{MailError, Mailer};
use rosy_api::upload::MAX_IMAGE_BYTES;
use rosy_api::{AppStateInner, router};
use rosy_classifier::offline::OFFLINE_CHAT_REPLY;
use rosy_classifier::{Classifier, ClassifierConfig, FilenameKeywordValidator, OfflineMode};
use rosy_db::Database;

const BOUNDARY: &str = "rosy-test-boundary";

#[derive(Default)]
struct RecordingMailer {
    bodies: Mutex<Vec<String>>,
}

impl RecordingMailer {
    fn last_code(&self) -> String {
        let bodies = self.bodies.lock().unwrap();
        let body = bodies.last().expect("no mail sent");
        body.split_whitespace()
            .map(|w| w.trim_end_matches('.'))
            .find(|w| w.len() == 6 && w.chars().all(|c| c.is_ascii_digit()))
            .expect("code in body")
            .to_string()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, _to: &str, _subject: &str, body: &str) -> Result<(), MailError> {
        self.bodies.lock().unwrap().push(body.to_string());
        Ok(())
    }
}

struct FailingMailer;

#[async_trait]
impl Mailer for FailingMailer {
    async fn send(&self, _to: &str, _subject: &str, _body: &str) -> Result<(), MailError> {
        Err(MailError::SendFailed("connection refused".into()))
    }
}

struct Harness {
    app: Router,
    clock: Arc<ManualClock>,
    mail: Arc<RecordingMailer>,
    _uploads: TempDir,
}

fn harness_with(mailer: Arc<dyn Mailer>, mail: Arc<RecordingMailer>) -> Harness {
    let uploads = tempfile::tempdir().unwrap();
    let db = Arc::new(Database::open_in_memory().unwrap());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let codes = CodeService::new(
        Arc::new(InMemoryCodeStore::new()),
        clock.clone(),
        mailer,
        DEFAULT_MAX_ATTEMPTS,
    );
    let classifier = Arc::new(
        Classifier::new(ClassifierConfig::default(), OfflineMode::Deterministic.build()).unwrap(),
    );
    let flow = FlowController::new(
        classifier,
        Arc::new(FilenameKeywordValidator::default()),
        db.clone(),
        uploads.path().to_path_buf(),
    );
    let state = Arc::new(AppStateInner {
        db,
        codes,
        flow,
        jwt_secret: "test-secret".into(),
    });
    Harness {
        app: router(state),
        clock,
        mail,
        _uploads: uploads,
    }
}

fn harness() -> Harness {
    let mail = Arc::new(RecordingMailer::default());
    harness_with(mail.clone(), mail)
}

impl Harness {
    async fn call(&self, req: Request<Body>) -> (StatusCode, Value) {
        let resp = self.app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn post_json(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(req).await
    }

    async fn post_authed(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.call(req).await
    }

    async fn get_authed(&self, uri: &str, token: &str) -> (StatusCode, Value) {
        let req = Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .body(Body::empty())
            .unwrap();
        self.call(req).await
    }

    async fn upload(&self, uri: &str, token: &str, filename: &str) -> (StatusCode, Value) {
        let req = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body("image", filename, b"\xff\xd8\xff\xe0fake-jpeg")))
            .unwrap();
        self.call(req).await
    }

    async fn login(&self, email: &str) -> String {
        let (status, _) = self.post_json("/send-code", json!({ "email": email })).await;
        assert_eq!(status, StatusCode::OK);
        let code = self.mail.last_code();
        let (status, body) = self
            .post_json("/verify-code", json!({ "email": email, "code": code }))
            .await;
        assert_eq!(status, StatusCode::OK, "{}", body);
        body["token"].as_str().unwrap().to_string()
    }

    /// Scan, open the proof upload, submit a receipt and acknowledge it.
    async fn deposit(&self, token: &str) -> Value {
        let (status, _) = self.upload("/scan", token, "bottle.jpg").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = self.post_authed("/proof/open", token).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = self.upload("/upload-proof", token, "receipt_bca.jpg").await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = self.post_authed("/proof/acknowledge", token).await;
        assert_eq!(status, StatusCode::OK);
        body
    }
}

fn multipart_body(field: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: image/jpeg\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn wrong_code(code: &str) -> &'static str {
    if code == "000000" { "111111" } else { "000000" }
}

// -- Login --

#[tokio::test]
async fn login_end_to_end() {
    let h = harness();
    let (status, body) = h
        .post_json("/send-code", json!({ "email": "alice@gmail.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "message": "Code sent" }));

    let code = h.mail.last_code();
    let (status, body) = h
        .post_json("/verify-code", json!({ "email": "alice@gmail.com", "code": code }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(
        body["user"],
        json!({
            "email": "alice@gmail.com",
            "name": "alice",
            "points": 0,
            "deposits": 0,
            "badges": []
        })
    );
    assert!(body["token"].as_str().is_some_and(|t| !t.is_empty()));

    let (status, body) = h
        .post_json("/verify-code", json!({ "email": "alice@gmail.com", "code": code }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No code sent");
}

#[tokio::test]
async fn code_valid_until_five_minutes() {
    let h = harness();
    h.post_json("/send-code", json!({ "email": "bob@mail.id" })).await;
    h.clock.advance(Duration::seconds(4 * 60 + 59));
    let code = h.mail.last_code();
    let (status, _) = h
        .post_json("/verify-code", json!({ "email": "bob@mail.id", "code": code }))
        .await;
    assert_eq!(status, StatusCode::OK);

    h.post_json("/send-code", json!({ "email": "bob@mail.id" })).await;
    h.clock.advance(Duration::seconds(5 * 60 + 1));
    let code = h.mail.last_code();
    let (status, body) = h
        .post_json("/verify-code", json!({ "email": "bob@mail.id", "code": code }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Code expired");
}

#[tokio::test]
async fn send_code_rejects_bad_email() {
    let h = harness();
    let (status, body) = h.post_json("/send-code", json!({ "email": "not-an-email" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid email");

    let (status, body) = h.post_json("/send-code", json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid email");
}

#[tokio::test]
async fn verify_code_requires_both_fields() {
    let h = harness();
    let (status, body) = h
        .post_json("/verify-code", json!({ "email": "alice@gmail.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing params");
}

#[tokio::test]
async fn wrong_guesses_burn_the_code() {
    let h = harness();
    h.post_json("/send-code", json!({ "email": "carol@mail.id" })).await;
    let code = h.mail.last_code();
    let wrong = wrong_code(&code);

    for _ in 0..DEFAULT_MAX_ATTEMPTS - 1 {
        let (status, body) = h
            .post_json("/verify-code", json!({ "email": "carol@mail.id", "code": wrong }))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid code");
    }
    let (status, _) = h
        .post_json("/verify-code", json!({ "email": "carol@mail.id", "code": wrong }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = h
        .post_json("/verify-code", json!({ "email": "carol@mail.id", "code": code }))
        .await;
    assert_eq!(body["error"], "No code sent");
}

#[tokio::test]
async fn mail_failure_is_surfaced() {
    let h = harness_with(Arc::new(FailingMailer), Arc::new(RecordingMailer::default()));
    let (status, body) = h
        .post_json("/send-code", json!({ "email": "alice@gmail.com" }))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to send email");

    let (_, body) = h
        .post_json("/verify-code", json!({ "email": "alice@gmail.com", "code": "123456" }))
        .await;
    assert_eq!(body["error"], "No code sent");
}

#[tokio::test]
async fn api_prefix_serves_the_same_routes() {
    let h = harness();
    let (status, body) = h
        .post_json("/api/send-code", json!({ "email": "alice@gmail.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);

    let code = h.mail.last_code();
    let (status, body) = h
        .post_json("/api/verify-code", json!({ "email": "alice@gmail.com", "code": code }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let token = body["token"].as_str().unwrap();
    let (status, _) = h.upload("/api/scan", token, "leaf.jpg").await;
    assert_eq!(status, StatusCode::OK);
}

// -- Auth --

#[tokio::test]
async fn protected_routes_need_a_token() {
    let h = harness();
    let req = Request::post("/scan")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("image", "a.jpg", b"x")))
        .unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = h.get_authed("/me", "not.a.token").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health_is_public() {
    let h = harness();
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true }));
}

// -- Scan and chat --

#[tokio::test]
async fn offline_scan_returns_catalog_result() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;

    let (status, body) = h.upload("/scan", &token, "bottle.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["type"] == "organic" || body["type"] == "non-organic");
    assert_eq!(body["confidence"], 85);
    assert_eq!(body["isReceipt"], false);
    assert!(body["item"].as_str().is_some_and(|s| !s.is_empty()));

    let (_, session) = h.get_authed("/session", &token).await;
    assert_eq!(session["state"], "result");
    assert_eq!(session["result"], body);

    h.post_authed("/scan/reset", &token).await;
    let (status, again) = h.upload("/scan", &token, "bottle.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again, body);
}

#[tokio::test]
async fn scan_flags_receipt_filenames() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;
    let (status, body) = h.upload("/scan", &token, "STRUK_bank.png").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["isReceipt"], true);
}

#[tokio::test]
async fn scan_without_image_is_rejected() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;

    let req = Request::post("/scan")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("photo", "a.jpg", b"x")))
        .unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image");

    let req = Request::post("/scan")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("image", "empty.jpg", b"")))
        .unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No image");

    let (_, session) = h.get_authed("/session", &token).await;
    assert_eq!(session["state"], "idle");
}

#[tokio::test]
async fn second_scan_waits_for_reset() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;
    h.upload("/scan", &token, "bottle.jpg").await;
    let (status, _) = h.upload("/scan", &token, "bottle.jpg").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = h.post_authed("/scan/reset", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session, json!({ "state": "idle" }));
}

#[tokio::test]
async fn offline_chat_reply() {
    let h = harness();
    let (status, body) = h
        .post_json("/chat", json!({ "message": "Where do batteries go?" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["reply"], OFFLINE_CHAT_REPLY);

    let (status, body) = h.post_json("/api/chat", json!({ "message": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing message");
}

// -- Request bodies --

#[tokio::test]
async fn unreadable_json_gets_an_error_body() {
    let h = harness();

    let req = Request::post("/send-code")
        .body(Body::from(r#"{"email":"alice@gmail.com"}"#))
        .unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "Expected a JSON body" }));

    for uri in ["/send-code", "/verify-code", "/chat"] {
        let req = Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = h.call(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body, json!({ "error": "Malformed JSON body" }), "{}", uri);
    }
}

#[tokio::test]
async fn non_multipart_upload_gets_an_error_body() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;

    for uri in ["/scan", "/upload-proof"] {
        let req = Request::post(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = h.call(req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body, json!({ "error": "Expected a multipart upload" }), "{}", uri);
    }
}

#[tokio::test]
async fn oversized_bodies_get_an_error_body() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;
    let oversized = MAX_IMAGE_BYTES + 1024;

    let message = "a".repeat(oversized);
    let (status, body) = h.post_json("/chat", json!({ "message": message })).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "error": "Request body too large" }));

    let req = Request::post("/scan")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body("image", "huge.jpg", &vec![0u8; oversized])))
        .unwrap();
    let (status, body) = h.call(req).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "error": "Request body too large" }));

    let (_, session) = h.get_authed("/session", &token).await;
    assert_eq!(session["state"], "idle");
}

// -- Proofs and rewards --

#[tokio::test]
async fn accepted_proof_credits_once() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;

    h.upload("/scan", &token, "bottle.jpg").await;
    let (status, _) = h.upload("/upload-proof", &token, "receipt_bca.jpg").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = h.post_authed("/proof/open", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "proofPending");
    let submission_id = session["submissionId"].clone();

    let (status, body) = h.upload("/upload-proof", &token, "receipt_bca.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["message"], "Proof accepted. +50 points");
    assert_eq!(body["points"], 50);
    assert_eq!(body["user"]["points"], 50);
    assert_eq!(body["user"]["deposits"], 1);

    let (_, session) = h.get_authed("/session", &token).await;
    assert_eq!(session["state"], "proofAccepted");
    assert_eq!(session["submissionId"], submission_id);

    let (status, _) = h.upload("/upload-proof", &token, "receipt_bca.jpg").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = h.post_authed("/proof/acknowledge", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "idle");

    let (_, profile) = h.get_authed("/me", &token).await;
    assert_eq!(profile["user"]["points"], 50);
    assert_eq!(profile["user"]["deposits"], 1);
    let rewards = profile["rewards"].as_array().unwrap();
    assert_eq!(rewards.len(), 1);
    assert_eq!(rewards[0]["submission_id"], submission_id);
    assert_eq!(rewards[0]["points_delta"], 50);
}

#[tokio::test]
async fn rejected_proof_can_be_retried() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;
    h.upload("/scan", &token, "bottle.jpg").await;
    h.post_authed("/proof/open", &token).await;

    let (status, body) = h.upload("/upload-proof", &token, "IMG_1234.jpg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], false);
    assert!(body.get("points").is_none());
    assert!(body["message"].as_str().is_some_and(|m| m.contains("not recognized")));

    let (status, _) = h.upload("/upload-proof", &token, "receipt.jpg").await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, session) = h.post_authed("/proof/retry", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["state"], "proofPending");

    let (status, body) = h.upload("/upload-proof", &token, "Bukti_Transfer.JPG").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["user"]["points"], 50);
}

#[tokio::test]
async fn badges_unlock_with_points() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;

    h.deposit(&token).await;
    h.deposit(&token).await;
    let body = h.deposit(&token).await;
    assert_eq!(body["user"]["points"], 150);
    assert_eq!(body["user"]["badges"], json!(["rosy-sticker"]));

    let (_, profile) = h.get_authed("/me", &token).await;
    let achievements = profile["achievements"].as_array().unwrap();
    assert_eq!(achievements[0]["earned"], true);
    assert_eq!(achievements[1]["earned"], false);
}

#[tokio::test]
async fn relogin_keeps_counters() {
    let h = harness();
    let token = h.login("alice@gmail.com").await;
    h.deposit(&token).await;

    h.post_json("/send-code", json!({ "email": "Alice@Gmail.com" })).await;
    let code = h.mail.last_code();
    let (_, body) = h
        .post_json("/verify-code", json!({ "email": "alice@gmail.com", "code": code }))
        .await;
    assert_eq!(body["user"]["points"], 50);
    assert_eq!(body["user"]["deposits"], 1);
}

#[tokio::test]
async fn sessions_are_per_user() {
    let h = harness();
    let alice = h.login("alice@gmail.com").await;
    let bob = h.login("bob@gmail.com").await;

    h.upload("/scan", &alice, "bottle.jpg").await;
    let (_, session) = h.get_authed("/session", &bob).await;
    assert_eq!(session["state"], "idle");

    let (status, _) = h.post_authed("/proof/open", &bob).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
