use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use doc_session::InMemorySessionStorage;
use legal_summary_service::{AppState, CookieSigner, LanguageModel, TimeoutModel, build_router};
use lopdf::{
    Document, Object, Stream,
    content::{Content, Operation},
    dictionary,
};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "----legal-summary-test-boundary";

const SUMMARY_JSON: &str = r#"{
    "summary_elevator": "You are renting a flat for twelve months.",
    "summary_bullets": ["Rent is due on the 1st", "Two months deposit", "No subletting"],
    "missing_info": ["Who pays for repairs"],
    "next_steps": ["Ask the landlord about repairs", "Sign and date every page"],
    "confidence": 87
}"#;

const LLM_TIMEOUT: Duration = Duration::from_millis(100);

/// Replays canned answers in order and records every prompt it receives.
#[derive(Default)]
struct ScriptedModel {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<Vec<String>>>,
    /// Calls from this index on never answer in time.
    stall_from: Option<usize>,
}

impl ScriptedModel {
    fn with_replies(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        Arc::new(Self::scripted(replies, None))
    }

    fn stalling_after(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        let answered = replies.len();
        Arc::new(Self::scripted(replies, Some(answered)))
    }

    fn scripted(replies: Vec<Result<&str, &str>>, stall_from: Option<usize>) -> Self {
        let replies = replies
            .into_iter()
            .map(|r| r.map(str::to_string).map_err(str::to_string))
            .collect();
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
            stall_from,
        }
    }

    fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn generate(&self, parts: &[String]) -> anyhow::Result<String> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(parts.to_vec());
            calls.len() - 1
        };
        if self.stall_from.is_some_and(|from| call_index >= from) {
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("no scripted reply left")),
        }
    }
}

struct TestApp {
    router: Router,
    model: Arc<ScriptedModel>,
    upload_dir: TempDir,
}

impl TestApp {
    fn new(model: Arc<ScriptedModel>) -> Self {
        Self::with_upload_limit(model, 5 * 1024 * 1024)
    }

    fn with_upload_limit(model: Arc<ScriptedModel>, max_upload_bytes: usize) -> Self {
        let upload_dir = tempfile::tempdir().unwrap();
        let state = AppState {
            session_storage: Arc::new(InMemorySessionStorage::new()),
            model: Arc::new(TimeoutModel::new(model.clone(), LLM_TIMEOUT)),
            cookie_signer: Arc::new(
                CookieSigner::new("integration-test-secret-0123456789abcdef").unwrap(),
            ),
            upload_dir: upload_dir.path().to_path_buf(),
            max_upload_bytes,
        };
        Self {
            router: build_router(state),
            model,
            upload_dir,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Option<String>, Vec<u8>, Option<String>) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(';').next())
            .map(str::to_string);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        (status, cookie, body, content_type)
    }
}

/// One Helvetica page per entry; empty entries give blank pages.
fn pdf_with_text(pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut kids = Vec::new();
    for text in pages {
        let operations = if text.is_empty() {
            Vec::new()
        } else {
            vec![
                Operation::new("BT", vec![]),
                Operation::new("Tf", vec!["F1".into(), 12.into()]),
                Operation::new("Td", vec![50.into(), 700.into()]),
                Operation::new("Tj", vec![Object::string_literal(*text)]),
                Operation::new("ET", vec![]),
            ]
        };
        let content = Content { operations }.encode().unwrap();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
        });
        kids.push(Object::Reference(page_id));
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer).unwrap();
    buffer
}

fn multipart_body(file_name: Option<&str>, content: &[u8]) -> Vec<u8> {
    let disposition = match file_name {
        Some(name) => format!("form-data; name=\"file\"; filename=\"{name}\""),
        None => "form-data; name=\"file\"".to_string(),
    };
    let mut body = format!(
        "--{BOUNDARY}\r\nContent-Disposition: {disposition}\r\nContent-Type: application/pdf\r\n\r\n"
    )
    .into_bytes();
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(cookie: Option<&str>, file_name: Option<&str>, content: &[u8]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(multipart_body(file_name, content))).unwrap()
}

fn ask_request(cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/ask")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn download_request(cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri("/download_summary");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn index_serves_the_front_end_and_sets_a_session_cookie() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let request = Request::builder().uri("/").body(Body::empty()).unwrap();
    let (status, cookie, body, content_type) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/html"));
    assert!(String::from_utf8(body).unwrap().contains("Legal Document Simplifier"));
    assert!(cookie.unwrap().starts_with("session="));
}

#[tokio::test]
async fn health_reports_healthy() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, _, body, _) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["status"], "healthy");
}

#[tokio::test]
async fn upload_summarizes_then_ask_and_download_use_the_session() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![
        Ok(format!("```json\n{SUMMARY_JSON}\n```").as_str()),
        Ok("Repairs are not covered by the lease."),
    ]));
    let pdf = pdf_with_text(&["RESIDENTIAL LEASE AGREEMENT", "", "The tenant pays rent monthly"]);

    let (status, cookie, body, _) = app.send(upload_request(None, Some("lease.pdf"), &pdf)).await;
    assert_eq!(status, StatusCode::OK, "{}", String::from_utf8_lossy(&body));
    let summary = json(&body);
    assert_eq!(summary["confidence"], 87);
    assert_eq!(summary["summary_bullets"].as_array().unwrap().len(), 3);
    assert!(app.upload_dir.path().join("lease.pdf").exists());

    let cookie = cookie.expect("new session gets a cookie");

    let (status, set_again, body, _) = app
        .send(ask_request(Some(&cookie), r#"{"question": "Who fixes the boiler?"}"#))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(set_again.is_none());
    assert_eq!(json(&body)["answer"], "Repairs are not covered by the lease.");

    let calls = app.model.calls();
    assert_eq!(calls.len(), 2);
    let document_text = &calls[0][1];
    assert!(document_text.contains("RESIDENTIAL LEASE AGREEMENT"));
    assert!(document_text.contains("The tenant pays rent monthly"));
    assert_eq!(&calls[1][1], document_text);
    assert_eq!(calls[1][2], "User question: Who fixes the boiler?");

    let (status, _, body, content_type) = app.send(download_request(Some(&cookie))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/pdf"));
    assert!(body.starts_with(b"%PDF-"));
}

#[tokio::test]
async fn download_sets_attachment_filename() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok(SUMMARY_JSON)]));
    let pdf = pdf_with_text(&["Terms"]);

    let (_, cookie, _, _) = app.send(upload_request(None, Some("terms.pdf"), &pdf)).await;
    let response = app
        .router
        .clone()
        .oneshot(download_request(cookie.as_deref()))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"summary.pdf\""
    );
}

#[tokio::test]
async fn upload_with_empty_filename_is_rejected() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let (status, _, body, _) = app
        .send(upload_request(None, Some(""), &pdf_with_text(&["text"])))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json(&body)["error"].is_string());
    assert!(app.model.calls().is_empty());
}

#[tokio::test]
async fn upload_without_a_file_is_rejected() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let (status, _, body, _) = app.send(upload_request(None, None, b"just a form value")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No file uploaded");
}

#[tokio::test]
async fn pdf_without_text_is_an_extraction_failure() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));
    let blank = pdf_with_text(&["", ""]);

    let (status, _, body, _) = app.send(upload_request(None, Some("scan.pdf"), &blank)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Failed to extract text from PDF");
    assert!(app.model.calls().is_empty());
}

#[tokio::test]
async fn unreadable_pdf_is_an_extraction_failure() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let (status, _, body, _) = app
        .send(upload_request(None, Some("broken.pdf"), b"this is not a pdf"))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "Failed to extract text from PDF");
}

#[tokio::test]
async fn malformed_model_answer_is_a_server_error_with_raw_text() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok("Here is a summary: it is a lease.")]));
    let pdf = pdf_with_text(&["Lease"]);

    let (status, cookie, body, _) = app.send(upload_request(None, Some("lease.pdf"), &pdf)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(&body);
    assert!(body["error"].as_str().unwrap().starts_with("AI call failed: "));
    assert_eq!(body["raw"], "Here is a summary: it is a lease.");

    let (status, _, body, _) = app.send(download_request(cookie.as_deref())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No summary available");
}

#[tokio::test]
async fn model_outage_is_a_server_error() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Err("503 Service Unavailable")]));
    let pdf = pdf_with_text(&["Lease"]);

    let (status, _, body, _) = app.send(upload_request(None, Some("lease.pdf"), &pdf)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(&body);
    assert_eq!(body["error"], "AI call failed: 503 Service Unavailable");
    assert_eq!(body["raw"], "");
}

#[tokio::test]
async fn ask_before_upload_is_rejected() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let (status, _, body, _) = app
        .send(ask_request(None, r#"{"question": "What is this?"}"#))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No document uploaded yet.");
}

#[tokio::test]
async fn ask_without_a_question_is_rejected() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok(SUMMARY_JSON)]));
    let (_, cookie, _, _) = app
        .send(upload_request(None, Some("nda.pdf"), &pdf_with_text(&["NDA"])))
        .await;

    for body in [r#"{}"#, r#"{"question": ""}"#, r#"{"question": null}"#, "not json"] {
        let (status, _, response, _) = app.send(ask_request(cookie.as_deref(), body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {body}");
        assert_eq!(json(&response)["error"], "Missing question.");
    }
}

#[tokio::test]
async fn ask_model_failure_is_reported_in_the_answer() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![
        Ok(SUMMARY_JSON),
        Err("rate limited"),
    ]));
    let (_, cookie, _, _) = app
        .send(upload_request(None, Some("nda.pdf"), &pdf_with_text(&["NDA"])))
        .await;

    let (status, _, body, _) = app
        .send(ask_request(cookie.as_deref(), r#"{"question": "Is it mutual?"}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json(&body)["answer"], "AI call failed: rate limited");
}

#[tokio::test]
async fn download_before_upload_is_rejected() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![]));

    let (status, _, body, _) = app.send(download_request(None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No summary available");
}

#[tokio::test]
async fn sessions_are_isolated_between_clients() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok(SUMMARY_JSON)]));
    let (_, first, _, _) = app
        .send(upload_request(None, Some("lease.pdf"), &pdf_with_text(&["Lease"])))
        .await;
    assert!(first.is_some());

    let (status, _, body, _) = app
        .send(ask_request(None, r#"{"question": "Whose lease is this?"}"#))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No document uploaded yet.");
}

#[tokio::test]
async fn forged_cookie_gets_a_fresh_session() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok(SUMMARY_JSON)]));
    let (_, cookie, _, _) = app
        .send(upload_request(None, Some("lease.pdf"), &pdf_with_text(&["Lease"])))
        .await;
    let cookie = cookie.unwrap();
    let forged = format!("{}x", cookie);

    let (status, new_cookie, body, _) = app.send(download_request(Some(&forged))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json(&body)["error"], "No summary available");
    assert!(new_cookie.is_some());
}

#[tokio::test]
async fn a_new_upload_replaces_the_previous_document() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![
        Ok(SUMMARY_JSON),
        Ok(SUMMARY_JSON),
        Ok("answer"),
    ]));

    let (_, cookie, _, _) = app
        .send(upload_request(None, Some("first.pdf"), &pdf_with_text(&["FIRST CONTRACT"])))
        .await;
    let cookie = cookie.unwrap();
    app.send(upload_request(Some(&cookie), Some("second.pdf"), &pdf_with_text(&["SECOND CONTRACT"])))
        .await;
    app.send(ask_request(Some(&cookie), r#"{"question": "Which one?"}"#))
        .await;

    let calls = app.model.calls();
    let asked_about = &calls[2][1];
    assert!(asked_about.contains("SECOND CONTRACT"));
    assert!(!asked_about.contains("FIRST CONTRACT"));
}

#[tokio::test]
async fn path_components_in_filenames_stay_inside_the_upload_dir() {
    let app = TestApp::new(ScriptedModel::with_replies(vec![Ok(SUMMARY_JSON)]));

    let (status, _, _, _) = app
        .send(upload_request(None, Some("../../escape.pdf"), &pdf_with_text(&["Lease"])))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert!(app.upload_dir.path().join("escape.pdf").exists());
}

#[tokio::test]
async fn oversized_upload_is_rejected_before_summarizing() {
    let app = TestApp::with_upload_limit(ScriptedModel::with_replies(vec![]), 4 * 1024);
    let oversized = vec![b'%'; 16 * 1024];

    let (status, _, body, _) = app
        .send(upload_request(None, Some("huge.pdf"), &oversized))
        .await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(json(&body)["error"], "File too large");
    assert!(app.model.calls().is_empty());
    assert!(!app.upload_dir.path().join("huge.pdf").exists());
}

#[tokio::test]
async fn summary_that_takes_too_long_is_a_server_error() {
    let app = TestApp::new(ScriptedModel::stalling_after(vec![]));

    let (status, _, body, _) = app
        .send(upload_request(None, Some("lease.pdf"), &pdf_with_text(&["Lease"])))
        .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = json(&body);
    assert_eq!(body["error"], "AI call failed: model did not answer within 100ms");
    assert_eq!(body["raw"], "");
}

#[tokio::test]
async fn answer_that_takes_too_long_is_reported_in_the_answer() {
    let app = TestApp::new(ScriptedModel::stalling_after(vec![Ok(SUMMARY_JSON)]));
    let (status, cookie, _, _) = app
        .send(upload_request(None, Some("nda.pdf"), &pdf_with_text(&["NDA"])))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body, _) = app
        .send(ask_request(cookie.as_deref(), r#"{"question": "Is it mutual?"}"#))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        json(&body)["answer"],
        "AI call failed: model did not answer within 100ms"
    );
}
