//! # API Dispatch Tests
//!
//! Declared actions served through the wire router: status codes for every
//! rejection, failure isolation, and upload temp-file cleanup.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nulls::script::failure;
use nulls::{script_fn, ModuleRegistry, NullsConfig, ProviderTable, Renderer, Request, TemplateStore, WireRouter};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tempfile::TempDir;

// ============================================================================
// TEST HELPERS
// ============================================================================

const BOUNDARY: &str = "test-boundary";

const FORMS: &str = concat!(
    r#"<body>"#,
    r#"<form null-api="/limited" null-api-action="'ok'" null-api-limit="1024"></form>"#,
    r#"<form null-api="/private" null-api-action="'secret'" null-api-access="request.cookies.session == 'admin'"></form>"#,
    r#"<form null-api="/echo" null-api-action="request.fields"></form>"#,
    r#"<form null-api="/upload" null-api-action="$save" null-api-upload='#{"doc": 1}'></form>"#,
    r#"<form null-api="/explode" null-api-action="$explode" null-api-upload='#{"doc": 1}'></form>"#,
    "</body>"
);

/// Paths of the uploaded files each action saw, and whether they existed
type Seen = Arc<Mutex<Vec<(PathBuf, bool)>>>;

fn record(seen: &Seen, cx: &nulls::script::CallContext<'_>) {
    for files in cx.exchange.form().files.values() {
        for file in files {
            seen.lock().push((file.path().to_path_buf(), file.path().exists()));
        }
    }
}

async fn router() -> (TempDir, WireRouter, Seen) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("templates/root");
    fs::create_dir_all(&root).unwrap();
    fs::write(root.join("index.html"), FORMS).unwrap();

    let seen: Seen = Arc::default();
    let (saved, exploded) = (Arc::clone(&seen), Arc::clone(&seen));
    let modules = ModuleRegistry::new()
        .with(
            "save",
            script_fn(move |cx| {
                record(&saved, &cx);
                Ok(json!({"stored": cx.exchange.form().file_count()}))
            }),
        )
        .with(
            "explode",
            script_fn(move |cx| {
                record(&exploded, &cx);
                Err(failure("disk full"))
            }),
        );

    let config = NullsConfig {
        templates: dir.path().join("templates"),
        uploads: dir.path().join("uploads"),
        ..Default::default()
    };
    let store = TemplateStore::load(&config, modules.into_shared(), ProviderTable::new())
        .await
        .unwrap();
    (dir, WireRouter::new(Renderer::new(Arc::new(store))), seen)
}

fn multipart(path: &str, files: &[(&str, &str)]) -> Request {
    let mut body = format!(
        "--{b}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\nreport\r\n",
        b = BOUNDARY
    );
    for (filename, content) in files {
        body.push_str(&format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"doc\"; filename=\"{f}\"\r\nContent-Type: text/plain\r\n\r\n{c}\r\n",
            b = BOUNDARY,
            f = filename,
            c = content
        ));
    }
    body.push_str(&format!("--{}--\r\n", BOUNDARY));
    Request::post(path).with_body(&format!("multipart/form-data; boundary={}", BOUNDARY), body)
}

fn leftover_uploads(dir: &Path) -> usize {
    fs::read_dir(dir.join("uploads"))
        .map(|entries| entries.count())
        .unwrap_or(0)
}

// ============================================================================
// STATUS CODES
// ============================================================================

#[tokio::test]
async fn upload_limit_statuses() {
    let (_dir, r, _) = router().await;

    let big = Request::post("/limited").with_header("content-length", "2048");
    assert_eq!(r.handle(big).await.status, 413);

    let unknown = Request::post("/limited");
    assert_eq!(r.handle(unknown).await.status, 411);

    let garbled = Request::post("/limited").with_header("content-length", "many");
    assert_eq!(r.handle(garbled).await.status, 411);

    let small = Request::post("/limited").with_body("application/x-www-form-urlencoded", "a=1");
    let res = r.handle(small).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body_text(), "\"ok\"");
}

#[tokio::test]
async fn access_script_guards_the_action() {
    let (_dir, r, _) = router().await;
    assert_eq!(r.handle(Request::post("/private")).await.status, 403);

    let admin = Request::post("/private").with_header("cookie", "session=admin");
    assert_eq!(r.handle(admin).await.body_text(), "\"secret\"");
}

#[tokio::test]
async fn malformed_bodies_are_bad_requests() {
    let (dir, r, seen) = router().await;

    let truncated = Request::post("/upload").with_body(
        &format!("multipart/form-data; boundary={}", BOUNDARY),
        "--test-boundary\r\nno headers here",
    );
    assert_eq!(r.handle(truncated).await.status, 400);

    let too_many = multipart("/upload", &[("a.txt", "a"), ("b.txt", "b")]);
    assert_eq!(r.handle(too_many).await.status, 400);

    let undeclared = multipart("/echo", &[("a.txt", "a")]);
    assert_eq!(r.handle(undeclared).await.status, 400);

    assert!(seen.lock().is_empty());
    assert_eq!(leftover_uploads(dir.path()), 0);
}

#[tokio::test]
async fn text_fields_reach_the_action() {
    let (_dir, r, _) = router().await;
    let res = r
        .handle(Request::post("/echo").with_body("application/x-www-form-urlencoded", "name=ada&tag=a&tag=b"))
        .await;
    let body: Value = serde_json::from_str(&res.body_text()).unwrap();
    assert_eq!(body, json!({"name": "ada", "tag": ["a", "b"]}));
}

// ============================================================================
// FAILURE ISOLATION AND CLEANUP
// ============================================================================

#[tokio::test]
async fn uploads_are_removed_after_success() {
    let (dir, r, seen) = router().await;
    let res = r.handle(multipart("/upload", &[("notes.txt", "hello")])).await;
    assert_eq!(res.status, 200);
    assert_eq!(res.body_text(), r#"{"stored":1}"#);

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    let (path, existed) = &seen[0];
    assert!(*existed, "file was visible while the action ran");
    assert!(!path.exists());
    assert_eq!(leftover_uploads(dir.path()), 0);
}

#[tokio::test]
async fn failing_action_is_a_generic_500_and_cleans_up() {
    let (dir, r, seen) = router().await;
    let res = r.handle(multipart("/explode", &[("notes.txt", "hello")])).await;
    assert_eq!(res.status, 500);
    assert!(!res.body_text().contains("disk full"));

    let (path, existed) = seen.lock()[0].clone();
    assert!(existed);
    assert!(!path.exists());
    assert_eq!(leftover_uploads(dir.path()), 0);

    // other actions keep working
    let ok = r
        .handle(Request::post("/limited").with_body("application/x-www-form-urlencoded", ""))
        .await;
    assert_eq!(ok.status, 200);
}
