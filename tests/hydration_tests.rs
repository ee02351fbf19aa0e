//! # Hydration Tests
//!
//! The client controller driven against a real server: a template tree is
//! loaded, its page rendered, and the controller talks to the wire router
//! in process through a transport that records every call.

use std::fs;
use std::sync::Arc;

use async_trait::async_trait;
use nulls::client::{ClientResult, FileValue, HistoryEntry, Trigger, TrackerPayload};
use nulls::html::{Document, NodeId};
use nulls::{
    ClientError, Controller, Exchange, LocalTransport, ModuleRegistry, NullsConfig, ProviderTable, RenderHooks,
    Renderer, Request, TemplateStore, Transport, WireRouter,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::Notify;

// ============================================================================
// TEST HELPERS
// ============================================================================

const INDEX: &str = concat!(
    "<html><head><title>Nulls</title></head><body>",
    r#"<nav><a id="to-chat" href="/chat" null-link>chat</a><a id="home" null-link="/">home</a></nav>"#,
    r#"<main id="main" null-id="main" null-container="request.path == '/chat' || request.fields.path == '/chat' ? 'chat' : 'home'"></main>"#,
    r#"<aside id="lost" null-id="lost" null-tracks="nothing" null-container="'side'"></aside>"#,
    "</body></html>"
);

const CHAT: &str = concat!(
    "<h1>Chat</h1><ul>",
    r#"<li null-id="post" null-dummy null-tracker="post" null-tracks="post" null-container="'card'"></li>"#,
    r#"<li id="more" null-id="more" null-loads="post" null-loader="num(request.fields.index) < 1 ? num(request.fields.index) + 1 : ''"></li>"#,
    "</ul>"
);

struct Titles;

#[async_trait]
impl RenderHooks for Titles {
    async fn title(&self, path: &str, _exchange: &Exchange) -> nulls::Result<String> {
        Ok(format!("Nulls · {}", path))
    }
}

/// In-process transport that records the paths it was asked for
///
/// A held prefix parks the next matching POST until the returned gate is
/// notified, so callers can act while that request is still in flight.
struct Recording {
    inner: LocalTransport,
    calls: Mutex<Vec<String>>,
    held: Mutex<Option<(String, Arc<Notify>)>>,
}

impl Recording {
    fn count(&self, prefix: &str) -> usize {
        self.calls.lock().iter().filter(|p| p.starts_with(prefix)).count()
    }

    fn hold(&self, prefix: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.held.lock() = Some((prefix.to_string(), Arc::clone(&gate)));
        gate
    }
}

#[async_trait]
impl Transport for Recording {
    async fn get(&self, path: &str) -> ClientResult<String> {
        self.calls.lock().push(path.to_string());
        self.inner.get(path).await
    }

    async fn post(&self, path: &str, payload: &TrackerPayload) -> ClientResult<String> {
        self.calls.lock().push(path.to_string());
        let gate = {
            let mut held = self.held.lock();
            let matches = held
                .as_ref()
                .is_some_and(|(prefix, _)| path.starts_with(prefix.as_str()));
            if matches {
                held.take().map(|(_, gate)| gate)
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.inner.post(path, payload).await
    }
}

struct Site {
    _dir: TempDir,
    transport: Arc<Recording>,
    controller: Controller,
}

impl Site {
    fn node(&self, id: &str) -> NodeId {
        self.controller
            .with_document(|d| d.find_first(d.root(), |el| el.attr("id") == Some(id)))
            .unwrap()
    }

    fn text_of(&self, node: NodeId) -> String {
        self.controller.with_document(|d| d.text_content(node))
    }
}

async fn site(href: &str) -> Site {
    let dir = TempDir::new().unwrap();
    let files = [
        ("root/index.html", INDEX),
        ("root/main/home.html", "<h1>Home</h1>"),
        ("root/main/chat.html", CHAT),
        (
            "root/main/post/card.html",
            r#"<p null-id="body" null-tracks="post" null-data="'post ' + request.fields.post"></p>"#,
        ),
        ("root/lost/side.html", "<p>side</p>"),
    ];
    for (rel, content) in files {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    let config = NullsConfig {
        templates: dir.path().to_path_buf(),
        uploads: dir.path().join("uploads"),
        ..Default::default()
    };
    let store = TemplateStore::load(&config, ModuleRegistry::new().into_shared(), ProviderTable::new())
        .await
        .unwrap();
    let router = WireRouter::new(Renderer::new(Arc::new(store)).with_hooks(Arc::new(Titles)));

    let page = router.handle(Request::get(href)).await.body_text();
    let transport = Arc::new(Recording {
        inner: LocalTransport::new(router),
        calls: Mutex::new(Vec::new()),
        held: Mutex::new(None),
    });
    let shared: Arc<dyn Transport> = transport.clone();
    let controller = Controller::new(shared, Document::parse(&page).unwrap(), href, &config).unwrap();
    Site {
        _dir: dir,
        transport,
        controller,
    }
}

// ============================================================================
// PROBING
// ============================================================================

#[tokio::test]
async fn server_rendered_page_is_reaffirmed_without_fragments() {
    let s = site("/").await;
    s.controller.start().await.unwrap();
    assert_eq!(s.controller.title(), "Nulls");

    let main = s.node("main");
    assert_eq!(
        s.controller.trigger(main),
        Some(Trigger::Container {
            address: "root/main".into()
        })
    );
    s.controller.intersect(main).await.unwrap();
    assert_eq!(s.transport.count("/null-container/root/index/main"), 1);
    assert_eq!(s.transport.count("/static/nulls/"), 0);
    assert_eq!(s.text_of(main), "Home");

    // the observation was one-shot
    s.controller.intersect(main).await.unwrap();
    assert_eq!(s.transport.count("/null-container/root/index/main"), 1);
}

#[tokio::test]
async fn unresolved_tracker_fails_only_its_container() {
    let s = site("/").await;
    s.controller.start().await.unwrap();

    let err = s.controller.intersect(s.node("lost")).await.unwrap_err();
    assert_eq!(
        err,
        ClientError::MissingTracker {
            name: "nothing".into()
        }
    );
    s.controller.intersect(s.node("main")).await.unwrap();
    assert_eq!(s.text_of(s.node("main")), "Home");
}

// ============================================================================
// NAVIGATION
// ============================================================================

#[tokio::test]
async fn links_navigate_and_swap_the_changed_container() {
    let s = site("/").await;
    s.controller.start().await.unwrap();

    s.controller.click(s.node("to-chat")).await.unwrap();
    assert_eq!(s.controller.location().path, "/chat");
    assert_eq!(s.controller.title(), "Nulls · /chat");
    assert_eq!(
        s.controller.history(),
        vec![HistoryEntry {
            href: "/chat".into(),
            title: Some("Nulls · /chat".into())
        }]
    );

    // root reaffirmed, main re-armed; its probe now answers 'chat'
    let main = s.node("main");
    s.controller.intersect(main).await.unwrap();
    assert_eq!(s.controller.type_of("root/main").as_deref(), Some("chat"));
    assert_eq!(s.transport.count("/static/nulls/root/main/chat.html"), 1);
    assert!(s.controller.html().contains("<h1>Chat</h1>"));

    // a foreign history entry is ignored
    s.controller
        .pop_state(HistoryEntry {
            href: "/".into(),
            title: None,
        })
        .await
        .unwrap();
    assert_eq!(s.controller.location().path, "/chat");
}

// ============================================================================
// PAGINATION
// ============================================================================

#[tokio::test]
async fn loader_pages_until_the_token_is_empty() {
    let s = site("/chat").await;
    s.controller.start().await.unwrap();
    let main = s.node("main");
    s.controller.intersect(main).await.unwrap();
    assert_eq!(s.transport.count("/static/nulls/"), 0);

    let more = s.node("more");
    // the second intersection arrives while the first page is still loading
    let gate = s.transport.hold("/null-load/");
    let release = async {
        tokio::task::yield_now().await;
        assert_eq!(s.transport.count("/null-load/"), 1);
        gate.notify_one();
    };
    let (a, b, ()) = futures::join!(s.controller.intersect(more), s.controller.intersect(more), release);
    a.unwrap();
    b.unwrap();
    assert_eq!(s.transport.count("/null-load/root/main/chat/more"), 1);
    assert_eq!(s.controller.type_of("root/main/post.0").as_deref(), Some("card"));

    s.controller.intersect(more).await.unwrap();
    assert_eq!(s.transport.count("/null-load/"), 2);
    // the dummy fragment is fetched once and reused
    assert_eq!(s.transport.count("/static/dummies/root/main/chat/post.html"), 1);

    s.controller.intersect(more).await.unwrap();
    assert_eq!(s.transport.count("/null-load/"), 3);
    assert_eq!(s.controller.trigger(more), None);

    let html = s.controller.html();
    let first = html.find("post 0").unwrap();
    let second = html.find("post 1").unwrap();
    let loader = html.find(r#"id="more""#).unwrap();
    assert!(first < second && second < loader, "{}", html);
    assert!(!html.contains("post null"));
}

#[tokio::test]
async fn type_change_invalidates_descendant_tokens() {
    let s = site("/chat").await;
    s.controller.start().await.unwrap();
    s.controller.intersect(s.node("main")).await.unwrap();
    s.controller.intersect(s.node("more")).await.unwrap();
    assert!(s.controller.type_of("root/main/post.0").is_some());

    s.controller.click(s.node("home")).await.unwrap();
    s.controller.intersect(s.node("main")).await.unwrap();
    assert_eq!(s.controller.type_of("root/main").as_deref(), Some("home"));
    assert_eq!(s.controller.type_of("root/main/post.0"), None);
    assert!(!s.controller.html().contains("post 0"));
}

// ============================================================================
// FILE TRACKERS
// ============================================================================

#[tokio::test]
async fn file_trackers_reach_slot_endpoints() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("root");
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("index.html"),
        r#"<body><p null-id="n" null-data="request.fields.note + ':' + request.files.doc[1].filename + ':' + str(len(request.files.doc))"></p></body>"#,
    )
    .unwrap();
    let config = NullsConfig {
        templates: dir.path().to_path_buf(),
        uploads: dir.path().join("uploads"),
        ..Default::default()
    };
    let store = TemplateStore::load(&config, ModuleRegistry::new().into_shared(), ProviderTable::new())
        .await
        .unwrap();
    let transport = LocalTransport::new(WireRouter::new(Renderer::new(Arc::new(store))));

    let mut payload = TrackerPayload::new("/", "");
    payload.push("note", "draft");
    for name in ["a.txt", "b.txt"] {
        payload.push_file(
            "doc",
            FileValue {
                filename: name.into(),
                content_type: "text/plain".into(),
                bytes: b"hello".to_vec(),
            },
        );
    }
    let body = transport.post("/null-data/root/index/n", &payload).await.unwrap();
    assert_eq!(body, r#""draft:b.txt:2""#);
    // spooled tracker files do not outlive the request
    let left = fs::read_dir(dir.path().join("uploads")).map(|e| e.count()).unwrap_or(0);
    assert_eq!(left, 0);
}
