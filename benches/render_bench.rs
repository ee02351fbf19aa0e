//! Quick benchmark of page and fragment rendering

use std::fs;
use std::sync::Arc;
use std::time::Instant;

use nulls::{ModuleRegistry, NullsConfig, ProviderTable, RenderContext, Renderer, Request, TemplateStore};
use tempfile::TempDir;

fn write(dir: &TempDir, rel: &str, content: &str) {
    let path = dir.path().join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn main() {
    let dir = TempDir::new().unwrap();
    write(
        &dir,
        "root/index.html",
        r#"<html><body><h1 null-id="title" null-data="upper(request.path)"></h1><main null-id="main" null-container="'feed'"></main></body></html>"#,
    );
    write(
        &dir,
        "root/main/feed.html",
        r#"<ul null-id="posts" null-list="range(50)" null-container="'post'" null-adder="'footer'"></ul>"#,
    );
    write(
        &dir,
        "root/main/posts/post.html",
        r#"<li null-id="body" null-attributes="{'data-n': args[0], hidden: args[0] % 7 == 0}" null-data="'post #' + str(args[0])"></li>"#,
    );
    write(&dir, "root/main/posts/footer.html", "<li>end</li>");

    let runtime = tokio::runtime::Runtime::new().unwrap();
    let config = NullsConfig {
        templates: dir.path().to_path_buf(),
        ..Default::default()
    };
    let store = runtime
        .block_on(TemplateStore::load(&config, ModuleRegistry::new().into_shared(), ProviderTable::new()))
        .unwrap();
    let renderer = Renderer::new(Arc::new(store));
    let ctx = RenderContext::from_request(Request::get("/feed"));

    println!("Render Performance Test");
    println!("=======================\n");

    let cases: [(&str, usize); 2] = [("page", 2_000), ("fragment root/main/feed", 2_000)];
    for (name, iterations) in cases {
        // Warm up
        let _ = runtime.block_on(renderer.render_page(&ctx));

        let start = Instant::now();
        for _ in 0..iterations {
            let html = runtime.block_on(async {
                match name {
                    "page" => renderer.render_page(&ctx).await,
                    _ => renderer.render_fragment("root/main", "feed", &ctx).await,
                }
            });
            assert!(html.is_ok());
        }
        let elapsed = start.elapsed();

        println!("Case: {}", name);
        println!("  Time for {} iterations: {:?}", iterations, elapsed);
        println!("  Per render: {:?}\n", elapsed / iterations as u32);
    }
}
