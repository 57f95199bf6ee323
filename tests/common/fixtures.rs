//! Site maps, page images and configs for integration tests

use grabber::Config;
use grabber::config::RetryConfig;
use grabber::session::scripted::{ScriptedPage, ScriptedSession};
use serde_json::{Value, json};
use std::io::Cursor;
use std::path::Path;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Collection root used by the scripted rooms
pub const ROOT: &str = "https://rooms.test/s/deal";

/// Encode a solid PNG; the width doubles as a page marker in produced PDFs
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 120, 60]));
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

/// Retry settings with millisecond delays and no jitter
pub fn quick_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Config writing collections under `out` with no politeness delay and fast retries
pub fn test_config(out: &Path) -> Config {
    let mut config = Config::default();
    config.output.collections_dir = out.to_path_buf();
    config.download.politeness_interval = Duration::ZERO;
    config.retry = quick_retry(2);
    config.native.stability_interval = Duration::from_millis(10);
    config.native.timeout = Duration::from_secs(2);
    config
}

/// Listing entry for a subfolder of [`ROOT`]
pub fn folder(id: &str, name: &str) -> Value {
    json!({"kind": "folder", "id": id, "name": name, "url": format!("{ROOT}/f/{id}")})
}

/// Listing entry for a document of [`ROOT`]
pub fn document(id: &str, name: &str) -> Value {
    json!({"kind": "document", "id": id, "name": name, "url": doc_url(id)})
}

/// Viewer URL of document `id`
pub fn doc_url(id: &str) -> String {
    format!("{ROOT}/d/{id}")
}

/// Page entries pointing at `server`, one per page number in `order`
pub fn page_entries(server: &MockServer, doc: &str, order: &[u32]) -> Vec<Value> {
    order
        .iter()
        .map(|p| json!({"page": p, "url": format!("{}/img/{doc}/{p}.png", server.uri())}))
        .collect()
}

/// Serve page `n` of `doc` as a PNG `width` pixels wide, after `delay`
pub async fn mount_page(server: &MockServer, doc: &str, n: u32, width: u32, delay: Duration) {
    Mock::given(method("GET"))
        .and(path(format!("/img/{doc}/{n}.png")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(png(width, 8))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Two-level room:
///
/// ```text
/// Deal Room
/// ├── A
/// │   └── doc1 (2 pages)
/// └── B
///     └── C
///         └── doc2 (1 page)
/// ```
///
/// Page images are served by `server`.
pub async fn deal_room(server: &MockServer, downloads: &Path) -> ScriptedSession {
    for (doc, pages) in [("doc1", 2u32), ("doc2", 1)] {
        for p in 1..=pages {
            mount_page(server, doc, p, 10 * p, Duration::ZERO).await;
        }
    }

    ScriptedSession::new(downloads)
        .snapshot(png(40, 30))
        .page(
            ROOT,
            ScriptedPage::collection("Deal Room")
                .child(folder("a", "A"))
                .child(folder("b", "B")),
        )
        .page(
            &format!("{ROOT}/f/a"),
            ScriptedPage::collection("A").child(document("doc1", "doc1")),
        )
        .page(
            &format!("{ROOT}/f/b"),
            ScriptedPage::collection("B").child(folder("c", "C")),
        )
        .page(
            &format!("{ROOT}/f/c"),
            ScriptedPage::collection("C").child(document("doc2", "doc2")),
        )
        .page(
            &doc_url("doc1"),
            ScriptedPage::document("doc1").pages(page_entries(server, "doc1", &[1, 2])),
        )
        .page(
            &doc_url("doc2"),
            ScriptedPage::document("doc2").pages(page_entries(server, "doc2", &[1])),
        )
}
