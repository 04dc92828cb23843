//! Discovery and synchronization against an in-process live site

use std::path::Path;

use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use sitemirror_common::{Route, SyncConfig};
use sitemirror_sync::{
    DiscoverySource, HttpFetcher, Repairer, RouteDiscovery, SharedFragments, SyncError, Synchronizer,
};
use url::Url;

const HOME: &str = r#"<!DOCTYPE html>
<html lang="en"><head><title>Home</title></head>
<body>
<nav><a href="/about-us/">About</a> <a href="/events">Events</a> <a href="https://elsewhere.org/">Out</a></nav>
<main><h1>Welcome</h1><p id="next-event">Spring fair</p></main>
<footer><p>Example footer</p></footer>
</body></html>"#;

const ABOUT: &str = r#"<!DOCTYPE html>
<html lang="en"><head><title>About</title></head>
<body><main class="about"><h1>About us</h1></main><footer><p>Example footer</p></footer></body></html>"#;

const EVENTS: &str = r#"<!DOCTYPE html>
<html lang="en"><head><title>Events</title></head>
<body><div id="content"><h1>Events</h1><ul><li>Spring fair</li></ul></div></body></html>"#;

const EMPTY_MAIN: &str = r#"<html><body><main>   </main></body></html>"#;

const NO_REGION: &str = r#"<html><body><section>Nothing here</section></body></html>"#;

fn sitemap(origin: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{o}/</loc></url>
  <url><loc>{o}/about-us/</loc></url>
  <url><loc>{o}/events</loc></url>
  <url><loc>{o}/events/</loc></url>
</urlset>"#,
        o = origin
    )
}

fn pages() -> Router {
    Router::new()
        .route("/", get(|| async { Html(HOME) }))
        .route("/about-us", get(|| async { Html(ABOUT) }))
        .route("/events", get(|| async { Html(EVENTS) }))
        .route("/empty", get(|| async { Html(EMPTY_MAIN) }))
        .route("/bare", get(|| async { Html(NO_REGION) }))
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// A live site with a valid index
async fn site_with_index() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let origin = format!("http://{}", listener.local_addr().unwrap());
    let xml = sitemap(&origin);
    let router = pages().route("/sitemap.xml", get(move || async move { xml }));
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    origin
}

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(&SyncConfig::default()).unwrap()
}

fn fragments() -> SharedFragments {
    SharedFragments {
        head: "<meta charset=\"utf-8\">\n<link rel=\"stylesheet\" href=\"/css/site.css\">\n".to_string(),
        top_panel: "<header class=\"top-panel\">Example</header>\n".to_string(),
    }
}

fn synchronizer(origin: &str, root: &Path) -> Synchronizer {
    let config = SyncConfig::default();
    Synchronizer::new(
        fetcher(),
        Url::parse(origin).unwrap(),
        fragments(),
        root.to_path_buf(),
        &config.content_selectors,
        &config.footer_selector,
    )
    .unwrap()
}

fn route(raw: &str) -> Route {
    Route::new(raw).unwrap()
}

#[tokio::test]
async fn discovery_reads_index_without_duplicates() {
    let origin = site_with_index().await;
    let fetcher = fetcher();
    let discovery = RouteDiscovery::new(&fetcher, Url::parse(&origin).unwrap(), "sitemap.xml");

    let found = discovery.discover().await.unwrap();
    assert_eq!(found.source, DiscoverySource::Index);
    let routes: Vec<&str> = found.routes.iter().map(Route::as_str).collect();
    assert_eq!(routes, vec!["", "about-us", "events"]);
}

#[tokio::test]
async fn discovery_falls_back_on_malformed_index() {
    let router = pages().route("/sitemap.xml", get(|| async { "<urlset><url><loc>broken" }));
    let origin = serve(router).await;
    let fetcher = fetcher();
    let discovery = RouteDiscovery::new(&fetcher, Url::parse(&origin).unwrap(), "sitemap.xml");

    let found = discovery.discover().await.unwrap();
    assert_eq!(found.source, DiscoverySource::Crawl);
    assert!(found.routes.contains(&Route::root()));
    let routes: Vec<&str> = found.routes.iter().map(Route::as_str).collect();
    assert_eq!(routes, vec!["", "about-us", "events"]);
}

#[tokio::test]
async fn discovery_falls_back_on_missing_index() {
    let origin = serve(pages()).await;
    let fetcher = fetcher();
    let discovery = RouteDiscovery::new(&fetcher, Url::parse(&origin).unwrap(), "sitemap.xml");

    let found = discovery.discover().await.unwrap();
    assert_eq!(found.source, DiscoverySource::Crawl);
    assert!(found.routes.contains(&Route::root()));
}

#[tokio::test]
async fn discovery_fails_when_home_page_unreachable() {
    let router = Router::new().route("/", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }));
    let origin = serve(router).await;
    let fetcher = fetcher();
    let discovery = RouteDiscovery::new(&fetcher, Url::parse(&origin).unwrap(), "sitemap.xml");

    let err = discovery.discover().await.unwrap_err();
    assert!(matches!(err, SyncError::Retrieval { .. }));
}

#[tokio::test]
async fn sync_writes_snapshot_per_route() {
    let origin = site_with_index().await;
    let out = tempfile::tempdir().unwrap();
    let sync = synchronizer(&origin, out.path());

    let routes = vec![route(""), route("about-us"), route("events")];
    let summary = sync.sync_all(&routes).await;

    assert!(summary.failed.is_empty(), "{:?}", summary.failed);
    assert_eq!(summary.synced.len(), 3);
    assert!(summary.synced.iter().all(|o| o.completeness == 1.0));

    for path in ["index.html", "about-us/index.html", "events/index.html"] {
        assert!(out.path().join(path).is_file(), "missing {}", path);
    }

    let about = std::fs::read_to_string(out.path().join("about-us/index.html")).unwrap();
    assert!(about.contains("<main class=\"about\"><h1>About us</h1></main>"));
    assert!(about.contains("top-panel"));
    assert!(about.contains("/css/site.css"));

    let events = std::fs::read_to_string(out.path().join("events/index.html")).unwrap();
    assert!(events.contains("<div id=\"content\"><h1>Events</h1>"));
    assert!(!events.contains("<footer"));
}

#[tokio::test]
async fn sync_is_idempotent() {
    let origin = serve(pages()).await;
    let out = tempfile::tempdir().unwrap();
    let sync = synchronizer(&origin, out.path());
    let path = out.path().join("about-us/index.html");

    sync.sync_route(&route("about-us")).await.unwrap();
    let first = std::fs::read(&path).unwrap();
    sync.sync_route(&route("about-us")).await.unwrap();
    let second = std::fs::read(&path).unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn sync_route_errors_are_per_route() {
    let origin = serve(pages()).await;
    let out = tempfile::tempdir().unwrap();
    let sync = synchronizer(&origin, out.path());

    let routes = vec![route("about-us"), route("bare"), route("empty"), route("missing")];
    let summary = sync.sync_all(&routes).await;

    assert_eq!(summary.synced_routes(), vec![route("about-us")]);
    assert_eq!(summary.failed.len(), 3);

    let kind = |r: &str| {
        summary
            .failed
            .iter()
            .find(|(route, _)| route.as_str() == r)
            .map(|(_, e)| e)
            .unwrap()
    };
    assert!(matches!(kind("bare"), SyncError::MissingContentRegion { .. }));
    assert!(matches!(kind("empty"), SyncError::BelowContentThreshold { .. }));
    assert!(matches!(kind("missing"), SyncError::Retrieval { .. }));
    assert!(summary.failed.iter().all(|(_, e)| e.is_route_level()));

    assert!(!out.path().join("bare/index.html").exists());
}

#[tokio::test]
async fn repair_restores_fragments_and_live_text() {
    let origin = serve(pages()).await;
    let out = tempfile::tempdir().unwrap();
    let path = out.path().join("index.html");
    std::fs::write(
        &path,
        "<!DOCTYPE html>\n<html>\n<head>\n</head>\n<body>\n<main><p id=\"next-event\" class=\"{{ cls }}\">Winter fair</p></main>\n</body>\n</html>\n",
    )
    .unwrap();

    let repairer = Repairer::new(fetcher(), Url::parse(&origin).unwrap(), fragments(), out.path().to_path_buf());
    let outcome = repairer.repair_route(&Route::root()).await.unwrap();

    assert_eq!(outcome.placeholders_fixed, 1);
    assert_eq!(outcome.fragments_inserted, 2);
    assert_eq!(outcome.texts_resynced, 1);

    let repaired = std::fs::read_to_string(&path).unwrap();
    assert!(repaired.contains("<p id=\"next-event\">Spring fair</p>"));
    assert!(repaired.contains("top-panel"));
    assert!(repaired.contains("/css/site.css"));
}

#[tokio::test]
async fn repair_swallows_live_failures() {
    // Nothing listens on the origin: live resync is skipped, local fixes still apply
    let out = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(out.path().join("events")).unwrap();
    let path = out.path().join("events/index.html");
    std::fs::write(&path, "<html><head></head><body><p class=\"undefined\">x</p></body></html>").unwrap();

    let repairer = Repairer::new(
        fetcher(),
        Url::parse("http://127.0.0.1:9").unwrap(),
        fragments(),
        out.path().to_path_buf(),
    );
    let outcome = repairer.repair_route(&route("events")).await.unwrap();

    assert_eq!(outcome.placeholders_fixed, 1);
    assert_eq!(outcome.texts_resynced, 0);
    assert!(outcome.changed());

    assert!(repairer.repair_route(&route("absent")).await.is_none());
}
