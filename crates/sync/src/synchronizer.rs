//! Content synchronization: live page -> local snapshot

use std::io::Write;
use std::path::{Path, PathBuf};

use scraper::{ElementRef, Html, Selector};
use sitemirror_common::{Route, SiteMirrorConfig};
use tracing::{debug, info, warn};
use url::Url;

use crate::client::HttpFetcher;
use crate::error::{SyncError, SyncResult};

/// The two shared fragments every snapshot is composed with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedFragments {
    pub head: String,
    pub top_panel: String,
}

impl SharedFragments {
    pub fn load(head: &Path, top_panel: &Path) -> SyncResult<Self> {
        let read = |path: &Path| {
            std::fs::read_to_string(path).map_err(|source| SyncError::Fragment {
                path: path.to_path_buf(),
                source,
            })
        };

        Ok(Self {
            head: read(head)?,
            top_panel: read(top_panel)?,
        })
    }
}

/// A region of the live page: its container element and inner markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Opening tag of the container, attributes in name order
    pub open_tag: String,
    pub tag_name: String,
    pub inner: String,
}

impl Region {
    fn from_element(element: ElementRef<'_>) -> Self {
        let tag_name = element.value().name().to_string();
        let mut attrs: Vec<(&str, &str)> = element.value().attrs().collect();
        attrs.sort_unstable();

        let mut open_tag = format!("<{}", tag_name);
        for (name, value) in attrs {
            open_tag.push_str(&format!(" {}=\"{}\"", name, escape_attr(value)));
        }
        open_tag.push('>');

        Self {
            open_tag,
            tag_name,
            inner: element.inner_html(),
        }
    }

    fn render(&self) -> String {
        format!("{}{}</{}>", self.open_tag, self.inner, self.tag_name)
    }
}

/// Regions extracted from one live document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPage {
    pub content: Region,
    pub footer: Option<Region>,
    pub lang: Option<String>,
    pub title: Option<String>,
}

/// Result of synchronizing one route
#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub route: Route,
    pub path: PathBuf,
    pub completeness: f64,
}

/// Result of a full synchronization pass
#[derive(Debug, Default)]
pub struct SyncSummary {
    pub synced: Vec<SyncOutcome>,
    pub failed: Vec<(Route, SyncError)>,
}

impl SyncSummary {
    pub fn synced_routes(&self) -> Vec<Route> {
        self.synced.iter().map(|o| o.route.clone()).collect()
    }
}

/// Produces snapshots of live pages under the output root
pub struct Synchronizer {
    fetcher: HttpFetcher,
    origin: Url,
    fragments: SharedFragments,
    output_root: PathBuf,
    content_selectors: Vec<Selector>,
    footer_selector: Selector,
}

impl Synchronizer {
    pub fn new(
        fetcher: HttpFetcher,
        origin: Url,
        fragments: SharedFragments,
        output_root: PathBuf,
        content_selectors: &[String],
        footer_selector: &str,
    ) -> SyncResult<Self> {
        Ok(Self {
            fetcher,
            origin,
            fragments,
            output_root,
            content_selectors: content_selectors
                .iter()
                .map(|s| parse_selector(s))
                .collect::<SyncResult<_>>()?,
            footer_selector: parse_selector(footer_selector)?,
        })
    }

    /// Build a synchronizer from configuration, reading the shared fragments
    pub fn from_config(config: &SiteMirrorConfig, fetcher: HttpFetcher) -> SyncResult<Self> {
        let fragments =
            SharedFragments::load(&config.paths.head_fragment, &config.paths.top_panel_fragment)?;
        Self::new(
            fetcher,
            config.origin_url()?,
            fragments,
            config.paths.output_root.clone(),
            &config.sync.content_selectors,
            &config.sync.footer_selector,
        )
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn fragments(&self) -> &SharedFragments {
        &self.fragments
    }

    /// Compose later snapshots with `fragments`
    pub fn set_fragments(&mut self, fragments: SharedFragments) {
        self.fragments = fragments;
    }

    /// Fetch, extract, compose and write the snapshot for one route
    pub async fn sync_route(&self, route: &Route) -> SyncResult<SyncOutcome> {
        let url = route.url_on(self.origin.as_str());
        let body = self.fetcher.fetch_text(&url).await?;

        let page = extract_regions(&body, &self.content_selectors, &self.footer_selector)
            .ok_or_else(|| SyncError::MissingContentRegion {
                route: route.clone(),
            })?;

        let completeness = completeness_ratio(&page.content.inner);
        if completeness <= 0.0 {
            return Err(SyncError::BelowContentThreshold {
                route: route.clone(),
            });
        }

        let snapshot = compose_snapshot(&self.fragments, &page);
        let path = route.snapshot_path(&self.output_root);
        write_atomic(&path, snapshot.as_bytes()).await?;

        debug!("Wrote snapshot for {} to {}", route, path.display());
        Ok(SyncOutcome {
            route: route.clone(),
            path,
            completeness,
        })
    }

    /// Synchronize every route. Failures are collected per route; one
    /// route failing never stops the others.
    pub async fn sync_all<'r, I>(&self, routes: I) -> SyncSummary
    where
        I: IntoIterator<Item = &'r Route>,
    {
        let mut summary = SyncSummary::default();

        for route in routes {
            match self.sync_route(route).await {
                Ok(outcome) => summary.synced.push(outcome),
                Err(e) => {
                    warn!("Sync failed for {}: {}", route, e);
                    summary.failed.push((route.clone(), e));
                }
            }
        }

        info!(
            "Synchronized {} route(s), {} failed",
            summary.synced.len(),
            summary.failed.len()
        );
        summary
    }
}

pub(crate) fn parse_selector(selector: &str) -> SyncResult<Selector> {
    Selector::parse(selector).map_err(|e| SyncError::InvalidSelector {
        selector: selector.to_string(),
        reason: format!("{:?}", e),
    })
}

/// Locate the primary content region (first matching selector wins) and
/// the optional footer
pub fn extract_regions(
    html: &str,
    content_selectors: &[Selector],
    footer_selector: &Selector,
) -> Option<ExtractedPage> {
    let document = Html::parse_document(html);

    let content = content_selectors
        .iter()
        .find_map(|selector| document.select(selector).next())
        .map(Region::from_element)?;

    let footer = document.select(footer_selector).next().map(Region::from_element);

    let lang = Selector::parse("html")
        .ok()
        .and_then(|s| document.select(&s).next())
        .and_then(|html| html.value().attr("lang"))
        .map(str::to_string);

    let title = Selector::parse("head > title")
        .ok()
        .and_then(|s| document.select(&s).next())
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    Some(ExtractedPage {
        content,
        footer,
        lang,
        title,
    })
}

/// Presence check on the extracted content: `len / len`, so 1.0 when
/// anything was extracted and 0.0 when the region is blank
pub fn completeness_ratio(content: &str) -> f64 {
    let len = content.trim().len();
    if len == 0 {
        0.0
    } else {
        len as f64 / len as f64
    }
}

/// Compose the snapshot document: head fragment, top panel, primary
/// content, footer
pub fn compose_snapshot(fragments: &SharedFragments, page: &ExtractedPage) -> String {
    let mut out = String::from("<!DOCTYPE html>\n");

    match &page.lang {
        Some(lang) => out.push_str(&format!("<html lang=\"{}\">\n", escape_attr(lang))),
        None => out.push_str("<html>\n"),
    }

    out.push_str("<head>\n");
    out.push_str(fragments.head.trim_end());
    out.push('\n');
    if let Some(title) = &page.title {
        if !fragments.head.contains("<title") {
            out.push_str(&format!("<title>{}</title>\n", escape_text(title)));
        }
    }
    out.push_str("</head>\n<body>\n");

    out.push_str(fragments.top_panel.trim_end());
    out.push('\n');
    out.push_str(&page.content.render());
    out.push('\n');
    if let Some(footer) = &page.footer {
        out.push_str(&footer.render());
        out.push('\n');
    }

    out.push_str("</body>\n</html>\n");
    out
}

/// Write through a temporary file in the same directory so readers never
/// see a partial snapshot. A failed write leaves nothing behind.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    tokio::fs::create_dir_all(&parent).await?;

    let path = path.to_path_buf();
    let contents = contents.to_vec();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        let mut tmp = tempfile::NamedTempFile::new_in(&parent)?;
        tmp.write_all(&contents)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
}

pub(crate) fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub(crate) fn escape_text(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIVE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><title>About us</title><link rel="stylesheet" href="/live.css"></head>
<body>
<nav>live nav</nav>
<main id="main" class="page &quot;wide&quot;"><h1>About</h1><p>We run events.</p></main>
<footer class="site-footer"><p>&copy; Example</p></footer>
</body>
</html>"#;

    fn selectors() -> (Vec<Selector>, Selector) {
        (
            vec![parse_selector("main").unwrap(), parse_selector("#content").unwrap()],
            parse_selector("footer").unwrap(),
        )
    }

    fn fragments() -> SharedFragments {
        SharedFragments {
            head: "<meta charset=\"utf-8\">\n<link rel=\"stylesheet\" href=\"/css/site.css\">\n".to_string(),
            top_panel: "<header class=\"top-panel\">Example</header>\n".to_string(),
        }
    }

    #[test]
    fn test_extract_prefers_main() {
        let (content, footer) = selectors();
        let page = extract_regions(LIVE, &content, &footer).unwrap();

        assert_eq!(page.content.tag_name, "main");
        assert_eq!(page.content.open_tag, r#"<main class="page &quot;wide&quot;" id="main">"#);
        assert_eq!(page.content.inner, "<h1>About</h1><p>We run events.</p>");
        assert_eq!(page.footer.as_ref().unwrap().inner, "<p>© Example</p>");
        assert_eq!(page.lang.as_deref(), Some("en"));
        assert_eq!(page.title.as_deref(), Some("About us"));
    }

    #[test]
    fn test_extract_falls_back_to_generic_container() {
        let (content, footer) = selectors();
        let html = r#"<html><body><div id="content"><p>Old layout</p></div></body></html>"#;
        let page = extract_regions(html, &content, &footer).unwrap();

        assert_eq!(page.content.tag_name, "div");
        assert_eq!(page.content.inner, "<p>Old layout</p>");
        assert!(page.footer.is_none());
    }

    #[test]
    fn test_extract_without_region() {
        let (content, footer) = selectors();
        let html = r#"<html><body><section>No container</section></body></html>"#;
        assert!(extract_regions(html, &content, &footer).is_none());
    }

    #[test]
    fn test_completeness_ratio_is_presence_check() {
        assert_eq!(completeness_ratio("<p>x</p>"), 1.0);
        assert_eq!(completeness_ratio("   \n "), 0.0);
        assert_eq!(completeness_ratio(""), 0.0);
    }

    #[test]
    fn test_compose_order() {
        let (content, footer) = selectors();
        let page = extract_regions(LIVE, &content, &footer).unwrap();
        let snapshot = compose_snapshot(&fragments(), &page);

        assert!(snapshot.starts_with("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset"));
        let head = snapshot.find("/css/site.css").unwrap();
        let title = snapshot.find("<title>About us</title>").unwrap();
        let top = snapshot.find("top-panel").unwrap();
        let main = snapshot.find("<h1>About</h1>").unwrap();
        let foot = snapshot.find("site-footer").unwrap();
        assert!(head < title && title < top && top < main && main < foot);
        assert!(!snapshot.contains("live nav"));
        assert!(!snapshot.contains("/live.css"));
        assert!(snapshot.ends_with("</body>\n</html>\n"));
    }

    #[test]
    fn test_compose_is_deterministic() {
        let (content, footer) = selectors();
        let a = compose_snapshot(&fragments(), &extract_regions(LIVE, &content, &footer).unwrap());
        let b = compose_snapshot(&fragments(), &extract_regions(LIVE, &content, &footer).unwrap());
        assert_eq!(a, b);
    }

    #[test]
    fn test_fragments_load_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = SharedFragments::load(&dir.path().join("head.html"), &dir.path().join("top.html"))
            .unwrap_err();
        assert!(matches!(err, SyncError::Fragment { .. }));
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("about-us/index.html");

        write_atomic(&path, b"<p>one</p>").await.unwrap();
        write_atomic(&path, b"<p>two</p>").await.unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "<p>two</p>");
        assert_eq!(entries(&dir.path().join("about-us")), vec!["index.html"]);
    }

    #[tokio::test]
    async fn test_write_atomic_failure_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the snapshot file should go makes the rename fail
        let path = dir.path().join("events/index.html");
        std::fs::create_dir_all(&path).unwrap();

        assert!(write_atomic(&path, b"<p>x</p>").await.is_err());
        assert_eq!(entries(&dir.path().join("events")), vec!["index.html"]);
    }
}
