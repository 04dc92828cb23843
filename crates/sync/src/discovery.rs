//! Route discovery from the site index, with a link-crawl fallback

use std::collections::BTreeSet;

use scraper::{Html, Selector};
use sitemirror_common::Route;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::HttpFetcher;
use crate::error::{IndexError, SyncResult};

/// Where a set of routes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoverySource {
    /// The site's URL index
    Index,
    /// Same-origin links on the home page
    Crawl,
}

impl std::fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiscoverySource::Index => write!(f, "site index"),
            DiscoverySource::Crawl => write!(f, "home page links"),
        }
    }
}

/// Result of a discovery run
#[derive(Debug, Clone)]
pub struct Discovery {
    pub routes: BTreeSet<Route>,
    pub source: DiscoverySource,
}

/// Resolves the set of routes to synchronize and validate
pub struct RouteDiscovery<'a> {
    fetcher: &'a HttpFetcher,
    origin: Url,
    index_path: String,
}

impl<'a> RouteDiscovery<'a> {
    pub fn new(fetcher: &'a HttpFetcher, origin: Url, index_path: impl Into<String>) -> Self {
        Self {
            fetcher,
            origin: directory_url(origin),
            index_path: index_path.into(),
        }
    }

    /// Discover routes from the index, falling back to crawling the home
    /// page. Only a failure to retrieve the home page is fatal.
    pub async fn discover(&self) -> SyncResult<Discovery> {
        match self.from_index().await {
            Ok(routes) => {
                info!("Discovered {} route(s) from the site index", routes.len());
                return Ok(Discovery {
                    routes,
                    source: DiscoverySource::Index,
                });
            }
            Err(reason) => {
                warn!("Site index unusable ({}), crawling home page links", reason);
            }
        }

        let routes = self.from_home_page().await?;
        info!("Discovered {} route(s) from home page links", routes.len());
        Ok(Discovery {
            routes,
            source: DiscoverySource::Crawl,
        })
    }

    async fn from_index(&self) -> Result<BTreeSet<Route>, IndexError> {
        let index_url = self
            .origin
            .join(&self.index_path)
            .map_err(|source| IndexError::BadPath {
                path: self.index_path.clone(),
                source,
            })?;

        let body = self
            .fetcher
            .fetch_text(index_url.as_str())
            .await
            .map_err(|e| IndexError::Unreachable(Box::new(e)))?;

        match parse_index(&body, &self.origin)? {
            IndexDocument::Routes(routes) => Ok(routes),
            IndexDocument::Nested(children) => {
                let mut routes = BTreeSet::new();
                for child in children {
                    debug!("Following nested index {}", child);
                    match self.fetcher.fetch_text(child.as_str()).await {
                        Ok(body) => match parse_index(&body, &self.origin) {
                            Ok(IndexDocument::Routes(found)) => routes.extend(found),
                            Ok(IndexDocument::Nested(_)) => {
                                warn!("Ignoring doubly nested index {}", child)
                            }
                            Err(e) => warn!("Skipping nested index {}: {}", child, e),
                        },
                        Err(e) => warn!("Skipping nested index {}: {}", child, e),
                    }
                }
                if routes.is_empty() {
                    return Err(IndexError::NoLocations);
                }
                Ok(routes)
            }
        }
    }

    async fn from_home_page(&self) -> SyncResult<BTreeSet<Route>> {
        let body = self.fetcher.fetch_text(self.origin.as_str()).await?;
        Ok(parse_links(&body, &self.origin, &self.origin))
    }
}

/// A parsed site index: either a list of page locations or a list of
/// further index documents
#[derive(Debug, PartialEq)]
pub enum IndexDocument {
    Routes(BTreeSet<Route>),
    Nested(Vec<Url>),
}

/// Parse a location-list index (`<urlset>` or `<sitemapindex>`).
///
/// Locations outside the origin are ignored. An index with no usable
/// locations is treated as unparsable so that discovery falls back to
/// crawling.
pub fn parse_index(xml: &str, origin: &Url) -> Result<IndexDocument, IndexError> {
    let doc = roxmltree::Document::parse(xml)?;

    let locations = doc
        .descendants()
        .filter(|n| n.is_element() && n.tag_name().name() == "loc")
        .filter_map(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty());

    match doc.root_element().tag_name().name() {
        "urlset" => {
            let routes: BTreeSet<Route> = locations
                .filter_map(|loc| Route::from_location(loc, origin, origin))
                .collect();
            if routes.is_empty() {
                return Err(IndexError::NoLocations);
            }
            Ok(IndexDocument::Routes(routes))
        }
        "sitemapindex" => {
            let children: Vec<Url> = locations
                .filter_map(|loc| origin.join(loc).ok())
                .filter(|url| url.origin() == origin.origin())
                .collect();
            if children.is_empty() {
                return Err(IndexError::NoNestedIndexes);
            }
            Ok(IndexDocument::Nested(children))
        }
        other => Err(IndexError::UnexpectedRoot(other.to_string())),
    }
}

/// Collect same-origin anchor targets of a page. The root route is always
/// included.
pub fn parse_links(html: &str, page_url: &Url, origin: &Url) -> BTreeSet<Route> {
    let document = Html::parse_document(html);
    let mut routes = BTreeSet::new();
    routes.insert(Route::root());

    let anchors = match Selector::parse("a[href]") {
        Ok(selector) => selector,
        Err(_) => return routes,
    };

    for element in document.select(&anchors) {
        if let Some(href) = element.value().attr("href") {
            if let Some(route) = Route::from_location(href, page_url, origin) {
                routes.insert(route);
            }
        }
    }

    routes
}

/// Ensure the URL path ends with a slash so relative joins stay under it
fn directory_url(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url.set_query(None);
    url.set_fragment(None);
    url
}
