//! Normalized site routes

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

use crate::error::{Error, Result};

/// File name every route's snapshot is written as
pub const SNAPSHOT_FILE: &str = "index.html";

/// A normalized relative site path.
///
/// Routes never carry a leading or trailing slash and are compared
/// case-sensitively. The empty route is the site root. Segments are held
/// percent-decoded, the way a static file server maps request paths onto
/// directories; [`Route::url_on`] encodes them again.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route(String);

impl Route {
    /// The site root
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Normalize a raw relative path into a route.
    ///
    /// Empty segments are dropped, so `"/a//b/"` becomes `"a/b"`. Parent
    /// and current-directory segments are rejected because the route is
    /// later used to build a filesystem path under the output root.
    pub fn new(raw: &str) -> Result<Self> {
        if raw.contains('\\') {
            return Err(Error::InvalidRoute(raw.to_string()));
        }

        let mut segments = Vec::new();
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(Error::InvalidRoute(raw.to_string()));
            }
            segments.push(segment);
        }

        Ok(Self(segments.join("/")))
    }

    /// Resolve `location` against `base` and normalize it relative to
    /// `origin`.
    ///
    /// Returns `None` for anything that does not live under the origin:
    /// other hosts, other schemes (`mailto:`, `javascript:`), or paths
    /// outside the origin's base path. Query strings and fragments are
    /// dropped.
    pub fn from_location(location: &str, base: &Url, origin: &Url) -> Option<Self> {
        let resolved = base.join(location.trim()).ok()?;
        Self::from_url(&resolved, origin)
    }

    /// Normalize an absolute URL relative to `origin`
    pub fn from_url(url: &Url, origin: &Url) -> Option<Self> {
        if url.origin() != origin.origin() {
            return None;
        }

        let base_path = origin.path().trim_end_matches('/');
        let path = url.path();
        let relative = if base_path.is_empty() {
            path
        } else if path == base_path {
            ""
        } else {
            path.strip_prefix(base_path)?.strip_prefix('/')?
        };

        let mut segments = Vec::new();
        for segment in relative.split('/').filter(|s| !s.is_empty()) {
            let decoded = urlencoding::decode(segment).ok()?;
            // An encoded separator would change the directory layout
            if decoded.contains('/') || decoded.contains('\\') {
                return None;
            }
            segments.push(decoded.into_owned());
        }

        Self::new(&segments.join("/")).ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Absolute URL of this route on `base` (`base/route`), each segment
    /// percent-encoded
    pub fn url_on(&self, base: &str) -> String {
        let encoded: Vec<_> = self.0.split('/').map(urlencoding::encode).collect();
        format!("{}/{}", base.trim_end_matches('/'), encoded.join("/"))
    }

    /// Where this route's snapshot lives under `root`
    pub fn snapshot_path(&self, root: &Path) -> PathBuf {
        let mut path = root.to_path_buf();
        for segment in self.0.split('/').filter(|s| !s.is_empty()) {
            path.push(segment);
        }
        path.join(SNAPSHOT_FILE)
    }

    /// A flat, filesystem-safe name for per-route artifacts such as diff
    /// images. The route is percent-encoded as a whole, so separators
    /// become `%2F` and distinct routes never share a name; the root is
    /// `%2F`.
    pub fn flat_name(&self) -> String {
        if self.is_root() {
            urlencoding::encode("/").into_owned()
        } else {
            urlencoding::encode(&self.0).into_owned()
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "/{}", self.0)
        }
    }
}

impl TryFrom<String> for Route {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(&value)
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.0
    }
}
