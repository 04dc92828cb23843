//! Best-effort snapshot repair between validation rounds
//!
//! None of these fixes is required to succeed. Network failures while
//! consulting the live page mean "no repair applied", not an error.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::{Captures, Regex};
use scraper::{Html, Selector};
use sitemirror_common::Route;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::HttpFetcher;
use crate::synchronizer::{escape_text, write_atomic, SharedFragments};

/// What the repair pass changed in one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairOutcome {
    pub route: Route,
    pub placeholders_fixed: usize,
    pub fragments_inserted: usize,
    pub texts_resynced: usize,
}

impl RepairOutcome {
    pub fn changed(&self) -> bool {
        self.placeholders_fixed + self.fragments_inserted + self.texts_resynced > 0
    }
}

/// Applies best-effort fixes to existing snapshots
pub struct Repairer {
    fetcher: HttpFetcher,
    origin: Url,
    fragments: SharedFragments,
    output_root: PathBuf,
}

impl Repairer {
    pub fn new(
        fetcher: HttpFetcher,
        origin: Url,
        fragments: SharedFragments,
        output_root: PathBuf,
    ) -> Self {
        Self {
            fetcher,
            origin,
            fragments,
            output_root,
        }
    }

    pub fn set_fragments(&mut self, fragments: SharedFragments) {
        self.fragments = fragments;
    }

    /// Repair one snapshot in place. Returns `None` when the snapshot could
    /// not be read or written.
    pub async fn repair_route(&self, route: &Route) -> Option<RepairOutcome> {
        let path = route.snapshot_path(&self.output_root);
        let original = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(e) => {
                debug!("No snapshot to repair for {}: {}", route, e);
                return None;
            }
        };

        let mut outcome = RepairOutcome {
            route: route.clone(),
            ..Default::default()
        };

        let (html, fixed) = normalize_class_placeholders(&original);
        outcome.placeholders_fixed = fixed;

        let (mut html, inserted) = ensure_fragments(&html, &self.fragments);
        outcome.fragments_inserted = inserted;

        if let Some(live) = self.fetch_live(route).await {
            let live_texts = live_id_texts(&live);
            let (resynced, count) = resync_id_texts(&html, &live_texts);
            html = resynced;
            outcome.texts_resynced = count;
        }

        if html != original {
            if let Err(e) = write_atomic(&path, html.as_bytes()).await {
                warn!("Could not write repaired snapshot for {}: {}", route, e);
                return None;
            }
            info!(
                "Repaired {}: {} placeholder(s), {} fragment(s), {} text(s)",
                route, outcome.placeholders_fixed, outcome.fragments_inserted, outcome.texts_resynced
            );
        }

        Some(outcome)
    }

    /// Repair every route, skipping the ones that cannot be repaired
    pub async fn repair_all<'r, I>(&self, routes: I) -> Vec<RepairOutcome>
    where
        I: IntoIterator<Item = &'r Route>,
    {
        let mut outcomes = Vec::new();
        for route in routes {
            if let Some(outcome) = self.repair_route(route).await {
                outcomes.push(outcome);
            }
        }
        outcomes
    }

    async fn fetch_live(&self, route: &Route) -> Option<String> {
        let url = route.url_on(self.origin.as_str());
        match self.fetcher.fetch_text(&url).await {
            Ok(body) => Some(body),
            Err(e) => {
                debug!("Skipping live text resync for {}: {}", route, e);
                None
            }
        }
    }
}

fn class_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"\sclass\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("valid class regex")
    })
}

fn placeholder_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{.*?\}\}|\$\{.*?\}").expect("valid placeholder regex"))
}

fn leaf_element_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<([a-zA-Z][a-zA-Z0-9-]*)(\s[^<>]*)>([^<]*)</([a-zA-Z][a-zA-Z0-9-]*)\s*>")
            .expect("valid element regex")
    })
}

fn id_attr_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"\sid\s*=\s*"([^"]*)""#).expect("valid id regex"))
}

/// Strip unrendered template placeholders (`{{ x }}`, `${x}`) and
/// `undefined`/`null` tokens from class attributes. A class attribute left
/// empty is removed. Returns the new markup and the number of attributes
/// changed.
pub fn normalize_class_placeholders(html: &str) -> (String, usize) {
    let mut changed = 0;

    let out = class_attr_regex().replace_all(html, |caps: &Captures| {
        let value = caps
            .get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str())
            .unwrap_or_default();

        let stripped = placeholder_regex().replace_all(value, " ");
        let tokens: Vec<&str> = stripped
            .split_whitespace()
            .filter(|t| *t != "undefined" && *t != "null")
            .collect();
        let normalized = tokens.join(" ");

        if normalized == value {
            return caps[0].to_string();
        }

        changed += 1;
        if normalized.is_empty() {
            String::new()
        } else {
            format!(" class=\"{}\"", normalized)
        }
    });

    (out.into_owned(), changed)
}

/// Insert the shared head and top-panel fragments when a snapshot lost
/// them. Returns the new markup and how many fragments were inserted.
pub fn ensure_fragments(html: &str, fragments: &SharedFragments) -> (String, usize) {
    let mut out = html.to_string();
    let mut inserted = 0;

    for (fragment, tag) in [(&fragments.head, "head"), (&fragments.top_panel, "body")] {
        let fragment = fragment.trim();
        if fragment.is_empty() || out.contains(fragment) {
            continue;
        }

        if let Some(at) = after_open_tag(&out, tag) {
            out.insert_str(at, &format!("\n{}", fragment));
            inserted += 1;
        }
    }

    (out, inserted)
}

/// Byte offset just past the first `<tag ...>` opening tag
fn after_open_tag(html: &str, tag: &str) -> Option<usize> {
    let pattern = format!(r"(?i)<{}(\s[^>]*)?>", regex::escape(tag));
    let re = Regex::new(&pattern).ok()?;
    re.find(html).map(|m| m.end())
}

/// Text content of every live element carrying an `id` and no child
/// elements. The first element wins when ids repeat.
pub fn live_id_texts(html: &str) -> HashMap<String, String> {
    let document = Html::parse_document(html);
    let mut texts = HashMap::new();

    let with_id = match Selector::parse("[id]") {
        Ok(selector) => selector,
        Err(_) => return texts,
    };

    for element in document.select(&with_id) {
        if element.children().any(|c| c.value().is_element()) {
            continue;
        }
        if let Some(id) = element.value().id() {
            texts
                .entry(id.to_string())
                .or_insert_with(|| element.text().collect::<String>());
        }
    }

    texts
}

/// Replace the text of local leaf elements whose `id` matches a live
/// element with different text. Returns the new markup and the number of
/// elements updated.
pub fn resync_id_texts(html: &str, live_texts: &HashMap<String, String>) -> (String, usize) {
    if live_texts.is_empty() {
        return (html.to_string(), 0);
    }

    let mut changed = 0;
    let out = leaf_element_regex().replace_all(html, |caps: &Captures| {
        let whole = caps[0].to_string();
        if !caps[1].eq_ignore_ascii_case(&caps[4]) {
            return whole;
        }

        let id = match id_attr_regex().captures(&caps[2]) {
            Some(id) => id[1].to_string(),
            None => return whole,
        };

        match live_texts.get(&id) {
            Some(live) => {
                let escaped = escape_text(live);
                if escaped == caps[3] {
                    whole
                } else {
                    changed += 1;
                    format!("<{}{}>{}</{}>", &caps[1], &caps[2], escaped, &caps[4])
                }
            }
            None => whole,
        }
    });

    (out.into_owned(), changed)
}
