//! Content extraction: mining an ordered article list out of arbitrary HTML.
//!
//! Extraction is selector-driven. A per-domain [`SiteProfile`] chooses the
//! selectors; unknown domains use the generic default profile. Individual
//! candidate failures are logged and skipped; only an empty final list is
//! an error.

mod profiles;

pub use profiles::{
    profile_for, SiteProfile, AUTHOR_SELECTORS, BASE_REMOVE_SELECTORS, CATEGORY_SELECTORS,
    DEFAULT_PROFILE,
};

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use ego_tree::NodeId;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use thiserror::Error;
use url::Url;

use crate::error::CoreError;
use crate::feed::Article;
use crate::util::{collapse_whitespace, registrable_domain, truncate_chars};

/// Candidates with less visible text than this are noise.
const MIN_CANDIDATE_TEXT: usize = 50;
/// Titles shorter than this do not identify an article.
const MIN_TITLE_CHARS: usize = 10;
/// A description selector must yield at least this much text to be used.
const MIN_DESCRIPTION_SELECTOR_CHARS: usize = 30;
/// Articles whose final description is shorter than this are dropped.
const MIN_DESCRIPTION_CHARS: usize = 20;
/// Fallback description: leading slice of the candidate's own text.
const FALLBACK_DESCRIPTION_CHARS: usize = 200;
/// Hard cap on description length.
const MAX_DESCRIPTION_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The page produced no article that survived validation.
    #[error("no articles extracted from {0}")]
    NoArticles(String),
}

impl From<ExtractError> for CoreError {
    fn from(e: ExtractError) -> Self {
        match e {
            ExtractError::NoArticles(url) => CoreError::NoArticles(url),
        }
    }
}

/// Extracts articles from `html`, ordered by publication date descending
/// (ties keep discovery order). `now` is the fallback publication time and
/// is injected so callers control determinism.
///
/// # Errors
///
/// [`ExtractError::NoArticles`] when nothing survives post-validation.
pub fn extract(
    html: &str,
    page_url: &Url,
    max_articles: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Article>, ExtractError> {
    let doc = Html::parse_document(html);
    let profile = profile_for(registrable_domain(page_url));
    let removed = removal_set(&doc, &profile);

    let candidates = collect_candidates(&doc, &profile, &removed, max_articles);
    tracing::debug!(
        page = %page_url,
        candidates = candidates.len(),
        "Collected article candidates"
    );

    let mut articles: Vec<Article> = Vec::new();
    let mut seen_links: HashSet<String> = HashSet::new();

    for candidate in candidates {
        let Some(article) = extract_fields(candidate, &profile, &removed, page_url, now) else {
            continue;
        };
        if article.title.chars().count() < MIN_TITLE_CHARS
            || article.description.chars().count() < MIN_DESCRIPTION_CHARS
        {
            continue;
        }
        if !seen_links.insert(article.link.clone()) {
            continue;
        }
        articles.push(article);
    }

    // Stable sort: equal dates keep page order
    articles.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    articles.truncate(max_articles);

    if articles.is_empty() {
        return Err(ExtractError::NoArticles(page_url.to_string()));
    }
    Ok(articles)
}

/// All node ids inside subtrees matched by the removal selectors. Visible
/// text and field lookups skip these nodes.
fn removal_set(doc: &Html, profile: &SiteProfile) -> HashSet<NodeId> {
    let mut removed = HashSet::new();
    for selector_str in BASE_REMOVE_SELECTORS
        .iter()
        .chain(profile.remove_selectors.iter())
    {
        let Ok(selector) = Selector::parse(selector_str) else {
            tracing::warn!(selector = %selector_str, "Unparseable removal selector, skipping");
            continue;
        };
        for element in doc.select(&selector) {
            for node in element.descendants() {
                removed.insert(node.id());
            }
        }
    }
    removed
}

fn collect_candidates<'a>(
    doc: &'a Html,
    profile: &SiteProfile,
    removed: &HashSet<NodeId>,
    max_articles: usize,
) -> Vec<ElementRef<'a>> {
    let budget = max_articles.saturating_mul(2);
    let mut out: Vec<ElementRef<'a>> = Vec::new();
    let mut seen_texts: HashSet<String> = HashSet::new();

    'selectors: for selector_str in profile.article_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            tracing::warn!(selector = %selector_str, "Unparseable article selector, skipping");
            continue;
        };
        for element in doc.select(&selector) {
            if removed.contains(&element.id()) {
                continue;
            }
            let text = visible_text(element, removed);
            if text.chars().count() < MIN_CANDIDATE_TEXT {
                continue;
            }
            // Dedup by trimmed text: the same node often matches several
            // article selectors
            if !seen_texts.insert(text) {
                continue;
            }
            out.push(element);
            if out.len() >= budget {
                break 'selectors;
            }
        }
    }
    out
}

/// Collapsed text of a subtree, skipping removed nodes.
fn visible_text(element: ElementRef<'_>, removed: &HashSet<NodeId>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        if removed.contains(&node.id()) {
            continue;
        }
        if let Some(text) = node.value().as_text() {
            out.push_str(&text.text);
            out.push(' ');
        }
    }
    collapse_whitespace(&out).into_owned()
}

fn extract_fields(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    removed: &HashSet<NodeId>,
    page_url: &Url,
    now: DateTime<Utc>,
) -> Option<Article> {
    let title = find_title(candidate, profile, removed)?;
    let link = find_link(candidate, profile, page_url)?;

    let description = find_description(candidate, profile, removed);
    let published_at = find_date(candidate, profile, removed, now);
    let image = find_image(candidate, profile, page_url);
    let author = first_selector_text(candidate, AUTHOR_SELECTORS, removed);
    let category = first_selector_text(candidate, CATEGORY_SELECTORS, removed);

    Some(Article {
        guid: link.clone(),
        title,
        link,
        description,
        content: None,
        author,
        category,
        image,
        published_at,
    })
}

/// First title selector yielding ≥10 chars of text, or a `title=`
/// attribute of the same length.
fn find_title(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    removed: &HashSet<NodeId>,
) -> Option<String> {
    for selector_str in profile.title_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in candidate.select(&selector) {
            if removed.contains(&element.id()) {
                continue;
            }
            let text = visible_text(element, removed);
            if text.chars().count() >= MIN_TITLE_CHARS {
                return Some(text);
            }
            if let Some(attr) = element.value().attr("title") {
                let attr = collapse_whitespace(attr);
                if attr.chars().count() >= MIN_TITLE_CHARS {
                    return Some(attr.into_owned());
                }
            }
        }
    }
    None
}

/// First `a[href]` under the link selectors, resolved against the page.
fn find_link(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    page_url: &Url,
) -> Option<String> {
    for selector_str in profile.link_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let Some(href) = element.value().attr("href") else {
                continue;
            };
            let href = href.trim();
            if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
                continue;
            }
            if let Ok(resolved) = page_url.join(href) {
                if matches!(resolved.scheme(), "http" | "https") {
                    return Some(resolved.to_string());
                }
            }
        }
    }
    // The candidate may itself be the anchor
    if let Some(href) = candidate.value().attr("href") {
        if let Ok(resolved) = page_url.join(href.trim()) {
            if matches!(resolved.scheme(), "http" | "https") {
                return Some(resolved.to_string());
            }
        }
    }
    None
}

fn find_description(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    removed: &HashSet<NodeId>,
) -> String {
    for selector_str in profile.description_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in candidate.select(&selector) {
            if removed.contains(&element.id()) {
                continue;
            }
            let text = visible_text(element, removed);
            if text.chars().count() >= MIN_DESCRIPTION_SELECTOR_CHARS {
                return truncate_chars(&text, MAX_DESCRIPTION_CHARS).into_owned();
            }
        }
    }
    let own_text = visible_text(candidate, removed);
    truncate_chars(&own_text, FALLBACK_DESCRIPTION_CHARS).into_owned()
}

/// `datetime` attribute, then `data-time`, then element text; parsed
/// permissively. Falls back to `now`.
fn find_date(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    removed: &HashSet<NodeId>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    for selector_str in profile.date_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let raw = element
                .value()
                .attr("datetime")
                .or_else(|| element.value().attr("data-time"))
                .map(str::to_owned)
                .unwrap_or_else(|| visible_text(element, removed));
            if let Some(parsed) = parse_date(raw.trim()) {
                return parsed;
            }
        }
    }
    now
}

fn find_image(
    candidate: ElementRef<'_>,
    profile: &SiteProfile,
    page_url: &Url,
) -> Option<String> {
    for selector_str in profile.image_selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        for element in candidate.select(&selector) {
            let src = element
                .value()
                .attr("src")
                .or_else(|| element.value().attr("data-src"))
                .or_else(|| element.value().attr("data-lazy-src"));
            let Some(src) = src else { continue };
            if src.trim().is_empty() || src.starts_with("data:") {
                continue;
            }
            if let Ok(resolved) = page_url.join(src.trim()) {
                return Some(resolved.to_string());
            }
        }
    }
    None
}

fn first_selector_text(
    candidate: ElementRef<'_>,
    selectors: &[&str],
    removed: &HashSet<NodeId>,
) -> Option<String> {
    for selector_str in selectors {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = candidate.select(&selector).next() {
            let text = visible_text(element, removed);
            if !text.is_empty() {
                return Some(text);
            }
        }
    }
    None
}

/// RFC-3339, RFC-2822, then locale-free permissive formats.
fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y"] {
        if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?));
        }
    }
    None
}
