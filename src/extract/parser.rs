//! Markup helpers for extraction
//!
//! Link resolution, image source collection and field reading over a parsed
//! [`Html`] document. Nothing here holds on to the document, so callers can
//! parse, read and drop it without crossing an await point.

use crate::extract::rules::FieldSelector;
use scraper::{ElementRef, Html, Selector};
use url::Url;

/// Resolves an href to an absolute http(s) URL
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel: schemes
/// - data: URIs
/// - fragment-only links (same page anchors)
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
pub fn resolve_link(href: &str, base_url: &Url) -> Option<Url> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let lower = href.to_ascii_lowercase();
    if lower.starts_with("javascript:")
        || lower.starts_with("mailto:")
        || lower.starts_with("tel:")
        || lower.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute) if absolute.scheme() == "http" || absolute.scheme() == "https" => {
            Some(absolute)
        }
        _ => None,
    }
}

/// Collects every followable link in the document, in document order
///
/// Anchors carrying a `download` attribute are skipped.
pub fn collect_links(document: &Html, selector: &Selector, base_url: &Url) -> Vec<Url> {
    document
        .select(selector)
        .filter(|element| element.value().attr("download").is_none())
        .filter_map(|element| element.value().attr("href"))
        .filter_map(|href| resolve_link(href, base_url))
        .collect()
}

/// Resolves an image `src` to the key used to capture it
///
/// `data:` URIs are kept verbatim; everything else must resolve to http(s).
pub fn resolve_image_source(src: &str, base_url: &Url) -> Option<String> {
    let src = src.trim();
    if src.is_empty() {
        return None;
    }
    if src.get(..5).is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:")) {
        return Some(src.to_string());
    }
    resolve_link(src, base_url).map(String::from)
}

/// Image sources under `scope`, de-duplicated, at most `limit` of them
pub fn image_sources(
    scope: ElementRef<'_>,
    selector: &Selector,
    base_url: &Url,
    limit: usize,
) -> Vec<String> {
    let mut sources: Vec<String> = Vec::new();
    for element in scope.select(selector) {
        if sources.len() >= limit {
            break;
        }
        let Some(source) = element
            .value()
            .attr("src")
            .and_then(|src| resolve_image_source(src, base_url))
        else {
            continue;
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    sources
}

/// Image sources for the whole page
pub fn page_image_sources(html: &str, selector: &Selector, base_url: &Url, limit: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    image_sources(document.root_element(), selector, base_url, limit)
}

/// Reads one field from `scope`
///
/// Takes the first element matching the field's selector. With `attr` set the
/// attribute value is used (`href` and `src` are made absolute), otherwise
/// the element's text. Whitespace is collapsed; empty values count as absent.
pub fn read_field(scope: ElementRef<'_>, field: &FieldSelector, base_url: &Url) -> Option<String> {
    let element = scope.select(&field.selector).next()?;

    let raw = match field.attr.as_deref() {
        Some(attr @ ("href" | "src")) => {
            let value = element.value().attr(attr)?;
            base_url
                .join(value.trim())
                .map(String::from)
                .unwrap_or_else(|_| value.to_string())
        }
        Some(attr) => element.value().attr(attr)?.to_string(),
        None => element.text().collect::<Vec<_>>().join(" "),
    };

    let value = normalize_whitespace(&raw);
    (!value.is_empty()).then_some(value)
}

/// Trims and collapses every run of whitespace to a single space
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
