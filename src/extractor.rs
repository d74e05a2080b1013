//! Heuristic image discovery over raw page content.
//!
//! Each heuristic is a pure function over the page text. Results are resolved
//! against the page URL, filtered to known image extensions and screened for
//! structured-data leftovers before being merged into one ordered set.

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;
use url::Url;

use crate::detector;
use crate::models::file_extension;
use crate::registry::SiteRuleRegistry;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "avif", "bmp"];

const IMAGE_ATTRIBUTES: &[&str] = &["src", "data-src", "data-original", "data-lazy-src", "data-url"];
const SRCSET_ATTRIBUTES: &[&str] = &["srcset", "data-srcset", "data-lazy-srcset"];

const SUSPICIOUS_FRAGMENTS: &[&str] = &[
    "%25", "%5c", "%22", "&quot;", "&amp;amp;", "&#", "\\u00",
];

const FALSE_POSITIVE_PHRASES: &[&str] = &["schema.org", "@context", "@type", "imageobject", "og:image"];

/// Insertion-ordered set of URLs.
#[derive(Debug, Default, Clone)]
pub struct OrderedUrlSet {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl OrderedUrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: String) -> bool {
        if self.seen.contains(&url) {
            return false;
        }
        self.seen.insert(url.clone());
        self.items.push(url);
        true
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn into_vec(self) -> Vec<String> {
        self.items
    }
}

impl Extend<String> for OrderedUrlSet {
    fn extend<T: IntoIterator<Item = String>>(&mut self, iter: T) {
        for url in iter {
            self.insert(url);
        }
    }
}

pub struct Extractor {
    sites: SiteRuleRegistry,
    max_sequence_length: u32,
}

impl Extractor {
    pub fn new(max_sequence_length: u32) -> Self {
        Self::with_registry(SiteRuleRegistry::new(), max_sequence_length)
    }

    pub fn with_registry(sites: SiteRuleRegistry, max_sequence_length: u32) -> Self {
        Self {
            sites,
            max_sequence_length,
        }
    }

    /// Ordered, de-duplicated absolute image URLs found in `body`. With
    /// `generate_sequential_guesses`, candidates for every detected
    /// sequential pattern are appended.
    pub fn extract(&self, body: &str, base_url: &str, generate_sequential_guesses: bool) -> Vec<String> {
        let Ok(base) = Url::parse(base_url) else {
            return Vec::new();
        };

        let heuristic = img_tag_urls(body, &base)
            .into_iter()
            .chain(noscript_urls(body, &base))
            .chain(css_urls(body, &base))
            .chain(script_urls(body, &base))
            .chain(href_image_urls(body, &base));

        let mut found = OrderedUrlSet::new();
        found.extend(heuristic.filter(|url| is_acceptable_image_url(url)));
        // Site rules read known reader payloads; their URLs may lack an extension.
        found.extend(self.sites.extract(body, &base).into_iter().filter(|url| !is_suspicious_url(url)));

        if generate_sequential_guesses {
            let discovered = found.len();
            let observed = found.clone();
            for pattern in detector::detect_all(observed.iter()) {
                let start = detector::lowest_index(observed.iter(), &pattern).unwrap_or(1);
                let end = start.saturating_add(self.max_sequence_length);
                found.extend(pattern.candidates(start..end));
            }
            debug!(
                "[EXTRACTOR] {} discovered + {} sequential guesses",
                discovered,
                found.len() - discovered
            );
        }

        debug!("[EXTRACTOR] {} image URL(s) from {}", found.len(), base_url);
        found.into_vec()
    }
}

fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim().replace("&amp;", "&");
    if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("blob:") || raw.starts_with("javascript:") {
        return None;
    }
    if raw.contains(['{', '}', '[', ']']) {
        return None;
    }
    base.join(&raw).ok().map(|u| u.to_string())
}

fn resolve_all<'a, I>(base: &Url, raws: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    raws.into_iter().filter_map(|raw| resolve(base, raw)).collect()
}

pub fn has_image_extension(url: &str) -> bool {
    file_extension(url).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// Rejects malformed, over-encoded or structured-data-looking URLs.
pub fn is_suspicious_url(url: &str) -> bool {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return true;
    }
    if url.contains(['{', '}', '[', ']', '"', '\'', '<', '>', '\\']) || url.chars().any(char::is_whitespace) {
        return true;
    }
    let lower = url.to_ascii_lowercase();
    SUSPICIOUS_FRAGMENTS.iter().any(|f| lower.contains(f)) || FALSE_POSITIVE_PHRASES.iter().any(|p| lower.contains(p))
}

pub fn is_acceptable_image_url(url: &str) -> bool {
    !is_suspicious_url(url) && has_image_extension(url)
}

/// First URL of every `srcset` entry.
fn srcset_urls(srcset: &str) -> impl Iterator<Item = &str> {
    srcset
        .split(',')
        .filter_map(|entry| entry.split_whitespace().next())
}

fn image_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("img, picture source").expect("img selector"))
}

fn anchor_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("a[href]").expect("anchor selector"))
}

fn collect_image_attributes(document: &Html) -> Vec<String> {
    let mut raws = Vec::new();
    for element in document.select(image_selector()) {
        let value = element.value();
        for attr in IMAGE_ATTRIBUTES {
            if let Some(v) = value.attr(attr) {
                raws.push(v.to_string());
            }
        }
        for attr in SRCSET_ATTRIBUTES {
            if let Some(v) = value.attr(attr) {
                raws.extend(srcset_urls(v).map(str::to_string));
            }
        }
    }
    raws
}

/// `src`, lazy-load attributes and `srcset` variants of image tags.
pub fn img_tag_urls(body: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(body);
    let raws = collect_image_attributes(&document);
    resolve_all(base, raws.iter().map(String::as_str))
}

fn noscript_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<noscript[^>]*>(.*?)</noscript>").expect("noscript regex"))
}

/// Image tags embedded in `<noscript>`, which HTML parsers keep as raw text.
pub fn noscript_urls(body: &str, base: &Url) -> Vec<String> {
    let mut urls = Vec::new();
    for caps in noscript_regex().captures_iter(body) {
        let fragment = Html::parse_fragment(&caps[1]);
        let raws = collect_image_attributes(&fragment);
        urls.extend(resolve_all(base, raws.iter().map(String::as_str)));
    }
    urls
}

fn css_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:background(?:-image)?|content)\s*:\s*[^;{}]*?url\(\s*['"]?([^'")]+?)['"]?\s*\)"#)
            .expect("css url regex")
    })
}

/// `background-image`, `background` and `content` URLs in styles.
pub fn css_urls(body: &str, base: &Url) -> Vec<String> {
    let raws: Vec<&str> = css_url_regex()
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    resolve_all(base, raws)
}

fn script_block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<script[^>]*>(.*?)</script>").expect("script regex"))
}

fn quoted_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"["']([^"'\s<>]+?\.(?:jpe?g|png|gif|webp|avif|bmp)(?:\?[^"'\s<>]*)?)["']"#)
            .expect("quoted image regex")
    })
}

fn bare_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://[^\s"'<>\\,\])]+?\.(?:jpe?g|png|gif|webp|avif|bmp)(?:\?[^\s"'<>\\,\])]*)?"#)
            .expect("bare image regex")
    })
}

fn unescape_script(text: &str) -> String {
    text.replace("\\/", "/").replace("\\u002F", "/").replace("\\u002f", "/")
}

fn urls_in_script_text(text: &str, base: &Url) -> Vec<String> {
    let text = unescape_script(text);
    let mut raws: Vec<&str> = quoted_image_regex()
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect();
    raws.extend(bare_image_regex().find_iter(&text).map(|m| m.as_str()));
    resolve_all(base, raws)
}

/// Image URLs inside inline scripts and JSON, including array literals and
/// `\/`-escaped strings. A body that is itself JSON is scanned whole.
pub fn script_urls(body: &str, base: &Url) -> Vec<String> {
    let trimmed = body.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return urls_in_script_text(body, base);
    }

    script_block_regex()
        .captures_iter(body)
        .flat_map(|caps| urls_in_script_text(&caps[1], base))
        .collect()
}

/// Links that point straight at image files.
pub fn href_image_urls(body: &str, base: &Url) -> Vec<String> {
    let document = Html::parse_document(body);
    let raws: Vec<&str> = document
        .select(anchor_selector())
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| has_image_extension(href))
        .collect();
    resolve_all(base, raws)
}

/// Resolved image URL -> `alt` text, for the images that carry one.
pub fn alt_texts(body: &str, base_url: &str) -> HashMap<String, String> {
    let Ok(base) = Url::parse(base_url) else {
        return HashMap::new();
    };
    let document = Html::parse_document(body);
    let mut alts = HashMap::new();

    for element in document.select(image_selector()) {
        let value = element.value();
        let Some(alt) = value.attr("alt").map(str::trim).filter(|a| !a.is_empty()) else {
            continue;
        };
        for attr in IMAGE_ATTRIBUTES {
            if let Some(url) = value.attr(attr).and_then(|raw| resolve(&base, raw)) {
                alts.entry(url).or_insert_with(|| alt.to_string());
            }
        }
    }
    alts
}
