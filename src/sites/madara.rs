use regex::Regex;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::traits::SiteImageRule;

/// WP-Manga (Madara) readers: lazy-loaded `data-src` images inside the
/// reading container, stored under `wp-content/uploads/WP-manga/data/`.
pub struct MadaraRule;

const READER_SELECTORS: &[&str] = &[
    ".reading-content img",
    ".entry-content img",
    ".chapter-content img",
    ".wp-manga-chapter-img",
    ".page-break img",
];

fn wp_manga_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(?:https?:)?//[^\s"'<>]+?/wp-content/uploads/WP-manga/data/[^\s"'<>]+?\.(?:jpe?g|png|webp|gif)"#)
            .expect("wp-manga regex")
    })
}

impl MadaraRule {
    fn is_reader_image(url: &str) -> bool {
        let lower = url.to_ascii_lowercase();
        !lower.contains("avatar") && !lower.contains("logo") && !lower.contains("icon")
    }

    fn reader_images(body: &str, base_url: &Url) -> Vec<String> {
        let document = Html::parse_document(body);
        let mut urls = Vec::new();

        for selector_str in READER_SELECTORS {
            let Ok(selector) = Selector::parse(selector_str) else {
                continue;
            };
            for element in document.select(&selector) {
                // Madara pads lazy attributes with whitespace and newlines
                let candidate = ["data-src", "data-lazy-src", "src"]
                    .iter()
                    .filter_map(|attr| element.value().attr(attr))
                    .map(str::trim)
                    .find(|value| !value.is_empty() && !value.starts_with("data:"));

                if let Some(raw) = candidate {
                    if let Ok(resolved) = base_url.join(raw) {
                        urls.push(resolved.to_string());
                    }
                }
            }
        }

        urls
    }
}

impl SiteImageRule for MadaraRule {
    fn name(&self) -> &'static str {
        "madara"
    }

    fn extract(&self, body: &str, base_url: &Url) -> Vec<String> {
        if !body.contains("wp-manga") && !body.contains("WP-manga") && !body.contains("reading-content") {
            return Vec::new();
        }

        let mut urls = Self::reader_images(body, base_url);
        for found in wp_manga_regex().find_iter(body) {
            let raw = found.as_str();
            let absolute = if raw.starts_with("//") {
                format!("{}:{}", base_url.scheme(), raw)
            } else {
                raw.to_string()
            };
            urls.push(absolute);
        }

        urls.retain(|url| Self::is_reader_image(url));
        debug!("[MADARA] {} reader image(s)", urls.len());
        urls
    }
}
