use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::traits::SiteImageRule;

/// Blogger-hosted scans. The size segment (`/s320/`, `/w400-h600/`) is
/// rewritten to the full-size `/s1600/` variant.
pub struct BloggerRule;

fn blogger_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?://(?:\d+\.bp\.blogspot\.com|blogger\.googleusercontent\.com)/[^\s"'<>()\\]+"#)
            .expect("blogger regex")
    })
}

fn size_segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"/(?:s\d+|w\d+-h\d+)(?:-[a-z0-9-]*)?/").expect("blogger size regex"))
}

impl SiteImageRule for BloggerRule {
    fn name(&self) -> &'static str {
        "blogger"
    }

    fn extract(&self, body: &str, _base_url: &Url) -> Vec<String> {
        blogger_regex()
            .find_iter(body)
            .map(|m| size_segment_regex().replace(m.as_str(), "/s1600/").into_owned())
            .collect()
    }
}
