use regex::Regex;
use std::sync::OnceLock;
use url::Url;

use crate::traits::SiteImageRule;

/// Jetpack Photon CDN (`i0.wp.com/<origin-host>/<path>?resize=...`). Resize
/// parameters are dropped so the full image is probed.
pub struct PhotonRule;

fn photon_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)https?://i[0-3]\.wp\.com/[^\s"'<>?]+?\.(?:jpe?g|png|gif|webp)"#).expect("photon regex")
    })
}

impl SiteImageRule for PhotonRule {
    fn name(&self) -> &'static str {
        "photon"
    }

    fn extract(&self, body: &str, _base_url: &Url) -> Vec<String> {
        photon_regex().find_iter(body).map(|m| m.as_str().to_string()).collect()
    }
}
