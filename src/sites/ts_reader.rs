use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use url::Url;

use crate::traits::SiteImageRule;

/// Themes that boot their reader with `ts_reader.run({... "images":[...]})`
/// and ship the page list as JSON with `\/`-escaped URLs.
pub struct TsReaderRule;

fn escaped_url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"https?:(?:\\*/){2}[^"\s]+?\.(?:webp|jpe?g|png|gif|avif)(?:\?[^"\s]*)?"#).expect("ts_reader url regex")
    })
}

impl TsReaderRule {
    /// The `ts_reader.run(...)` call body, if present.
    fn reader_payload(body: &str) -> Option<&str> {
        let start = body.find("ts_reader.run(")?;
        let after_start = &body[start..];
        let end = after_start.find(");")?;
        Some(&after_start[..end])
    }

    /// Every `"images":[...]` array inside the payload, brackets balanced.
    fn image_arrays(payload: &str) -> Vec<&str> {
        let mut arrays = Vec::new();
        let mut offset = 0;

        while let Some(found) = payload[offset..].find("\"images\":[") {
            let array_start = offset + found + "\"images\":".len();
            let mut depth = 0usize;
            let mut array_end = None;
            for (index, ch) in payload[array_start..].char_indices() {
                match ch {
                    '[' => depth += 1,
                    ']' => {
                        depth = depth.saturating_sub(1);
                        if depth == 0 {
                            array_end = Some(array_start + index + 1);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            let Some(end) = array_end else { break };
            arrays.push(&payload[array_start..end]);
            offset = end;
        }

        arrays
    }

    fn split_fallback(array: &str) -> Vec<String> {
        array
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(|item| item.trim().replace(['"', '\\'], ""))
            .filter(|item| item.starts_with("http"))
            .collect()
    }
}

impl SiteImageRule for TsReaderRule {
    fn name(&self) -> &'static str {
        "ts_reader"
    }

    fn extract(&self, body: &str, _base_url: &Url) -> Vec<String> {
        let Some(payload) = Self::reader_payload(body) else {
            return Vec::new();
        };

        let mut urls = Vec::new();
        for array in Self::image_arrays(payload) {
            let found: Vec<String> = escaped_url_regex()
                .find_iter(array)
                .map(|m| m.as_str().replace('\\', ""))
                .collect();
            if found.is_empty() {
                urls.extend(Self::split_fallback(array));
            } else {
                urls.extend(found);
            }
        }

        debug!("[TS_READER] {} image URL(s) in reader payload", urls.len());
        urls
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://scans.example/chapter-1/").unwrap()
    }

    #[test]
    fn reads_escaped_sources() {
        let html = r#"<script>ts_reader.run({"prevUrl":"","sources":[{"source":"Server 1","images":["https:\/\/cdn.example\/a\/01.webp","https:\/\/cdn.example\/a\/02.webp"]},{"source":"Server 2","images":["https:\/\/mirror.example\/a\/01.jpg"]}]});</script>"#;
        let urls = TsReaderRule.extract(html, &base());
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/a/01.webp",
                "https://cdn.example/a/02.webp",
                "https://mirror.example/a/01.jpg"
            ]
        );
    }

    #[test]
    fn nothing_without_reader_call() {
        assert!(TsReaderRule.extract("<img src=\"a.jpg\">", &base()).is_empty());
    }

    #[test]
    fn plain_urls_are_read_too() {
        let html = r#"ts_reader.run({"images":[ "https://cdn.example/p/1.png" , "https://cdn.example/p/2.png" ]});"#;
        let urls = TsReaderRule.extract(html, &base());
        assert_eq!(urls, vec!["https://cdn.example/p/1.png", "https://cdn.example/p/2.png"]);
    }

    #[test]
    fn extensionless_entries_use_split_fallback() {
        let html = r#"ts_reader.run({"images":["https:\/\/cdn.example\/p\/1"]});"#;
        let urls = TsReaderRule.extract(html, &base());
        assert_eq!(urls, vec!["https://cdn.example/p/1"]);
    }
}
