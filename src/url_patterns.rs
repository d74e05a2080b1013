//! Per-domain chapter URL templates with a generic "bump the last number" fallback.
//!
//! Templates are kept in a line-oriented env format:
//!
//! ```text
//! # comment
//! url=https://reader.example.com/series/solo-leveling/chapter-12/
//! config=https://reader.example.com/series/{*}/chapter-{n}/
//! lang=en
//! ```
//!
//! `{n}` is the target chapter number, `{n+1}` / `{n-1}` offset it, `{*}`
//! copies the base URL's path segment at the same position and `{name}`
//! reads a variable line from the same block.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, ScrapeError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlPatternConfig {
    pub domain: String,
    pub sample_url: String,
    pub url_template: String,
    pub variable_bindings: BTreeMap<String, String>,
}

impl UrlPatternConfig {
    pub fn new(sample_url: &str, url_template: &str) -> Result<Self> {
        let domain = domain_of(sample_url)?;
        Ok(Self {
            domain,
            sample_url: sample_url.to_string(),
            url_template: url_template.to_string(),
            variable_bindings: BTreeMap::new(),
        })
    }

    /// Binds `{name}` in the template. Names must be identifiers other than
    /// the `url`/`config` keys, and values must fit on one line.
    pub fn with_variable(mut self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = (name.trim(), value.trim());
        if !is_variable_name(name) || value.contains(['\n', '\r']) {
            return Err(ScrapeError::InvalidVariable(name.to_string()));
        }
        self.variable_bindings.insert(name.to_string(), value.to_string());
        Ok(self)
    }
}

#[derive(Debug, Clone, Default)]
pub struct UrlPatternManager {
    configs: BTreeMap<String, UrlPatternConfig>,
}

impl UrlPatternManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let mut manager = Self::new();
        let count = manager.import_from_env_format(&text)?;
        info!("[PATTERNS] loaded {} domain rule(s) from {}", count, path.as_ref().display());
        Ok(manager)
    }

    pub fn save_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        std::fs::write(path, self.export_to_env_format())?;
        Ok(())
    }

    /// One active config per domain; a later insert replaces the earlier one.
    pub fn insert(&mut self, config: UrlPatternConfig) -> Option<UrlPatternConfig> {
        self.configs.insert(config.domain.clone(), config)
    }

    pub fn remove(&mut self, domain: &str) -> Option<UrlPatternConfig> {
        self.configs.remove(&normalize_domain(domain))
    }

    pub fn get(&self, domain: &str) -> Option<&UrlPatternConfig> {
        self.configs.get(&normalize_domain(domain))
    }

    pub fn configs(&self) -> impl Iterator<Item = &UrlPatternConfig> {
        self.configs.values()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    fn config_for(&self, url: &Url) -> Option<&UrlPatternConfig> {
        url.host_str().and_then(|host| self.get(host))
    }

    /// Merges every block of `text` into the manager and returns how many were read.
    pub fn import_from_env_format(&mut self, text: &str) -> Result<usize> {
        let configs = parse_env_format(text)?;
        let count = configs.len();
        for config in configs {
            self.insert(config);
        }
        Ok(count)
    }

    pub fn export_to_env_format(&self) -> String {
        let blocks: Vec<String> = self
            .configs
            .values()
            .map(|config| {
                let mut block = format!("url={}\nconfig={}\n", config.sample_url, config.url_template);
                for (name, value) in &config.variable_bindings {
                    block.push_str(&format!("{}={}\n", name, value));
                }
                block
            })
            .collect();
        blocks.join("\n")
    }

    /// URL of chapter `target` relative to `base_url`, or `None` when no rule applies.
    pub fn generate_chapter_url(&self, base_url: &str, target: u32) -> Option<String> {
        let base = Url::parse(base_url).ok()?;

        if let Some(config) = self.config_for(&base) {
            match render_template(config, &base, target) {
                Some(url) => {
                    debug!("[PATTERNS] {} chapter {} via template -> {}", config.domain, target, url);
                    return Some(url);
                }
                None => debug!("[PATTERNS] template for {} did not apply to {}", config.domain, base_url),
            }
        }

        increment_url(&base, target)
    }

    /// Chapter number carried by `url`, read through the same rules.
    pub fn current_chapter_number(&self, url: &str) -> Option<u32> {
        let parsed = Url::parse(url).ok()?;
        if let Some(config) = self.config_for(&parsed) {
            if let Some(n) = template_number(config, url) {
                return Some(n);
            }
        }
        let segments: Vec<&str> = parsed.path().split('/').collect();
        let index = segments.iter().rposition(|s| segment_regex().is_match(s))?;
        let caps = segment_regex().captures(segments[index])?;
        caps.get(2)?.as_str().parse().ok()
    }
}

pub fn parse_env_format(text: &str) -> Result<Vec<UrlPatternConfig>> {
    let mut configs = Vec::new();
    let mut current: Option<(usize, String, Option<UrlPatternConfig>)> = None;

    fn finish(
        current: &mut Option<(usize, String, Option<UrlPatternConfig>)>,
        configs: &mut Vec<UrlPatternConfig>,
    ) -> Result<()> {
        match current.take() {
            Some((_, _, Some(config))) => configs.push(config),
            Some((line, _, None)) => return Err(ScrapeError::pattern_config(line, "url= without a paired config= line")),
            None => {}
        }
        Ok(())
    }

    for (index, raw) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw.trim();

        if line.is_empty() {
            finish(&mut current, &mut configs)?;
            continue;
        }
        if line.starts_with('#') || line.starts_with("//") {
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| ScrapeError::pattern_config(line_no, "expected key=value"))?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "url" => {
                finish(&mut current, &mut configs)?;
                domain_of(value).map_err(|_| ScrapeError::pattern_config(line_no, format!("invalid url '{}'", value)))?;
                current = Some((line_no, value.to_string(), None));
            }
            "config" => match current.as_mut() {
                Some((_, sample, slot @ None)) => {
                    *slot = Some(UrlPatternConfig::new(sample, value)?);
                }
                Some((_, _, Some(_))) => {
                    return Err(ScrapeError::pattern_config(line_no, "duplicate config= line in block"))
                }
                None => return Err(ScrapeError::pattern_config(line_no, "config= without a preceding url= line")),
            },
            name => match current.as_mut() {
                Some((_, _, Some(config))) if is_identifier(name) => {
                    config.variable_bindings.insert(name.to_string(), value.to_string());
                }
                Some((_, _, Some(_))) => {
                    return Err(ScrapeError::pattern_config(line_no, format!("invalid variable name '{}'", name)))
                }
                _ => {
                    return Err(ScrapeError::pattern_config(
                        line_no,
                        format!("variable '{}' outside of a url=/config= block", name),
                    ))
                }
            },
        }
    }

    finish(&mut current, &mut configs)?;
    Ok(configs)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn is_variable_name(name: &str) -> bool {
    is_identifier(name) && name != "url" && name != "config"
}

fn domain_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    let host = parsed
        .host_str()
        .ok_or_else(|| ScrapeError::invalid_url(url))?;
    Ok(normalize_domain(host))
}

fn normalize_domain(host: &str) -> String {
    let host = host.trim().to_ascii_lowercase();
    host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
}

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{([^{}]*)\}").expect("token regex"))
}

fn segment_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.*?)(\d+)(\D*)$").expect("segment regex"))
}

/// Parses `n`, `n+k` or `n-k`; returns the signed offset.
fn chapter_offset(expr: &str) -> Option<i64> {
    let expr: String = expr.chars().filter(|c| !c.is_whitespace()).collect();
    let rest = expr.strip_prefix('n')?;
    if rest.is_empty() {
        return Some(0);
    }
    let mut chars = rest.chars();
    let sign = chars.next()?;
    let k: i64 = chars.as_str().parse().ok()?;
    match sign {
        '+' => Some(k),
        '-' => Some(-k),
        _ => None,
    }
}

/// Splits a template into an optional `scheme://host` prefix and the rest.
fn split_origin(template: &str) -> (Option<&str>, &str) {
    if let Some(scheme_end) = template.find("://") {
        let after = scheme_end + 3;
        let path_start = template[after..].find('/').map(|i| after + i).unwrap_or(template.len());
        (Some(&template[..path_start]), &template[path_start..])
    } else {
        (None, template)
    }
}

fn render_template(config: &UrlPatternConfig, base: &Url, target: u32) -> Option<String> {
    let (origin, rest) = split_origin(&config.url_template);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };

    let base_segments: Vec<&str> = base.path().split('/').collect();
    let mut segments = Vec::new();
    for (i, segment) in path.split('/').enumerate() {
        if segment.contains("{*}") {
            let original = base_segments.get(i).filter(|s| !s.is_empty())?;
            segments.push(segment.replace("{*}", original));
        } else {
            segments.push(segment.to_string());
        }
    }

    let mut rendered = segments.join("/");
    if let Some(query) = query {
        rendered.push('?');
        rendered.push_str(query);
    }

    let mut failed = false;
    let rendered = token_regex().replace_all(&rendered, |caps: &regex::Captures| {
        let expr = &caps[1];
        if let Some(offset) = chapter_offset(expr) {
            match u32::try_from(i64::from(target) + offset) {
                Ok(n) => n.to_string(),
                Err(_) => {
                    failed = true;
                    String::new()
                }
            }
        } else if let Some(value) = config.variable_bindings.get(expr.trim()) {
            value.clone()
        } else {
            failed = true;
            String::new()
        }
    });
    if failed {
        return None;
    }

    let full = match origin {
        Some(origin) => format!("{}{}", origin, rendered),
        None => format!("{}{}", base.origin().ascii_serialization(), rendered),
    };
    Url::parse(&full).ok().map(|u| u.to_string())
}

fn template_number(config: &UrlPatternConfig, url: &str) -> Option<u32> {
    let (origin, rest) = split_origin(&config.url_template);
    let mut pattern = String::new();
    let mut offset = None;
    let mut last = 0;

    for caps in token_regex().captures_iter(rest) {
        let whole = caps.get(0)?;
        pattern.push_str(&regex::escape(&rest[last..whole.start()]));
        let expr = &caps[1];
        if expr == "*" {
            pattern.push_str("[^/]*");
        } else if let Some(k) = chapter_offset(expr) {
            if offset.is_none() {
                offset = Some(k);
                pattern.push_str(r"(\d+)");
            } else {
                pattern.push_str(r"\d+");
            }
        } else {
            let value = config.variable_bindings.get(expr.trim())?;
            pattern.push_str(&regex::escape(value));
        }
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&rest[last..]));

    let anchored = match origin {
        Some(origin) => format!("^{}{}", regex::escape(origin), pattern),
        None => pattern,
    };
    let re = Regex::new(&format!("{}(?:[?#].*)?$", anchored)).ok()?;
    let caps = re.captures(url)?;
    let value: i64 = caps.get(1)?.as_str().parse().ok()?;
    u32::try_from(value - offset?).ok()
}

/// Replaces the digits of the last numeric path segment, keeping zero padding.
pub fn increment_url(base: &Url, target: u32) -> Option<String> {
    let mut segments: Vec<String> = base.path().split('/').map(str::to_string).collect();
    let index = segments.iter().rposition(|s| segment_regex().is_match(s))?;

    let caps = segment_regex().captures(&segments[index])?;
    let prefix = caps.get(1)?.as_str();
    let digits = caps.get(2)?.as_str();
    let suffix = caps.get(3)?.as_str();

    let number = if digits.len() > 1 && digits.starts_with('0') {
        format!("{:0width$}", target, width = digits.len())
    } else {
        target.to_string()
    };
    let replaced = format!("{}{}{}", prefix, number, suffix);
    segments[index] = replaced;

    let mut url = base.clone();
    url.set_path(&segments.join("/"));
    Some(url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(sample: &str, template: &str) -> UrlPatternManager {
        let mut manager = UrlPatternManager::new();
        manager.insert(UrlPatternConfig::new(sample, template).unwrap());
        manager
    }

    #[test]
    fn fallback_replaces_last_number() {
        let manager = UrlPatternManager::new();
        assert_eq!(
            manager.generate_chapter_url("https://site.com/manga/one-piece/chapter-12/", 13).as_deref(),
            Some("https://site.com/manga/one-piece/chapter-13/")
        );
        assert_eq!(
            manager.generate_chapter_url("https://site.com/read/42?lang=en", 43).as_deref(),
            Some("https://site.com/read/43?lang=en")
        );
    }

    #[test]
    fn fallback_keeps_zero_padding() {
        let manager = UrlPatternManager::new();
        assert_eq!(
            manager.generate_chapter_url("https://site.com/c/ch_009.html", 10).as_deref(),
            Some("https://site.com/c/ch_010.html")
        );
        assert_eq!(
            manager.generate_chapter_url("https://site.com/c/ch-9.html", 10).as_deref(),
            Some("https://site.com/c/ch-10.html")
        );
    }

    #[test]
    fn no_rule_yields_none() {
        let manager = UrlPatternManager::new();
        assert_eq!(manager.generate_chapter_url("https://site.com/manga/title/", 2), None);
        assert_eq!(manager.generate_chapter_url("not a url", 2), None);
    }

    #[test]
    fn template_with_wildcard_and_expression() {
        let manager = manager_with(
            "https://www.reader.io/series/solo/chapter-1/",
            "https://reader.io/series/{*}/chapter-{n}/page-{n+1}",
        );
        assert_eq!(
            manager.generate_chapter_url("https://reader.io/series/another-title/chapter-5/", 6).as_deref(),
            Some("https://reader.io/series/another-title/chapter-6/page-7")
        );
    }

    #[test]
    fn path_only_template_uses_base_origin_and_variables() {
        let mut manager = UrlPatternManager::new();
        manager.insert(
            UrlPatternConfig::new("https://comics.net/view/x/1", "/view/{*}/{n}?lang={lang}")
                .unwrap()
                .with_variable("lang", "en")
                .unwrap(),
        );
        assert_eq!(
            manager.generate_chapter_url("https://comics.net/view/abc/1", 2).as_deref(),
            Some("https://comics.net/view/abc/2?lang=en")
        );
    }

    #[test]
    fn unusable_template_falls_back() {
        let manager = manager_with("https://a.com/x/1", "https://a.com/{missing}/{n}");
        assert_eq!(
            manager.generate_chapter_url("https://a.com/x/1", 2).as_deref(),
            Some("https://a.com/x/2")
        );
    }

    #[test]
    fn non_ascii_token_is_not_a_chapter_expression() {
        let manager = manager_with("https://a.com/x/1", "https://a.com/x/{né}/{n}");
        assert_eq!(chapter_offset("né"), None);
        assert_eq!(chapter_offset("n+2"), Some(2));
        assert_eq!(chapter_offset("n - 3"), Some(-3));
        assert_eq!(
            manager.generate_chapter_url("https://a.com/x/1", 2).as_deref(),
            Some("https://a.com/x/2")
        );
        assert_eq!(manager.current_chapter_number("https://a.com/x/7"), Some(7));
    }

    #[test]
    fn chapter_number_from_template_and_fallback() {
        let manager = manager_with("https://r.io/s/a/c-1", "https://r.io/s/{*}/c-{n+1}");
        assert_eq!(manager.current_chapter_number("https://r.io/s/title/c-8"), Some(7));
        assert_eq!(manager.current_chapter_number("https://other.io/read/chapter-0042"), Some(42));
        assert_eq!(manager.current_chapter_number("https://other.io/read/"), None);
    }

    #[test]
    fn parser_groups_variables_and_skips_comments() {
        let text = "\
# first site
url=https://a.com/manga/x/1
config=https://a.com/manga/{*}/{n}
quality=hd

// second site, no blank line before the next block
url=https://b.org/r?c=1
config=/r?c={n}
url=https://c.net/v/1
config=/v/{n}
";
        let configs = parse_env_format(text).unwrap();
        assert_eq!(configs.len(), 3);
        assert_eq!(configs[0].domain, "a.com");
        assert_eq!(configs[0].variable_bindings.get("quality").map(String::as_str), Some("hd"));
        assert_eq!(configs[1].sample_url, "https://b.org/r?c=1");
        assert_eq!(configs[1].url_template, "/r?c={n}");
        assert!(configs[2].variable_bindings.is_empty());
    }

    #[test]
    fn parser_reports_malformed_blocks() {
        let err = parse_env_format("config=/x/{n}\n").unwrap_err();
        assert!(matches!(err, ScrapeError::PatternConfig { line: 1, .. }));

        let err = parse_env_format("url=https://a.com/1\n\nconfig=/x/{n}\n").unwrap_err();
        assert!(matches!(err, ScrapeError::PatternConfig { line: 1, .. }));

        let err = parse_env_format("url=https://a.com/1\nconfig=/x/{n}\n\nfoo=bar\n").unwrap_err();
        assert!(matches!(err, ScrapeError::PatternConfig { line: 4, .. }));

        let err = parse_env_format("url=https://a.com/1\nlang=en\n").unwrap_err();
        assert!(matches!(err, ScrapeError::PatternConfig { .. }));

        let err = parse_env_format("just text\n").unwrap_err();
        assert!(matches!(err, ScrapeError::PatternConfig { line: 1, .. }));
    }

    #[test]
    fn export_import_round_trip() {
        let mut manager = UrlPatternManager::new();
        manager.insert(
            UrlPatternConfig::new("https://a.com/manga/x/1", "https://a.com/manga/{*}/{n}")
                .unwrap()
                .with_variable("quality", "hd")
                .and_then(|c| c.with_variable("lang", " en "))
                .unwrap(),
        );
        manager.insert(UrlPatternConfig::new("https://b.org/r?c=1", "/r?c={n-1}").unwrap());

        let exported = manager.export_to_env_format();
        let mut reimported = UrlPatternManager::new();
        assert_eq!(reimported.import_from_env_format(&exported).unwrap(), 2);

        let original: Vec<_> = manager.configs().cloned().collect();
        let restored: Vec<_> = reimported.configs().cloned().collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn builder_rejects_variables_that_cannot_be_exported() {
        let config = || UrlPatternConfig::new("https://a.com/1", "/c/{n}").unwrap();
        assert!(matches!(config().with_variable("url", "x"), Err(ScrapeError::InvalidVariable(_))));
        assert!(matches!(config().with_variable("config", "x"), Err(ScrapeError::InvalidVariable(_))));
        assert!(matches!(config().with_variable("a=b", "x"), Err(ScrapeError::InvalidVariable(_))));
        assert!(matches!(config().with_variable("", "x"), Err(ScrapeError::InvalidVariable(_))));
        assert!(matches!(config().with_variable("lang", "en\nurl=x"), Err(ScrapeError::InvalidVariable(_))));

        let trimmed = config().with_variable(" lang ", "  en ").unwrap();
        assert_eq!(trimmed.variable_bindings.get("lang").map(String::as_str), Some("en"));

        let mut manager = UrlPatternManager::new();
        manager.insert(trimmed);
        let restored = parse_env_format(&manager.export_to_env_format()).unwrap();
        assert_eq!(restored, manager.configs().cloned().collect::<Vec<_>>());
    }

    #[test]
    fn later_import_replaces_domain_rule() {
        let mut manager = manager_with("https://a.com/1", "/old/{n}");
        manager
            .import_from_env_format("url=https://www.a.com/2\nconfig=/new/{n}\n")
            .unwrap();
        assert_eq!(manager.len(), 1);
        assert_eq!(manager.get("a.com").unwrap().url_template, "/new/{n}");
    }
}
