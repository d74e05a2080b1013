use crate::sites::blogger::BloggerRule;
use crate::sites::madara::MadaraRule;
use crate::sites::photon::PhotonRule;
use crate::sites::ts_reader::TsReaderRule;
use crate::traits::SiteImageRule;
use tracing::debug;
use url::Url;

/// Registry for site-specific image rules, applied in registration order.
pub struct SiteRuleRegistry {
    rules: Vec<Box<dyn SiteImageRule>>,
}

impl SiteRuleRegistry {
    pub fn new() -> Self {
        let mut registry = Self::empty();

        // Register built-in rules
        registry.register_rule(Box::new(TsReaderRule));
        registry.register_rule(Box::new(MadaraRule));
        registry.register_rule(Box::new(BloggerRule));
        registry.register_rule(Box::new(PhotonRule));

        registry
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Replaces any rule already registered under the same name.
    pub fn register_rule(&mut self, rule: Box<dyn SiteImageRule>) {
        self.rules.retain(|existing| existing.name() != rule.name());
        self.rules.push(rule);
    }

    pub fn get_rule(&self, name: &str) -> Option<&dyn SiteImageRule> {
        self.rules.iter().find(|r| r.name() == name).map(|r| r.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    pub fn extract(&self, body: &str, base_url: &Url) -> Vec<String> {
        let mut urls = Vec::new();
        for rule in &self.rules {
            let found = rule.extract(body, base_url);
            if !found.is_empty() {
                debug!("[SITES] rule '{}' matched {} URL(s)", rule.name(), found.len());
            }
            urls.extend(found);
        }
        urls
    }
}

impl Default for SiteRuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
