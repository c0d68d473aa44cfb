use std::sync::Arc;
use url::Url;

use super::{GenericExtractor, PriceExtractor, SiteExtractor, SiteProfile};

pub type ExtractorRef = Arc<dyn PriceExtractor>;

/// Ordered host-pattern table that picks the extractor for a URL.
///
/// A pattern matches its exact host and any subdomain of it. Patterns are
/// tried in registration order and the generic extractor answers for
/// everything else.
#[derive(Clone)]
pub struct ExtractorRegistry {
    entries: Vec<(String, ExtractorRef)>,
    fallback: ExtractorRef,
}

impl ExtractorRegistry {
    /// Registry with only the generic fallback.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            fallback: Arc::new(GenericExtractor::new()),
        }
    }

    /// Registry with every built-in storefront profile.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        for profile in SiteProfile::amazon_storefronts() {
            registry.register_profile(profile);
        }
        registry
    }

    pub fn register(&mut self, host_pattern: &str, extractor: ExtractorRef) {
        let pattern = host_pattern.trim().trim_end_matches('.').to_ascii_lowercase();
        self.entries.push((pattern, extractor));
    }

    pub fn register_profile(&mut self, profile: SiteProfile) {
        let hosts = profile.hosts.clone();
        let extractor: ExtractorRef = Arc::new(SiteExtractor::new(profile));
        for host in hosts {
            self.register(&host, extractor.clone());
        }
    }

    pub fn select(&self, url: &Url) -> ExtractorRef {
        let Some(host) = url.host_str() else {
            return self.fallback.clone();
        };
        let host = host.trim_end_matches('.').to_ascii_lowercase();

        self.entries
            .iter()
            .find(|(pattern, _)| host_matches(&host, pattern))
            .map(|(_, extractor)| extractor.clone())
            .unwrap_or_else(|| self.fallback.clone())
    }

    pub fn variant_for(&self, url: &Url) -> String {
        self.select(url).variant().to_string()
    }

    /// Host patterns in match order with the variant each resolves to.
    pub fn patterns(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(pattern, extractor)| (pattern.clone(), extractor.variant().to_string()))
            .collect()
    }
}

impl Default for ExtractorRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn host_matches(host: &str, pattern: &str) -> bool {
    host == pattern
        || host
            .strip_suffix(pattern)
            .map_or(false, |prefix| prefix.ends_with('.'))
}
