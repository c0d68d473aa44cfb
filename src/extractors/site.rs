use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use std::str::FromStr;
use tracing::debug;

use crate::extractors::{
    availability_from_text, element_text, ensure_html, first_attr, first_text, PriceExtractor,
    PriceParser,
};
use crate::fetcher::RawPage;
use crate::models::{Availability, Money, PriceReading};
use crate::utils::error::{ExtractionFailure, ExtractionFailureKind};

/// One way of locating the price on a known site.
#[derive(Debug, Clone)]
pub enum PriceRule {
    /// Text of the first element under this CSS selector that parses as a price.
    Selector(String),
    /// Price split over separate whole, fraction and currency-symbol elements
    /// sharing a parent.
    SplitPrice {
        whole: String,
        fraction: String,
        symbol: String,
    },
    /// Pattern applied to the raw HTML; capture group 1 holds the price text.
    RawPattern(Regex),
}

/// Data describing how prices, titles and images are laid out on one
/// storefront.
#[derive(Debug, Clone)]
pub struct SiteProfile {
    pub variant: String,
    /// Hosts served by this profile; subdomains match too.
    pub hosts: Vec<String>,
    pub default_currency: String,
    pub price_rules: Vec<PriceRule>,
    pub availability_selectors: Vec<String>,
    pub title_selectors: Vec<String>,
    pub image_selectors: Vec<String>,
}

const AMAZON_STOREFRONTS: &[(&str, &str)] = &[
    ("amazon.in", "INR"),
    ("amazon.co.uk", "GBP"),
    ("amazon.de", "EUR"),
    ("amazon.fr", "EUR"),
    ("amazon.it", "EUR"),
    ("amazon.es", "EUR"),
    ("amazon.com.au", "AUD"),
    ("amazon.ca", "CAD"),
    ("amazon.co.jp", "JPY"),
    ("amazon.com", "USD"),
];

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl SiteProfile {
    /// Layout rules shared by Amazon storefronts; only the host and the
    /// storefront currency differ.
    pub fn amazon(host: &str, default_currency: &str) -> Self {
        let mut price_rules: Vec<PriceRule> = [
            "#priceblock_ourprice",
            "#priceblock_dealprice",
            "#corePriceDisplay_desktop_feature_div .a-offscreen",
            "#apex_desktop .a-offscreen",
            ".apexPriceToPay .a-offscreen",
            ".priceToPay .a-offscreen",
            "#price_inside_buybox",
            ".a-price .a-offscreen",
        ]
        .iter()
        .map(|s| PriceRule::Selector(s.to_string()))
        .collect();

        price_rules.push(PriceRule::SplitPrice {
            whole: "span.a-price-whole".to_string(),
            fraction: "span.a-price-fraction".to_string(),
            symbol: "span.a-price-symbol".to_string(),
        });

        for selector in [
            "span.a-size-medium.a-color-price",
            "#buyNewSection .a-color-price",
            "span.a-color-price",
        ] {
            price_rules.push(PriceRule::Selector(selector.to_string()));
        }

        for pattern in [
            r#""priceAmount"\s*:\s*(\d+(?:\.\d+)?)"#,
            r#""formattedPrice"\s*:\s*"([^"]+)""#,
            r#""buyingPrice"\s*:\s*"([^"]+)""#,
        ] {
            price_rules.push(PriceRule::RawPattern(Regex::new(pattern).unwrap()));
        }

        Self {
            variant: host.to_string(),
            hosts: vec![host.to_string()],
            default_currency: default_currency.to_string(),
            price_rules,
            availability_selectors: strings(&["#availability", "#outOfStock", "#availability_feature_div"]),
            title_selectors: strings(&["#productTitle", "#title"]),
            image_selectors: strings(&["#landingImage", "#imgBlkFront", "#main-image", "#imgTagWrapperId img"]),
        }
    }

    pub fn amazon_storefronts() -> Vec<Self> {
        AMAZON_STOREFRONTS
            .iter()
            .map(|(host, currency)| Self::amazon(host, currency))
            .collect()
    }
}

/// Extractor for a storefront with a known layout.
pub struct SiteExtractor {
    profile: SiteProfile,
    parser: PriceParser,
}

impl SiteExtractor {
    pub fn new(profile: SiteProfile) -> Self {
        Self {
            profile,
            parser: PriceParser::new(),
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    fn currency(&self) -> Option<&str> {
        Some(self.profile.default_currency.as_str())
    }

    fn extract_price(&self, document: &Html, html: &str) -> Option<Money> {
        for (index, rule) in self.profile.price_rules.iter().enumerate() {
            let found = match rule {
                PriceRule::Selector(selector) => self.price_from_selector(document, selector),
                PriceRule::SplitPrice {
                    whole,
                    fraction,
                    symbol,
                } => self.price_from_parts(document, whole, fraction, symbol),
                PriceRule::RawPattern(pattern) => self.price_from_pattern(html, pattern),
            };

            if let Some(money) = found {
                debug!(
                    "{}: price rule #{} ({:?}) matched {}",
                    self.profile.variant, index, rule, money
                );
                return Some(money);
            }
        }
        None
    }

    fn price_from_selector(&self, document: &Html, selector: &str) -> Option<Money> {
        let selector = Selector::parse(selector).ok()?;
        document
            .select(&selector)
            .map(|element| element_text(&element))
            .filter(|text| !text.is_empty())
            .find_map(|text| self.parser.parse(&text, self.currency()))
    }

    fn price_from_parts(&self, document: &Html, whole: &str, fraction: &str, symbol: &str) -> Option<Money> {
        let whole_selector = Selector::parse(whole).ok()?;
        let fraction_selector = Selector::parse(fraction).ok()?;
        let symbol_selector = Selector::parse(symbol).ok()?;

        for whole_element in document.select(&whole_selector) {
            let whole_digits: String = element_text(&whole_element)
                .chars()
                .filter(|c| c.is_ascii_digit())
                .collect();
            if whole_digits.is_empty() {
                continue;
            }

            let Some(container) = whole_element.parent().and_then(ElementRef::wrap) else {
                continue;
            };
            let fraction_digits: String = container
                .select(&fraction_selector)
                .next()
                .map(|f| element_text(&f).chars().filter(|c| c.is_ascii_digit()).collect())
                .unwrap_or_default();
            let symbol_text = container
                .select(&symbol_selector)
                .next()
                .map(|s| element_text(&s))
                .unwrap_or_default();

            let amount = if fraction_digits.is_empty() {
                Decimal::from_str(&whole_digits).ok()?
            } else {
                Decimal::from_str(&format!("{}.{}", whole_digits, fraction_digits)).ok()?
            };

            // Only the symbol decides the currency here; the digits are
            // already assembled.
            let currency = self
                .parser
                .parse(&format!("{} 0", symbol_text), self.currency())
                .map(|m| m.currency)
                .unwrap_or_else(|| self.profile.default_currency.clone());

            return Some(Money::new(amount, &currency));
        }
        None
    }

    fn price_from_pattern(&self, html: &str, pattern: &Regex) -> Option<Money> {
        pattern
            .captures_iter(html)
            .filter_map(|c| c.get(1))
            .find_map(|m| self.parser.parse(m.as_str(), self.currency()))
    }

    fn extract_availability(&self, document: &Html) -> Option<Availability> {
        for selector_str in &self.profile.availability_selectors {
            let Ok(selector) = Selector::parse(selector_str) else {
                continue;
            };
            for element in document.select(&selector) {
                if element.value().id() == Some("outOfStock") {
                    return Some(Availability::OutOfStock);
                }
                if let Some(availability) = availability_from_text(&element_text(&element)) {
                    return Some(availability);
                }
            }
        }
        None
    }

    fn extract_title(&self, document: &Html) -> Option<String> {
        if let Some(title) = first_text(document, &self.profile.title_selectors[..]) {
            return Some(title);
        }

        // Page titles look like "Amazon.com: Product Name : Category"
        let page_title = first_text(document, &["title"][..])?;
        let first = page_title.split(" : ").next().unwrap_or(&page_title).trim();
        let name = match first.split_once(": ") {
            Some((prefix, rest)) if prefix.to_lowercase().starts_with("amazon.") => rest.trim(),
            _ => first,
        };
        (!name.is_empty()).then(|| name.to_string())
    }

    fn extract_image(&self, document: &Html, page: &RawPage) -> Option<String> {
        let selectors = &self.profile.image_selectors[..];
        let raw = first_attr(document, selectors, "data-old-hires")
            .or_else(|| first_attr(document, selectors, "src"))
            .or_else(|| {
                first_attr(document, selectors, "data-a-dynamic-image").and_then(|json| {
                    serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(&json)
                        .ok()
                        .and_then(|images| images.keys().next().cloned())
                })
            })?;

        page.final_url
            .join(&raw)
            .map(|url| url.to_string())
            .ok()
            .filter(|url| !url.starts_with("data:"))
    }
}

impl PriceExtractor for SiteExtractor {
    fn variant(&self) -> &str {
        &self.profile.variant
    }

    fn extract(&self, page: &RawPage) -> Result<PriceReading, ExtractionFailure> {
        let html = ensure_html(page, &self.profile.variant)?;
        let document = Html::parse_document(&html);

        let price = self.extract_price(&document, &html);
        let availability = match (self.extract_availability(&document), &price) {
            (Some(availability), _) => availability,
            (None, Some(_)) => Availability::InStock,
            (None, None) => Availability::Unknown,
        };

        if price.is_none() && availability != Availability::OutOfStock {
            return Err(ExtractionFailure::new(
                ExtractionFailureKind::NoPriceFound,
                &self.profile.variant,
                format!("none of {} price rules matched", self.profile.price_rules.len()),
            ));
        }

        Ok(PriceReading {
            price,
            availability,
            title: self.extract_title(&document),
            image_url: self.extract_image(&document, page),
            variant: self.profile.variant.clone(),
        })
    }
}
