use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::collections::HashSet;
use std::str::FromStr;
use tracing::debug;

use crate::extractors::{
    availability_from_schema, availability_from_text, context_currency, element_text, ensure_html,
    first_attr, first_text, PriceExtractor, PriceParser,
};
use crate::fetcher::RawPage;
use crate::models::{Availability, Money, PriceReading};
use crate::utils::error::{ExtractionFailure, ExtractionFailureKind};

pub const GENERIC_VARIANT: &str = "generic";

/// Candidates scoring below this are not trusted as the product price.
const MIN_CONFIDENCE: f64 = 0.5;

const STRUCTURED_DATA_SCORE: f64 = 1.0;
const META_TAG_SCORE: f64 = 0.95;

const ELEMENT_SELECTOR: &str = r#"[class*="price"], [id*="price"], [class*="Price"], [id*="Price"], [data-price], .amount, .cost, span, strong, b, p, dd, td, ins, del, s"#;

const PRICE_HINTS: &[&str] = &["price", "amount", "cost", "sale", "offer", "current", "final"];
const STALE_PRICE_HINTS: &[&str] = &[
    "old", "was", "strike", "listprice", "regular", "compare", "original", "rrp", "mrp",
];
const STALE_PRICE_WORDS: &[&str] = &["was ", "list price", "rrp", "mrp", "regular price"];
const STRUCK_TAGS: &[&str] = &["s", "del", "strike"];

#[derive(Debug, Clone)]
struct Candidate {
    money: Money,
    score: f64,
    source: &'static str,
    has_marker: bool,
}

#[derive(Debug, Default)]
struct StructuredProduct {
    name: Option<String>,
    image: Option<String>,
    availability: Option<Availability>,
}

/// Best-effort extractor for storefronts without a dedicated profile.
///
/// Gathers price candidates from JSON-LD offers, price meta/microdata tags
/// and elements whose text reads as a currency amount, scores them and keeps
/// the highest. Ties go to the candidate found first.
pub struct GenericExtractor {
    parser: PriceParser,
    price_pattern: Regex,
}

impl Default for GenericExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl GenericExtractor {
    pub fn new() -> Self {
        Self {
            parser: PriceParser::new(),
            price_pattern: Regex::new(
                r"(?:[$€£¥₹]|\b[A-Z]{3}\b)\s?\d|\d\s?(?:[$€£¥₹]|\b[A-Z]{3}\b)",
            )
            .unwrap(),
        }
    }

    fn structured_candidates(
        &self,
        document: &Html,
        context: Option<&str>,
        product: &mut StructuredProduct,
    ) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
            return candidates;
        };

        for script in document.select(&selector) {
            let raw: String = script.text().collect();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => self.walk_json_ld(&value, context, product, &mut candidates),
                Err(e) => debug!("Skipping unparseable JSON-LD block: {}", e),
            }
        }
        candidates
    }

    fn walk_json_ld(
        &self,
        value: &Value,
        context: Option<&str>,
        product: &mut StructuredProduct,
        candidates: &mut Vec<Candidate>,
    ) {
        match value {
            Value::Array(items) => {
                for item in items {
                    self.walk_json_ld(item, context, product, candidates);
                }
            }
            Value::Object(map) => {
                if has_type(value, "Product") {
                    if product.name.is_none() {
                        product.name = map.get("name").and_then(Value::as_str).map(|s| s.trim().to_string());
                    }
                    if product.image.is_none() {
                        product.image = map.get("image").and_then(json_image);
                    }
                }

                let amount = map.get("price").or_else(|| map.get("lowPrice"));
                if let Some(amount) = amount {
                    let currency = map
                        .get("priceCurrency")
                        .and_then(Value::as_str)
                        .map(|c| c.trim().to_uppercase())
                        .filter(|c| c.len() == 3);
                    if let Some(money) = self.structured_amount(amount, currency.as_deref(), context) {
                        candidates.push(Candidate {
                            money,
                            score: STRUCTURED_DATA_SCORE,
                            source: "json-ld",
                            has_marker: true,
                        });
                    }
                    if product.availability.is_none() {
                        product.availability = map
                            .get("availability")
                            .and_then(Value::as_str)
                            .and_then(availability_from_schema);
                    }
                }

                for (key, nested) in map {
                    if key != "price" && key != "lowPrice" {
                        self.walk_json_ld(nested, context, product, candidates);
                    }
                }
            }
            _ => {}
        }
    }

    /// Structured data uses plain decimal notation; display text is only
    /// a fallback.
    fn structured_amount(&self, amount: &Value, currency: Option<&str>, context: Option<&str>) -> Option<Money> {
        let text = match amount {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            _ => return None,
        };

        match Decimal::from_str(&text) {
            Ok(value) if value >= Decimal::ZERO => {
                Some(Money::new(value, currency.or(context).unwrap_or("USD")))
            }
            _ => {
                let parsed = self.parser.parse(&text, currency.or(context))?;
                match currency {
                    Some(code) => Some(Money::new(parsed.amount, code)),
                    None => Some(parsed),
                }
            }
        }
    }

    fn meta_candidates(&self, document: &Html, context: Option<&str>) -> Vec<Candidate> {
        let currency = first_attr(
            document,
            &[
                r#"meta[property="product:price:currency"]"#,
                r#"meta[property="og:price:currency"]"#,
                r#"[itemprop="priceCurrency"]"#,
            ][..],
            "content",
        )
        .or_else(|| first_text(document, &[r#"[itemprop="priceCurrency"]"#][..]))
        .map(|c| c.to_uppercase())
        .filter(|c| c.len() == 3);

        let mut amounts = Vec::new();
        if let Ok(selector) = Selector::parse(
            r#"meta[property="product:price:amount"], meta[property="og:price:amount"], [itemprop="price"]"#,
        ) {
            for element in document.select(&selector) {
                let raw = element
                    .value()
                    .attr("content")
                    .map(|c| c.trim().to_string())
                    .unwrap_or_else(|| element_text(&element));
                if !raw.is_empty() {
                    amounts.push(raw);
                }
            }
        }

        amounts
            .iter()
            .filter_map(|raw| {
                self.structured_amount(&Value::String(raw.clone()), currency.as_deref(), context)
            })
            .map(|money| Candidate {
                money,
                score: META_TAG_SCORE,
                source: "meta",
                has_marker: true,
            })
            .collect()
    }

    fn element_candidates(&self, document: &Html, context: Option<&str>) -> Vec<Candidate> {
        let Ok(selector) = Selector::parse(ELEMENT_SELECTOR) else {
            return Vec::new();
        };

        document
            .select(&selector)
            .filter_map(|element| {
                let text = element_text(&element);
                if text.is_empty() || text.chars().count() > 120 {
                    return None;
                }
                let money = self.parser.parse(&text, context)?;
                let has_marker = self.parser.has_currency_marker(&text);
                Some(Candidate {
                    money,
                    score: self.score_element(&element, &text, has_marker),
                    source: "element",
                    has_marker,
                })
            })
            .collect()
    }

    fn score_element(&self, element: &ElementRef, text: &str, has_marker: bool) -> f64 {
        let mut confidence = 0.2;

        if has_marker {
            confidence += 0.3;
        }

        if self.price_pattern.is_match(text) {
            confidence += 0.4;
        }

        let own_attrs = attribute_text(element);
        let parent_attrs = element
            .parent()
            .and_then(ElementRef::wrap)
            .map(|parent| attribute_text(&parent))
            .unwrap_or_default();
        if PRICE_HINTS
            .iter()
            .any(|hint| own_attrs.contains(hint) || parent_attrs.contains(hint))
        {
            confidence += 0.1;
        }

        if is_stale_price(element, text) {
            confidence *= 0.3;
        }

        let letters = text.chars().filter(|c| c.is_alphabetic()).count();
        if letters > 12 {
            confidence *= 0.5;
        }

        if text.chars().count() > 40 {
            confidence *= 0.5;
        }

        f64::min(confidence, 1.0)
    }

    fn extract_availability(&self, document: &Html, structured: Option<Availability>) -> Option<Availability> {
        if structured.is_some() {
            return structured;
        }

        let microdata = first_attr(document, &[r#"link[itemprop="availability"]"#][..], "href")
            .or_else(|| first_attr(document, &[r#"[itemprop="availability"]"#][..], "content"));
        if let Some(availability) = microdata.as_deref().and_then(availability_from_schema) {
            return Some(availability);
        }

        let selector = Selector::parse(
            r#"[class*="availability"], [id*="availability"], [class*="stock"], [id*="stock"]"#,
        )
        .ok()?;
        document
            .select(&selector)
            .map(|element| element_text(&element))
            .filter(|text| !text.is_empty() && text.len() <= 200)
            .find_map(|text| availability_from_text(&text))
    }

    fn extract_title(&self, document: &Html, structured: Option<String>) -> Option<String> {
        structured
            .filter(|name| !name.is_empty())
            .or_else(|| first_attr(document, &[r#"meta[property="og:title"]"#][..], "content"))
            .or_else(|| first_text(document, &["h1", "title"][..]))
    }

    fn extract_image(&self, document: &Html, page: &RawPage, structured: Option<String>) -> Option<String> {
        let raw = structured
            .or_else(|| first_attr(document, &[r#"meta[property="og:image"]"#][..], "content"))
            .or_else(|| first_attr(document, &[r#"[itemprop="image"]"#][..], "content"))
            .or_else(|| {
                first_attr(
                    document,
                    &[r#"img[itemprop="image"]"#, r#"img[id*="product"]"#, r#"img[class*="product"]"#][..],
                    "src",
                )
            })?;

        page.final_url
            .join(&raw)
            .map(|url| url.to_string())
            .ok()
            .filter(|url| !url.starts_with("data:"))
    }
}

impl PriceExtractor for GenericExtractor {
    fn variant(&self) -> &str {
        GENERIC_VARIANT
    }

    fn extract(&self, page: &RawPage) -> Result<PriceReading, ExtractionFailure> {
        let html = ensure_html(page, GENERIC_VARIANT)?;
        let document = Html::parse_document(&html);
        let context = context_currency(page, &document);

        let mut structured = StructuredProduct::default();
        let mut candidates = self.structured_candidates(&document, context, &mut structured);
        candidates.extend(self.meta_candidates(&document, context));
        candidates.extend(self.element_candidates(&document, context));

        let mut best: Option<&Candidate> = None;
        for candidate in &candidates {
            if best.map_or(true, |b| candidate.score > b.score) {
                best = Some(candidate);
            }
        }
        let confident = best.filter(|c| c.score >= MIN_CONFIDENCE);

        if let Some(candidate) = confident {
            debug!(
                "generic: picked {} from {} (score {:.2}, {} candidates)",
                candidate.money,
                candidate.source,
                candidate.score,
                candidates.len()
            );
        }

        let price = confident.map(|c| c.money.clone());
        let availability = match (self.extract_availability(&document, structured.availability), &price) {
            (Some(availability), _) => availability,
            (None, Some(_)) => Availability::InStock,
            (None, None) => Availability::Unknown,
        };

        if price.is_none() && availability != Availability::OutOfStock {
            let distinct: HashSet<&Money> = candidates.iter().filter(|c| c.has_marker).map(|c| &c.money).collect();
            let failure = if distinct.len() >= 2 {
                ExtractionFailure::new(
                    ExtractionFailureKind::AmbiguousPrice,
                    GENERIC_VARIANT,
                    format!("{} competing low-confidence prices", distinct.len()),
                )
            } else {
                ExtractionFailure::new(
                    ExtractionFailureKind::NoPriceFound,
                    GENERIC_VARIANT,
                    format!("no price candidate among {} scored elements", candidates.len()),
                )
            };
            return Err(failure);
        }

        Ok(PriceReading {
            price,
            availability,
            title: self.extract_title(&document, structured.name),
            image_url: self.extract_image(&document, page, structured.image),
            variant: GENERIC_VARIANT.to_string(),
        })
    }
}

fn has_type(value: &Value, wanted: &str) -> bool {
    match value.get("@type") {
        Some(Value::String(t)) => t == wanted,
        Some(Value::Array(types)) => types.iter().any(|t| t.as_str() == Some(wanted)),
        _ => false,
    }
}

fn json_image(value: &Value) -> Option<String> {
    match value {
        Value::String(url) => Some(url.clone()),
        Value::Array(items) => items.iter().find_map(json_image),
        Value::Object(map) => map.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn attribute_text(element: &ElementRef) -> String {
    let value = element.value();
    [value.attr("class"), value.attr("id"), value.attr("itemprop")]
        .iter()
        .flatten()
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Struck-through or "was" prices: the element or a close ancestor is a
/// strike-through tag or carries an old-price class, or the text says so.
fn is_stale_price(element: &ElementRef, text: &str) -> bool {
    let lower = text.to_lowercase();
    if STALE_PRICE_WORDS.iter().any(|w| lower.contains(w)) {
        return true;
    }

    std::iter::once(*element)
        .chain(element.ancestors().filter_map(ElementRef::wrap).take(3))
        .any(|el| {
            STRUCK_TAGS.contains(&el.value().name())
                || attribute_text(&el)
                    .split(|c: char| !c.is_alphanumeric())
                    .any(|part| STALE_PRICE_HINTS.contains(&part))
        })
}
