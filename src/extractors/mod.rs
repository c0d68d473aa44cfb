pub mod generic;
pub mod price_parser;
pub mod registry;
pub mod site;

pub use generic::GenericExtractor;
pub use price_parser::PriceParser;
pub use registry::ExtractorRegistry;
pub use site::{PriceRule, SiteExtractor, SiteProfile};

use scraper::{ElementRef, Html, Selector};

use crate::fetcher::RawPage;
use crate::models::{Availability, PriceReading};
use crate::utils::error::{ExtractionFailure, ExtractionFailureKind};

/// Turns a fetched page into a price reading.
///
/// Implementations are pure: the same page always yields the same result,
/// and a failure is final for that page.
pub trait PriceExtractor: Send + Sync {
    /// Name recorded on every observation this extractor produces.
    fn variant(&self) -> &str;

    fn extract(&self, page: &RawPage) -> Result<PriceReading, ExtractionFailure>;
}

const OUT_OF_STOCK_MARKERS: &[&str] = &[
    "currently unavailable",
    "unavailable",
    "not in stock",
    "out of stock",
    "sold out",
    "no longer available",
    "not available for purchase",
    "ausverkauft",
    "nicht verfügbar",
    "nicht auf lager",
    "rupture de stock",
    "indisponible",
    "non disponibile",
    "no disponible",
    "no está disponible",
    "agotado",
    "在庫切れ",
];

const IN_STOCK_MARKERS: &[&str] = &[
    "in stock",
    "available to ship",
    "add to cart",
    "add to basket",
    "auf lager",
    "en stock",
    "disponibile",
    "disponible",
];

/// Reads availability from free text such as an availability banner.
/// Out-of-stock wording wins over in-stock wording.
pub fn availability_from_text(text: &str) -> Option<Availability> {
    let lower = text.to_lowercase();
    if OUT_OF_STOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(Availability::OutOfStock)
    } else if IN_STOCK_MARKERS.iter().any(|m| lower.contains(m)) {
        Some(Availability::InStock)
    } else {
        None
    }
}

/// Maps a schema.org availability value (`https://schema.org/InStock`,
/// `OutOfStock`, ...) onto [`Availability`].
pub fn availability_from_schema(value: &str) -> Option<Availability> {
    let item = value.rsplit('/').next().unwrap_or(value).trim().to_lowercase();
    match item.as_str() {
        "instock" | "limitedavailability" | "onlineonly" | "instoreonly" => Some(Availability::InStock),
        "outofstock" | "soldout" | "discontinued" => Some(Availability::OutOfStock),
        "preorder" | "presale" | "backorder" => Some(Availability::Unknown),
        _ => None,
    }
}

/// Rejects bodies that cannot be an HTML document and returns the decoded
/// text otherwise.
pub fn ensure_html(page: &RawPage, variant: &str) -> Result<String, ExtractionFailure> {
    let malformed = |message: &str| {
        ExtractionFailure::new(ExtractionFailureKind::MalformedPage, variant, message)
    };

    if page.content.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(malformed("empty response body"));
    }

    let text = page.text().into_owned();
    let total = text.chars().count();
    let replaced = text.chars().filter(|c| *c == '\u{FFFD}').count();
    if replaced * 10 > total {
        return Err(malformed("response body is not text"));
    }

    if !text.contains('<') {
        return Err(malformed("response body is not HTML"));
    }

    Ok(text)
}

/// Element text with whitespace runs collapsed.
pub fn element_text(element: &ElementRef) -> String {
    element
        .text()
        .flat_map(|chunk| chunk.split_whitespace())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text of the first non-empty element matching any of `selectors`, tried in
/// order.
pub fn first_text<S: AsRef<str>>(document: &Html, selectors: &[S]) -> Option<String> {
    selectors.iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str.as_ref()).ok()?;
        document
            .select(&selector)
            .map(|element| element_text(&element))
            .find(|text| !text.is_empty())
    })
}

/// First non-empty value of `attr` on an element matching any of
/// `selectors`.
pub fn first_attr<S: AsRef<str>>(document: &Html, selectors: &[S], attr: &str) -> Option<String> {
    selectors.iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str.as_ref()).ok()?;
        document
            .select(&selector)
            .filter_map(|element| element.value().attr(attr))
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty())
    })
}

/// Currency implied by the storefront: country TLD first, then the
/// document's `lang` attribute.
pub fn context_currency(page: &RawPage, document: &Html) -> Option<&'static str> {
    const TLD_CURRENCIES: &[(&str, &str)] = &[
        (".co.uk", "GBP"),
        (".uk", "GBP"),
        (".com.au", "AUD"),
        (".au", "AUD"),
        (".ca", "CAD"),
        (".de", "EUR"),
        (".fr", "EUR"),
        (".it", "EUR"),
        (".es", "EUR"),
        (".nl", "EUR"),
        (".ie", "EUR"),
        (".in", "INR"),
        (".co.jp", "JPY"),
        (".jp", "JPY"),
        (".ch", "CHF"),
    ];
    const LANG_CURRENCIES: &[(&str, &str)] = &[
        ("en-gb", "GBP"),
        ("en-au", "AUD"),
        ("en-ca", "CAD"),
        ("en-in", "INR"),
        ("hi-in", "INR"),
        ("en-us", "USD"),
        ("de-de", "EUR"),
        ("fr-fr", "EUR"),
        ("es-es", "EUR"),
        ("it-it", "EUR"),
        ("ja", "JPY"),
    ];

    if let Some(host) = page.final_url.host_str() {
        let host = host.to_ascii_lowercase();
        if let Some((_, currency)) = TLD_CURRENCIES.iter().find(|(tld, _)| host.ends_with(tld)) {
            return Some(*currency);
        }
    }

    let selector = Selector::parse("html[lang]").ok()?;
    let lang = document
        .select(&selector)
        .next()
        .and_then(|html| html.value().attr("lang"))?
        .trim()
        .to_lowercase()
        .replace('_', "-");
    LANG_CURRENCIES
        .iter()
        .find(|(prefix, _)| lang == *prefix || lang.starts_with(&format!("{}-", prefix)))
        .map(|(_, currency)| *currency)
}
