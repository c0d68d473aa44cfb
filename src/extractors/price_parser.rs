use regex::Regex;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::models::Money;

/// Currency used when neither the text nor the page context names one.
pub const FALLBACK_CURRENCY: &str = "USD";

/// Currencies written with a bare `$`.
const DOLLAR_CURRENCIES: &[&str] = &["USD", "AUD", "CAD", "NZD", "SGD", "HKD", "MXN"];

/// Symbols that identify a currency on their own, checked longest first.
const CURRENCY_SYMBOLS: &[(&str, &str)] = &[
    ("US$", "USD"),
    ("AU$", "AUD"),
    ("CA$", "CAD"),
    ("NZ$", "NZD"),
    ("HK$", "HKD"),
    ("Rs.", "INR"),
    ("A$", "AUD"),
    ("C$", "CAD"),
    ("S$", "SGD"),
    ("R$", "BRL"),
    ("zł", "PLN"),
    ("€", "EUR"),
    ("£", "GBP"),
    ("₹", "INR"),
    ("¥", "JPY"),
    ("￥", "JPY"),
    ("₩", "KRW"),
];

/// Turns display text such as `"$1,299.99"` or `"1.299,99 €"` into an amount
/// and an ISO currency code.
pub struct PriceParser {
    number_regex: Regex,
    iso_regex: Regex,
}

impl Default for PriceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceParser {
    pub fn new() -> Self {
        PriceParser {
            // Digits with ".", ",", apostrophe or non-breaking space separators.
            number_regex: Regex::new(r"\d[\d.,'\u{00A0}\u{202F}]*").unwrap(),
            iso_regex: Regex::new(
                r"\b(USD|EUR|GBP|INR|JPY|AUD|CAD|CHF|CNY|SEK|NOK|DKK|PLN|BRL|MXN|NZD|SGD|HKD|KRW)\b",
            )
            .unwrap(),
        }
    }

    /// Parses the price in `text`. `context_currency` is the currency implied
    /// by the page (storefront, locale) and decides what a bare `$` or a
    /// symbol-less amount means.
    pub fn parse(&self, text: &str, context_currency: Option<&str>) -> Option<Money> {
        let (currency, anchor) = match self.explicit_currency(text) {
            Some((code, position)) => (code.to_string(), Some(position)),
            None => match text.find('$') {
                Some(position) => (dollar_currency(context_currency).to_string(), Some(position)),
                None => (
                    context_currency.unwrap_or(FALLBACK_CURRENCY).to_string(),
                    None,
                ),
            },
        };

        let amount = self.pick_amount(text, anchor)?;
        Some(Money::new(amount, &currency))
    }

    /// True when `text` names a currency explicitly, by symbol or ISO code.
    pub fn has_currency_marker(&self, text: &str) -> bool {
        text.contains('$') || self.explicit_currency(text).is_some()
    }

    fn explicit_currency(&self, text: &str) -> Option<(&'static str, usize)> {
        for &(symbol, code) in CURRENCY_SYMBOLS {
            if let Some(position) = text.find(symbol) {
                return Some((code, position));
            }
        }

        self.iso_regex.captures(text).and_then(|c| c.get(1)).and_then(|m| {
            let code = m.as_str();
            CURRENCY_CODES
                .iter()
                .copied()
                .find(|known| *known == code)
                .map(|known| (known, m.start()))
        })
    }

    /// Chooses the number token closest to the currency marker, or the first
    /// one when there is no marker. Percentages are never prices.
    fn pick_amount(&self, text: &str, anchor: Option<usize>) -> Option<Decimal> {
        let candidates: Vec<(usize, Decimal)> = self
            .number_regex
            .find_iter(text)
            .filter(|m| !text[m.end()..].trim_start().starts_with('%'))
            .filter_map(|m| normalize_number(m.as_str()).map(|amount| (m.start(), amount)))
            .collect();

        match anchor {
            Some(anchor) => candidates
                .into_iter()
                .min_by_key(|(start, _)| start.abs_diff(anchor))
                .map(|(_, amount)| amount),
            None => candidates.into_iter().next().map(|(_, amount)| amount),
        }
    }
}

const CURRENCY_CODES: &[&str] = &[
    "USD", "EUR", "GBP", "INR", "JPY", "AUD", "CAD", "CHF", "CNY", "SEK", "NOK", "DKK", "PLN",
    "BRL", "MXN", "NZD", "SGD", "HKD", "KRW",
];

fn dollar_currency(context_currency: Option<&str>) -> &str {
    match context_currency {
        Some(code) if DOLLAR_CURRENCIES.contains(&code) => code,
        _ => FALLBACK_CURRENCY,
    }
}

/// Normalizes a number token with locale-specific separators.
///
/// When both `.` and `,` appear, the last one is the decimal separator. A
/// separator that repeats is a thousands separator, as is a single one
/// followed by exactly three digits.
pub fn normalize_number(token: &str) -> Option<Decimal> {
    let cleaned: String = token
        .trim_end_matches(|c: char| matches!(c, '.' | ',' | '\'' | '\u{00A0}' | '\u{202F}'))
        .chars()
        .filter(|c| !matches!(c, '\'' | '\u{00A0}' | '\u{202F}'))
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let last_dot = cleaned.rfind('.');
    let last_comma = cleaned.rfind(',');

    let normalized = match (last_dot, last_comma) {
        (Some(dot), Some(comma)) => {
            let (decimal_sep, thousands_sep) = if dot > comma { ('.', ',') } else { (',', '.') };
            cleaned
                .replace(thousands_sep, "")
                .replace(decimal_sep, ".")
        }
        (Some(_), None) => resolve_single_separator(&cleaned, '.'),
        (None, Some(_)) => resolve_single_separator(&cleaned, ','),
        (None, None) => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}

fn resolve_single_separator(text: &str, separator: char) -> String {
    let occurrences = text.matches(separator).count();
    let digits_after = text
        .rfind(separator)
        .map(|idx| text.len() - idx - separator.len_utf8())
        .unwrap_or(0);

    if occurrences > 1 || digits_after == 3 {
        text.replace(separator, "")
    } else {
        text.replace(separator, ".")
    }
}
