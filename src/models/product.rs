use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use url::Url;

use crate::models::{generate_id, ThresholdPolicy};
use crate::utils::error::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Product {
    pub id: String,
    /// Canonical form, see [`canonicalize_url`].
    pub url: String,
    pub name: String,
    /// Extractor variant that handles this product's host.
    pub site: String,
    pub threshold: ThresholdPolicy,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewProduct {
    pub url: String,
    pub name: Option<String>,
    pub site: String,
    pub threshold: Option<ThresholdPolicy>,
}

impl Product {
    pub fn new(new_product: NewProduct) -> Result<Self, AppError> {
        let url = canonicalize_url(&new_product.url)?;
        let threshold = new_product.threshold.unwrap_or_default();
        threshold.validate()?;

        let name = new_product
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| url.host_str().unwrap_or("product").to_string());

        Ok(Self {
            id: generate_id(),
            url: url.to_string(),
            name,
            site: new_product.site,
            threshold,
            created_at: Utc::now(),
        })
    }

    pub fn parsed_url(&self) -> Result<Url, AppError> {
        Url::parse(&self.url).map_err(|e| AppError::InvalidUrl {
            url: self.url.clone(),
            reason: e.to_string(),
        })
    }
}

const TRACKING_PARAMS: &[&str] = &[
    "gclid", "fbclid", "msclkid", "yclid", "mc_cid", "mc_eid", "_encoding", "psc", "th",
    "smid", "qid", "sr", "keywords", "crid", "sprefix", "ref", "ref_", "tag", "linkcode",
    "linkid", "camp", "creative", "creativeasin", "spm", "srsltid", "_ga",
];

const TRACKING_PREFIXES: &[&str] = &["utm_", "pd_rd_", "pf_rd_", "content-id"];

fn amazon_product_path() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"/(?:dp|gp/product|gp/aw/d|exec/obidos/asin)/([A-Z0-9]{10})(?:[/?]|$)")
            .expect("static regex")
    })
}

fn is_tracking_param(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    TRACKING_PARAMS.contains(&key.as_str()) || TRACKING_PREFIXES.iter().any(|p| key.starts_with(p))
}

/// Normalizes a product URL into the identity a product is stored under.
///
/// Scheme and host are lowercased, default ports, fragments and tracking
/// parameters are dropped, remaining query parameters are sorted, and Amazon
/// product links are reduced to `/dp/<ASIN>`.
pub fn canonicalize_url(raw: &str) -> Result<Url, AppError> {
    let invalid = |reason: &str| AppError::InvalidUrl {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(invalid("only http and https URLs can be tracked"));
    }
    let host = url
        .host_str()
        .ok_or_else(|| invalid("missing host"))?
        .trim_end_matches('.')
        .to_ascii_lowercase();
    url.set_host(Some(&host)).map_err(|e| invalid(&e.to_string()))?;
    url.set_fragment(None);

    if host.split('.').any(|label| label == "amazon") {
        let asin = amazon_product_path()
            .captures(url.path())
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string());
        if let Some(asin) = asin {
            url.set_path(&format!("/dp/{}", asin));
            url.set_query(None);
            return Ok(url);
        }
    }

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    params.sort();

    if params.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    if url.path().len() > 1 && url.path().ends_with('/') {
        let trimmed = url.path().trim_end_matches('/').to_string();
        url.set_path(&trimmed);
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BaselineRule, DropTrigger};
    use rust_decimal::Decimal;

    fn new_product(url: &str) -> NewProduct {
        NewProduct {
            url: url.to_string(),
            name: Some("Test Headphones".to_string()),
            site: "generic".to_string(),
            threshold: None,
        }
    }

    #[test]
    fn test_product_creation_uses_canonical_url() {
        let product = Product::new(new_product(
            "HTTPS://Shop.Example.com:443/item/42/?utm_source=mail&color=red#reviews",
        ))
        .unwrap();

        assert_eq!(product.url, "https://shop.example.com/item/42?color=red");
        assert_eq!(product.name, "Test Headphones");
        assert_eq!(product.threshold, ThresholdPolicy::default());
        assert_eq!(product.id.len(), 32);
    }

    #[test]
    fn test_product_name_falls_back_to_host() {
        let mut request = new_product("https://shop.example.com/item/42");
        request.name = Some("   ".to_string());
        let product = Product::new(request).unwrap();
        assert_eq!(product.name, "shop.example.com");
    }

    #[test]
    fn test_product_rejects_invalid_threshold() {
        let mut request = new_product("https://shop.example.com/item/42");
        request.threshold = Some(ThresholdPolicy::new(
            DropTrigger::Absolute(Decimal::ZERO),
            BaselineRule::InitialTracked,
        ));
        assert!(matches!(Product::new(request), Err(AppError::Validation(_))));
    }

    #[test]
    fn test_canonicalize_strips_tracking_and_sorts_query() {
        let url = canonicalize_url(
            "https://example.com/p?b=2&fbclid=abc&a=1&utm_campaign=spring&gclid=x",
        )
        .unwrap();
        assert_eq!(url.as_str(), "https://example.com/p?a=1&b=2");
    }

    #[test]
    fn test_canonicalize_amazon_product_links() {
        let long = canonicalize_url(
            "https://www.amazon.in/Some-Product-Name/dp/B0C1234567/ref=sr_1_3?keywords=x&qid=1",
        )
        .unwrap();
        assert_eq!(long.as_str(), "https://www.amazon.in/dp/B0C1234567");

        let gp = canonicalize_url("https://www.amazon.com/gp/product/B000123456?psc=1").unwrap();
        assert_eq!(gp.as_str(), "https://www.amazon.com/dp/B000123456");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let once = canonicalize_url("https://Example.com/a/b/?x=1&utm_medium=cpc").unwrap();
        let twice = canonicalize_url(once.as_str()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_canonicalize_rejects_non_http() {
        let err = canonicalize_url("ftp://example.com/file").unwrap_err();
        assert!(err.to_string().contains("only http and https"));
        assert!(canonicalize_url("not a url").is_err());
    }
}
