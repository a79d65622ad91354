//! Search query construction.
//!
//! Identifier precedence: EAN, UPC (exact-match providers only), MPN, SKU,
//! then a cleaned-up descriptive name.

use std::sync::LazyLock;

use imagefetch_common::ProviderKind;
use imagefetch_db::models::Item;
use regex::Regex;

const MAX_KEYWORD_LEN: usize = 100;

static EMBEDDED_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{8}\b").expect("static regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Ean,
    Upc,
    Mpn,
    Sku,
    Name,
}

impl QueryKind {
    /// Whether the query is a barcode the provider can look up directly.
    pub fn is_barcode(&self) -> bool {
        matches!(self, Self::Ean | Self::Upc)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub kind: QueryKind,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }
}

/// Build the query `provider` should run for `item`, or `None` if the item
/// carries nothing searchable.
pub fn build_query(item: &Item, provider: ProviderKind) -> Option<SearchQuery> {
    if provider.supports_identifier_lookup() {
        if let Some(ean) = barcode(item.ean.as_deref()) {
            return Some(SearchQuery::new(ean, QueryKind::Ean));
        }
        if let Some(upc) = barcode(item.upc.as_deref()) {
            return Some(SearchQuery::new(upc, QueryKind::Upc));
        }
    }
    if let Some(mpn) = non_blank(item.mpn.as_deref()) {
        return Some(SearchQuery::new(mpn, QueryKind::Mpn));
    }
    if let Some(sku) = non_blank(item.sku.as_deref()) {
        return Some(SearchQuery::new(sku, QueryKind::Sku));
    }

    let keywords = clean_keywords(&item.name, item.category.as_deref());
    if keywords.is_empty() {
        None
    } else {
        Some(SearchQuery::new(keywords, QueryKind::Name))
    }
}

/// Simplified-name query for a second search after an identifier query
/// came back without a usable image. The category is left out.
pub fn fallback_query(item: &Item) -> Option<SearchQuery> {
    let keywords = clean_keywords(&item.name, None);
    (!keywords.is_empty()).then(|| SearchQuery::new(keywords, QueryKind::Name))
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn barcode(value: Option<&str>) -> Option<&str> {
    non_blank(value).filter(|v| v.chars().all(|c| c.is_ascii_digit()))
}

/// Strip embedded 8-digit codes, collapse whitespace, add the category when
/// it is not already part of the name and cut at a word boundary.
pub fn clean_keywords(name: &str, category: Option<&str>) -> String {
    let stripped = EMBEDDED_CODE.replace_all(name, " ");
    let mut keywords = WHITESPACE.replace_all(&stripped, " ").trim().to_string();

    if let Some(category) = non_blank(category) {
        let known = keywords.to_lowercase().contains(&category.to_lowercase());
        if !category.eq_ignore_ascii_case("all") && !known {
            if !keywords.is_empty() {
                keywords.push(' ');
            }
            keywords.push_str(category);
        }
    }

    truncate_at_word(&keywords, MAX_KEYWORD_LEN)
}

fn truncate_at_word(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let cut: String = text.chars().take(max).collect();
    match cut.rfind(' ') {
        Some(pos) if pos > 0 => cut[..pos].to_string(),
        _ => cut,
    }
}
