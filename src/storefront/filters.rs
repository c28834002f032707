//! Shop filter and sort state carried in the URL query string.
//!
//! The query string is the source of truth; `ShopFilters` is its parsed form.
//! Unrecognized or malformed parameters are dropped on parse.

use std::fmt;
use std::str::FromStr;
use url::form_urlencoded;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SortKey {
  #[default]
  Newest,
  PriceAsc,
  PriceDesc,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown sort key: {0}")]
pub struct UnknownSortKey(pub String);

impl SortKey {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Newest => "last_updated",
      Self::PriceAsc => "price_asc",
      Self::PriceDesc => "price_desc",
    }
  }
}

impl FromStr for SortKey {
  type Err = UnknownSortKey;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "last_updated" | "newest" => Ok(Self::Newest),
      "price_asc" => Ok(Self::PriceAsc),
      "price_desc" => Ok(Self::PriceDesc),
      other => Err(UnknownSortKey(other.to_string())),
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ShopFilters {
  pub collection_ids: Vec<String>,
  pub price_min: Option<f64>,
  pub price_max: Option<f64>,
  pub sort: Option<SortKey>,
  /// 1-based result page
  pub page: Option<u32>,
}

/// Partial change to [`ShopFilters`]. `None` leaves a field as it is;
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterUpdate {
  pub collection_ids: Option<Vec<String>>,
  pub price_min: Option<Option<f64>>,
  pub price_max: Option<Option<f64>>,
  pub sort: Option<Option<SortKey>>,
}

impl ShopFilters {
  /// Parse a query string, with or without the leading `?`.
  pub fn from_query(query: &str) -> Self {
    let query = query.strip_prefix('?').unwrap_or(query);
    let mut filters = Self::default();

    for (name, value) in form_urlencoded::parse(query.as_bytes()) {
      match name.as_ref() {
        "collection" if !value.is_empty() => filters.collection_ids.push(value.into_owned()),
        "price_min" => filters.price_min = parse_price(&value),
        "price_max" => filters.price_max = parse_price(&value),
        "sort" => filters.sort = value.parse().ok(),
        "page" => filters.page = value.parse().ok().filter(|page| *page > 0),
        _ => {}
      }
    }
    filters
  }

  /// Render as a query string without the leading `?`.
  pub fn to_query(&self) -> String {
    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for id in &self.collection_ids {
      serializer.append_pair("collection", id);
    }
    if let Some(min) = self.price_min {
      serializer.append_pair("price_min", &min.to_string());
    }
    if let Some(max) = self.price_max {
      serializer.append_pair("price_max", &max.to_string());
    }
    if let Some(sort) = self.sort {
      serializer.append_pair("sort", sort.as_str());
    }
    if let Some(page) = self.page {
      serializer.append_pair("page", &page.to_string());
    }
    serializer.finish()
  }

  /// Merge `update` into a copy of these filters. Any filter change starts
  /// results over, so the page is always dropped.
  pub fn apply(&self, update: FilterUpdate) -> Self {
    let mut next = self.clone();
    if let Some(ids) = update.collection_ids {
      next.collection_ids = ids;
    }
    if let Some(min) = update.price_min {
      next.price_min = min;
    }
    if let Some(max) = update.price_max {
      next.price_max = max;
    }
    if let Some(sort) = update.sort {
      next.sort = sort;
    }
    next.page = None;
    next
  }

  pub fn with_page(mut self, page: u32) -> Self {
    self.page = (page > 0).then_some(page);
    self
  }

  /// Sort to use when none is selected.
  pub fn effective_sort(&self) -> SortKey {
    self.sort.unwrap_or_default()
  }
}

fn parse_price(value: &str) -> Option<f64> {
  value
    .parse::<f64>()
    .ok()
    .filter(|price| price.is_finite() && *price >= 0.0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_full_query() {
    let filters =
      ShopFilters::from_query("?collection=c1&collection=c2&price_min=10&price_max=99.5&sort=price_asc&page=3");
    assert_eq!(filters.collection_ids, vec!["c1", "c2"]);
    assert_eq!(filters.price_min, Some(10.0));
    assert_eq!(filters.price_max, Some(99.5));
    assert_eq!(filters.sort, Some(SortKey::PriceAsc));
    assert_eq!(filters.page, Some(3));
  }

  #[test]
  fn test_parse_drops_malformed_values() {
    let filters = ShopFilters::from_query("price_min=cheap&sort=random&page=0&collection=&utm=x");
    assert_eq!(filters, ShopFilters::default());
  }

  #[test]
  fn test_sort_aliases() {
    assert_eq!("newest".parse::<SortKey>(), Ok(SortKey::Newest));
    assert_eq!("last_updated".parse::<SortKey>(), Ok(SortKey::Newest));
    assert_eq!(SortKey::Newest.to_string(), "last_updated");
    assert!("name".parse::<SortKey>().is_err());
  }

  #[test]
  fn test_render_query() {
    let filters = ShopFilters {
      collection_ids: vec!["summer sale".to_string()],
      price_min: Some(5.0),
      price_max: None,
      sort: Some(SortKey::PriceDesc),
      page: Some(2),
    };
    assert_eq!(
      filters.to_query(),
      "collection=summer+sale&price_min=5&sort=price_desc&page=2"
    );
    assert_eq!(ShopFilters::from_query(&filters.to_query()), filters);
  }

  #[test]
  fn test_apply_merges_and_drops_page() {
    let filters = ShopFilters::from_query("collection=c1&price_min=10&sort=price_asc&page=4");
    let next = filters.apply(FilterUpdate {
      price_min: Some(None),
      sort: Some(Some(SortKey::PriceDesc)),
      ..FilterUpdate::default()
    });

    assert_eq!(next.collection_ids, vec!["c1"]);
    assert_eq!(next.price_min, None);
    assert_eq!(next.sort, Some(SortKey::PriceDesc));
    assert_eq!(next.page, None);
  }

  #[test]
  fn test_empty_update_still_resets_page() {
    let filters = ShopFilters::default().with_page(5);
    assert_eq!(filters.apply(FilterUpdate::default()).page, None);
    assert_eq!(ShopFilters::default().with_page(0).page, None);
    assert_eq!(ShopFilters::default().effective_sort(), SortKey::Newest);
  }
}
