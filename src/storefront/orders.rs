//! Order lookup and the signed-in member's order history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::cache::QueryKey;
use crate::client::QueryClient;
use crate::gateway::GatewayError;
use crate::infinite::InfiniteQuery;
use crate::query::QueryObserver;

pub fn orders_key() -> QueryKey {
  QueryKey::from("orders")
}

pub fn order_key(order_id: &str) -> QueryKey {
  orders_key().with(order_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(default)]
  pub number: Option<String>,
  #[serde(default, rename = "_createdDate")]
  pub created_date: Option<DateTime<Utc>>,
  #[serde(default)]
  pub status: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Order {
  pub fn label(&self) -> String {
    match &self.number {
      Some(number) => format!("Order #{}", number),
      None => format!("Order {}", self.id),
    }
  }
}

/// Look up one order. An unknown id is an expected outcome, not a failure,
/// and is cached like any other answer.
pub async fn get_order(client: &QueryClient, order_id: &str) -> Result<Option<Order>, GatewayError> {
  let key = order_key(order_id);
  client.allow_absent(&key);
  client
    .ensure_query::<Option<Order>>(&key)
    .await
    .map(|result| result.data)
}

/// Subscribe to one order; `None` once the server reports it does not exist.
pub fn observe_order(client: &QueryClient, order_id: &str) -> QueryObserver<Option<Order>> {
  let key = order_key(order_id);
  client.allow_absent(&key);
  client.observe(key)
}

/// Paginated order history, `page_size` orders per request.
pub fn order_history(client: &QueryClient, page_size: usize) -> InfiniteQuery<Order> {
  client.infinite(orders_key(), page_size)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_order_keys_share_prefix() {
    assert_eq!(order_key("o-1").to_string(), r#"["orders","o-1"]"#);
    assert_eq!(order_key("o-1").segments()[0], orders_key().segments()[0]);
  }

  #[test]
  fn test_order_decodes() {
    let order: Order = serde_json::from_value(json!({
      "_id": "o-1",
      "number": "10042",
      "_createdDate": "2024-05-01T10:00:00Z",
      "status": "APPROVED",
      "priceSummary": { "total": { "formattedAmount": "12,00 €" } }
    }))
    .unwrap();

    assert_eq!(order.label(), "Order #10042");
    assert_eq!(order.status.as_deref(), Some("APPROVED"));
    assert!(order.created_date.is_some());
    assert!(order.extra.contains_key("priceSummary"));
  }

  #[test]
  fn test_order_label_without_number() {
    let order: Order = serde_json::from_value(json!({ "_id": "o-2" })).unwrap();
    assert_eq!(order.label(), "Order o-2");
  }
}
