//! Shopping cart: the most contended resource in the storefront.
//!
//! Quantity changes are optimistic and share one mutation identity so the
//! cart is re-read once, after the last of a burst of clicks settles.
//! Removals are optimistic but independent. Adding and clearing wait for the
//! server.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::cache::{MutationIdentity, QueryKey};
use crate::client::QueryClient;
use crate::error::MutationError;
use crate::gateway::{ErrorCode, GatewayError};
use crate::query::QueryObserver;
use crate::sync::{Commit, Invalidation, Mutation, RetryPolicy};

const UPDATE_FAILED: &str = "Something went wrong. Please try again later.";

pub fn cart_key() -> QueryKey {
  QueryKey::from("cart")
}

/// Shared by every quantity change so their convergence is tracked together.
pub fn update_quantity_identity() -> MutationIdentity {
  MutationIdentity::new("updateCartItemQuantity")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
  #[serde(rename = "_id", default)]
  pub id: Option<String>,
  #[serde(default)]
  pub line_items: Vec<LineItem>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
  #[serde(rename = "_id")]
  pub id: String,
  #[serde(default)]
  pub quantity: u32,
  #[serde(default)]
  pub product_name: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Cart {
  pub fn line_item(&self, id: &str) -> Option<&LineItem> {
    self.line_items.iter().find(|item| item.id == id)
  }

  /// Total units across all line items.
  pub fn item_count(&self) -> u32 {
    self.line_items.iter().map(|item| item.quantity).sum()
  }
}

impl LineItem {
  pub fn display_name(&self) -> &str {
    match &self.product_name {
      Some(Value::String(name)) => name.as_str(),
      Some(Value::Object(translated)) => translated
        .get("original")
        .and_then(Value::as_str)
        .unwrap_or(self.id.as_str()),
      _ => self.id.as_str(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddToCart {
  pub product_id: String,
  pub quantity: u32,
  pub selected_options: BTreeMap<String, String>,
}

impl AddToCart {
  pub fn new(product_id: impl Into<String>, quantity: u32) -> Self {
    Self {
      product_id: product_id.into(),
      quantity,
      selected_options: BTreeMap::new(),
    }
  }

  pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.selected_options.insert(name.into(), value.into());
    self
  }

  fn payload(&self) -> Value {
    json!({
      "productId": self.product_id,
      "quantity": self.quantity,
      "options": self.selected_options,
    })
  }
}

/// Return `cart` with the quantity of line item `id` replaced.
pub fn set_line_item_quantity(cart: &Value, id: &str, quantity: u32) -> Value {
  let mut next = cart.clone();
  if let Some(items) = next.get_mut("lineItems").and_then(Value::as_array_mut) {
    for item in items.iter_mut().filter(|item| is_line_item(item, id)) {
      if let Some(fields) = item.as_object_mut() {
        fields.insert("quantity".to_string(), json!(quantity));
      }
    }
  }
  next
}

/// Return `cart` without line item `id`.
pub fn remove_line_item(cart: &Value, id: &str) -> Value {
  let mut next = cart.clone();
  if let Some(items) = next.get_mut("lineItems").and_then(Value::as_array_mut) {
    items.retain(|item| !is_line_item(item, id));
  }
  next
}

fn is_line_item(item: &Value, id: &str) -> bool {
  item.get("_id").and_then(Value::as_str) == Some(id)
}

/// Cart endpoints answer with `{"cart": ...}`.
fn cart_from_response() -> Commit {
  Commit::Pointer("/cart".to_string())
}

pub fn add_item_mutation(values: &AddToCart) -> Mutation {
  Mutation::new("cart.addToCart", values.payload())
    .target(cart_key())
    .commit(cart_from_response())
    .success_message("Item added to cart")
    .failure_message("Failed to add item to cart. Please try again.")
}

pub fn update_quantity_mutation(line_item_id: &str, quantity: u32) -> Mutation {
  let id = line_item_id.to_string();
  Mutation::new(
    "cart.updateLineItemQuantity",
    json!({ "lineItemId": line_item_id, "quantity": quantity }),
  )
  .target(cart_key())
  .identity(update_quantity_identity())
  .optimistic(move |cart| set_line_item_quantity(cart, &id, quantity))
  .commit(cart_from_response())
  .invalidate(Invalidation::OnSettled)
  .failure_message(UPDATE_FAILED)
}

pub fn remove_item_mutation(line_item_id: &str) -> Mutation {
  let id = line_item_id.to_string();
  Mutation::new("cart.removeLineItem", json!({ "lineItemId": line_item_id }))
    .target(cart_key())
    .optimistic(move |cart| remove_line_item(cart, &id))
    .commit(cart_from_response())
    .invalidate(Invalidation::OnSettled)
    .failure_message(UPDATE_FAILED)
}

pub fn clear_mutation(retry: RetryPolicy) -> Mutation {
  Mutation::new("cart.clear", Value::Null)
    .target(cart_key())
    .commit(Commit::Clear)
    .invalidate(Invalidation::OnSuccess)
    .retry(retry)
}

/// Cart operations bound to a query client.
#[derive(Clone)]
pub struct CartApi {
  client: QueryClient,
  clear_retry: RetryPolicy,
}

impl CartApi {
  pub fn new(client: QueryClient) -> Self {
    Self {
      client,
      clear_retry: RetryPolicy::retries(3),
    }
  }

  pub fn with_clear_retry(mut self, retry: RetryPolicy) -> Self {
    self.clear_retry = retry;
    self
  }

  /// Seed the cache with a cart loaded elsewhere, e.g. during page render.
  pub fn seed(&self, initial: Option<&Cart>) -> Result<(), GatewayError> {
    let value = serde_json::to_value(initial)
      .map_err(|e| GatewayError::new(ErrorCode::Decode, format!("Failed to encode cart: {}", e)))?;
    self.client.set_query_data(&cart_key(), value);
    Ok(())
  }

  /// Current cart, from cache when fresh. `None` when there is no cart.
  pub async fn cart(&self) -> Result<Option<Cart>, GatewayError> {
    let result = self.client.ensure_query::<Option<Cart>>(&cart_key()).await?;
    Ok(result.data)
  }

  pub fn observe(&self) -> QueryObserver<Option<Cart>> {
    self.client.observe(cart_key())
  }

  pub async fn add_item(&self, values: &AddToCart) -> Result<Value, MutationError> {
    self.client.mutate(add_item_mutation(values)).await
  }

  pub async fn update_quantity(&self, line_item_id: &str, quantity: u32) -> Result<Value, MutationError> {
    self
      .client
      .mutate(update_quantity_mutation(line_item_id, quantity))
      .await
  }

  pub async fn remove_item(&self, line_item_id: &str) -> Result<Value, MutationError> {
    self.client.mutate(remove_item_mutation(line_item_id)).await
  }

  pub async fn clear(&self) -> Result<Value, MutationError> {
    self.client.mutate(clear_mutation(self.clear_retry)).await
  }
}
