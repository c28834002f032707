//! Back-in-stock email subscriptions.

use serde_json::{json, Value};
use std::collections::BTreeMap;

use crate::client::QueryClient;
use crate::error::MutationError;
use crate::gateway::ErrorCode;
use crate::sync::{Mutation, DEFAULT_FAILURE_MESSAGE};

pub const ALREADY_SUBSCRIBED: &str = "You are already subscribed to this product.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackInStockRequest {
  pub email: String,
  /// Page the notification email links back to
  pub item_url: String,
  pub product_id: String,
  /// Resolved variant, when the selected options match one
  pub variant_id: Option<String>,
  pub selected_options: BTreeMap<String, String>,
}

impl BackInStockRequest {
  pub fn new(email: impl Into<String>, item_url: impl Into<String>, product_id: impl Into<String>) -> Self {
    Self {
      email: email.into(),
      item_url: item_url.into(),
      product_id: product_id.into(),
      variant_id: None,
      selected_options: BTreeMap::new(),
    }
  }

  pub fn variant(mut self, variant_id: impl Into<String>) -> Self {
    self.variant_id = Some(variant_id.into());
    self
  }

  pub fn option(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
    self.selected_options.insert(name.into(), value.into());
    self
  }

  fn payload(&self) -> Value {
    let options = match &self.variant_id {
      Some(variant_id) => json!({ "variantId": variant_id }),
      None => json!({ "options": self.selected_options }),
    };
    json!({
      "email": self.email,
      "itemUrl": self.item_url,
      "catalogReference": {
        "catalogItemId": self.product_id,
        "options": options,
      },
    })
  }
}

/// Nothing is cached for subscriptions, so the mutation has no target.
pub fn subscribe_mutation(request: &BackInStockRequest) -> Mutation {
  Mutation::new("backInStock.createRequest", request.payload())
    .message_for(ErrorCode::BackInStockRequestAlreadyExists, ALREADY_SUBSCRIBED)
    .failure_message(DEFAULT_FAILURE_MESSAGE)
}

pub async fn subscribe(client: &QueryClient, request: &BackInStockRequest) -> Result<(), MutationError> {
  client.mutate(subscribe_mutation(request)).await.map(|_| ())
}
