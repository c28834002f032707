//! Member profile updates.

use serde_json::json;
use std::time::Duration;

use crate::cache::QueryKey;
use crate::client::QueryClient;
use crate::error::MutationError;
use crate::sync::Mutation;

pub fn member_key() -> QueryKey {
  QueryKey::from("member")
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpdateMemberInfo {
  pub first_name: Option<String>,
  pub last_name: Option<String>,
}

/// The backend applies profile changes asynchronously, so the member is
/// re-read only after `refresh_delay`.
pub fn update_member_mutation(values: &UpdateMemberInfo, refresh_delay: Duration) -> Mutation {
  Mutation::new(
    "members.updateMember",
    json!({
      "contact": {
        "firstName": values.first_name,
        "lastName": values.last_name,
      }
    }),
  )
  .refresh_after(member_key(), refresh_delay)
  .success_message("Profile updated")
  .failure_message("Failed to update profile. Please try again")
}

pub async fn update_member(
  client: &QueryClient,
  values: &UpdateMemberInfo,
  refresh_delay: Duration,
) -> Result<(), MutationError> {
  client
    .mutate(update_member_mutation(values, refresh_delay))
    .await
    .map(|_| ())
}
