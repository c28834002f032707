//! REST implementation of [`RemoteGateway`].
//!
//! Resource reads map to `GET {base}/{key segments...}`, paginated reads add
//! `limit` and `cursor` query parameters, and mutations map to
//! `POST {base}/mutations/{operation}` with the payload as JSON body.
//! Error responses carry `{"code": "...", "message": "..."}`.

use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{ErrorCode, GatewayError, Page, RemoteGateway};
use crate::cache::QueryKey;
use crate::config::Config;

/// Commerce backend client over HTTP.
#[derive(Clone)]
pub struct HttpGateway {
  client: reqwest::Client,
  base_url: Url,
}

/// Error body shape returned by the backend.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
  #[serde(default)]
  code: Option<String>,
  #[serde(default)]
  message: Option<String>,
  /// Some endpoints nest the code as `details.applicationError.code`.
  #[serde(default)]
  details: Option<ApiErrorDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiErrorDetails {
  application_error: Option<ApiApplicationError>,
}

#[derive(Debug, Deserialize)]
struct ApiApplicationError {
  code: String,
  #[serde(default)]
  description: Option<String>,
}

impl HttpGateway {
  pub fn new(config: &Config) -> Result<Self, GatewayError> {
    let mut headers = HeaderMap::new();
    if let Some(token) = Config::get_api_token() {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| GatewayError::new(ErrorCode::InvalidArgument, format!("Invalid API token: {}", e)))?;
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.api.timeout_ms))
      .default_headers(headers)
      .build()
      .map_err(|e| GatewayError::network(format!("Failed to create HTTP client: {}", e)))?;

    let base_url = Url::parse(&config.api.base_url).map_err(|e| {
      GatewayError::new(
        ErrorCode::InvalidArgument,
        format!("Invalid base url {}: {}", config.api.base_url, e),
      )
    })?;

    Ok(Self { client, base_url })
  }

  /// Build `{base}/{segments...}`, percent-encoding each segment.
  fn endpoint<'s>(&self, segments: impl IntoIterator<Item = &'s str>) -> Result<Url, GatewayError> {
    let mut url = self.base_url.clone();
    url
      .path_segments_mut()
      .map_err(|_| {
        GatewayError::new(
          ErrorCode::InvalidArgument,
          format!("Base url {} cannot have path segments", self.base_url),
        )
      })?
      .pop_if_empty()
      .extend(segments);
    Ok(url)
  }

  fn key_endpoint(&self, key: &QueryKey) -> Result<Url, GatewayError> {
    self.endpoint(key.segments().iter().map(String::as_str))
  }

  async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value, GatewayError> {
    let response = request
      .send()
      .await
      .map_err(|e| GatewayError::network(e.to_string()))?;

    let status = response.status();
    let body = response
      .bytes()
      .await
      .map_err(|e| GatewayError::network(e.to_string()).with_status(status.as_u16()))?;

    if status.is_success() {
      if body.is_empty() {
        return Ok(Value::Null);
      }
      return serde_json::from_slice(&body).map_err(|e| {
        GatewayError::new(ErrorCode::Decode, format!("Failed to parse response: {}", e))
          .with_status(status.as_u16())
      });
    }

    Err(error_from_response(status.as_u16(), &body))
  }
}

/// Turn a non-success response into a structured error, falling back to the
/// HTTP status when the body carries no code.
fn error_from_response(status: u16, body: &[u8]) -> GatewayError {
  let parsed: Option<ApiErrorBody> = serde_json::from_slice(body).ok();

  let (code, message) = match parsed {
    Some(ApiErrorBody {
      details:
        Some(ApiErrorDetails {
          application_error: Some(app),
        }),
      message,
      ..
    }) => (
      Some(app.code),
      app.description.or(message),
    ),
    Some(ApiErrorBody { code, message, .. }) => (code, message),
    None => (None, None),
  };

  let code = match code {
    Some(code) => code.parse().unwrap_or_else(|never| match never {}),
    None => match status {
      401 | 403 => ErrorCode::Unauthorized,
      404 => ErrorCode::NotFound,
      409 => ErrorCode::AlreadyExists,
      400 | 422 => ErrorCode::InvalidArgument,
      _ => ErrorCode::Internal,
    },
  };

  let message = message.unwrap_or_else(|| format!("HTTP {}", status));
  GatewayError::new(code, message).with_status(status)
}

impl RemoteGateway for HttpGateway {
  fn query<'a>(&'a self, key: &'a QueryKey) -> BoxFuture<'a, Result<Value, GatewayError>> {
    Box::pin(async move {
      let url = self.key_endpoint(key)?;
      debug!(%key, %url, "GET resource");
      self.send(self.client.get(url)).await
    })
  }

  fn mutate<'a>(
    &'a self,
    operation: &'a str,
    payload: &'a Value,
  ) -> BoxFuture<'a, Result<Value, GatewayError>> {
    Box::pin(async move {
      let url = self.endpoint(["mutations", operation])?;
      debug!(operation, %url, "POST mutation");
      self.send(self.client.post(url).json(payload)).await
    })
  }

  fn fetch_page<'a>(
    &'a self,
    key: &'a QueryKey,
    cursor: Option<&'a str>,
    limit: usize,
  ) -> BoxFuture<'a, Result<Page<Value>, GatewayError>> {
    Box::pin(async move {
      let mut url = self.key_endpoint(key)?;
      {
        let mut query = url.query_pairs_mut();
        query.append_pair("limit", &limit.to_string());
        if let Some(cursor) = cursor {
          query.append_pair("cursor", cursor);
        }
      }
      debug!(%key, %url, "GET page");

      let value = self.send(self.client.get(url)).await?;
      serde_json::from_value(value)
        .map_err(|e| GatewayError::new(ErrorCode::Decode, format!("Failed to parse page: {}", e)))
    })
  }
}
