//! REST client for the hosted backend.
//!
//! The backend exposes each table at `{base}/rest/v1/{collection}` and takes
//! filters, ordering and windows as query parameters (`col=eq.value`,
//! `col=in.(a,b)`, `order=col.desc`, `offset`, `limit`).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;

use super::query::{Direction, Filter, Order, SelectQuery};
use super::{RemoteError, RemoteStore};

// ============================================================================
// Constants
// ============================================================================

/// Path under the base URL where tables are served.
const REST_PATH: &str = "rest/v1";

/// HTTP request timeout in seconds.
/// 30s allows for slow queries while failing fast enough for an interactive tool.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Header name for the project API key.
const API_KEY_HEADER: &str = "apikey";

/// Header carrying the write/count preferences.
const PREFER_HEADER: &str = "Prefer";

/// REST client for the hosted backend.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    api_key: String,
    token: Option<String>,
}

impl RestClient {
    /// Create a new client for the project at `base_url`.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            token: None,
        })
    }

    /// Create a new RestClient with a user access token, sharing the connection pool.
    pub fn with_token(&self, token: String) -> Self {
        Self {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            token: Some(token),
        }
    }

    fn table_url(&self, collection: &str) -> String {
        format!("{}/{}/{}", self.base_url, REST_PATH, collection)
    }

    fn request(&self, method: Method, collection: &str) -> RequestBuilder {
        // Without a user token the API key doubles as the bearer credential
        let bearer = self.token.as_deref().unwrap_or(&self.api_key);
        self.client
            .request(method, self.table_url(collection))
            .header(API_KEY_HEADER, &self.api_key)
            .header(header::ACCEPT, "application/json")
            .bearer_auth(bearer)
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, RemoteError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(RemoteError::from_status(status, &body))
        }
    }

    async fn send_for_rows(request: RequestBuilder, what: &str) -> Result<Vec<Value>, RemoteError> {
        let response = Self::check_response(request.send().await?).await?;
        response
            .json::<Vec<Value>>()
            .await
            .map_err(|e| RemoteError::InvalidResponse(format!("Failed to parse {} response: {}", what, e)))
    }
}

/// Render a scalar for use inside a filter parameter.
fn filter_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Quote a list member if it contains characters reserved by the list syntax.
fn list_member(value: &Value) -> String {
    let literal = filter_literal(value);
    if literal.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", literal.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        literal
    }
}

/// Query parameter for a filter.
pub(crate) fn filter_param(filter: &Filter) -> (String, String) {
    match filter {
        Filter::Eq { column, value: Value::Null } => (column.clone(), "is.null".to_string()),
        Filter::Eq { column, value } => (column.clone(), format!("eq.{}", filter_literal(value))),
        Filter::In { column, values } => {
            let members: Vec<String> = values.iter().map(list_member).collect();
            (column.clone(), format!("in.({})", members.join(",")))
        }
    }
}

/// The `order` parameter value, or `None` when there is no ordering.
pub(crate) fn order_param(order: &[Order]) -> Option<String> {
    if order.is_empty() {
        return None;
    }
    let parts: Vec<String> = order
        .iter()
        .map(|o| match o.direction {
            Direction::Asc => format!("{}.asc", o.column),
            Direction::Desc => format!("{}.desc", o.column),
        })
        .collect();
    Some(parts.join(","))
}

pub(crate) fn select_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = vec![("select".to_string(), "*".to_string())];
    params.extend(query.filters.iter().map(filter_param));
    if let Some(order) = order_param(&query.order) {
        params.push(("order".to_string(), order));
    }
    if let Some(range) = query.range {
        params.push(("offset".to_string(), range.offset.to_string()));
        params.push(("limit".to_string(), range.limit.to_string()));
    }
    params
}

fn id_param(id: &str) -> (String, String) {
    ("id".to_string(), format!("eq.{}", id))
}

/// Total from a `Content-Range` header such as `0-24/573` or `*/0`.
fn parse_content_range_total(value: &str) -> Option<u64> {
    value.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl RemoteStore for RestClient {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Value>, RemoteError> {
        debug!(collection = %query.collection, "GET rows");
        let request = self
            .request(Method::GET, &query.collection)
            .query(&select_params(query));
        Self::send_for_rows(request, &query.collection).await
    }

    async fn select_by_id(&self, collection: &str, id: &str) -> Result<Option<Value>, RemoteError> {
        debug!(collection, id, "GET row");
        let request = self
            .request(Method::GET, collection)
            .query(&[("select".to_string(), "*".to_string()), id_param(id)]);
        let rows = Self::send_for_rows(request, collection).await?;
        Ok(rows.into_iter().next())
    }

    async fn insert(&self, collection: &str, record: &Value) -> Result<Value, RemoteError> {
        debug!(collection, "POST row");
        let request = self
            .request(Method::POST, collection)
            .header(PREFER_HEADER, "return=representation")
            .json(record);
        Self::send_for_rows(request, collection)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::InvalidResponse(format!("Insert into {} returned no row", collection)))
    }

    async fn update(&self, collection: &str, id: &str, patch: &Value) -> Result<Value, RemoteError> {
        debug!(collection, id, "PATCH row");
        let request = self
            .request(Method::PATCH, collection)
            .header(PREFER_HEADER, "return=representation")
            .query(&[id_param(id)])
            .json(patch);
        Self::send_for_rows(request, collection)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| RemoteError::NotFound(format!("{}/{}", collection, id)))
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), RemoteError> {
        debug!(collection, id, "DELETE row");
        let request = self.request(Method::DELETE, collection).query(&[id_param(id)]);
        Self::check_response(request.send().await?).await?;
        Ok(())
    }

    async fn count(&self, collection: &str, filters: &[Filter]) -> Result<u64, RemoteError> {
        debug!(collection, "HEAD count");
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filters.iter().map(filter_param));

        let request = self
            .request(Method::HEAD, collection)
            .header(PREFER_HEADER, "count=exact")
            .query(&params);
        let response = Self::check_response(request.send().await?).await?;

        response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range_total)
            .ok_or_else(|| RemoteError::InvalidResponse(format!("Count of {} returned no Content-Range", collection)))
    }
}
