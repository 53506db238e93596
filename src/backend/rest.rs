use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    Backend,
    query::{Conflict, Filter, Query, Table},
};
use crate::error::{AppError, AppResult};

/// PostgREST-style table API of the hosted backend.
#[derive(Clone)]
pub struct RestBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: Option<String>,
}

impl RestBackend {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self { client, base_url: base_url.trim_end_matches('/').to_string(), api_key, access_token: None }
    }

    /// A handle whose requests run under the given user's row-level security.
    pub fn as_user(&self, access_token: &str) -> Self {
        Self { access_token: Some(access_token.to_string()), ..self.clone() }
    }

    fn table_url(&self, table: Table) -> String {
        format!("{}/rest/v1/{}", self.base_url, table.as_str())
    }

    fn request(&self, method: Method, url: String) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.api_key);
        self.client.request(method, url).header("apikey", &self.api_key).bearer_auth(bearer)
    }
}

impl Backend for RestBackend {
    async fn select(&self, query: &Query) -> AppResult<Vec<Value>> {
        debug!(table = query.table.as_str(), filters = query.filters.len(), "select");
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(query_params(query));
        send(self.request(Method::GET, self.table_url(query.table)).query(&params)).await
    }

    async fn insert(&self, table: Table, row: Value, conflict: Conflict) -> AppResult<Vec<Value>> {
        debug!(table = table.as_str(), ?conflict, "insert");
        let mut req = self.request(Method::POST, self.table_url(table)).json(&row);
        let prefer = match conflict {
            Conflict::Error => "return=representation",
            Conflict::Ignore => "return=representation,resolution=ignore-duplicates",
            Conflict::Merge => "return=representation,resolution=merge-duplicates",
        };
        if conflict != Conflict::Error {
            req = req.query(&[("on_conflict", table.unique_key().join(","))]);
        }
        send(req.header("Prefer", prefer)).await
    }

    async fn update(&self, query: &Query, patch: Value) -> AppResult<Vec<Value>> {
        debug!(table = query.table.as_str(), "update");
        let req = self
            .request(Method::PATCH, self.table_url(query.table))
            .query(&query_params(query))
            .header("Prefer", "return=representation")
            .json(&patch);
        send(req).await
    }

    async fn delete(&self, query: &Query) -> AppResult<Vec<Value>> {
        debug!(table = query.table.as_str(), "delete");
        let req = self
            .request(Method::DELETE, self.table_url(query.table))
            .query(&query_params(query))
            .header("Prefer", "return=representation");
        send(req).await
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> AppResult<String> {
        let object = format!("{}/{}", urlencoding::encode(bucket), urlencoding::encode(path));
        let url = format!("{}/storage/v1/object/{object}", self.base_url);
        debug!(bucket, path, size = bytes.len(), "upload");

        let resp = self
            .request(Method::POST, url)
            .header("content-type", content_type)
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(error_from_body(status, &body));
        }

        Ok(format!("{}/storage/v1/object/public/{object}", self.base_url))
    }
}

fn query_params(query: &Query) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = query
        .filters
        .iter()
        .map(|filter| {
            let rendered = match filter {
                Filter::Eq(_, v) => format!("eq.{}", render(v)),
                Filter::Gte(_, v) => format!("gte.{}", render(v)),
                Filter::Lte(_, v) => format!("lte.{}", render(v)),
                Filter::In(_, values) => {
                    let items: Vec<String> = values.iter().map(|v| quote(&render(v))).collect();
                    format!("in.({})", items.join(","))
                },
                Filter::IsNull(_) => "is.null".to_string(),
                Filter::NotNull(_) => "not.is.null".to_string(),
                Filter::ILike(_, needle) => format!("ilike.*{}*", escape_like(needle)),
            };
            (filter.column().to_string(), rendered)
        })
        .collect();

    if let Some(order) = &query.order {
        let dir = if order.descending { "desc" } else { "asc" };
        params.push(("order".to_string(), format!("{}.{dir}", order.column)));
    }
    if let Some(limit) = query.limit {
        params.push(("limit".to_string(), limit.to_string()));
    }
    params
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// `*` is the REST wildcard and is dropped; `%`, `_` and `\` are escaped so
/// they match literally.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        match c {
            '*' => {},
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(c);
            },
            c => out.push(c),
        }
    }
    out
}

fn quote(item: &str) -> String {
    format!("\"{}\"", item.replace('\\', "\\\\").replace('"', "\\\""))
}

async fn send(req: RequestBuilder) -> AppResult<Vec<Value>> {
    let resp = req.send().await?;
    let status = resp.status();
    let body = resp.text().await?;

    if !status.is_success() {
        return Err(error_from_body(status, &body));
    }
    if status == StatusCode::NO_CONTENT || body.trim().is_empty() {
        return Ok(Vec::new());
    }

    Ok(match serde_json::from_str(&body)? {
        Value::Array(rows) => rows,
        Value::Null => Vec::new(),
        row => vec![row],
    })
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    msg: Option<String>,
    error_description: Option<String>,
    error: Option<String>,
    hint: Option<String>,
}

/// Map a non-success response of any backend subsystem to an [`AppError`]
/// carrying the backend's own message.
pub(crate) fn error_from_body(status: StatusCode, body: &str) -> AppError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .or(parsed.msg)
        .or(parsed.error_description)
        .or(parsed.error)
        .unwrap_or_else(|| {
            let body = body.trim();
            if body.is_empty() { status.to_string() } else { body.to_string() }
        });
    let message = match parsed.hint {
        Some(hint) if !hint.is_empty() => format!("{message} ({hint})"),
        _ => message,
    };
    AppError::backend(Some(status.as_u16()), message)
}
