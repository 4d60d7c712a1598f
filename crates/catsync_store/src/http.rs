//! HTTP store implementation.
//!
//! The actual HTTP client is abstracted via [`HttpClient`] so the request
//! layout can be tested without a network. [`UreqClient`] is the blocking
//! production client.

use crate::client::{DocumentUpdate, QueryPage, QueryRequest, StoreClient};
use crate::collection::Collection;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::predicate::{Predicate, MATCH_ALL};
use crate::record::Record;
use crate::stats::FieldStats;
use crate::time::{from_epoch_millis, parse_timestamp, Timestamp};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Query-string parameters, in order; keys may repeat.
pub type Params = Vec<(String, String)>;

/// Largest response body the production client will read.
const MAX_BODY_BYTES: u64 = 512 * 1024 * 1024;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str, params: &[(String, String)]) -> StoreResult<String>;

    /// Sends a POST request and returns the response body.
    fn post(
        &self,
        url: &str,
        params: &[(String, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> StoreResult<String>;
}

/// Blocking HTTP client backed by `ureq`.
pub struct UreqClient {
    agent: ureq::Agent,
}

impl UreqClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        Self {
            agent: ureq::Agent::new_with_config(config),
        }
    }
}

impl HttpClient for UreqClient {
    fn get(&self, url: &str, params: &[(String, String)]) -> StoreResult<String> {
        let mut request = self.agent.get(url);
        for (key, value) in params {
            request = request.query(key, value);
        }
        let response = request.call().map_err(|err| map_ureq_error(url, err))?;
        let mut body = response.into_body();
        body.with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_string()
            .map_err(|err| {
                StoreError::transport_retryable(url, format!("failed reading response body: {err}"))
            })
    }

    fn post(
        &self,
        url: &str,
        params: &[(String, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> StoreResult<String> {
        let mut request = self.agent.post(url).header("Content-Type", content_type);
        for (key, value) in params {
            request = request.query(key, value);
        }
        let response = request
            .send(&body[..])
            .map_err(|err| map_ureq_error(url, err))?;
        let mut body = response.into_body();
        body.with_config()
            .limit(MAX_BODY_BYTES)
            .read_to_string()
            .map_err(|err| {
                StoreError::transport_retryable(url, format!("failed reading response body: {err}"))
            })
    }
}

fn map_ureq_error(url: &str, err: ureq::Error) -> StoreError {
    match err {
        ureq::Error::StatusCode(status) => StoreError::Status {
            url: url.to_string(),
            status,
        },
        other => StoreError::transport_retryable(url, other.to_string()),
    }
}

/// A store reached over its HTTP select/update surface.
pub struct HttpStore<C: HttpClient = UreqClient> {
    config: StoreConfig,
    client: C,
}

impl HttpStore<UreqClient> {
    /// Creates a store backed by the production HTTP client.
    pub fn connect(config: StoreConfig) -> Self {
        let client = UreqClient::new(config.timeout);
        Self { config, client }
    }
}

impl<C: HttpClient> HttpStore<C> {
    /// Creates a store with a custom HTTP client.
    pub fn with_client(config: StoreConfig, client: C) -> Self {
        Self { config, client }
    }

    /// Returns the store configuration.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns the HTTP client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn url(&self, collection: Collection, path: &str) -> String {
        format!("{}/{}/{}", self.config.base_url, collection.as_str(), path)
    }

    /// Runs `op` until it succeeds, fails permanently or attempts run out.
    fn with_retry<T>(&self, what: &str, op: impl FnMut() -> StoreResult<T>) -> StoreResult<T> {
        self.config.retry.run(&self.config.base_url, what, op)
    }

    fn select(&self, collection: Collection, params: Params) -> StoreResult<SelectResponse> {
        let url = self.url(collection, "select");
        debug!(url = %url, ?params, "select");
        let body = self.with_retry("select", || self.client.get(&url, &params))?;
        serde_json::from_str(&body)
            .map_err(|e| StoreError::Decode(format!("select response from {url}: {e}")))
    }

    fn post_update(
        &self,
        collection: Collection,
        params: &[(String, String)],
        content_type: &str,
        body: Vec<u8>,
    ) -> StoreResult<()> {
        let url = self.url(collection, "update");
        self.with_retry("update", || {
            self.client.post(&url, params, content_type, body.clone())
        })?;
        Ok(())
    }

    fn base_params(predicate: &Predicate, offset: u64, limit: u64) -> Params {
        let mut params: Params = vec![("q".into(), MATCH_ALL.into())];
        params.extend(
            predicate
                .filter_queries()
                .into_iter()
                .map(|fq| ("fq".to_string(), fq)),
        );
        params.push(("start".into(), offset.to_string()));
        params.push(("rows".into(), limit.to_string()));
        params.push(("wt".into(), "json".into()));
        params
    }
}

impl<C: HttpClient> StoreClient for HttpStore<C> {
    fn endpoint(&self) -> &str {
        &self.config.base_url
    }

    fn query(&self, collection: Collection, request: &QueryRequest) -> StoreResult<QueryPage> {
        let mut params = Self::base_params(&request.predicate, request.offset, request.limit);
        params.extend(
            request
                .fields
                .iter()
                .map(|f| ("fl".to_string(), f.clone())),
        );
        let response = self.select(collection, params)?;
        Ok(QueryPage {
            total_matches: response.response.num_found,
            records: response.response.docs,
        })
    }

    fn stats(
        &self,
        collection: Collection,
        predicate: &Predicate,
        field: &str,
    ) -> StoreResult<FieldStats> {
        let mut params = Self::base_params(predicate, 0, 0);
        params.push(("stats".into(), "true".into()));
        params.push(("stats.field".into(), field.to_string()));
        let response = self.select(collection, params)?;

        let count = response.response.num_found;
        let field_stats = response
            .stats
            .and_then(|mut s| s.stats_fields.remove(field))
            .flatten();
        let Some(field_stats) = field_stats else {
            return Ok(FieldStats {
                count,
                ..FieldStats::empty()
            });
        };
        Ok(FieldStats {
            count,
            min: stat_timestamp(field_stats.min.as_ref())?,
            max: stat_timestamp(field_stats.max.as_ref())?,
            mean: stat_timestamp(field_stats.mean.as_ref())?,
        })
    }

    fn upsert(&self, collection: Collection, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        let body = serde_json::to_vec(records)
            .map_err(|e| StoreError::Decode(format!("encoding records: {e}")))?;
        self.post_update(collection, &[], "application/json", body)
            .map_err(|err| match err {
                StoreError::Status { status: 409, .. } => StoreError::Conflict {
                    id: records
                        .first()
                        .and_then(Record::id)
                        .unwrap_or_default(),
                },
                other => other,
            })
    }

    fn update_fields(&self, collection: Collection, updates: &[DocumentUpdate]) -> StoreResult<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let xml = build_update_xml(updates);
        debug!(collection = %collection, documents = updates.len(), "posting field update");
        self.post_update(collection, &[], "application/xml", xml.into_bytes())
    }

    fn delete_by_predicate(&self, collection: Collection, predicate: &Predicate) -> StoreResult<()> {
        let xml = format!(
            "<delete><query>{}</query></delete>",
            escape_xml(&predicate.to_query())
        );
        let params = [("commit".to_string(), "false".to_string())];
        self.post_update(collection, &params, "application/xml", xml.into_bytes())
    }

    fn commit(&self, collection: Collection) -> StoreResult<()> {
        let url = self.url(collection, "update");
        let params = vec![("commit".to_string(), "true".to_string())];
        self.with_retry("commit", || self.client.get(&url, &params))?;
        Ok(())
    }

    fn optimize(&self, collection: Collection) -> StoreResult<()> {
        let url = self.url(collection, "update");
        let params = vec![("optimize".to_string(), "true".to_string())];
        self.with_retry("optimize", || self.client.get(&url, &params))?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct SelectResponse {
    response: ResponseBody,
    #[serde(default)]
    stats: Option<StatsBody>,
}

#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(rename = "numFound")]
    num_found: u64,
    #[serde(default)]
    docs: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct StatsBody {
    #[serde(default)]
    stats_fields: HashMap<String, Option<StatsField>>,
}

#[derive(Debug, Deserialize)]
struct StatsField {
    #[serde(default)]
    min: Option<Value>,
    #[serde(default)]
    max: Option<Value>,
    #[serde(default)]
    mean: Option<Value>,
}

/// Date stats arrive as ISO strings or as epoch milliseconds depending on the store version.
fn stat_timestamp(value: Option<&Value>) -> StoreResult<Option<Timestamp>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => parse_timestamp(text).map(Some),
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| StoreError::Decode(format!("unusable stats value {n}")))
            .and_then(from_epoch_millis)
            .map(Some),
        Some(other) => Err(StoreError::Decode(format!("unusable stats value {other}"))),
    }
}

/// Builds an `<add>` document carrying atomic field updates.
pub fn build_update_xml(updates: &[DocumentUpdate]) -> String {
    let mut xml = String::from("<add>");
    for update in updates {
        xml.push_str("<doc>");
        xml.push_str(&format!(
            "<field name=\"id\">{}</field>",
            escape_xml(&update.id)
        ));
        for mutation in &update.mutations {
            let name = escape_xml(&mutation.field);
            let mode = mutation.mode.as_str();
            if mutation.values.is_empty() {
                xml.push_str(&format!(
                    "<field name=\"{name}\" update=\"{mode}\" null=\"true\"/>"
                ));
                continue;
            }
            for value in &mutation.values {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                xml.push_str(&format!(
                    "<field name=\"{name}\" update=\"{mode}\">{}</field>",
                    escape_xml(&text)
                ));
            }
        }
        xml.push_str("</doc>");
    }
    xml.push_str("</add>");
    xml
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            other => out.push(other),
        }
    }
    out
}
