//! BigQuery warehouse adapter
//!
//! Runs a fixed, parameterised SQL text through the BigQuery REST API and
//! maps the result rows to `ProviderRow`s. The SQL itself is configuration:
//! this adapter binds `@date_from`, `@date_to`, `@period` and, for token
//! queries, `@supported_tokens`, and expects the columns `block_date`,
//! `address_count` and either `coin_address` or `platform`.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::str::FromStr;

use super::http::send_json;
use super::AggregateSource;
use crate::error::ProviderError;
use crate::models::{ProviderRow, SyncWindow, TokenRef};

const PROVIDER: &str = "bigquery";

pub const DEFAULT_BASE_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";

/// Server-side wait per request before BigQuery returns an incomplete job.
const QUERY_TIMEOUT_MS: u64 = 170_000;

/// Upper bound on result polls for one job.
const MAX_RESULT_PAGES: usize = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseQuery {
    /// Per-token stats for the supplied contract addresses.
    TokenStats,
    /// Stats of Bitcoin-derived base chains; ignores entity hints.
    BtcBasedStats,
}

#[derive(Clone)]
pub struct BigQueryProvider {
    client: Client,
    base_url: String,
    project: String,
    access_token: String,
    location: String,
    sql: String,
    query: WarehouseQuery,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: Value,
}

impl BigQueryProvider {
    pub fn new(
        client: Client,
        base_url: String,
        project: String,
        access_token: String,
        sql: String,
        query: WarehouseQuery,
    ) -> Self {
        Self {
            client,
            base_url,
            project,
            access_token,
            location: "US".to_string(),
            sql,
            query,
        }
    }

    fn query_parameters(&self, window: &SyncWindow, entity_hints: &[TokenRef]) -> Vec<Value> {
        let mut params = vec![
            scalar_param("date_from", "TIMESTAMP", &window.from.to_rfc3339()),
            scalar_param("date_to", "TIMESTAMP", &window.to.to_rfc3339()),
            scalar_param("period", "STRING", window.period.alias()),
        ];

        if self.query == WarehouseQuery::TokenStats {
            let values: Vec<Value> = entity_hints
                .iter()
                .map(|t| json!({ "value": t.address }))
                .collect();
            params.push(json!({
                "name": "supported_tokens",
                "parameterType": { "type": "ARRAY", "arrayType": { "type": "STRING" } },
                "parameterValue": { "arrayValues": values },
            }));
        }

        params
    }

    async fn poll_results(
        &self,
        job_id: &str,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, ProviderError> {
        let url = format!("{}/projects/{}/queries/{}", self.base_url, self.project, job_id);
        let timeout = QUERY_TIMEOUT_MS.to_string();
        let mut query = vec![("location", self.location.as_str()), ("timeoutMs", timeout.as_str())];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let request = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&query);

        send_json(PROVIDER, request).await
    }
}

fn scalar_param(name: &str, kind: &str, value: &str) -> Value {
    json!({
        "name": name,
        "parameterType": { "type": kind },
        "parameterValue": { "value": value },
    })
}

/// Parse a DATE ("2024-03-10") or TIMESTAMP (epoch seconds as float string) cell.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }

    let seconds = raw.parse::<f64>().ok()?;
    DateTime::from_timestamp_millis((seconds * 1000.0).round() as i64)
}

fn cell_str(cell: Option<&TableCell>) -> Option<&str> {
    cell.and_then(|c| c.v.as_str()).filter(|s| !s.is_empty())
}

fn map_rows(fields: &[FieldSchema], rows: Vec<TableRow>) -> Vec<ProviderRow> {
    let index_of = |name: &str| fields.iter().position(|f| f.name == name);
    let date_idx = index_of("block_date");
    let count_idx = index_of("address_count");
    let address_idx = index_of("coin_address");
    let platform_idx = index_of("platform");

    let mut mapped = Vec::with_capacity(rows.len());
    let mut skipped = 0usize;

    for row in rows {
        let cell = |idx: Option<usize>| idx.and_then(|i| row.f.get(i));

        let identifier = cell_str(cell(address_idx)).or_else(|| cell_str(cell(platform_idx)));
        let timestamp = cell_str(cell(date_idx)).and_then(parse_timestamp);
        let value = cell_str(cell(count_idx)).and_then(|v| Decimal::from_str(v).ok());

        match (identifier, timestamp, value) {
            (Some(identifier), Some(timestamp), Some(value)) => {
                mapped.push(ProviderRow::new(identifier, timestamp, value));
            }
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        tracing::warn!(skipped = skipped, "Skipped malformed BigQuery rows");
    }

    mapped
}

#[async_trait]
impl AggregateSource for BigQueryProvider {
    async fn fetch_aggregate(
        &self,
        window: &SyncWindow,
        entity_hints: &[TokenRef],
    ) -> Result<Vec<ProviderRow>, ProviderError> {
        let url = format!("{}/projects/{}/queries", self.base_url, self.project);
        let body = json!({
            "query": self.sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": self.query_parameters(window, entity_hints),
            "timeoutMs": QUERY_TIMEOUT_MS,
            "location": self.location,
        });

        let request = self
            .client
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body);

        let mut response: QueryResponse = send_json(PROVIDER, request).await?;

        let job_id = response
            .job_reference
            .as_ref()
            .map(|r| r.job_id.clone())
            .ok_or_else(|| ProviderError::decode(PROVIDER, "missing job reference"))?;

        tracing::info!(job_id = %job_id, query = ?self.query, window = %window, "BigQuery job started");

        let mut schema = response.schema.take();
        let mut raw_rows = std::mem::take(&mut response.rows);
        let mut page_token = response.page_token.take();
        let mut complete = response.job_complete;
        let mut polls = 0;

        while !complete || page_token.is_some() {
            polls += 1;
            if polls > MAX_RESULT_PAGES {
                return Err(ProviderError::decode(PROVIDER, "too many result pages"));
            }

            let mut next = self.poll_results(&job_id, page_token.as_deref()).await?;
            complete = next.job_complete;
            if schema.is_none() {
                schema = next.schema.take();
            }
            raw_rows.append(&mut next.rows);
            page_token = if complete { next.page_token.take() } else { None };
        }

        let fields = schema.map(|s| s.fields).unwrap_or_default();
        let rows = map_rows(&fields, raw_rows);

        tracing::info!(job_id = %job_id, rows = rows.len(), "BigQuery job finished");

        Ok(rows)
    }
}
