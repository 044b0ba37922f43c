// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Warehouse access for metric rows and the roster table.
//!
//! The warehouse is BigQuery, spoken over its REST v2 surface: `jobs.query`
//! for reads and deletes, `tabledata.insertAll` for streaming inserts. The
//! client is deliberately narrow; queries run with a fixed server-side
//! timeout and an incomplete job is an error rather than a reason to poll.
//! Deletes against rows still in the streaming buffer are rejected by
//! BigQuery with a recognizable message, surfaced here as
//! [`WarehouseError::ConsistencyRestriction`] so callers can treat the
//! condition as expected.

use std::{
    collections::{BTreeSet, HashSet},
    time::Duration
};

use reqwest::Client;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::debug;

use crate::{config::WarehouseConfig, metrics::MetricRecord, roster::RosterEntry};

/// Server-side limit for `jobs.query` in milliseconds.
const QUERY_TIMEOUT_MS: u64 = 30_000;

/// Client-side HTTP timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Marker BigQuery embeds in rejections of deletes against freshly
/// streamed rows.
const STREAMING_BUFFER_MARKER: &str = "streaming buffer";

/// Failures raised by warehouse operations.
#[derive(Debug, PartialEq, Eq, masterror::Error)]
pub enum WarehouseError {
    /// A delete was rejected because the affected rows are still settling
    /// in the streaming buffer. Expected shortly after inserts; the next
    /// run reconciles.
    #[error("delete rejected while rows are settling: {detail}")]
    ConsistencyRestriction {
        /// Message reported by the warehouse.
        detail: String
    },
    /// Any other failed request.
    #[error("warehouse request failed: {message}")]
    Request {
        /// Description of the failure.
        message: String
    }
}

impl From<reqwest::Error> for WarehouseError {
    fn from(error: reqwest::Error) -> Self {
        Self::Request {
            message: error.to_string()
        }
    }
}

/// Store of per-metric-type tables keyed by pull request number.
#[allow(async_fn_in_trait)]
pub trait MetricsStore {
    /// Returns which of `candidates` already have a row in `table`.
    async fn existing_pr_numbers(
        &self,
        table: &str,
        candidates: &[u64],
    ) -> Result<HashSet<u64>, WarehouseError>;

    /// Appends `records` to `table`.
    async fn insert_metrics(
        &self,
        table: &str,
        records: &[MetricRecord],
    ) -> Result<(), WarehouseError>;
}

/// Store of the `(group, username)` roster table.
#[allow(async_fn_in_trait)]
pub trait RosterStore {
    /// Reads the full roster currently persisted in `table`.
    async fn fetch_roster(&self, table: &str) -> Result<BTreeSet<RosterEntry>, WarehouseError>;

    /// Appends `entries` to `table`.
    async fn insert_roster_entries(
        &self,
        table: &str,
        entries: &[RosterEntry],
    ) -> Result<(), WarehouseError>;

    /// Deletes the row matching `entry` exactly.
    async fn delete_roster_entry(
        &self,
        table: &str,
        entry: &RosterEntry,
    ) -> Result<(), WarehouseError>;
}

/// BigQuery-backed implementation of both store traits.
#[derive(Debug)]
pub struct BigQueryWarehouse {
    client:   Client,
    endpoint: String,
    project:  String,
    dataset:  String,
    token:    String
}

impl BigQueryWarehouse {
    /// Builds a warehouse client from configuration and an OAuth bearer
    /// token.
    ///
    /// # Errors
    ///
    /// Returns [`WarehouseError::Request`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: &WarehouseConfig, token: &str) -> Result<Self, WarehouseError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_owned(),
            project:  config.project.clone(),
            dataset:  config.dataset.clone(),
            token:    token.to_owned()
        })
    }

    fn table_reference(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project, self.dataset, table)
    }

    async fn run_query(
        &self,
        query: String,
        parameters: Vec<QueryParameter>,
    ) -> Result<QueryResponse, WarehouseError> {
        let url = format!("{}/bigquery/v2/projects/{}/queries", self.endpoint, self.project);
        let request = QueryRequest {
            query,
            use_legacy_sql:   false,
            parameter_mode:   (!parameters.is_empty()).then_some("NAMED"),
            query_parameters: parameters,
            timeout_ms:       QUERY_TIMEOUT_MS
        };

        let response: QueryResponse = self.post_json(&url, &request).await?;
        if !response.job_complete {
            return Err(WarehouseError::Request {
                message: "query did not complete within the timeout".to_owned()
            });
        }
        Ok(response)
    }

    async fn insert_all(&self, table: &str, rows: Vec<InsertRow>) -> Result<(), WarehouseError> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/datasets/{}/tables/{}/insertAll",
            self.endpoint, self.project, self.dataset, table
        );

        let request = InsertAllRequest {
            rows
        };
        let response: InsertAllResponse = self.post_json(&url, &request).await?;
        if !response.insert_errors.is_empty() {
            let detail = response
                .insert_errors
                .iter()
                .flat_map(|failure| failure.errors.iter())
                .map(|error| error.message.as_str())
                .find(|message| !message.is_empty())
                .unwrap_or("no detail");
            return Err(WarehouseError::Request {
                message: format!(
                    "{} rows were rejected by {}: {}",
                    response.insert_errors.len(),
                    table,
                    detail
                )
            });
        }
        Ok(())
    }

    async fn post_json<B, R>(&self, url: &str, body: &B) -> Result<R, WarehouseError>
    where
        B: Serialize,
        R: DeserializeOwned
    {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            if status.as_u16() == 400 && detail.contains(STREAMING_BUFFER_MARKER) {
                return Err(WarehouseError::ConsistencyRestriction {
                    detail
                });
            }
            return Err(WarehouseError::Request {
                message: format!("{url} answered {status}: {detail}")
            });
        }

        Ok(response.json().await?)
    }
}

impl MetricsStore for BigQueryWarehouse {
    async fn existing_pr_numbers(
        &self,
        table: &str,
        candidates: &[u64],
    ) -> Result<HashSet<u64>, WarehouseError> {
        if candidates.is_empty() {
            return Ok(HashSet::new());
        }

        let query = format!(
            "SELECT DISTINCT pr_number FROM {} WHERE pr_number IN UNNEST(@pr_numbers)",
            self.table_reference(table)
        );
        let response = self
            .run_query(query, vec![int64_array_parameter("pr_numbers", candidates)])
            .await?;

        let mut numbers = HashSet::new();
        for row in &response.rows {
            match string_cell(row, 0).and_then(|text| text.parse::<u64>().ok()) {
                Some(number) => {
                    numbers.insert(number);
                }
                None => debug!("skipping unparseable pr_number cell from {}", table)
            }
        }
        Ok(numbers)
    }

    async fn insert_metrics(
        &self,
        table: &str,
        records: &[MetricRecord],
    ) -> Result<(), WarehouseError> {
        if records.is_empty() {
            return Ok(());
        }

        let rows = records
            .iter()
            .map(|record| {
                let insert_id = format!(
                    "{}-{}-{}",
                    record.metric_type().id(),
                    record.repository(),
                    record.pr_number()
                );
                encode_row(insert_id, record)
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.insert_all(table, rows).await
    }
}

impl RosterStore for BigQueryWarehouse {
    async fn fetch_roster(&self, table: &str) -> Result<BTreeSet<RosterEntry>, WarehouseError> {
        let query = format!("SELECT group_name, username FROM {}", self.table_reference(table));
        let response = self.run_query(query, Vec::new()).await?;

        let mut entries = BTreeSet::new();
        for row in &response.rows {
            match (string_cell(row, 0), string_cell(row, 1)) {
                (Some(group), Some(username)) => {
                    entries.insert(RosterEntry {
                        group:    group.to_owned(),
                        username: username.to_owned()
                    });
                }
                _ => debug!("skipping malformed roster row from {}", table)
            }
        }
        Ok(entries)
    }

    async fn insert_roster_entries(
        &self,
        table: &str,
        entries: &[RosterEntry],
    ) -> Result<(), WarehouseError> {
        if entries.is_empty() {
            return Ok(());
        }

        let rows = entries
            .iter()
            .map(|entry| encode_row(format!("{}-{}", entry.group, entry.username), entry))
            .collect::<Result<Vec<_>, _>>()?;

        self.insert_all(table, rows).await
    }

    async fn delete_roster_entry(
        &self,
        table: &str,
        entry: &RosterEntry,
    ) -> Result<(), WarehouseError> {
        let query = format!(
            "DELETE FROM {} WHERE group_name = @group_name AND username = @username",
            self.table_reference(table)
        );
        self.run_query(query, vec![
            string_parameter("group_name", &entry.group),
            string_parameter("username", &entry.username),
        ])
        .await?;
        Ok(())
    }
}

fn string_parameter(name: &'static str, value: &str) -> QueryParameter {
    QueryParameter {
        name,
        parameter_type: ParameterType {
            kind:       "STRING",
            array_type: None
        },
        parameter_value: ParameterValue {
            value:        Some(value.to_owned()),
            array_values: None
        }
    }
}

fn int64_array_parameter(name: &'static str, values: &[u64]) -> QueryParameter {
    QueryParameter {
        name,
        parameter_type: ParameterType {
            kind:       "ARRAY",
            array_type: Some(Box::new(ParameterType {
                kind:       "INT64",
                array_type: None
            }))
        },
        parameter_value: ParameterValue {
            value:        None,
            array_values: Some(
                values
                    .iter()
                    .map(|value| ParameterValue {
                        value:        Some(value.to_string()),
                        array_values: None
                    })
                    .collect()
            )
        }
    }
}

fn string_cell(row: &Row, index: usize) -> Option<&str> {
    row.f
        .get(index)
        .and_then(|cell| cell.v.as_ref())
        .and_then(|value| value.as_str())
}

fn encode_row<R: Serialize>(insert_id: String, row: &R) -> Result<InsertRow, WarehouseError> {
    let json = serde_json::to_value(row).map_err(|error| WarehouseError::Request {
        message: format!("failed to encode row: {error}")
    })?;
    Ok(InsertRow {
        insert_id,
        json
    })
}

async fn error_detail(response: reqwest::Response) -> String {
    match response.json::<ErrorBody>().await {
        Ok(body) => body
            .error
            .and_then(|status| status.message)
            .unwrap_or_else(|| "no detail".to_owned()),
        Err(_) => "no detail".to_owned()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query:            String,
    use_legacy_sql:   bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter_mode:   Option<&'static str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    query_parameters: Vec<QueryParameter>,
    timeout_ms:       u64
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name:            &'static str,
    parameter_type:  ParameterType,
    parameter_value: ParameterValue
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    kind:       &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value:        Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    rows:         Vec<Row>
}

#[derive(Deserialize)]
struct Row {
    #[serde(default)]
    f: Vec<Cell>
}

#[derive(Deserialize)]
struct Cell {
    v: Option<serde_json::Value>
}

#[derive(Serialize)]
struct InsertAllRequest {
    rows: Vec<InsertRow>
}

#[derive(Serialize)]
struct InsertRow {
    #[serde(rename = "insertId")]
    insert_id: String,
    json:      serde_json::Value
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<InsertError>
}

#[derive(Deserialize)]
struct InsertError {
    #[serde(default)]
    errors: Vec<ErrorProto>
}

#[derive(Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<ErrorStatus>
}

#[derive(Deserialize)]
struct ErrorStatus {
    message: Option<String>
}
