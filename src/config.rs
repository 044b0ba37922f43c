//! Run configuration consumed by the metrics collector CLI.
//!
//! The types in this module mirror the structure of the YAML document
//! describing a collection pass: which repositories to scan, which metrics to
//! derive and where to upload them, plus the optional roster sync settings.
//! Deserialization is forgiving (defaults and aliases for common key
//! spellings); [`RunConfig::validate`] enforces the invariants the rest of
//! the crate relies on.

use std::{
    fs,
    path::{Path, PathBuf}
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    error::{self, Error},
    metrics::MetricType
};

/// Default BigQuery REST endpoint used when the configuration does not
/// override it.
pub const DEFAULT_WAREHOUSE_ENDPOINT: &str = "https://bigquery.googleapis.com";

const DEFAULT_FIRST_REVIEW_TABLE: &str = "time_to_first_review";
const DEFAULT_MERGE_TABLE: &str = "time_to_merge";

/// Root configuration document describing a single collection pass.
///
/// # Examples
///
/// ```
/// use emic::RunConfig;
///
/// let yaml = r#"
/// repositories:
///   - acme/widgets
/// warehouse:
///   project: acme-insights
///   dataset: engineering
/// "#;
/// let config: RunConfig = serde_yaml::from_str(yaml).expect("valid configuration");
/// config.validate().expect("valid run configuration");
/// assert_eq!(config.target_branch, "main");
/// assert_eq!(config.lookback_days, 30);
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Repositories to collect metrics for, each in `owner/repo` form.
    #[serde(default)]
    pub repositories: Vec<String>,

    /// Base branch a pull request must target to be counted.
    #[serde(
        default = "default_target_branch",
        alias = "target-branch",
        alias = "targetBranch"
    )]
    pub target_branch: String,

    /// How many days of pull request updates to look back over.
    #[serde(
        default = "default_lookback_days",
        alias = "lookback-days",
        alias = "lookbackDays"
    )]
    pub lookback_days: u32,

    /// Drop reviews authored by bot accounts before deriving metrics.
    #[serde(default, alias = "exclude-bot-reviews", alias = "excludeBotReviews")]
    pub exclude_bot_reviews: bool,

    /// Per-metric toggles and warehouse table overrides.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Warehouse coordinates. Optional so that print-only runs do not need
    /// warehouse access; required for uploads.
    #[serde(default)]
    pub warehouse: Option<WarehouseConfig>,

    /// Roster sync settings.
    #[serde(default)]
    pub roster: RosterConfig
}

/// Per-metric enablement and table naming.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Settings for the time-to-first-review (pickup) metric.
    #[serde(
        default,
        alias = "time-to-first-review",
        alias = "timeToFirstReview"
    )]
    pub time_to_first_review: MetricToggle,

    /// Settings for the time-to-merge metric.
    #[serde(default, alias = "time-to-merge", alias = "timeToMerge")]
    pub time_to_merge: MetricToggle
}

impl MetricsConfig {
    /// Returns whether the given metric is enabled.
    pub fn enabled_for(&self, metric: MetricType) -> bool {
        self.toggle(metric).enabled
    }

    /// Returns the warehouse table the given metric uploads to, falling back
    /// to the metric's conventional table name when not overridden.
    pub fn table_for(&self, metric: MetricType) -> &str {
        let fallback = match metric {
            MetricType::TimeToFirstReview => DEFAULT_FIRST_REVIEW_TABLE,
            MetricType::TimeToMerge => DEFAULT_MERGE_TABLE
        };
        self.toggle(metric).table.as_deref().unwrap_or(fallback)
    }

    fn toggle(&self, metric: MetricType) -> &MetricToggle {
        match metric {
            MetricType::TimeToFirstReview => &self.time_to_first_review,
            MetricType::TimeToMerge => &self.time_to_merge
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            time_to_first_review: MetricToggle::default(),
            time_to_merge:        MetricToggle::default()
        }
    }
}

/// Enablement flag and optional table override for a single metric.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricToggle {
    /// Whether records for this metric are derived at all.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Warehouse table override. `None` falls back to the conventional
    /// per-metric table name.
    #[serde(default, alias = "table-name", alias = "tableName")]
    pub table: Option<String>
}

impl Default for MetricToggle {
    fn default() -> Self {
        Self {
            enabled: true,
            table:   None
        }
    }
}

/// BigQuery coordinates for uploads and roster sync.
#[derive(Debug, Clone, Deserialize)]
pub struct WarehouseConfig {
    /// Cloud project that owns the dataset.
    pub project: String,

    /// Dataset the metric and roster tables live in.
    #[serde(alias = "dataset-id", alias = "datasetId")]
    pub dataset: String,

    /// REST endpoint override. Defaults to the public BigQuery endpoint.
    #[serde(default = "default_warehouse_endpoint")]
    pub endpoint: String
}

/// Roster sync settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
    /// Whether the roster phase runs at all.
    #[serde(default)]
    pub enabled: bool,

    /// Path to the roster YAML document. Required when enabled.
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Warehouse table holding the (group, username) rows.
    #[serde(default = "default_roster_table", alias = "table-name", alias = "tableName")]
    pub table: String
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path:    None,
            table:   default_roster_table()
        }
    }
}

impl RunConfig {
    /// Checks every invariant the collection pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`](Error::Validation) describing the first
    /// violated invariant: an empty repository list, a malformed
    /// `owner/repo` entry, a blank target branch, a zero lookback window, an
    /// invalid table or dataset identifier, a non-HTTP warehouse endpoint or
    /// a roster section enabled without a path.
    pub fn validate(&self) -> Result<(), Error> {
        if self.repositories.is_empty() {
            return Err(Error::validation("configuration must list at least one repository"));
        }
        for repository in &self.repositories {
            split_repository(repository)?;
        }

        if self.target_branch.trim().is_empty() {
            return Err(Error::validation("target_branch must not be empty"));
        }
        if self.lookback_days == 0 {
            return Err(Error::validation("lookback_days must be at least 1"));
        }

        let table_pattern = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,127}$")
            .map_err(|e| Error::validation(format!("invalid regex: {e}")))?;
        for metric in MetricType::ALL {
            if self.metrics.enabled_for(metric) {
                let table = self.metrics.table_for(metric);
                if !table_pattern.is_match(table) {
                    return Err(Error::validation(format!("invalid table name '{table}'")));
                }
            }
        }

        if self.roster.enabled {
            if self.roster.path.is_none() {
                return Err(Error::validation(
                    "roster.path is required when roster sync is enabled"
                ));
            }
            if !table_pattern.is_match(&self.roster.table) {
                return Err(Error::validation(format!(
                    "invalid table name '{}'",
                    self.roster.table
                )));
            }
        }

        if let Some(warehouse) = self.warehouse.as_ref() {
            let project_pattern = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]*$")
                .map_err(|e| Error::validation(format!("invalid regex: {e}")))?;
            if !project_pattern.is_match(&warehouse.project) {
                return Err(Error::validation(format!(
                    "invalid warehouse project '{}'",
                    warehouse.project
                )));
            }
            if !table_pattern.is_match(&warehouse.dataset) {
                return Err(Error::validation(format!(
                    "invalid warehouse dataset '{}'",
                    warehouse.dataset
                )));
            }
            if !warehouse.endpoint.starts_with("http://")
                && !warehouse.endpoint.starts_with("https://")
            {
                return Err(Error::validation("warehouse endpoint must be an http(s) URL"));
            }
        }

        Ok(())
    }

    /// Returns the warehouse section, or a validation error when the run
    /// needs warehouse access but the configuration omits it.
    pub fn require_warehouse(&self) -> Result<&WarehouseConfig, Error> {
        self.warehouse
            .as_ref()
            .ok_or_else(|| Error::validation("warehouse section is required for upload mode"))
    }
}

/// Loads and validates a run configuration from the provided YAML file path.
///
/// # Errors
///
/// Returns an [`Error`] when the file cannot be read, the YAML cannot be
/// deserialized, or the configuration violates invariants.
pub fn load_run_config(path: &Path) -> Result<RunConfig, Error> {
    let contents = fs::read_to_string(path).map_err(|source| error::io_error(path, source))?;
    parse_run_config(&contents)
}

/// Parses and validates a run configuration from a YAML document string.
///
/// This function is suitable for unit tests and higher-level callers that
/// already obtained the configuration contents.
///
/// # Errors
///
/// Propagates [`Error::Parse`](Error::Parse) when the YAML cannot be decoded
/// and [`Error::Validation`](Error::Validation) when invariants are violated.
pub fn parse_run_config(contents: &str) -> Result<RunConfig, Error> {
    let config: RunConfig = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Splits an `owner/repo` reference into its two components.
///
/// # Errors
///
/// Returns [`Error::Validation`](Error::Validation) when the value does not
/// contain exactly one `/` separating two non-empty identifier segments.
pub fn split_repository(value: &str) -> Result<(&str, &str), Error> {
    let invalid =
        || Error::validation(format!("invalid repository '{value}': expected owner/repo"));

    let (owner, repo) = value.split_once('/').ok_or_else(invalid)?;
    if owner.is_empty() || repo.is_empty() || repo.contains('/') {
        return Err(invalid());
    }
    let well_formed = |segment: &str| {
        segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !well_formed(owner) || !well_formed(repo) {
        return Err(invalid());
    }
    Ok((owner, repo))
}

fn default_target_branch() -> String {
    "main".to_owned()
}

fn default_lookback_days() -> u32 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_roster_table() -> String {
    "user_groups".to_owned()
}

fn default_warehouse_endpoint() -> String {
    DEFAULT_WAREHOUSE_ENDPOINT.to_owned()
}
