//! Engineering velocity metrics for GitHub pull requests.
//!
//! The library collects pull requests from configured repositories, derives
//! time-to-first-review and time-to-merge durations in business seconds, and
//! prints the results or uploads them to a BigQuery dataset. A differential
//! roster sync keeps a `(group, username)` table aligned with a YAML
//! document. All public APIs are documented with invariants, error semantics,
//! and minimal examples to facilitate integration in automation tooling.

pub mod bots;
pub mod business_time;
pub mod collector;
pub mod config;
pub mod error;
pub mod github;
pub mod metrics;
pub mod ready;
pub mod roster;
pub mod sync;
pub mod warehouse;

pub use collector::{Collector, print_metrics, upload_metrics};
pub use config::{RunConfig, load_run_config};
pub use error::{Error, io_error};
pub use metrics::{MetricRecord, MetricType};
pub use sync::sync_roster;
pub use warehouse::BigQueryWarehouse;
