// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Pipeline orchestration: collect pull request metrics, then print or
//! upload them.
//!
//! Collection walks each configured repository and derives the enabled
//! metric variants per pull request. A pull request whose timeline or
//! review fetch fails is skipped with a warning; a repository whose pull
//! request listing cannot be fetched aborts the run. Uploads deduplicate
//! against rows already in the warehouse, keyed by pull request number per
//! destination table.

use std::io::{self, Write};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use octocrab::Octocrab;
use tracing::{debug, info, warn};

use crate::{
    bots::filter_bot_reviews,
    config::{RunConfig, split_repository},
    error::Error,
    github::{PullRequest, fetch_pull_requests, fetch_review_events, fetch_timeline_events},
    metrics::{MetricRecord, MetricSkip, MetricType, first_review_metric, merge_metric},
    warehouse::MetricsStore
};

/// Walks the configured repositories and derives metric records.
pub struct Collector<'a> {
    octocrab: &'a Octocrab,
    config:   &'a RunConfig
}

impl<'a> Collector<'a> {
    /// Binds a collector to a client and a run configuration.
    pub fn new(octocrab: &'a Octocrab, config: &'a RunConfig) -> Self {
        Self {
            octocrab,
            config
        }
    }

    /// Collects records for every enabled metric across all configured
    /// repositories.
    ///
    /// The lookback window starts `lookback_days` before now. Pull requests
    /// whose per-item fetches fail are skipped with a warning so one broken
    /// pull request cannot sink the run.
    ///
    /// # Errors
    ///
    /// Returns [`Error`] when a repository name is malformed or a pull
    /// request listing cannot be fetched.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use emic::{Collector, Error, config::RunConfig};
    /// use octocrab::Octocrab;
    ///
    /// # async fn example(config: RunConfig) -> Result<(), Error> {
    /// let octocrab = Octocrab::builder()
    ///     .personal_token("token")
    ///     .build()
    ///     .map_err(|e| Error::service(format!("failed to build octocrab: {e}")))?;
    /// let records = Collector::new(&octocrab, &config).collect_metrics().await?;
    /// println!("{} records", records.len());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn collect_metrics(&self) -> Result<Vec<MetricRecord>, Error> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.yellow} [{elapsed_precise}] {msg}")
                .expect("valid template")
        );

        info!("Starting metrics collection for {} repositories", self.config.repositories.len());
        let since = Utc::now() - Duration::days(i64::from(self.config.lookback_days));

        let mut records = Vec::new();
        for repository in &self.config.repositories {
            pb.set_message(format!("Collecting metrics for {repository}..."));
            info!("Collecting metrics for repository: {}", repository);
            let (owner, repo) = split_repository(repository)?;
            let pulls =
                fetch_pull_requests(self.octocrab, owner, repo, &self.config.target_branch, since)
                    .await?;

            for pr in &pulls {
                pb.set_message(format!("Processing {repository}#{}...", pr.number));
                match self.collect_pull_request(repository, pr).await {
                    Ok(mut derived) => records.append(&mut derived),
                    Err(error) => {
                        warn!(
                            "Failed to collect metrics for {}#{}: {}",
                            repository, pr.number, error
                        );
                    }
                }
            }
        }

        pb.finish_with_message(format!("Collected {} metrics", records.len()));
        info!("Collected {} total metrics", records.len());
        Ok(records)
    }

    /// Derives every enabled metric variant for one pull request.
    async fn collect_pull_request(
        &self,
        repository: &str,
        pr: &PullRequest,
    ) -> Result<Vec<MetricRecord>, Error> {
        let (owner, repo) = split_repository(repository)?;
        let timeline = fetch_timeline_events(self.octocrab, owner, repo, pr.number).await?;
        let reviews = fetch_review_events(self.octocrab, owner, repo, pr.number).await?;
        let reviews = filter_bot_reviews(reviews, self.config.exclude_bot_reviews);

        let mut derived = Vec::new();
        for metric in MetricType::ALL {
            if !self.config.metrics.enabled_for(metric) {
                continue;
            }
            let outcome = match metric {
                MetricType::TimeToFirstReview => {
                    first_review_metric(repository, pr, &timeline, &reviews)
                        .map(MetricRecord::FirstReview)
                }
                MetricType::TimeToMerge => {
                    merge_metric(repository, pr, &timeline, &reviews).map(MetricRecord::Merge)
                }
            };
            match outcome {
                Ok(record) => derived.push(record),
                Err(MetricSkip::EndBeforeStart) => {
                    warn!(
                        "Discarding {} for {}#{}: {}",
                        metric,
                        repository,
                        pr.number,
                        MetricSkip::EndBeforeStart
                    );
                }
                Err(skip) => {
                    debug!("Skipping {} for {}#{}: {}", metric, repository, pr.number, skip);
                }
            }
        }
        Ok(derived)
    }
}

/// Prints records to stdout grouped by metric type, slowest first within
/// each group.
pub fn print_metrics(records: &[MetricRecord]) {
    if records.is_empty() {
        warn!("No metrics to print");
        return;
    }

    info!("Printing {} metrics to console", records.len());

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    if let Err(error) = write_metrics_report(&mut handle, records) {
        warn!("Failed to write the metrics report: {}", error);
        return;
    }

    info!("Metrics printed successfully");
}

/// Writes the grouped report. Groups follow metric declaration order;
/// entries within a group are sorted by elapsed seconds descending and
/// numbered from 1.
fn write_metrics_report<W: Write>(writer: &mut W, records: &[MetricRecord]) -> io::Result<()> {
    writeln!(writer, "\n=== Engineering Metrics ===\n")?;

    for metric in MetricType::ALL {
        let mut group: Vec<&MetricRecord> =
            records.iter().filter(|record| record.metric_type() == metric).collect();
        if group.is_empty() {
            continue;
        }

        writeln!(writer, "--- {} ({} metrics) ---\n", metric.display_name(), group.len())?;
        group.sort_by(|a, b| b.elapsed_seconds().cmp(&a.elapsed_seconds()));
        for (index, record) in group.iter().enumerate() {
            write_single_metric(writer, record, index)?;
        }
        write_type_summary(writer, metric, &group)?;
    }

    Ok(())
}

fn write_single_metric<W: Write>(
    writer: &mut W,
    record: &MetricRecord,
    index: usize,
) -> io::Result<()> {
    writeln!(writer, "[{}] PR: {}#{}", index + 1, record.repository(), record.pr_number())?;
    match record {
        MetricRecord::FirstReview(record) => {
            writeln!(writer, "    URL: {}", record.pr_url)?;
            writeln!(writer, "    Creator: {}", record.pr_creator)?;
            writeln!(
                writer,
                "    Ready Time: {} ({})",
                iso(record.ready_time),
                record.ready_event_type
            )?;
            writeln!(writer, "    First Review Time: {}", iso(record.first_review_time))?;
            writeln!(
                writer,
                "    Pickup Time: {} ({} seconds)",
                format_duration(record.pickup_time_seconds),
                record.pickup_time_seconds
            )?;
        }
        MetricRecord::Merge(record) => {
            writeln!(writer, "    URL: {}", record.pr_url)?;
            writeln!(writer, "    Creator: {}", record.pr_creator)?;
            writeln!(
                writer,
                "    Ready Time: {} ({})",
                iso(record.ready_time),
                record.ready_event_type
            )?;
            writeln!(writer, "    Merge Time: {}", iso(record.merge_time))?;
            writeln!(
                writer,
                "    Time to Merge: {} ({} seconds)",
                format_duration(record.merge_time_seconds),
                record.merge_time_seconds
            )?;
        }
    }
    writeln!(writer)?;
    Ok(())
}

fn write_type_summary<W: Write>(
    writer: &mut W,
    metric: MetricType,
    group: &[&MetricRecord],
) -> io::Result<()> {
    let total: u64 = group.iter().map(|record| record.elapsed_seconds()).sum();
    let average = total / group.len() as u64;
    writeln!(writer, "=== {} Summary ===", metric.display_name())?;
    writeln!(writer, "Total PRs: {}", group.len())?;
    writeln!(writer, "Average Time: {} ({} seconds)", format_duration(average), average)?;
    writeln!(writer)?;
    Ok(())
}

fn iso(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Renders a second count as `{hours}h {minutes}m {seconds}s`, hours
/// unbounded.
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3_600;
    let minutes = (seconds % 3_600) / 60;
    let secs = seconds % 60;
    format!("{hours}h {minutes}m {secs}s")
}

/// Uploads records to their per-metric warehouse tables, skipping pull
/// requests already present.
///
/// Each destination table is queried for the candidate pull request numbers
/// first, and records whose number is already stored are dropped, so
/// repeated runs over overlapping windows do not produce duplicate rows.
///
/// # Errors
///
/// Returns [`Error`] when a deduplication query or an insert fails.
pub async fn upload_metrics<W: MetricsStore>(
    store: &W,
    config: &RunConfig,
    records: &[MetricRecord],
) -> Result<(), Error> {
    if records.is_empty() {
        warn!("No metrics to upload");
        return Ok(());
    }

    info!("Uploading {} metrics...", records.len());

    for metric in MetricType::ALL {
        let group: Vec<&MetricRecord> =
            records.iter().filter(|record| record.metric_type() == metric).collect();
        if group.is_empty() {
            continue;
        }

        let table = config.metrics.table_for(metric);
        let candidates: Vec<u64> = group.iter().map(|record| record.pr_number()).collect();
        let existing = store.existing_pr_numbers(table, &candidates).await?;

        let fresh: Vec<MetricRecord> = group
            .iter()
            .filter(|record| !existing.contains(&record.pr_number()))
            .map(|record| (*record).clone())
            .collect();

        let skipped = group.len() - fresh.len();
        if skipped > 0 {
            info!("Skipping {} {} metrics already uploaded", skipped, metric);
        }
        if fresh.is_empty() {
            continue;
        }

        info!("Uploading {} {} metrics to table {}", fresh.len(), metric, table);
        store.insert_metrics(table, &fresh).await?;
    }

    info!("All metrics uploaded successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use chrono::{DateTime, Duration, Utc};
    use octocrab::Octocrab;
    use serde_json::json;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{method, path}
    };

    use super::{Collector, format_duration, upload_metrics, write_metrics_report};
    use crate::{
        config::{MetricToggle, MetricsConfig, RosterConfig, RunConfig},
        metrics::{FirstReviewRecord, MergeRecord, MetricRecord, MetricType},
        warehouse::testing::MemoryWarehouse
    };

    fn instant(value: &str) -> DateTime<Utc> {
        value.parse().expect("valid RFC 3339 instant")
    }

    fn client_for(server: &MockServer) -> Octocrab {
        Octocrab::builder()
            .base_uri(server.uri())
            .expect("valid base uri")
            .build()
            .expect("failed to build octocrab client")
    }

    fn run_config() -> RunConfig {
        RunConfig {
            repositories:        vec!["acme/widgets".to_owned()],
            target_branch:       "main".to_owned(),
            lookback_days:       30,
            exclude_bot_reviews: false,
            metrics:             MetricsConfig::default(),
            warehouse:           None,
            roster:              RosterConfig::default()
        }
    }

    fn pr_json(number: u64, created_at: &str, merged_at: Option<&str>) -> serde_json::Value {
        json!({
            "number": number,
            "html_url": format!("https://github.com/acme/widgets/pull/{number}"),
            "user": {"login": "alice", "type": "User"},
            "base": {"ref": "main"},
            "draft": false,
            "created_at": created_at,
            "updated_at": Utc::now().to_rfc3339(),
            "merged_at": merged_at
        })
    }

    fn review_json(submitted_at: &str) -> serde_json::Value {
        json!({"user": {"login": "bob", "type": "User"}, "submitted_at": submitted_at})
    }

    /// Mounts one reviewed, merged pull request: created Monday 10:00,
    /// reviewed 11:30, merged 13:00.
    async fn mount_reviewed_pull(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&json!([pr_json(
                42,
                "2024-03-04T10:00:00Z",
                Some("2024-03-04T13:00:00Z")
            )])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/42/timeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&json!([])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/42/reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(&json!([review_json("2024-03-04T11:30:00Z")]))
            )
            .mount(server)
            .await;
    }

    fn first_review_record(pr_number: u64, pickup_time_seconds: u64) -> MetricRecord {
        let ready_time = instant("2024-03-04T10:00:00Z");
        MetricRecord::FirstReview(FirstReviewRecord {
            metric_type:         MetricType::TimeToFirstReview,
            repository:          "acme/widgets".to_owned(),
            pr_number,
            pr_url:              format!("https://github.com/acme/widgets/pull/{pr_number}"),
            pr_creator:          "alice".to_owned(),
            target_branch:       "main".to_owned(),
            ready_time,
            first_review_time:   ready_time + Duration::seconds(pickup_time_seconds as i64),
            review_date:         "2024-03-04".to_owned(),
            pickup_time_seconds,
            ready_event_type:    "PR creation (not draft)".to_owned()
        })
    }

    fn merge_record(pr_number: u64) -> MetricRecord {
        MetricRecord::Merge(MergeRecord {
            metric_type:        MetricType::TimeToMerge,
            repository:         "acme/widgets".to_owned(),
            pr_number,
            pr_url:             format!("https://github.com/acme/widgets/pull/{pr_number}"),
            pr_creator:         "alice".to_owned(),
            target_branch:      "main".to_owned(),
            ready_time:         instant("2024-03-04T10:00:00Z"),
            merge_time:         instant("2024-03-04T13:00:00Z"),
            merge_date:         "2024-03-04".to_owned(),
            merge_time_seconds: 10_800,
            ready_event_type:   "PR creation (not draft)".to_owned()
        })
    }

    #[test]
    fn format_duration_renders_hours_minutes_seconds() {
        assert_eq!(format_duration(0), "0h 0m 0s");
        assert_eq!(format_duration(5400), "1h 30m 0s");
        assert_eq!(format_duration(86_399), "23h 59m 59s");
        assert_eq!(format_duration(90_000), "25h 0m 0s");
    }

    #[test]
    fn report_orders_entries_descending_and_summarizes_each_type() {
        let records =
            [first_review_record(41, 5400), first_review_record(42, 9000), merge_record(42)];
        let mut buffer = Cursor::new(Vec::new());

        write_metrics_report(&mut buffer, &records).expect("report should write");
        let output = String::from_utf8(buffer.into_inner()).expect("invalid UTF-8");

        assert!(output.contains("=== Engineering Metrics ==="));
        assert!(output.contains("--- Time to First Review (2 metrics) ---"));
        let slower = output.find("[1] PR: acme/widgets#42").expect("slower entry missing");
        let faster = output.find("[2] PR: acme/widgets#41").expect("faster entry missing");
        assert!(slower < faster);
        let ready_line = "    Ready Time: 2024-03-04T10:00:00.000Z (PR creation (not draft))";
        assert!(output.contains(ready_line));
        assert!(output.contains("    First Review Time: 2024-03-04T12:30:00.000Z"));
        assert!(output.contains("    Pickup Time: 2h 30m 0s (9000 seconds)"));
        let summary = "=== Time to First Review Summary ===\n\
                       Total PRs: 2\n\
                       Average Time: 2h 0m 0s (7200 seconds)";
        assert!(output.contains(summary));
        assert!(output.contains("--- Time to Merge (1 metrics) ---"));
        assert!(output.contains("    Merge Time: 2024-03-04T13:00:00.000Z"));
        assert!(output.contains("    Time to Merge: 3h 0m 0s (10800 seconds)"));
    }

    #[tokio::test]
    async fn collects_both_metrics_for_a_reviewed_merged_pull_request() {
        let server = MockServer::start().await;
        mount_reviewed_pull(&server).await;
        let octocrab = client_for(&server);
        let config = run_config();

        let records = Collector::new(&octocrab, &config)
            .collect_metrics()
            .await
            .expect("collection succeeds");

        assert_eq!(records.len(), 2);
        match &records[0] {
            MetricRecord::FirstReview(record) => {
                assert_eq!(record.repository, "acme/widgets");
                assert_eq!(record.pr_number, 42);
                assert_eq!(record.pickup_time_seconds, 5400);
                assert_eq!(record.ready_event_type, "PR creation (not draft)");
            }
            MetricRecord::Merge(_) => panic!("expected the first-review record first")
        }
        match &records[1] {
            MetricRecord::Merge(record) => {
                assert_eq!(record.merge_time_seconds, 10_800);
                assert_eq!(record.merge_date, "2024-03-04");
            }
            MetricRecord::FirstReview(_) => panic!("expected the merge record second")
        }
    }

    #[tokio::test]
    async fn disabled_metrics_are_not_derived() {
        let server = MockServer::start().await;
        mount_reviewed_pull(&server).await;
        let octocrab = client_for(&server);
        let mut config = run_config();
        config.metrics.time_to_merge = MetricToggle {
            enabled: false,
            table:   None
        };

        let records = Collector::new(&octocrab, &config)
            .collect_metrics()
            .await
            .expect("collection succeeds");

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metric_type(), MetricType::TimeToFirstReview);
    }

    #[tokio::test]
    async fn skips_a_pull_request_whose_timeline_fetch_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&json!([
                pr_json(41, "2024-03-04T09:00:00Z", None),
                pr_json(42, "2024-03-04T10:00:00Z", Some("2024-03-04T13:00:00Z"))
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/41/timeline"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/issues/42/timeline"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls/42/reviews"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(&json!([review_json("2024-03-04T11:30:00Z")]))
            )
            .mount(&server)
            .await;
        let octocrab = client_for(&server);
        let config = run_config();

        let records = Collector::new(&octocrab, &config)
            .collect_metrics()
            .await
            .expect("collection succeeds");

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|record| record.pr_number() == 42));
    }

    #[tokio::test]
    async fn repository_listing_failure_aborts_the_run() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/widgets/pulls"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let octocrab = client_for(&server);
        let config = run_config();

        let error = Collector::new(&octocrab, &config)
            .collect_metrics()
            .await
            .expect_err("listing failure must abort");

        assert!(error.to_display_string().contains("failed to fetch"));
    }

    #[tokio::test]
    async fn uploads_only_records_absent_from_the_warehouse() {
        let store = MemoryWarehouse::new();
        store.seed_existing("time_to_first_review", [41]);
        let config = run_config();
        let records =
            [first_review_record(41, 5400), first_review_record(42, 5400), merge_record(42)];

        upload_metrics(&store, &config, &records).await.expect("upload succeeds");

        let first_review = store.inserted_metrics("time_to_first_review");
        assert_eq!(first_review.len(), 1);
        assert_eq!(first_review[0].pr_number(), 42);
        assert_eq!(store.inserted_metrics("time_to_merge").len(), 1);
        assert_eq!(store.operations(), vec![
            "query time_to_first_review".to_owned(),
            "insert 1 metrics into time_to_first_review".to_owned(),
            "query time_to_merge".to_owned(),
            "insert 1 metrics into time_to_merge".to_owned(),
        ]);
    }

    #[tokio::test]
    async fn upload_inserts_nothing_when_every_record_already_exists() {
        let store = MemoryWarehouse::new();
        store.seed_existing("time_to_first_review", [41, 42]);
        let config = run_config();
        let records = [first_review_record(41, 5400), first_review_record(42, 5400)];

        upload_metrics(&store, &config, &records).await.expect("upload succeeds");

        assert!(store.inserted_metrics("time_to_first_review").is_empty());
        assert_eq!(store.operations(), vec!["query time_to_first_review".to_owned()]);
    }

    #[tokio::test]
    async fn upload_of_no_records_touches_nothing() {
        let store = MemoryWarehouse::new();
        let config = run_config();

        upload_metrics(&store, &config, &[]).await.expect("upload succeeds");

        assert!(store.operations().is_empty());
    }
}
