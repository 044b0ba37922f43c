// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Derivation of pull request velocity metrics.
//!
//! Each metric variant resolves the ready moment for itself and measures the
//! weekend-excluding span to its own terminal instant: the earliest review
//! for [`MetricType::TimeToFirstReview`], the merge for
//! [`MetricType::TimeToMerge`]. Records serialize field-for-field into
//! warehouse rows.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    business_time::{BusinessTimeError, elapsed_business_seconds},
    github::{PullRequest, ReviewEvent, TimelineEvent},
    ready::{ResolveError, resolve_ready_event}
};

/// Metric variants the collector can derive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    /// Business seconds from ready to the earliest submitted review.
    TimeToFirstReview,
    /// Business seconds from ready to the merge.
    TimeToMerge
}

impl MetricType {
    /// Every variant, in derivation order.
    pub const ALL: [MetricType; 2] = [MetricType::TimeToFirstReview, MetricType::TimeToMerge];

    /// Stable identifier used in table fallbacks and insert ids.
    pub fn id(self) -> &'static str {
        match self {
            Self::TimeToFirstReview => "time_to_first_review",
            Self::TimeToMerge => "time_to_merge"
        }
    }

    /// Human-facing name used by the printed report.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::TimeToFirstReview => "Time to First Review",
            Self::TimeToMerge => "Time to Merge"
        }
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Reasons a pull request yields no record for a metric variant.
///
/// A skip is expected data shape, not a failure. Callers log it and move on
/// to the next pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, masterror::Error)]
pub enum MetricSkip {
    /// The pull request has not been merged.
    #[error("pull request is not merged")]
    NotMerged,
    /// No review has been submitted.
    #[error("pull request has no submitted reviews")]
    NoReviews,
    /// The pull request never became reviewable.
    #[error("no ready-for-review moment found")]
    NoReadyEvent,
    /// Every ready moment lies at or after the first review.
    #[error("every ready-for-review moment lies at or after the first review")]
    ReadyAfterFirstReview,
    /// The terminal instant precedes the ready moment.
    #[error("terminal instant precedes the ready moment")]
    EndBeforeStart
}

impl From<ResolveError> for MetricSkip {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::NoReadyEvent => Self::NoReadyEvent,
            ResolveError::ReadyAfterFirstReview => Self::ReadyAfterFirstReview
        }
    }
}

impl From<BusinessTimeError> for MetricSkip {
    fn from(error: BusinessTimeError) -> Self {
        match error {
            BusinessTimeError::EndBeforeStart => Self::EndBeforeStart
        }
    }
}

/// Time-to-first-review warehouse row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FirstReviewRecord {
    pub metric_type:         MetricType,
    pub repository:          String,
    pub pr_number:           u64,
    pub pr_url:              String,
    pub pr_creator:          String,
    pub target_branch:       String,
    pub ready_time:          DateTime<Utc>,
    pub first_review_time:   DateTime<Utc>,
    /// `YYYY-MM-DD` of the first review.
    pub review_date:         String,
    pub pickup_time_seconds: u64,
    pub ready_event_type:    String
}

/// Time-to-merge warehouse row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeRecord {
    pub metric_type:        MetricType,
    pub repository:         String,
    pub pr_number:          u64,
    pub pr_url:             String,
    pub pr_creator:         String,
    pub target_branch:      String,
    pub ready_time:         DateTime<Utc>,
    pub merge_time:         DateTime<Utc>,
    /// `YYYY-MM-DD` of the merge.
    pub merge_date:         String,
    pub merge_time_seconds: u64,
    pub ready_event_type:   String
}

/// A derived metric of either variant.
///
/// Serializes as the inner record, so a batch of mixed variants still maps
/// 1:1 to the rows of its per-variant destination tables.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetricRecord {
    FirstReview(FirstReviewRecord),
    Merge(MergeRecord)
}

impl MetricRecord {
    pub fn metric_type(&self) -> MetricType {
        match self {
            Self::FirstReview(_) => MetricType::TimeToFirstReview,
            Self::Merge(_) => MetricType::TimeToMerge
        }
    }

    pub fn repository(&self) -> &str {
        match self {
            Self::FirstReview(record) => &record.repository,
            Self::Merge(record) => &record.repository
        }
    }

    pub fn pr_number(&self) -> u64 {
        match self {
            Self::FirstReview(record) => record.pr_number,
            Self::Merge(record) => record.pr_number
        }
    }

    /// Measured business seconds, regardless of variant.
    pub fn elapsed_seconds(&self) -> u64 {
        match self {
            Self::FirstReview(record) => record.pickup_time_seconds,
            Self::Merge(record) => record.merge_time_seconds
        }
    }
}

/// Derives the time-to-first-review record for one pull request.
///
/// # Errors
///
/// Returns a [`MetricSkip`] when the pull request has no submitted reviews,
/// never became reviewable, or carries an inverted interval.
pub fn first_review_metric(
    repository: &str,
    pr: &PullRequest,
    timeline: &[TimelineEvent],
    reviews: &[ReviewEvent],
) -> Result<FirstReviewRecord, MetricSkip> {
    let resolution = resolve_ready_event(pr, timeline, reviews)?;
    let Some(first_review_time) = resolution.first_review_at else {
        return Err(MetricSkip::NoReviews);
    };
    let pickup_time_seconds =
        elapsed_business_seconds(resolution.ready.instant, first_review_time)?;

    Ok(FirstReviewRecord {
        metric_type:         MetricType::TimeToFirstReview,
        repository:          repository.to_owned(),
        pr_number:           pr.number,
        pr_url:              pr.html_url.clone(),
        pr_creator:          pr.user.login.clone(),
        target_branch:       pr.base.branch.clone(),
        ready_time:          resolution.ready.instant,
        first_review_time,
        review_date:         first_review_time.date_naive().to_string(),
        pickup_time_seconds,
        ready_event_type:    resolution.ready.source.to_string()
    })
}

/// Derives the time-to-merge record for one pull request.
///
/// Shares the ready resolution with the first-review metric, so draft cycles
/// and the created-not-draft fallback behave identically across variants.
///
/// # Errors
///
/// Returns a [`MetricSkip`] when the pull request is unmerged, never became
/// reviewable, or carries an inverted interval.
pub fn merge_metric(
    repository: &str,
    pr: &PullRequest,
    timeline: &[TimelineEvent],
    reviews: &[ReviewEvent],
) -> Result<MergeRecord, MetricSkip> {
    let Some(merge_time) = pr.merged_at else {
        return Err(MetricSkip::NotMerged);
    };
    let resolution = resolve_ready_event(pr, timeline, reviews)?;
    let merge_time_seconds = elapsed_business_seconds(resolution.ready.instant, merge_time)?;

    Ok(MergeRecord {
        metric_type:        MetricType::TimeToMerge,
        repository:         repository.to_owned(),
        pr_number:          pr.number,
        pr_url:             pr.html_url.clone(),
        pr_creator:         pr.user.login.clone(),
        target_branch:      pr.base.branch.clone(),
        ready_time:         resolution.ready.instant,
        merge_time,
        merge_date:         merge_time.date_naive().to_string(),
        merge_time_seconds,
        ready_event_type:   resolution.ready.source.to_string()
    })
}
