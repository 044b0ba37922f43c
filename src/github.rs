// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! GitHub API access for the metrics pipeline.
//!
//! Exposes narrow, crate-owned projections of pull requests, timeline events
//! and reviews, plus a paginated fetcher that filters items as pages arrive.
//! Pages are fetched as raw JSON items and deserialized one at a time, so a
//! malformed item is dropped with a log line instead of failing the page.
//! A 403 answer triggers a quota probe and, when the quota window is about
//! to reset, exactly one retry of the failed page request.

use std::time::Duration;

use chrono::{DateTime, Utc};
use masterror::AppError;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tokio::time::sleep;
use tracing::{debug, info, warn};

/// Number of items requested per page.
pub const PAGE_SIZE: usize = 100;

/// Longest quota wait honored before giving up, in seconds.
const MAX_RATE_LIMIT_WAIT_SECS: i64 = 3_600;

/// Extra second added to quota waits so the reset has definitely passed.
const RATE_LIMIT_SLACK_SECS: u64 = 1;

/// Pull request projection carrying exactly the fields the pipeline reads.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    /// Number unique within the repository.
    pub number:     u64,
    /// Canonical web URL.
    pub html_url:   String,
    /// Account that opened the pull request.
    pub user:       Actor,
    /// Base side of the pull request, carrying the branch it merges into.
    pub base:       BaseRef,
    /// Whether the pull request is currently a draft.
    #[serde(default)]
    pub draft:      bool,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Last update instant, used for the lookback filter.
    pub updated_at: DateTime<Utc>,
    /// Merge instant when the pull request was merged.
    #[serde(default)]
    pub merged_at:  Option<DateTime<Utc>>
}

/// Base branch reference of a pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct BaseRef {
    /// Branch name the pull request merges into.
    #[serde(rename = "ref")]
    pub branch: String
}

/// Account that authored a pull request or review.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Actor {
    /// Account login.
    pub login: String,
    /// Account category reported by the API.
    #[serde(rename = "type", default)]
    pub kind:  ActorKind
}

/// Account categories reported by the `type` field of API payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActorKind {
    /// Regular user account.
    #[default]
    User,
    /// Machine account backing an app installation.
    Bot,
    /// Organization account.
    Organization,
    /// Any other account category.
    Other
}

impl<'de> Deserialize<'de> for ActorKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>
    {
        let value = String::deserialize(deserializer)?;
        Ok(match value.as_str() {
            "User" => Self::User,
            "Bot" => Self::Bot,
            "Organization" => Self::Organization,
            _ => Self::Other
        })
    }
}

/// Timeline entries the ready-event resolver cares about, with a catch-all
/// for the many event kinds the pipeline ignores.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TimelineEvent {
    /// The pull request left draft state.
    ReadyForReview {
        /// When the event was recorded.
        created_at: DateTime<Utc>
    },
    /// The pull request went back to draft state.
    ConvertToDraft {
        /// When the event was recorded.
        created_at: DateTime<Utc>
    },
    /// Any other timeline entry.
    #[serde(other)]
    Other
}

/// Submitted pull request review.
///
/// Pending reviews come back from the API without a `submitted_at` value and
/// reviews from deleted accounts without a `user`; both fail item
/// deserialization and are dropped by the fetcher.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReviewEvent {
    /// Account that submitted the review.
    pub user:         Actor,
    /// Submission instant.
    pub submitted_at: DateTime<Utc>
}

/// Fetches every pull request updated since `since` that targets
/// `target_branch`.
///
/// The listing is requested most-recently-updated-first, so pagination stops
/// early once a full page yields no matching pull request.
///
/// # Arguments
///
/// * `octocrab` - Authenticated Octocrab client
/// * `owner` - Repository owner
/// * `repo` - Repository name
/// * `target_branch` - Base branch a pull request must merge into
/// * `since` - Lower bound on the last update instant
///
/// # Errors
///
/// Returns [`AppError`] when GitHub API requests fail beyond the single
/// rate-limit retry.
///
/// # Example
///
/// ```no_run
/// use chrono::{Duration, Utc};
/// use emic::github::fetch_pull_requests;
/// use masterror::AppError;
/// use octocrab::Octocrab;
///
/// # async fn example() -> Result<(), AppError> {
/// let octocrab = Octocrab::builder()
///     .personal_token("token")
///     .build()
///     .map_err(|e| AppError::service(format!("failed to build octocrab: {e}")))?;
/// let since = Utc::now() - Duration::days(30);
/// let pulls = fetch_pull_requests(&octocrab, "acme", "widgets", "main", since).await?;
/// println!("{} pull requests", pulls.len());
/// # Ok(())
/// # }
/// ```
pub async fn fetch_pull_requests(
    octocrab: &Octocrab,
    owner: &str,
    repo: &str,
    target_branch: &str,
    since: DateTime<Utc>,
) -> Result<Vec<PullRequest>, AppError> {
    debug!("Fetching pull requests for {}/{} targeting {}", owner, repo, target_branch);

    let route = format!("/repos/{owner}/{repo}/pulls");
    let query = PageQuery {
        state:     Some("all"),
        sort:      Some("updated"),
        direction: Some("desc"),
        per_page:  PAGE_SIZE,
        page:      1
    };
    let pulls = fetch_filtered_pages(
        octocrab,
        &route,
        query,
        |pr: &PullRequest| pr.updated_at >= since && pr.base.branch == target_branch,
        true,
    )
    .await?;

    info!("Found {} pull requests for {}/{} updated since {}", pulls.len(), owner, repo, since);

    Ok(pulls)
}

/// Fetches the full issue timeline of a pull request.
///
/// # Errors
///
/// Returns [`AppError`] when GitHub API requests fail beyond the single
/// rate-limit retry.
pub async fn fetch_timeline_events(
    octocrab: &Octocrab,
    owner: &str,
    repo: &str,
    pr_number: u64,
) -> Result<Vec<TimelineEvent>, AppError> {
    let route = format!("/repos/{owner}/{repo}/issues/{pr_number}/timeline");
    fetch_filtered_pages(octocrab, &route, PageQuery::plain(), |_: &TimelineEvent| true, false)
        .await
}

/// Fetches every submitted review of a pull request.
///
/// # Errors
///
/// Returns [`AppError`] when GitHub API requests fail beyond the single
/// rate-limit retry.
pub async fn fetch_review_events(
    octocrab: &Octocrab,
    owner: &str,
    repo: &str,
    pr_number: u64,
) -> Result<Vec<ReviewEvent>, AppError> {
    let route = format!("/repos/{owner}/{repo}/pulls/{pr_number}/reviews");
    fetch_filtered_pages(octocrab, &route, PageQuery::plain(), |_: &ReviewEvent| true, false)
        .await
}

/// Decides how long to wait for a quota window reset.
///
/// Returns `None` when the failure was not quota exhaustion (`remaining` is
/// still positive) or when the reset lies in the past or more than an hour
/// away. Otherwise returns the wait until `reset_epoch` plus a one second
/// slack.
pub fn rate_limit_wait(remaining: usize, reset_epoch: u64, now: DateTime<Utc>) -> Option<Duration> {
    if remaining > 0 {
        return None;
    }
    let wait_secs = reset_epoch as i64 - now.timestamp();
    if wait_secs <= 0 || wait_secs >= MAX_RATE_LIMIT_WAIT_SECS {
        return None;
    }
    Some(Duration::from_secs(wait_secs as u64 + RATE_LIMIT_SLACK_SECS))
}

/// Query string shared by all paginated listings.
#[derive(Debug, Serialize)]
struct PageQuery {
    #[serde(skip_serializing_if = "Option::is_none")]
    state:     Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    sort:      Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    direction: Option<&'static str>,
    per_page:  usize,
    page:      u32
}

impl PageQuery {
    fn plain() -> Self {
        Self {
            state:     None,
            sort:      None,
            direction: None,
            per_page:  PAGE_SIZE,
            page:      1
        }
    }
}

/// Walks pages of `route`, keeping items that deserialize into `T` and
/// satisfy `keep`.
///
/// A short page always ends the walk. When `assume_recent_first` is set the
/// walk also ends after a full page without a single match: listings sorted
/// most-recently-updated-first cannot produce a match on a later page once a
/// full page went unmatched.
async fn fetch_filtered_pages<T, F>(
    octocrab: &Octocrab,
    route: &str,
    mut query: PageQuery,
    keep: F,
    assume_recent_first: bool,
) -> Result<Vec<T>, AppError>
where
    T: DeserializeOwned,
    F: Fn(&T) -> bool,
{
    let mut collected = Vec::new();

    loop {
        let items = fetch_page(octocrab, route, &query).await?;
        let page_len = items.len();
        let mut matched = 0usize;

        for item in items {
            match serde_json::from_value::<T>(item) {
                Ok(value) => {
                    if keep(&value) {
                        matched += 1;
                        collected.push(value);
                    }
                }
                Err(error) => {
                    debug!("dropping malformed item from {}: {}", route, error);
                }
            }
        }

        if page_len < query.per_page {
            break;
        }
        if assume_recent_first && matched == 0 {
            debug!("stopping pagination of {} after a page without matches", route);
            break;
        }
        query.page += 1;
    }

    Ok(collected)
}

/// Fetches a single page, retrying once after a quota-exhausted 403.
async fn fetch_page(
    octocrab: &Octocrab,
    route: &str,
    query: &PageQuery,
) -> Result<Vec<serde_json::Value>, AppError> {
    let mut retried = false;

    loop {
        let error = match octocrab.get(route, Some(query)).await {
            Ok(items) => return Ok(items),
            Err(error) => error
        };

        if retried || !is_forbidden(&error) {
            return Err(fetch_error(route, &error));
        }

        let limits = octocrab
            .ratelimit()
            .get()
            .await
            .map_err(|e| AppError::service(format!("failed to fetch rate limit status: {e}")))?;
        let core = limits.resources.core;
        let Some(wait) = rate_limit_wait(core.remaining, core.reset, Utc::now()) else {
            return Err(fetch_error(route, &error));
        };

        warn!(
            "rate limited while fetching {}; waiting {}s before the retry",
            route,
            wait.as_secs()
        );
        sleep(wait).await;
        retried = true;
    }
}

fn fetch_error(route: &str, error: &octocrab::Error) -> AppError {
    AppError::service(format!("failed to fetch {route}: {error}"))
}

fn is_forbidden(error: &octocrab::Error) -> bool {
    matches!(
        error,
        octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 403
    )
}

pub(crate) fn is_not_found(error: &octocrab::Error) -> bool {
    matches!(
        error,
        octocrab::Error::GitHub { source, .. } if source.status_code.as_u16() == 404
    )
}
