//! Resolution of the moment a pull request became reviewable.
//!
//! A pull request can become ready more than once (draft cycles), so the
//! resolver collects every candidate moment and picks the one that matters
//! for the requested span: the latest candidate strictly before the first
//! review, or the latest candidate overall when no review exists. Both metric
//! variants share this resolution unchanged.

use std::fmt;

use chrono::{DateTime, Utc};

use crate::github::{PullRequest, ReviewEvent, TimelineEvent};

/// Moment a pull request became reviewable, and where that moment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyEvent {
    /// When the pull request became reviewable.
    pub instant: DateTime<Utc>,
    /// Which observation produced the candidate.
    pub source:  ReadySource
}

/// Origin of a [`ReadyEvent`] candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadySource {
    /// A `ready_for_review` timeline event.
    ReadyForReview,
    /// The pull request was opened in a non-draft state.
    CreatedNotDraft
}

impl fmt::Display for ReadySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReadyForReview => f.write_str("ready_for_review event"),
            Self::CreatedNotDraft => f.write_str("PR creation (not draft)")
        }
    }
}

/// Outcome of a successful resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyResolution {
    /// The ready moment both metrics measure from.
    pub ready:           ReadyEvent,
    /// Earliest review submission, when any review exists.
    pub first_review_at: Option<DateTime<Utc>>
}

/// Failure cases of the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, masterror::Error)]
pub enum ResolveError {
    /// The pull request never became reviewable (draft with no events).
    #[error("no ready-for-review moment found")]
    NoReadyEvent,
    /// Every candidate lies at or after the first review.
    #[error("every ready-for-review moment lies at or after the first review")]
    ReadyAfterFirstReview
}

/// Resolves the ready moment of a pull request against its timeline and
/// reviews.
///
/// Candidates are every `ready_for_review` timeline event (restricted to
/// events no later than the merge when the pull request is merged) plus the
/// creation instant when the pull request was not opened as a draft. The
/// creation candidate is deliberately not merge-filtered. With no reviews the
/// latest candidate wins; otherwise the latest candidate strictly before the
/// earliest review submission wins.
///
/// # Errors
///
/// * [`ResolveError::NoReadyEvent`] when no candidate exists.
/// * [`ResolveError::ReadyAfterFirstReview`] when reviews exist but every
///   candidate lies at or after the earliest one.
pub fn resolve_ready_event(
    pr: &PullRequest,
    timeline: &[TimelineEvent],
    reviews: &[ReviewEvent],
) -> Result<ReadyResolution, ResolveError> {
    let mut candidates: Vec<ReadyEvent> = timeline
        .iter()
        .filter_map(|event| match event {
            TimelineEvent::ReadyForReview {
                created_at
            } => Some(*created_at),
            _ => None
        })
        .filter(|instant| pr.merged_at.is_none_or(|merged| *instant <= merged))
        .map(|instant| ReadyEvent {
            instant,
            source: ReadySource::ReadyForReview
        })
        .collect();

    if !pr.draft {
        candidates.push(ReadyEvent {
            instant: pr.created_at,
            source:  ReadySource::CreatedNotDraft
        });
    }

    candidates.sort_by_key(|candidate| candidate.instant);

    let Some(latest) = candidates.last().copied() else {
        return Err(ResolveError::NoReadyEvent);
    };

    let Some(first_review_at) = reviews.iter().map(|review| review.submitted_at).min() else {
        return Ok(ReadyResolution {
            ready:           latest,
            first_review_at: None
        });
    };

    let ready = candidates
        .iter()
        .rev()
        .find(|candidate| candidate.instant < first_review_at)
        .copied()
        .ok_or(ResolveError::ReadyAfterFirstReview)?;

    Ok(ReadyResolution {
        ready,
        first_review_at: Some(first_review_at)
    })
}
