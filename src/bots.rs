// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
// SPDX-License-Identifier: MIT

//! Bot account detection for review filtering.
//!
//! Classification is a heuristic: the API-reported account type is
//! authoritative, the login patterns catch services that review through
//! regular user accounts. Unknown bots slip through (false negatives are
//! accepted); the pattern table errs on the side of never flagging a human.

use tracing::{debug, info};

use crate::github::{Actor, ActorKind, ReviewEvent};

/// Classification result for a single account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BotVerdict {
    /// Whether the account is considered a bot.
    pub is_bot:     bool,
    /// How reliable the verdict is. Diagnostics only.
    pub confidence: Confidence,
    /// What triggered a positive verdict.
    pub reason:     Option<&'static str>
}

/// Reliability of a [`BotVerdict`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Backed by the API account type or a known login pattern.
    High,
    /// Nothing matched; the account is assumed human.
    Low
}

/// Login fragment identifying a bot account.
enum LoginPattern {
    /// Login contains the fragment anywhere.
    Contains(&'static str),
    /// Login starts with the fragment.
    Prefix(&'static str)
}

impl LoginPattern {
    fn matches(&self, login: &str) -> bool {
        match self {
            Self::Contains(fragment) => login.contains(fragment),
            Self::Prefix(fragment) => login.starts_with(fragment)
        }
    }

    fn fragment(&self) -> &'static str {
        match self {
            Self::Contains(fragment) | Self::Prefix(fragment) => fragment
        }
    }
}

/// Ordered pattern table; the first match wins.
const BOT_LOGIN_PATTERNS: &[LoginPattern] = &[
    LoginPattern::Contains("[bot]"),
    LoginPattern::Prefix("dependabot"),
    LoginPattern::Prefix("renovate"),
    LoginPattern::Prefix("github-actions"),
    LoginPattern::Prefix("codecov"),
    LoginPattern::Prefix("coderabbitai"),
    LoginPattern::Prefix("sonarcloud"),
    LoginPattern::Prefix("snyk"),
    LoginPattern::Prefix("greenkeeper"),
    LoginPattern::Prefix("semantic-release"),
    LoginPattern::Prefix("stale"),
    LoginPattern::Prefix("imgbot"),
    LoginPattern::Prefix("allcontributors"),
    LoginPattern::Prefix("whitesource"),
    LoginPattern::Prefix("deepsource"),
];

/// Classifies an account as bot or human.
///
/// The API-reported `Bot` type is terminal and skips the pattern scan.
/// Otherwise the lowercased login is checked against the ordered pattern
/// table, first match wins.
///
/// # Example
///
/// ```
/// use emic::bots::classify_reviewer;
/// use emic::github::{Actor, ActorKind};
///
/// let reviewer = Actor {
///     login: "dependabot[bot]".to_owned(),
///     kind:  ActorKind::User
/// };
/// assert!(classify_reviewer(&reviewer).is_bot);
/// ```
pub fn classify_reviewer(actor: &Actor) -> BotVerdict {
    if actor.kind == ActorKind::Bot {
        return BotVerdict {
            is_bot:     true,
            confidence: Confidence::High,
            reason:     Some("account type is Bot")
        };
    }

    let login = actor.login.to_lowercase();
    for pattern in BOT_LOGIN_PATTERNS {
        if pattern.matches(&login) {
            return BotVerdict {
                is_bot:     true,
                confidence: Confidence::High,
                reason:     Some(pattern.fragment())
            };
        }
    }

    BotVerdict {
        is_bot:     false,
        confidence: Confidence::Low,
        reason:     None
    }
}

/// Drops bot-authored reviews when `exclude` is set.
///
/// With `exclude` unset the input is returned unchanged. Each dropped review
/// is logged individually; a summary line reports the total when anything was
/// filtered.
pub fn filter_bot_reviews(reviews: Vec<ReviewEvent>, exclude: bool) -> Vec<ReviewEvent> {
    if !exclude {
        return reviews;
    }

    let total = reviews.len();
    let kept: Vec<ReviewEvent> = reviews
        .into_iter()
        .filter(|review| {
            let verdict = classify_reviewer(&review.user);
            if verdict.is_bot {
                debug!(
                    "Filtering out bot review from {} ({})",
                    review.user.login,
                    verdict.reason.unwrap_or("unknown reason")
                );
            }
            !verdict.is_bot
        })
        .collect();

    let dropped = total - kept.len();
    if dropped > 0 {
        info!("Filtered out {} bot reviews from {} total reviews", dropped, total);
    }

    kept
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::{BotVerdict, Confidence, classify_reviewer, filter_bot_reviews};
    use crate::github::{Actor, ActorKind, ReviewEvent};

    fn user(login: &str) -> Actor {
        Actor {
            login: login.to_owned(),
            kind:  ActorKind::User
        }
    }

    fn review(login: &str, kind: ActorKind) -> ReviewEvent {
        ReviewEvent {
            user:         Actor {
                login: login.to_owned(),
                kind
            },
            submitted_at: "2024-03-04T13:00:00Z"
                .parse::<DateTime<Utc>>()
                .expect("valid RFC 3339 instant")
        }
    }

    #[test]
    fn api_bot_type_is_terminal() {
        let actor = Actor {
            login: "innocuous-name".to_owned(),
            kind:  ActorKind::Bot
        };

        let verdict = classify_reviewer(&actor);
        assert_eq!(
            verdict,
            BotVerdict {
                is_bot:     true,
                confidence: Confidence::High,
                reason:     Some("account type is Bot")
            }
        );
    }

    #[test]
    fn bracket_bot_suffix_matches_anywhere() {
        let verdict = classify_reviewer(&user("custom-helper[bot]"));
        assert!(verdict.is_bot);
        assert_eq!(verdict.reason, Some("[bot]"));
    }

    #[test]
    fn known_prefixes_match_case_insensitively() {
        for login in ["Dependabot", "renovate-test", "GITHUB-ACTIONS", "snykauto"] {
            let verdict = classify_reviewer(&user(login));
            assert!(verdict.is_bot, "expected {login} to classify as bot");
            assert_eq!(verdict.confidence, Confidence::High);
        }
    }

    #[test]
    fn prefix_patterns_do_not_match_mid_login() {
        let verdict = classify_reviewer(&user("not-a-dependabot"));
        assert!(!verdict.is_bot);
        assert_eq!(verdict.confidence, Confidence::Low);
        assert_eq!(verdict.reason, None);
    }

    #[test]
    fn ordinary_users_classify_as_human() {
        for login in ["alice", "bob-smith", "stable-hand"] {
            let verdict = classify_reviewer(&user(login));
            assert!(!verdict.is_bot, "expected {login} to classify as human");
        }
    }

    #[test]
    fn stale_prefix_still_matches() {
        // "stalebot" is caught by the stale prefix; "stable-hand" stays human.
        assert!(classify_reviewer(&user("stalebot")).is_bot);
        assert!(!classify_reviewer(&user("stable-hand")).is_bot);
    }

    #[test]
    fn filter_drops_bot_reviews_when_enabled() {
        let reviews = vec![
            review("alice", ActorKind::User),
            review("dependabot[bot]", ActorKind::Bot),
            review("codecov-commenter", ActorKind::User),
            review("bob", ActorKind::User),
        ];

        let kept = filter_bot_reviews(reviews, true);
        let logins: Vec<&str> = kept.iter().map(|r| r.user.login.as_str()).collect();
        assert_eq!(logins, vec!["alice", "bob"]);
    }

    #[test]
    fn filter_is_identity_when_disabled() {
        let reviews = vec![
            review("alice", ActorKind::User),
            review("dependabot[bot]", ActorKind::Bot),
        ];

        let kept = filter_bot_reviews(reviews.clone(), false);
        assert_eq!(kept, reviews);
    }
}
