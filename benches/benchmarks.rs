// SPDX-FileCopyrightText: 2025 RAprogramm <andrey.rozanov.vl@gmail.com>
//
// SPDX-License-Identifier: MIT

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use emic::{
    business_time::elapsed_business_seconds,
    config::parse_run_config,
    github::{Actor, ActorKind, BaseRef, PullRequest, ReviewEvent, TimelineEvent},
    ready::resolve_ready_event,
    roster::{RosterEntry, parse_roster},
    sync::plan_roster_sync
};

fn instant(value: &str) -> DateTime<Utc> {
    value.parse().expect("valid RFC 3339 instant")
}

fn benchmark_parse_run_config(c: &mut Criterion) {
    let yaml = r"
repositories:
  - acme/widgets
  - acme/gadgets
target_branch: main
lookback_days: 30
exclude_bot_reviews: true
metrics:
  time_to_first_review:
    enabled: true
    table: time_to_first_review
  time_to_merge:
    enabled: true
warehouse:
  project: acme-insights
  dataset: engineering
";

    c.bench_function("parse_run_config_small", |b| {
        b.iter(|| parse_run_config(black_box(yaml)).expect("parse failed"))
    });
}

fn benchmark_parse_roster(c: &mut Criterion) {
    let mut yaml = String::from("groups:\n");
    for group in 0..10 {
        yaml.push_str(&format!("  - name: group-{group}\n    members:\n"));
        for member in 0..10 {
            yaml.push_str(&format!("      - user-{group}-{member}\n"));
        }
    }

    c.bench_function("parse_roster_100_members", |b| {
        b.iter(|| parse_roster(black_box(&yaml)).expect("parse failed"))
    });
}

fn benchmark_business_seconds(c: &mut Criterion) {
    let start = instant("2024-03-04T10:00:00Z");
    let end_same_week = instant("2024-03-08T16:00:00Z");
    let end_two_years_out = instant("2026-03-06T16:00:00Z");

    c.bench_function("business_seconds_one_week", |b| {
        b.iter(|| {
            elapsed_business_seconds(black_box(start), black_box(end_same_week))
                .expect("valid interval")
        })
    });

    c.bench_function("business_seconds_two_years", |b| {
        b.iter(|| {
            elapsed_business_seconds(black_box(start), black_box(end_two_years_out))
                .expect("valid interval")
        })
    });
}

fn benchmark_ready_resolution(c: &mut Criterion) {
    let pr = PullRequest {
        number:     42,
        html_url:   "https://github.com/acme/widgets/pull/42".to_owned(),
        user:       Actor {
            login: "author".to_owned(),
            kind:  ActorKind::User
        },
        base:       BaseRef {
            branch: "main".to_owned()
        },
        draft:      false,
        created_at: instant("2024-03-04T10:00:00Z"),
        updated_at: instant("2024-03-06T10:00:00Z"),
        merged_at:  Some(instant("2024-03-06T10:00:00Z"))
    };
    let timeline: Vec<TimelineEvent> = (0..50)
        .map(|offset| {
            let created_at = pr.created_at + Duration::minutes(offset);
            if offset % 2 == 0 {
                TimelineEvent::ReadyForReview {
                    created_at
                }
            } else {
                TimelineEvent::ConvertToDraft {
                    created_at
                }
            }
        })
        .collect();
    let reviews = vec![ReviewEvent {
        user:         Actor {
            login: "reviewer".to_owned(),
            kind:  ActorKind::User
        },
        submitted_at: instant("2024-03-05T10:00:00Z")
    }];

    c.bench_function("resolve_ready_event_50_events", |b| {
        b.iter(|| {
            resolve_ready_event(black_box(&pr), black_box(&timeline), black_box(&reviews))
                .expect("resolvable")
        })
    });
}

fn benchmark_roster_planning(c: &mut Criterion) {
    let entry = |index: i32| RosterEntry {
        group:    format!("group-{}", index % 10),
        username: format!("user-{index}")
    };
    let observed: BTreeSet<RosterEntry> = (0..1_000).map(entry).collect();
    let desired: BTreeSet<RosterEntry> = (500..1_500).map(entry).collect();

    c.bench_function("plan_roster_sync_1000_entries", |b| {
        b.iter(|| {
            let plan = plan_roster_sync(black_box(&desired), black_box(&observed));
            black_box(plan.to_insert.len() + plan.to_delete.len())
        })
    });
}

criterion_group!(
    benches,
    benchmark_parse_run_config,
    benchmark_parse_roster,
    benchmark_business_seconds,
    benchmark_ready_resolution,
    benchmark_roster_planning
);
criterion_main!(benches);
