//! Analytics rollups
//!
//! No mutable counters anywhere: every snapshot is recomputed from the
//! proposal rows and the immutable review-event log, so the numbers can
//! always be reproduced by replaying the log. A time-boxed moka cache
//! in front absorbs dashboard polling; TTL 0 disables it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Datelike, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use presail_common::config::AnalyticsConfig;
use presail_common::errors::Result;
use presail_common::metrics::ANALYTICS_RECOMPUTES;
use presail_common::models::{ProposalStatus, ReviewAction, ReviewEvent};

use crate::store::WorkflowStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub proposals: StatusCounts,
    pub activity: ActivitySummary,
    pub time_series: TimeSeries,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: u64,
    pub draft: u64,
    pub pending_approval: u64,
    pub approved: u64,
    pub rejected: u64,
    pub on_hold: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActivitySummary {
    /// Submit events inside the rolling window
    pub recent_submissions: u64,
    /// Approve events inside the rolling window
    pub recent_approvals: u64,
    /// approved / (approved + rejected), 0 when nothing was decided
    pub approval_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub daily: Vec<TimeBucket>,
    pub weekly: Vec<TimeBucket>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBucket {
    /// "2026-08-29" for daily buckets, "2026-W35" for weekly ones
    pub period: String,
    pub submissions: u64,
    pub approvals: u64,
}

/// Replay the event log into the final status of every proposal that
/// has at least one event. Proposals absent from the log are drafts.
pub fn fold_status(events: &[ReviewEvent]) -> HashMap<Uuid, ProposalStatus> {
    let mut statuses = HashMap::new();
    for event in events {
        statuses.insert(event.proposal_id, event.to_status);
    }
    statuses
}

pub struct AnalyticsAggregator {
    store: WorkflowStore,
    cfg: AnalyticsConfig,
    cache: Option<Cache<u8, AnalyticsSnapshot>>,
}

impl AnalyticsAggregator {
    pub fn new(store: WorkflowStore, cfg: AnalyticsConfig) -> Self {
        let cache = (cfg.cache_ttl_secs > 0).then(|| {
            Cache::builder()
                .max_capacity(1)
                .time_to_live(Duration::from_secs(cfg.cache_ttl_secs))
                .build()
        });
        Self { store, cfg, cache }
    }

    /// The snapshot, served from cache while it is fresh
    pub async fn summary(&self) -> Result<AnalyticsSnapshot> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&0).await {
                return Ok(hit);
            }
        }

        let snapshot = self.recompute(Utc::now()).await?;
        if let Some(cache) = &self.cache {
            cache.insert(0, snapshot.clone()).await;
        }
        Ok(snapshot)
    }

    /// Full recomputation from proposal rows and the event log
    pub async fn recompute(&self, now: DateTime<Utc>) -> Result<AnalyticsSnapshot> {
        metrics::counter!(ANALYTICS_RECOMPUTES).increment(1);

        let proposals = self.store.all().await?;
        let events = self.store.all_events().await?;

        let mut counts = StatusCounts {
            total: proposals.len() as u64,
            ..StatusCounts::default()
        };
        for proposal in &proposals {
            match proposal.status {
                ProposalStatus::Draft => counts.draft += 1,
                ProposalStatus::PendingApproval => counts.pending_approval += 1,
                ProposalStatus::Approved => counts.approved += 1,
                ProposalStatus::Rejected => counts.rejected += 1,
                ProposalStatus::OnHold => counts.on_hold += 1,
            }
        }

        let decided = counts.approved + counts.rejected;
        let approval_rate = if decided == 0 {
            0.0
        } else {
            counts.approved as f64 / decided as f64
        };

        let window_start = now - chrono::Duration::days(self.cfg.activity_window_days);
        let mut recent_submissions = 0;
        let mut recent_approvals = 0;
        for event in &events {
            if event.created_at < window_start {
                continue;
            }
            match event.action {
                ReviewAction::Submit => recent_submissions += 1,
                ReviewAction::Approve => recent_approvals += 1,
                _ => {}
            }
        }

        let time_series = TimeSeries {
            daily: bucketize(&events, now, self.cfg.daily_days, day_key),
            weekly: bucketize(&events, now, self.cfg.weekly_weeks * 7, week_key),
        };

        debug!(
            total = counts.total,
            events = events.len(),
            "Analytics snapshot recomputed"
        );

        Ok(AnalyticsSnapshot {
            proposals: counts,
            activity: ActivitySummary {
                recent_submissions,
                recent_approvals,
                approval_rate,
            },
            time_series,
            generated_at: now,
        })
    }
}

fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

fn week_key(at: DateTime<Utc>) -> String {
    let iso = at.iso_week();
    format!("{}-W{:02}", iso.year(), iso.week())
}

/// Bucket submit/approve events over the trailing `days` days, oldest
/// bucket first. Distinct keys collapse naturally for weekly keys.
fn bucketize(
    events: &[ReviewEvent],
    now: DateTime<Utc>,
    days: i64,
    key: fn(DateTime<Utc>) -> String,
) -> Vec<TimeBucket> {
    let mut order = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for offset in (0..days).rev() {
        let period = key(now - chrono::Duration::days(offset));
        if !index.contains_key(&period) {
            index.insert(period.clone(), order.len());
            order.push(TimeBucket {
                period,
                submissions: 0,
                approvals: 0,
            });
        }
    }

    for event in events {
        let Some(&i) = index.get(&key(event.created_at)) else {
            continue;
        };
        match event.action {
            ReviewAction::Submit => order[i].submissions += 1,
            ReviewAction::Approve => order[i].approvals += 1,
            _ => {}
        }
    }
    order
}
