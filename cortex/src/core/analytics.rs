use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::run_log::{RunLogEntry, RunStatus};

const RECENT_POSTS: usize = 5;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RecentPost {
    pub title: String,
    pub url: String,
    pub published_at: DateTime<Utc>,
    pub seo_score: Option<u8>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnalyticsSummary {
    pub posts_count: usize,
    pub success_count: usize,
    pub skipped_count: usize,
    pub error_count: usize,
    pub average_seo_score: Option<f64>,
    pub last_post: Option<DateTime<Utc>>,
    pub recent_posts: Vec<RecentPost>,
}

/// Summarise cycle outcomes. Entries are expected oldest first.
pub fn summarize(entries: &[RunLogEntry]) -> AnalyticsSummary {
    let count = |status: RunStatus| entries.iter().filter(|e| e.status == status).count();
    let scores: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.seo_score.map(f64::from))
        .collect();
    let average_seo_score = if scores.is_empty() {
        None
    } else {
        Some(scores.iter().sum::<f64>() / scores.len() as f64)
    };

    let published: Vec<&RunLogEntry> = entries
        .iter()
        .filter(|e| e.status == RunStatus::Success)
        .collect();
    let recent_posts = published
        .iter()
        .rev()
        .take(RECENT_POSTS)
        .map(|e| RecentPost {
            title: e.topic.clone().unwrap_or_default(),
            url: e.post_url.clone().unwrap_or_default(),
            published_at: e.timestamp,
            seo_score: e.seo_score,
        })
        .collect();

    AnalyticsSummary {
        posts_count: published.len(),
        success_count: count(RunStatus::Success),
        skipped_count: count(RunStatus::Skipped),
        error_count: count(RunStatus::Error),
        average_seo_score,
        last_post: published.last().map(|e| e.timestamp),
        recent_posts,
    }
}
