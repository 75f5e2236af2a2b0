use chrono::{DateTime, Duration, Local, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sled::{Db, Tree};
use std::collections::BTreeSet;
use std::path::Path;

use crate::core::error::Result;
use crate::core::seo::is_stop_word;
use crate::core::trends::Topic;

/// Token overlap at or above this marks two titles as the same story.
pub const SIMILARITY_THRESHOLD: f64 = 0.6;
const RETENTION_DAYS: i64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishedRecord {
    pub title: String,
    pub tokens: Vec<String>,
    pub url: String,
    pub published_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Duplicate {
    SimilarTitle { previous: String, overlap: f64 },
    UsedUrl,
}

impl std::fmt::Display for Duplicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SimilarTitle { previous, overlap } => {
                write!(f, "similar to '{}' ({:.0}% overlap)", previous, overlap * 100.0)
            }
            Self::UsedUrl => write!(f, "source URL already used"),
        }
    }
}

/// Open (or create) the pipeline's sled database.
pub fn open_db(data_dir: &Path) -> Result<Db> {
    std::fs::create_dir_all(data_dir)?;
    Ok(sled::open(data_dir.join("pressloop_db"))?)
}

pub fn temporary_db() -> Result<Db> {
    Ok(sled::Config::new().temporary(true).open()?)
}

pub fn normalize_title(title: &str) -> BTreeSet<String> {
    title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !is_stop_word(t))
        .map(str::to_string)
        .collect()
}

fn plain_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

pub fn normalize_url(url: &str) -> String {
    let url = url.trim().to_lowercase();
    let url = url.split('#').next().unwrap_or_default();
    let url = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let url = url.strip_prefix("www.").unwrap_or(url);
    url.trim_end_matches('/').to_string()
}

fn url_key(url: &str) -> String {
    hex::encode(Sha256::digest(normalize_url(url).as_bytes()))
}

pub fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

pub struct PublishHistory {
    records: Tree,
    urls: Tree,
}

impl PublishHistory {
    pub fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            records: db.open_tree("published")?,
            urls: db.open_tree("used_urls")?,
        })
    }

    /// Duplicate against anything published today or yesterday (local time), or a reused URL.
    pub fn is_duplicate_at(&self, topic: &Topic, now: DateTime<Local>) -> Result<Option<Duplicate>> {
        if !topic.url.is_empty() && self.urls.contains_key(url_key(&topic.url))? {
            return Ok(Some(Duplicate::UsedUrl));
        }

        let tokens = normalize_title(&topic.title);
        // titles made only of stop words or single letters are compared verbatim
        let verbatim = tokens.is_empty().then(|| plain_title(&topic.title));
        let window_start = now.date_naive() - Duration::days(1);

        for item in self.records.iter().rev() {
            let (_, val) = item?;
            let record: PublishedRecord = match serde_json::from_slice(&val) {
                Ok(r) => r,
                Err(e) => {
                    log::warn!("Skipping unreadable history record: {}", e);
                    continue;
                }
            };
            if record.published_at.with_timezone(&Local).date_naive() < window_start {
                // keys are chronological; everything older is out of the window too
                break;
            }
            let overlap = match &verbatim {
                Some(title) if *title == plain_title(&record.title) => 1.0,
                Some(_) => 0.0,
                None => {
                    let previous: BTreeSet<String> = record.tokens.iter().cloned().collect();
                    jaccard(&tokens, &previous)
                }
            };
            if overlap >= SIMILARITY_THRESHOLD {
                return Ok(Some(Duplicate::SimilarTitle {
                    previous: record.title,
                    overlap,
                }));
            }
        }
        Ok(None)
    }

    pub fn is_duplicate(&self, topic: &Topic) -> Result<Option<Duplicate>> {
        self.is_duplicate_at(topic, Local::now())
    }

    pub fn record_at(&self, topic: &Topic, at: DateTime<Utc>) -> Result<()> {
        let record = PublishedRecord {
            title: topic.title.clone(),
            tokens: normalize_title(&topic.title).into_iter().collect(),
            url: topic.url.clone(),
            published_at: at,
        };
        let key = format!(
            "{}-{}",
            at.format("%Y%m%dT%H%M%S%.3f"),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        self.records.insert(key.as_bytes(), serde_json::to_vec(&record)?)?;
        if !topic.url.is_empty() {
            self.urls
                .insert(url_key(&topic.url), at.to_rfc3339().as_bytes())?;
        }
        self.records.flush()?;
        self.urls.flush()?;
        Ok(())
    }

    pub fn record(&self, topic: &Topic) -> Result<()> {
        self.record_at(topic, Utc::now())
    }

    /// Drop records and URL marks older than the retention period.
    pub fn prune(&self, now: DateTime<Utc>) -> Result<usize> {
        let cutoff = now - Duration::days(RETENTION_DAYS);
        let mut count = 0;
        for item in self.records.iter() {
            let (key, val) = item?;
            let stale = serde_json::from_slice::<PublishedRecord>(&val)
                .map(|r| r.published_at < cutoff)
                .unwrap_or(true);
            if stale {
                self.records.remove(key)?;
                count += 1;
            }
        }
        for item in self.urls.iter() {
            let (key, val) = item?;
            let stale = std::str::from_utf8(&val)
                .ok()
                .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                .map(|ts| ts < cutoff)
                .unwrap_or(true);
            if stale {
                self.urls.remove(key)?;
                count += 1;
            }
        }
        if count > 0 {
            log::info!("Pruned {} expired publish history entries", count);
        }
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn history() -> PublishHistory {
        PublishHistory::new(&temporary_db().unwrap()).unwrap()
    }

    fn topic(title: &str, url: &str) -> Topic {
        Topic::new("news", title, url)
    }

    #[test]
    fn titles_normalize_to_token_sets() {
        let tokens = normalize_title("The Rise of AI: What's Next in 2025?");
        let expected: BTreeSet<String> = ["rise", "ai", "what", "next", "2025"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn urls_normalize_scheme_and_trailing_slash() {
        assert_eq!(
            normalize_url("HTTPS://www.Example.com/story/#comments"),
            "example.com/story"
        );
        assert_eq!(normalize_url("http://example.com/story"), "example.com/story");
    }

    #[test]
    fn near_identical_title_is_duplicate_in_window() {
        let h = history();
        let now = Local::now();
        h.record_at(
            &topic("Apple unveils new iPhone with satellite messaging", "https://a.test/1"),
            now.with_timezone(&Utc),
        )
        .unwrap();

        let dup = h
            .is_duplicate_at(
                &topic("Apple unveils new iPhone with satellite messaging feature", "https://b.test/2"),
                now,
            )
            .unwrap();
        assert!(matches!(dup, Some(Duplicate::SimilarTitle { .. })));

        let fresh = h
            .is_duplicate_at(&topic("Central bank holds interest rates steady", "https://c.test/3"), now)
            .unwrap();
        assert_eq!(fresh, None);
    }

    #[test]
    fn stop_word_titles_match_verbatim() {
        let h = history();
        let now = Local::now();
        h.record_at(&topic("And To The X", ""), now.with_timezone(&Utc)).unwrap();
        assert!(normalize_title("And To The X").is_empty());

        let dup = h.is_duplicate_at(&topic("  and to  the x ", ""), now).unwrap();
        assert_eq!(
            dup,
            Some(Duplicate::SimilarTitle {
                previous: "And To The X".to_string(),
                overlap: 1.0,
            })
        );
        assert_eq!(h.is_duplicate_at(&topic("In The A", ""), now).unwrap(), None);
    }

    #[test]
    fn used_url_is_duplicate_regardless_of_title() {
        let h = history();
        h.record(&topic("Old headline", "https://www.news.test/story/")).unwrap();
        let dup = h
            .is_duplicate(&topic("Completely different words", "http://news.test/story"))
            .unwrap();
        assert_eq!(dup, Some(Duplicate::UsedUrl));
    }

    #[test]
    fn titles_outside_window_are_not_duplicates() {
        let h = history();
        let now = Local.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        h.record_at(
            &topic("Mars rover finds ancient riverbed", ""),
            (now - Duration::days(3)).with_timezone(&Utc),
        )
        .unwrap();
        assert_eq!(
            h.is_duplicate_at(&topic("Mars rover finds ancient riverbed", ""), now)
                .unwrap(),
            None
        );

        h.record_at(
            &topic("Mars rover finds ancient riverbed", ""),
            (now - Duration::days(1)).with_timezone(&Utc),
        )
        .unwrap();
        assert!(h
            .is_duplicate_at(&topic("Mars rover finds ancient riverbed", ""), now)
            .unwrap()
            .is_some());
    }

    #[test]
    fn prune_removes_expired_records() {
        let h = history();
        let now = Utc::now();
        h.record_at(&topic("Ancient story", "https://a.test/old"), now - Duration::days(45))
            .unwrap();
        h.record_at(&topic("Recent story", "https://a.test/new"), now).unwrap();
        assert_eq!(h.len(), 2);

        let removed = h.prune(now).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(h.len(), 1);
        assert_eq!(
            h.is_duplicate(&topic("x", "https://a.test/old")).unwrap(),
            None
        );
    }
}
