use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::core::config::NewsConfig;
use crate::core::error::{PipelineError, Result};

/// A candidate blog subject. Lives for one selection pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub source: String,
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub news_source: Option<String>,
}

impl Topic {
    pub fn new(source: &str, title: &str, url: &str) -> Self {
        Self {
            source: source.to_string(),
            title: title.to_string(),
            url: url.to_string(),
            published_at: None,
            category: None,
            description: None,
            news_source: None,
        }
    }
}

#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn trending_topics(
        &self,
        sources: &[String],
        categories: &[String],
        count: usize,
    ) -> Result<Vec<Topic>>;
}

/// Generation prompt for a topic, carrying whatever context the feed gave us.
pub fn blog_prompt(topic: &Topic) -> String {
    match topic.source.as_str() {
        "news" | "rss" => {
            let mut prompt = format!(
                "Write a comprehensive blog post analyzing the recent news: {}",
                topic.title
            );
            if let Some(desc) = topic.description.as_deref().filter(|d| !d.is_empty()) {
                prompt.push_str(&format!(". Context: {}", desc));
            }
            if let Some(cat) = topic.category.as_deref().filter(|c| !c.is_empty()) {
                prompt.push_str(&format!(". This is trending in the {} category", cat));
            }
            if let Some(src) = topic.news_source.as_deref().filter(|s| !s.is_empty()) {
                prompt.push_str(&format!(" and was reported by {}", src));
            }
            prompt.push_str(
                ". Include facts, analysis, and your own insights while maintaining journalistic integrity. \
                Format the post with a '# ' title line, '## ' section headings and paragraphs separated by blank lines.",
            );
            prompt
        }
        _ => format!(
            "Write a blog post about the trending topic: {}. Make it informative, SEO-friendly, \
            and engaging for readers interested in this subject.",
            topic.title
        ),
    }
}

const PEOPLE_NAMES: &[&str] = &[
    "trump", "biden", "musk", "bezos", "gates", "zuckerberg", "harris", "dimon", "nadella",
    "pichai", "altman",
];

const PEOPLE_INDICATORS: &[&str] = &[
    "says", "said", "claimed", "announced", "revealed", "confirms", "denies", "weighs in",
    "responds", "criticizes", "praises", "speaks out", "interview", "statement", "warns",
    "accuses", "defends", "slams", "hits back", "tells", "argues",
];

/// Headlines about what someone said make poor evergreen posts.
pub fn is_about_person(title: &str, description: &str) -> bool {
    let text = format!("{} {}", title, description).to_lowercase();
    let words: Vec<&str> = text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    let joined = words.join(" ");
    let padded = format!(" {} ", joined);

    PEOPLE_NAMES.iter().any(|n| words.contains(n))
        || PEOPLE_INDICATORS
            .iter()
            .any(|i| padded.contains(&format!(" {} ", i)))
        || text.contains("'s ")
}

#[derive(Debug, Deserialize)]
struct NewsApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiArticle {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    published_at: Option<DateTime<Utc>>,
    source: Option<NewsApiSource>,
}

#[derive(Debug, Deserialize)]
struct NewsApiSource {
    name: Option<String>,
}

struct CachedTopics {
    fetched_at: DateTime<Utc>,
    topics: Vec<Topic>,
}

const FRESH_FOR_HOURS: i64 = 2;
const STALE_LIMIT_HOURS: i64 = 24;

/// NewsAPI headlines and RSS feeds with a small per-key cache.
pub struct NewsTrendSource {
    client: Client,
    config: NewsConfig,
    cache: Mutex<HashMap<String, CachedTopics>>,
}

impl NewsTrendSource {
    pub fn new(config: NewsConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .user_agent("PressLoop/0.1")
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn cached(&self, key: &str, max_age: Duration) -> Option<Vec<Topic>> {
        let cache = self.cache.lock().await;
        cache
            .get(key)
            .filter(|c| Utc::now() - c.fetched_at <= max_age)
            .map(|c| c.topics.clone())
    }

    async fn store(&self, key: &str, topics: &[Topic]) {
        let mut cache = self.cache.lock().await;
        cache.insert(
            key.to_string(),
            CachedTopics {
                fetched_at: Utc::now(),
                topics: topics.to_vec(),
            },
        );
    }

    /// Fresh cache, else network, else anything not older than a day.
    async fn with_cache<F, Fut>(&self, key: &str, fetch: F) -> Vec<Topic>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<Topic>>>,
    {
        if let Some(hit) = self.cached(key, Duration::hours(FRESH_FOR_HOURS)).await {
            return hit;
        }
        match fetch().await {
            Ok(topics) => {
                self.store(key, &topics).await;
                topics
            }
            Err(e) => {
                log::warn!("Fetching {} failed: {}", key, e);
                self.cached(key, Duration::hours(STALE_LIMIT_HOURS))
                    .await
                    .unwrap_or_default()
            }
        }
    }

    async fn fetch_headlines(&self, category: &str) -> Result<Vec<Topic>> {
        if self.config.api_key.is_empty() {
            return Err(PipelineError::external("newsapi", "NEWS_API_KEY is not set"));
        }
        let url = format!("{}/top-headlines", self.config.api_url.trim_end_matches('/'));
        let res = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.config.api_key)
            .query(&[
                ("country", self.config.country.as_str()),
                ("category", category),
                ("pageSize", "20"),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::external("newsapi", e))?;

        let status = res.status();
        let body: NewsApiResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::external("newsapi", e))?;
        if !status.is_success() || body.status == "error" {
            return Err(PipelineError::external(
                "newsapi",
                format!("{} {}", status, body.message.unwrap_or_default()),
            ));
        }

        Ok(body
            .articles
            .into_iter()
            .filter_map(|a| {
                let title = a.title.filter(|t| !t.is_empty())?;
                let url = a.url.filter(|u| !u.is_empty())?;
                Some(Topic {
                    source: "news".to_string(),
                    title,
                    url,
                    published_at: a.published_at,
                    category: Some(category.to_string()),
                    description: a.description,
                    news_source: a.source.and_then(|s| s.name),
                })
            })
            .collect())
    }

    async fn fetch_feed(&self, url: &str) -> Result<Vec<Topic>> {
        let content = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PipelineError::external("rss", e))?
            .bytes()
            .await
            .map_err(|e| PipelineError::external("rss", e))?;
        parse_feed(&content, url)
    }
}

pub fn parse_feed(content: &[u8], feed_url: &str) -> Result<Vec<Topic>> {
    let feed = feed_rs::parser::parse(std::io::Cursor::new(content))
        .map_err(|e| PipelineError::external("rss", e))?;
    let feed_title = feed.title.map(|t| t.content);

    Ok(feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let title = entry.title.map(|t| t.content).unwrap_or_default();
            let link = entry.links.first().map(|l| l.href.clone()).unwrap_or_default();
            if title.is_empty() || link.is_empty() {
                return None;
            }
            let description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| entry.content.and_then(|c| c.body));
            Some(Topic {
                source: "rss".to_string(),
                title,
                url: link,
                published_at: entry.published.or(entry.updated),
                category: None,
                description,
                news_source: feed_title.clone().or_else(|| Some(feed_url.to_string())),
            })
        })
        .collect())
}

#[async_trait]
impl TrendSource for NewsTrendSource {
    async fn trending_topics(
        &self,
        sources: &[String],
        categories: &[String],
        count: usize,
    ) -> Result<Vec<Topic>> {
        let mut all = Vec::new();

        for source in sources {
            match source.as_str() {
                "news" => {
                    let fetches = categories.iter().map(|cat| {
                        let key = format!("news:{}:{}", self.config.country, cat);
                        async move { self.with_cache(&key, || self.fetch_headlines(cat)).await }
                    });
                    for batch in futures::future::join_all(fetches).await {
                        all.extend(batch);
                    }
                }
                "rss" => {
                    let fetches = self.config.feeds.iter().map(|url| {
                        let key = format!("rss:{}", url);
                        async move { self.with_cache(&key, || self.fetch_feed(url)).await }
                    });
                    for batch in futures::future::join_all(fetches).await {
                        all.extend(batch);
                    }
                }
                other => log::warn!("Ignoring unknown trending source '{}'", other),
            }
        }

        if self.config.filter_people {
            all.retain(|t| !is_about_person(&t.title, t.description.as_deref().unwrap_or("")));
        }

        all.shuffle(&mut rand::thread_rng());
        all.truncate(count);
        log::info!("Collected {} trending topics from {:?}", all.len(), sources);
        Ok(all)
    }
}
