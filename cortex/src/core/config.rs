use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use anyhow::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub news: NewsConfig,
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default)]
    pub blogger: BloggerConfig,
    #[serde(default)]
    pub sheets: SheetsConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub seo: SeoSettings,
    #[serde(default)]
    pub affiliate: AffiliateSettings,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub model: String,
    pub api_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "llama3".to_string(),
            api_url: "http://localhost:11434/v1".to_string(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Deserialize, Clone)]
pub struct NewsConfig {
    #[serde(default = "default_news_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_country")]
    pub country: String,
    /// Feed URLs used by the `rss` trending source.
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default = "default_true")]
    pub filter_people: bool,
}

impl Default for NewsConfig {
    fn default() -> Self {
        Self {
            api_url: default_news_url(),
            api_key: String::new(),
            country: default_country(),
            feeds: Vec::new(),
            filter_people: true,
        }
    }
}

fn default_news_url() -> String {
    "https://newsapi.org/v2".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_unsplash_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_fallback_dir")]
    pub fallback_dir: PathBuf,
    #[serde(default = "default_placeholder_url")]
    pub placeholder_url: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            api_url: default_unsplash_url(),
            api_key: String::new(),
            output_dir: default_output_dir(),
            fallback_dir: default_fallback_dir(),
            placeholder_url: default_placeholder_url(),
        }
    }
}

fn default_unsplash_url() -> String {
    "https://api.unsplash.com".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_fallback_dir() -> PathBuf {
    PathBuf::from("./assets/fallback_images")
}

fn default_placeholder_url() -> String {
    "https://placehold.co/1200x630?text=PressLoop".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BloggerConfig {
    #[serde(default = "default_blogger_url")]
    pub api_url: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default)]
    pub blog_id: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl Default for BloggerConfig {
    fn default() -> Self {
        Self {
            api_url: default_blogger_url(),
            token_url: default_token_url(),
            blog_id: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
        }
    }
}

fn default_blogger_url() -> String {
    "https://www.googleapis.com/blogger/v3".to_string()
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SheetsConfig {
    #[serde(default = "default_sheets_url")]
    pub api_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub spreadsheet_id: String,
    #[serde(default = "default_range")]
    pub range: String,
}

impl Default for SheetsConfig {
    fn default() -> Self {
        Self {
            api_url: default_sheets_url(),
            api_key: String::new(),
            spreadsheet_id: String::new(),
            range: default_range(),
        }
    }
}

fn default_sheets_url() -> String {
    "https://sheets.googleapis.com/v4".to_string()
}

fn default_range() -> String {
    "Sheet1".to_string()
}

/// Scheduler tunables. Shared process-wide, last write wins.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AutomationConfig {
    pub posts_per_day: u32,
    pub min_hours_between_posts: u32,
    pub trending_sources: Vec<String>,
    pub categories: Vec<String>,
    pub min_seo_score: u8,
    #[serde(default = "default_candidate_count")]
    pub candidate_count: usize,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            posts_per_day: 1,
            min_hours_between_posts: 8,
            trending_sources: vec!["news".to_string()],
            categories: vec![
                "technology".to_string(),
                "business".to_string(),
                "science".to_string(),
            ],
            min_seo_score: 70,
            candidate_count: default_candidate_count(),
        }
    }
}

fn default_candidate_count() -> usize {
    5
}

pub const MAX_POSTS_PER_DAY: u32 = 24;

impl AutomationConfig {
    pub fn validate(&self) -> crate::core::error::Result<()> {
        use crate::core::error::PipelineError;

        if self.posts_per_day > MAX_POSTS_PER_DAY {
            return Err(PipelineError::validation(format!(
                "posts_per_day must be at most {}",
                MAX_POSTS_PER_DAY
            )));
        }
        if self.min_seo_score > 100 {
            return Err(PipelineError::validation("min_seo_score must be within 0..=100"));
        }
        if self.candidate_count == 0 {
            return Err(PipelineError::validation("candidate_count must be positive"));
        }
        if self.trending_sources.is_empty() {
            return Err(PipelineError::validation("trending_sources cannot be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct SeoSettings {
    pub min_word_count: usize,
    pub optimal_keyword_density: f64,
}

impl Default for SeoSettings {
    fn default() -> Self {
        Self {
            min_word_count: 300,
            optimal_keyword_density: 0.02,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct AffiliateSettings {
    pub max_affiliate_ads: usize,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

impl Default for AffiliateSettings {
    fn default() -> Self {
        Self {
            max_affiliate_ads: 3,
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
        Self {
            data_dir: PathBuf::from(home_dir).join(".pressloop"),
        }
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let content = fs::read_to_string(path)?;
    let mut config: Config = toml::from_str(&content)?;
    config.apply_env(|key| std::env::var(key).ok());
    config.automation.validate()?;
    Ok(config)
}

impl Config {
    /// Credentials and a few tunables may come from the environment instead of the file.
    pub fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = var(key).filter(|v| !v.is_empty()) {
                *target = v;
            }
        };
        set(&mut self.news.api_key, "NEWS_API_KEY");
        set(&mut self.images.api_key, "UNSPLASH_API_KEY");
        set(&mut self.blogger.blog_id, "BLOGGER_ID");
        set(&mut self.blogger.client_id, "BLOGGER_CLIENT_ID");
        set(&mut self.blogger.client_secret, "BLOGGER_CLIENT_SECRET");
        set(&mut self.blogger.refresh_token, "BLOGGER_REFRESH_TOKEN");
        set(&mut self.sheets.api_key, "SHEETS_API_KEY");
        set(&mut self.sheets.spreadsheet_id, "SPREADSHEET_ID");

        if let Some(key) = var("LLM_API_KEY").filter(|v| !v.is_empty()) {
            self.llm.api_key = Some(key);
        }
        if let Some(n) = var("POSTS_PER_DAY").and_then(|v| v.parse().ok()) {
            self.automation.posts_per_day = n;
        }
        if let Some(n) = var("MIN_SEO_SCORE").and_then(|v| v.parse().ok()) {
            self.automation.min_seo_score = n;
        }
        if let Some(dir) = var("IMAGE_OUTPUT_DIR") {
            self.images.output_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("PRESSLOOP_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
    }
}

pub const STARTER_CONFIG: &str = r#"
[llm]
model = "llama3"
api_url = "http://localhost:11434/v1"

[news]
country = "us"
feeds = ["https://news.ycombinator.com/rss"]

[images]
output_dir = "./images"

[automation]
posts_per_day = 1
min_hours_between_posts = 8
trending_sources = ["news"]
categories = ["technology", "business", "science"]
min_seo_score = 70

[seo]
min_word_count = 300
optimal_keyword_density = 0.02

[affiliate]
max_affiliate_ads = 3
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn starter_config_parses_with_defaults() {
        let config: Config = toml::from_str(STARTER_CONFIG).unwrap();
        assert_eq!(config.automation.posts_per_day, 1);
        assert_eq!(config.automation.candidate_count, 5);
        assert_eq!(config.seo.min_word_count, 300);
        assert_eq!(config.affiliate.cache_ttl_secs, 600);
        assert_eq!(config.news.feeds.len(), 1);
        assert_eq!(config.blogger.api_url, "https://www.googleapis.com/blogger/v3");
    }

    #[test]
    fn empty_file_is_a_valid_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.automation, AutomationConfig::default());
        assert!(config.news.filter_people);
    }

    #[test]
    fn out_of_range_posts_per_day_is_rejected_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[automation]\nposts_per_day = 5000\nmin_hours_between_posts = 1\n\
             trending_sources = [\"news\"]\ncategories = []\nmin_seo_score = 70\n",
        )
        .unwrap();
        let err = load_config(path.to_str().unwrap()).unwrap_err();
        assert!(err.to_string().contains("posts_per_day"));

        fs::write(&path, STARTER_CONFIG).unwrap();
        assert!(load_config(path.to_str().unwrap()).is_ok());
    }

    #[test]
    fn env_overrides_credentials_and_tunables() {
        let env: HashMap<&str, &str> = [
            ("NEWS_API_KEY", "news-key"),
            ("BLOGGER_ID", "42"),
            ("LLM_API_KEY", "sk-test"),
            ("POSTS_PER_DAY", "3"),
            ("MIN_SEO_SCORE", "55"),
            ("SPREADSHEET_ID", ""),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.sheets.spreadsheet_id = "from-file".to_string();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.news.api_key, "news-key");
        assert_eq!(config.blogger.blog_id, "42");
        assert_eq!(config.llm.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.automation.posts_per_day, 3);
        assert_eq!(config.automation.min_seo_score, 55);
        // empty values do not clobber the file
        assert_eq!(config.sheets.spreadsheet_id, "from-file");
    }
}
