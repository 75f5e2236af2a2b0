use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::core::affiliate::{self, AdInsertion};
use crate::core::blogger::{BloggerClient, PostDraft, PublishedPost, Publisher};
use crate::core::config::{AffiliateSettings, AutomationConfig, Config, SeoSettings};
use crate::core::error::{PipelineError, Result};
use crate::core::images::{ImageAsset, ImageSource, UnsplashImageSource};
use crate::core::llm::{LlmClient, TextGenerator};
use crate::core::seo::{self, SeoReport};
use crate::core::sheets::{AffiliateProduct, ProductCatalog, ProductSource, SheetsClient};
use crate::core::trends::{NewsTrendSource, Topic, TrendSource};

/// Keywords handed to the affiliate scorer.
const AD_KEYWORDS: usize = 5;
const LABEL_KEYWORDS: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageSettings {
    pub output_dir: PathBuf,
}

/// The tunables the API may read and replace while the process runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuntimeSettings {
    pub automation: AutomationConfig,
    pub seo: SeoSettings,
    pub image: ImageSettings,
    pub affiliate: AffiliateSettings,
}

impl RuntimeSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            automation: config.automation.clone(),
            seo: config.seo,
            image: ImageSettings {
                output_dir: config.images.output_dir.clone(),
            },
            affiliate: config.affiliate,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct AutomationPatch {
    pub posts_per_day: Option<u32>,
    pub min_hours_between_posts: Option<u32>,
    pub trending_sources: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
    pub min_seo_score: Option<u8>,
    pub candidate_count: Option<usize>,
}

impl AutomationPatch {
    /// Checks the patched fields against the same bounds a loaded config must meet.
    pub fn validate(&self) -> Result<()> {
        let mut config = AutomationConfig::default();
        self.apply(&mut config);
        config.validate()
    }

    pub fn apply(&self, config: &mut AutomationConfig) {
        if let Some(v) = self.posts_per_day {
            config.posts_per_day = v;
        }
        if let Some(v) = self.min_hours_between_posts {
            config.min_hours_between_posts = v;
        }
        if let Some(v) = &self.trending_sources {
            config.trending_sources = v.clone();
        }
        if let Some(v) = &self.categories {
            config.categories = v.clone();
        }
        if let Some(v) = self.min_seo_score {
            config.min_seo_score = v;
        }
        if let Some(v) = self.candidate_count {
            config.candidate_count = v;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct SettingsPatch {
    pub automation: Option<AutomationPatch>,
    pub seo: Option<SeoSettings>,
    pub image: Option<ImageSettings>,
    pub affiliate: Option<AffiliateSettings>,
}

/// Every external collaborator plus the shared runtime settings.
pub struct Pipeline {
    trends: Arc<dyn TrendSource>,
    generator: Arc<dyn TextGenerator>,
    images: Arc<dyn ImageSource>,
    catalog: ProductCatalog,
    publisher: Arc<dyn Publisher>,
    settings: RwLock<RuntimeSettings>,
}

impl Pipeline {
    pub fn new(
        trends: Arc<dyn TrendSource>,
        generator: Arc<dyn TextGenerator>,
        images: Arc<dyn ImageSource>,
        products: Arc<dyn ProductSource>,
        publisher: Arc<dyn Publisher>,
        settings: RuntimeSettings,
    ) -> Self {
        let ttl = Duration::from_secs(settings.affiliate.cache_ttl_secs);
        Self {
            trends,
            generator,
            images,
            catalog: ProductCatalog::new(products, ttl),
            publisher,
            settings: RwLock::new(settings),
        }
    }

    /// Wire the real HTTP clients from a loaded config.
    pub fn from_config(config: &Config) -> Self {
        let llm = Arc::new(LlmClient::new(config.llm.clone()));
        let keywords: Arc<dyn TextGenerator> = llm.clone();
        Self::new(
            Arc::new(NewsTrendSource::new(config.news.clone())),
            llm,
            Arc::new(UnsplashImageSource::new(config.images.clone(), Some(keywords))),
            Arc::new(SheetsClient::new(config.sheets.clone())),
            Arc::new(BloggerClient::new(config.blogger.clone())),
            RuntimeSettings::from_config(config),
        )
    }

    pub async fn settings(&self) -> RuntimeSettings {
        self.settings.read().await.clone()
    }

    pub async fn automation_config(&self) -> AutomationConfig {
        self.settings.read().await.automation.clone()
    }

    /// Validate then apply the whole patch; nothing changes when validation fails.
    pub async fn apply_patch(&self, patch: &SettingsPatch) -> Result<RuntimeSettings> {
        if let Some(a) = &patch.automation {
            a.validate()?;
        }
        if patch.seo.is_some_and(|s| s.optimal_keyword_density <= 0.0) {
            return Err(PipelineError::validation("optimal_keyword_density must be positive"));
        }

        let mut settings = self.settings.write().await;
        if let Some(a) = &patch.automation {
            a.apply(&mut settings.automation);
        }
        if let Some(seo) = patch.seo {
            settings.seo = seo;
        }
        if let Some(image) = &patch.image {
            settings.image = image.clone();
        }
        if let Some(affiliate) = patch.affiliate {
            settings.affiliate = affiliate;
        }
        log::info!("Runtime settings updated: {:?}", settings.automation);
        let updated = settings.clone();
        drop(settings);

        if let Some(affiliate) = patch.affiliate {
            self.catalog
                .set_ttl(Duration::from_secs(affiliate.cache_ttl_secs))
                .await;
        }
        Ok(updated)
    }

    /// Candidates from the given sources, or the configured ones.
    pub async fn trending(&self, sources: Option<&[String]>, count: usize) -> Result<Vec<Topic>> {
        let automation = self.automation_config().await;
        let sources = sources.unwrap_or(automation.trending_sources.as_slice());
        self.trends
            .trending_topics(sources, &automation.categories, count)
            .await
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(PipelineError::validation("prompt is required"));
        }
        self.generator.generate_blog_content(prompt).await
    }

    pub async fn analyze(&self, content: &str) -> SeoReport {
        let settings = self.settings.read().await.seo;
        seo::analyze(content, &settings)
    }

    pub async fn image(&self, prompt: &str) -> ImageAsset {
        let output_dir = self.settings.read().await.image.output_dir.clone();
        self.images.image_for(prompt, &output_dir).await
    }

    /// Returns the updated content and the size of the pool it was chosen from.
    pub async fn add_affiliate_ads(
        &self,
        content: &str,
        max: usize,
        category: Option<&str>,
    ) -> Result<(AdInsertion, usize)> {
        let products = self.catalog.products_in(category).await?;
        let report = self.analyze(content).await;
        let keywords: Vec<String> = report.top_keywords(AD_KEYWORDS).map(str::to_string).collect();
        let result = affiliate::insert_affiliate_ads(content, &products, &keywords, max);
        Ok((result, products.len()))
    }

    /// Products for listing, plus the total before `limit` was applied.
    pub async fn products(
        &self,
        category: Option<&str>,
        limit: Option<usize>,
    ) -> Result<(Vec<AffiliateProduct>, usize)> {
        let mut products = self.catalog.products_in(category).await?;
        let total = products.len();
        if let Some(limit) = limit {
            products.truncate(limit);
        }
        Ok((products, total))
    }

    pub async fn publish(&self, draft: &PostDraft) -> Result<PublishedPost> {
        if draft.title.trim().is_empty() || draft.content.trim().is_empty() {
            return Err(PipelineError::validation("title and content are required"));
        }
        self.publisher.publish(draft).await
    }
}

/// Topic source, the top SEO keywords, then "Month YYYY".
pub fn labels(topic: &Topic, report: &SeoReport, now: DateTime<Local>) -> Vec<String> {
    let mut labels = Vec::new();
    if !topic.source.is_empty() {
        labels.push(topic.source.clone());
    }
    for kw in report.top_keywords(LABEL_KEYWORDS) {
        if !labels.iter().any(|l| l == kw) {
            labels.push(kw.to_string());
        }
    }
    labels.push(now.format("%B %Y").to_string());
    labels
}

pub fn image_prompt(topic: &Topic) -> String {
    format!("A professional blog image related to {}", topic.title)
}
