use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::core::config::ImageConfig;
use crate::core::error::{PipelineError, Result};
use crate::core::llm::TextGenerator;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Attribution {
    pub source: String,
    pub photographer: Option<String>,
    pub photographer_url: Option<String>,
    pub source_url: Option<String>,
    pub keyword_used: Option<String>,
    pub original_topic: String,
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageAsset {
    /// Local copy, when one was written.
    pub path: Option<PathBuf>,
    /// Remote location the publisher can reference directly.
    pub url: Option<String>,
    pub attribution: Attribution,
    pub placeholder: bool,
}

#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Always yields something usable; a placeholder at worst.
    async fn image_for(&self, prompt: &str, output_dir: &Path) -> ImageAsset;
}

const FALLBACK_QUERIES: &[&str] = &["blogging", "writing", "content", "business"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize, Clone)]
struct Photo {
    urls: PhotoUrls,
    user: PhotoUser,
    links: PhotoLinks,
}

#[derive(Debug, Deserialize, Clone)]
struct PhotoUrls {
    regular: String,
}

#[derive(Debug, Deserialize, Clone)]
struct PhotoUser {
    name: String,
    links: PhotoLinks,
}

#[derive(Debug, Deserialize, Clone)]
struct PhotoLinks {
    html: String,
}

pub struct UnsplashImageSource {
    client: Client,
    config: ImageConfig,
    keywords: Option<Arc<dyn TextGenerator>>,
}

impl UnsplashImageSource {
    pub fn new(config: ImageConfig, keywords: Option<Arc<dyn TextGenerator>>) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            keywords,
        }
    }

    async fn search(&self, query: &str, per_page: u32) -> Result<Vec<Photo>> {
        if self.config.api_key.is_empty() {
            return Err(PipelineError::external("unsplash", "UNSPLASH_API_KEY is not set"));
        }
        let url = format!("{}/search/photos", self.config.api_url.trim_end_matches('/'));
        let per_page = per_page.to_string();
        let res = self
            .client
            .get(&url)
            .header("Authorization", format!("Client-ID {}", self.config.api_key))
            .query(&[("query", query), ("per_page", per_page.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::external("unsplash", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::external("unsplash", format!("{} {}", status, text)));
        }
        let body: SearchResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::external("unsplash", e))?;
        Ok(body.results)
    }

    async fn download(
        &self,
        photo: &Photo,
        keyword: &str,
        prompt: &str,
        output_dir: &Path,
        note: Option<&str>,
    ) -> Result<ImageAsset> {
        let bytes = self
            .client
            .get(&photo.urls.regular)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::external("unsplash", e))?
            .bytes()
            .await
            .map_err(|e| PipelineError::external("unsplash", e))?;

        tokio::fs::create_dir_all(output_dir).await?;
        let path = output_dir.join(timestamped_name("blog_image", "jpg"));
        tokio::fs::write(&path, &bytes).await?;

        let attribution = Attribution {
            source: "Unsplash".to_string(),
            photographer: Some(photo.user.name.clone()),
            photographer_url: Some(photo.user.links.html.clone()),
            source_url: Some(photo.links.html.clone()),
            keyword_used: Some(keyword.to_string()),
            original_topic: prompt.to_string(),
            note: note.map(str::to_string),
        };
        write_sidecar(&path, &attribution).await?;

        Ok(ImageAsset {
            path: Some(path),
            url: Some(photo.urls.regular.clone()),
            attribution,
            placeholder: false,
        })
    }

    async fn try_query(
        &self,
        query: &str,
        per_page: u32,
        prompt: &str,
        output_dir: &Path,
        note: Option<&str>,
    ) -> Result<Option<ImageAsset>> {
        let results = self.search(query, per_page).await?;
        let photo = match results.choose(&mut rand::thread_rng()) {
            Some(p) => p.clone(),
            None => return Ok(None),
        };
        self.download(&photo, query, prompt, output_dir, note)
            .await
            .map(Some)
    }
}

#[async_trait]
impl ImageSource for UnsplashImageSource {
    async fn image_for(&self, prompt: &str, output_dir: &Path) -> ImageAsset {
        let keywords = match &self.keywords {
            Some(generator) => generator.image_keywords(prompt).await,
            None => vec![prompt.to_string()],
        };

        for keyword in &keywords {
            match self.try_query(keyword, 10, prompt, output_dir, None).await {
                Ok(Some(asset)) => return asset,
                Ok(None) => log::info!("No Unsplash results for '{}'", keyword),
                Err(e) => log::warn!("Unsplash lookup for '{}' failed: {}", keyword, e),
            }
        }

        let fallback = FALLBACK_QUERIES
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("blogging");
        match self
            .try_query(fallback, 5, prompt, output_dir, Some("Used fallback keyword"))
            .await
        {
            Ok(Some(asset)) => return asset,
            Ok(None) => {}
            Err(e) => log::warn!("Unsplash fallback query failed: {}", e),
        }

        local_fallback(&self.config, prompt, output_dir)
            .await
            .unwrap_or_else(|| placeholder(&self.config, prompt))
    }
}

fn timestamped_name(prefix: &str, ext: &str) -> String {
    format!(
        "{}_{}_{}.{}",
        prefix,
        chrono::Local::now().format("%Y%m%d-%H%M%S"),
        &uuid::Uuid::new_v4().simple().to_string()[..6],
        ext
    )
}

async fn write_sidecar(image: &Path, attribution: &Attribution) -> Result<()> {
    let mut sidecar = image.as_os_str().to_owned();
    sidecar.push(".json");
    tokio::fs::write(PathBuf::from(sidecar), serde_json::to_vec_pretty(attribution)?).await?;
    Ok(())
}

fn is_image_file(path: &Path) -> bool {
    matches!(
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref(),
        Some("jpg" | "jpeg" | "png")
    )
}

/// Copy a random bundled image into the output directory.
pub async fn local_fallback(config: &ImageConfig, prompt: &str, output_dir: &Path) -> Option<ImageAsset> {
    let mut entries = match tokio::fs::read_dir(&config.fallback_dir).await {
        Ok(e) => e,
        Err(_) => return None,
    };
    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        if path.is_file() && is_image_file(&path) {
            candidates.push(path);
        }
    }
    let chosen = candidates.choose(&mut rand::thread_rng())?.clone();

    let ext = chosen.extension().and_then(|e| e.to_str()).unwrap_or("jpg").to_string();
    let target = output_dir.join(timestamped_name("fallback_image", &ext));
    if let Err(e) = tokio::fs::create_dir_all(output_dir).await {
        log::warn!("Cannot create image dir {:?}: {}", output_dir, e);
        return None;
    }
    if let Err(e) = tokio::fs::copy(&chosen, &target).await {
        log::warn!("Cannot copy fallback image {:?}: {}", chosen, e);
        return None;
    }

    let attribution = Attribution {
        source: "Local Fallback".to_string(),
        original_topic: prompt.to_string(),
        note: Some("Fallback image used because the image search failed".to_string()),
        ..Default::default()
    };
    if let Err(e) = write_sidecar(&target, &attribution).await {
        log::warn!("Cannot write attribution for {:?}: {}", target, e);
    }

    Some(ImageAsset {
        path: Some(target),
        url: None,
        attribution,
        placeholder: false,
    })
}

pub fn placeholder(config: &ImageConfig, prompt: &str) -> ImageAsset {
    ImageAsset {
        path: None,
        url: Some(config.placeholder_url.clone()),
        attribution: Attribution {
            source: "Placeholder".to_string(),
            original_topic: prompt.to_string(),
            ..Default::default()
        },
        placeholder: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(fallback_dir: &Path) -> ImageConfig {
        ImageConfig {
            fallback_dir: fallback_dir.to_path_buf(),
            ..ImageConfig::default()
        }
    }

    #[tokio::test]
    async fn no_key_and_no_fallbacks_yields_placeholder() {
        let out = tempfile::tempdir().unwrap();
        let empty = tempfile::tempdir().unwrap();
        let source = UnsplashImageSource::new(config_with(empty.path()), None);

        let asset = source.image_for("solar power", out.path()).await;
        assert!(asset.placeholder);
        assert!(asset.path.is_none());
        assert_eq!(asset.url.as_deref(), Some(ImageConfig::default().placeholder_url.as_str()));
        assert_eq!(asset.attribution.original_topic, "solar power");
    }

    #[tokio::test]
    async fn local_fallback_copies_with_sidecar() {
        let out = tempfile::tempdir().unwrap();
        let fallbacks = tempfile::tempdir().unwrap();
        std::fs::write(fallbacks.path().join("stock.png"), b"\x89PNG").unwrap();
        std::fs::write(fallbacks.path().join("notes.txt"), b"ignore me").unwrap();

        let source = UnsplashImageSource::new(config_with(fallbacks.path()), None);
        let asset = source.image_for("gardening", out.path()).await;

        assert!(!asset.placeholder);
        let path = asset.path.expect("copied file");
        assert!(path.starts_with(out.path()));
        assert_eq!(path.extension().and_then(|e| e.to_str()), Some("png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNG");

        let mut sidecar = path.as_os_str().to_owned();
        sidecar.push(".json");
        let meta: Attribution =
            serde_json::from_slice(&std::fs::read(PathBuf::from(sidecar)).unwrap()).unwrap();
        assert_eq!(meta.source, "Local Fallback");
    }
}
