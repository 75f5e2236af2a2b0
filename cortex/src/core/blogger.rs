use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::core::affiliate::escape_html;
use crate::core::config::BloggerConfig;
use crate::core::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PostDraft {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_path: Option<PathBuf>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PublishedPost {
    pub id: String,
    pub url: String,
    pub title: String,
    pub labels: Vec<String>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, draft: &PostDraft) -> Result<PublishedPost>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    id: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    labels: Vec<String>,
}

const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

pub struct BloggerClient {
    client: Client,
    config: BloggerConfig,
    token: Mutex<Option<(String, Instant)>>,
}

impl BloggerClient {
    pub fn new(config: BloggerConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
            token: Mutex::new(None),
        }
    }

    fn check_credentials(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("BLOGGER_ID", &self.config.blog_id),
            ("BLOGGER_CLIENT_ID", &self.config.client_id),
            ("BLOGGER_CLIENT_SECRET", &self.config.client_secret),
            ("BLOGGER_REFRESH_TOKEN", &self.config.refresh_token),
        ]
        .iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| *k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(PipelineError::external(
                "blogger",
                format!("missing credentials: {}", missing.join(", ")),
            ))
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some((token, expires_at)) = cached.as_ref() {
            if Instant::now() + EXPIRY_MARGIN < *expires_at {
                return Ok(token.clone());
            }
        }

        log::info!("Refreshing Blogger access token");
        let res = self
            .client
            .post(&self.config.token_url)
            .form(&[
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("refresh_token", self.config.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| PipelineError::external("blogger", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::external(
                "blogger",
                format!("token refresh failed: {} {}", status, text),
            ));
        }
        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::external("blogger", e))?;
        let expires_at = Instant::now() + Duration::from_secs(token.expires_in);
        *cached = Some((token.access_token.clone(), expires_at));
        Ok(token.access_token)
    }
}

#[async_trait]
impl Publisher for BloggerClient {
    async fn publish(&self, draft: &PostDraft) -> Result<PublishedPost> {
        self.check_credentials()?;
        if draft.title.trim().is_empty() {
            return Err(PipelineError::validation("post title is empty"));
        }

        let image_src = image_source(draft.image_url.as_deref(), draft.image_path.as_deref()).await;
        let content = embed_image(&draft.content, &draft.title, image_src.as_deref());

        let token = self.access_token().await?;
        let url = format!(
            "{}/blogs/{}/posts/",
            self.config.api_url.trim_end_matches('/'),
            self.config.blog_id
        );
        let body = json!({
            "kind": "blogger#post",
            "title": draft.title,
            "content": content,
            "labels": draft.labels,
        });

        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .map_err(|e| PipelineError::external("blogger", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            log::error!("Blogger rejected post '{}': {} {}", draft.title, status, text);
            return Err(PipelineError::external("blogger", format!("{} {}", status, text)));
        }
        let post: PostResponse = res
            .json()
            .await
            .map_err(|e| PipelineError::external("blogger", e))?;

        log::info!("Published '{}' at {}", draft.title, post.url);
        Ok(PublishedPost {
            id: post.id,
            url: post.url,
            title: if post.title.is_empty() { draft.title.clone() } else { post.title },
            labels: if post.labels.is_empty() { draft.labels.clone() } else { post.labels },
        })
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "image/jpeg",
    }
}

/// Remote URLs are used as-is; local files become data URIs.
pub async fn image_source(url: Option<&str>, path: Option<&Path>) -> Option<String> {
    if let Some(url) = url.filter(|u| u.starts_with("http://") || u.starts_with("https://")) {
        return Some(url.to_string());
    }
    let path = path?;
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(format!(
            "data:{};base64,{}",
            mime_for(path),
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )),
        Err(e) => {
            log::warn!("Cannot read image {:?} for embedding: {}", path, e);
            None
        }
    }
}

pub fn embed_image(content: &str, title: &str, src: Option<&str>) -> String {
    match src {
        Some(src) => format!(
            "<div class=\"post-image\"><img src=\"{}\" alt=\"{}\" style=\"max-width:100%;height:auto;\"></div>\n{}",
            escape_html(src),
            escape_html(title),
            content
        ),
        None => content.to_string(),
    }
}
