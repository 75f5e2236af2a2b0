use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use crate::core::config::LlmConfig;
use crate::core::error::{PipelineError, Result};

/// Anything that can turn a prompt into blog-ready HTML.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_blog_content(&self, prompt: &str) -> Result<String>;

    /// Visual search phrases for an image query. Never fails; falls back to the topic.
    async fn image_keywords(&self, topic: &str) -> Vec<String> {
        vec![topic.to_string()]
    }
}

pub struct LlmClient {
    client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }

    pub async fn chat(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Result<String> {
        let body = json!({
            "model": self.config.model,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
            "temperature": temperature,
            "max_tokens": max_tokens,
            "stream": false
        });

        // api_url is like "http://localhost:11434/v1"
        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));

        log::info!("Sending LLM request to {} ({} prompt chars)", url, prompt.len());

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let res = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("Failed to connect to LLM at {}: {}", url, e);
                return Err(PipelineError::external("llm", e));
            }
        };

        if !res.status().is_success() {
            let status = res.status();
            let error_text = res.text().await.unwrap_or_default();
            log::error!("LLM Error {}: {}", status, error_text);
            return Err(PipelineError::external(
                "llm",
                format!("{} {}", status, error_text),
            ));
        }

        let response_json: serde_json::Value = res
            .json()
            .await
            .map_err(|e| PipelineError::external("llm", e))?;

        // OpenAI format: choices[0].message.content
        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                log::warn!("Unexpected LLM response format: {:?}", response_json);
                PipelineError::external("llm", "response carried no message content")
            })?;

        Ok(strip_think(content))
    }
}

#[async_trait]
impl TextGenerator for LlmClient {
    async fn generate_blog_content(&self, prompt: &str) -> Result<String> {
        let text = self
            .chat(prompt, self.config.temperature, self.config.max_tokens)
            .await?;
        if text.trim().is_empty() {
            return Err(PipelineError::external("llm", "empty completion"));
        }
        Ok(format_content(&text))
    }

    async fn image_keywords(&self, topic: &str) -> Vec<String> {
        let prompt = format!(
            "Based on the blog topic: \"{}\"\n\n\
            Generate 3-5 SPECIFIC image search keywords or short phrases that would produce \
            highly relevant, visually appealing stock photos.\n\
            Focus on concrete, visual concepts rather than abstract terms.\n\
            Return only the keywords, one per line, with no numbering or additional text.",
            topic
        );

        match self.chat(&prompt, 0.2, 100).await {
            Ok(text) => parse_keyword_lines(&text, topic),
            Err(e) => {
                log::warn!("Image keyword generation failed: {}. Using topic.", e);
                vec![topic.to_string()]
            }
        }
    }
}

/// Drop a reasoning preamble some local models emit.
fn strip_think(text: &str) -> String {
    match text.find("</think>") {
        Some(idx) => text[idx + "</think>".len()..].trim().to_string(),
        None => text.trim().to_string(),
    }
}

fn parse_keyword_lines(text: &str, topic: &str) -> Vec<String> {
    let mut keywords: Vec<String> = text
        .lines()
        .map(|l| l.trim().trim_start_matches(['-', '*', '•']).trim())
        .filter(|l| !l.is_empty())
        .map(|l| l.to_string())
        .collect();
    if !keywords.iter().any(|k| k == topic) {
        keywords.push(topic.to_string());
    }
    keywords
}

/// Turn markdown-ish model output into simple HTML blocks.
pub fn format_content(text: &str) -> String {
    let trimmed = text.trim();
    if looks_like_html(trimmed) {
        return trimmed.to_string();
    }

    trimmed
        .split("\n\n")
        .map(str::trim)
        .filter(|block| !block.is_empty())
        .map(|block| {
            if let Some(rest) = block.strip_prefix("### ") {
                format!("<h3>{}</h3>", rest.trim())
            } else if let Some(rest) = block.strip_prefix("## ") {
                format!("<h2>{}</h2>", rest.trim())
            } else if let Some(rest) = block.strip_prefix("# ") {
                format!("<h1>{}</h1>", rest.trim())
            } else {
                format!("<p>{}</p>", block)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn looks_like_html(text: &str) -> bool {
    let lower = text.to_lowercase();
    ["<p>", "<p ", "<h1", "<h2", "<div"].iter().any(|t| lower.contains(t))
}

/// Title from the first heading, else a sentence of sensible length.
pub fn extract_title(content: &str) -> Option<String> {
    for tag in ["h1", "h2"] {
        let open = format!("<{}>", tag);
        let close = format!("</{}>", tag);
        if let Some(start) = content.find(&open) {
            let rest = &content[start + open.len()..];
            if let Some(end) = rest.find(&close) {
                let title = crate::core::seo::strip_tags(&rest[..end])
                    .split_whitespace()
                    .collect::<Vec<_>>()
                    .join(" ");
                if !title.is_empty() {
                    return Some(title);
                }
            }
        }
    }

    let text = crate::core::seo::strip_tags(content);
    let first = text.trim().split(". ").next()?.trim();
    let len = first.chars().count();
    if len > 3 && len < 100 {
        Some(first.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_markdown_blocks() {
        let html = format_content("# Title\n\n## Section\n\nBody text here.\n\n\n");
        assert_eq!(html, "<h1>Title</h1>\n<h2>Section</h2>\n<p>Body text here.</p>");
    }

    #[test]
    fn passes_through_existing_html() {
        let src = "<h1>Done</h1><p>Already formatted</p>";
        assert_eq!(format_content(src), src);
    }

    #[test]
    fn strips_think_preamble() {
        assert_eq!(strip_think("<think>hmm</think>\n  Answer"), "Answer");
        assert_eq!(strip_think("  plain "), "plain");
    }

    #[test]
    fn keyword_lines_include_topic() {
        let kws = parse_keyword_lines("- solar panels\n* rooftop\n\n", "Solar boom");
        assert_eq!(kws, vec!["solar panels", "rooftop", "Solar boom"]);
    }

    #[test]
    fn title_prefers_headings() {
        assert_eq!(
            extract_title("<h2>Second</h2><h1>First</h1>").as_deref(),
            Some("First")
        );
        assert_eq!(
            extract_title("<p>No heading</p><h2>Sub <em>title</em></h2>").as_deref(),
            Some("Sub title")
        );
    }

    #[test]
    fn title_falls_back_to_first_sentence() {
        assert_eq!(
            extract_title("<p>Markets rallied today. More later.</p>").as_deref(),
            Some("Markets rallied today")
        );
        assert_eq!(extract_title("<p>Hi. there</p>"), None);
    }
}
