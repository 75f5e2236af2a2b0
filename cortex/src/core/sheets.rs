use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::core::config::SheetsConfig;
use crate::core::error::{PipelineError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AffiliateProduct {
    pub name: String,
    pub description: String,
    pub link: String,
    pub image_url: Option<String>,
    pub categories: BTreeSet<String>,
    pub commission: Option<String>,
    pub price: Option<String>,
}

impl AffiliateProduct {
    pub fn in_category(&self, filter: &str) -> bool {
        let needle = filter.trim().to_lowercase();
        self.categories.iter().any(|c| c.contains(&needle))
    }
}

#[async_trait]
pub trait ProductSource: Send + Sync {
    async fn fetch_products(&self) -> Result<Vec<AffiliateProduct>>;
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

pub struct SheetsClient {
    client: Client,
    config: SheetsConfig,
}

impl SheetsClient {
    pub fn new(config: SheetsConfig) -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            config,
        }
    }
}

#[async_trait]
impl ProductSource for SheetsClient {
    async fn fetch_products(&self) -> Result<Vec<AffiliateProduct>> {
        if self.config.spreadsheet_id.is_empty() {
            log::warn!("SPREADSHEET_ID is not set; no affiliate products available");
            return Ok(Vec::new());
        }
        let url = format!(
            "{}/spreadsheets/{}/values/{}",
            self.config.api_url.trim_end_matches('/'),
            self.config.spreadsheet_id,
            self.config.range
        );
        let res = self
            .client
            .get(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::external("sheets", e))?;
        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(PipelineError::external("sheets", format!("{} {}", status, text)));
        }
        let range: ValueRange = res
            .json()
            .await
            .map_err(|e| PipelineError::external("sheets", e))?;

        let products = parse_rows(&range.values);
        log::info!("Fetched {} affiliate products from spreadsheet", products.len());
        Ok(products)
    }
}

fn header_key(h: &str) -> String {
    h.chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_lowercase()
}

/// First row is the header; columns are matched by name, not position.
pub fn parse_rows(rows: &[Vec<String>]) -> Vec<AffiliateProduct> {
    let Some((header, body)) = rows.split_first() else {
        return Vec::new();
    };
    let col = |names: &[&str]| {
        header
            .iter()
            .position(|h| names.iter().any(|n| header_key(h) == *n))
    };
    let name_col = col(&["productname", "name"]);
    let desc_col = col(&["description"]);
    let link_col = col(&["affiliatelink", "affiliatelinks", "link", "url"]);
    let image_col = col(&["imageurl", "image"]);
    let cat_col = col(&["category", "categories"]);
    let commission_col = col(&["commission"]);
    let price_col = col(&["price"]);

    let Some(link_col) = link_col else {
        log::warn!("Spreadsheet has no affiliate link column; header was {:?}", header);
        return Vec::new();
    };

    let cell = |row: &Vec<String>, idx: Option<usize>| -> Option<String> {
        idx.and_then(|i| row.get(i))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    let mut products = Vec::new();
    for row in body {
        let Some(link) = cell(row, Some(link_col)) else {
            continue;
        };
        let categories = cell(row, cat_col)
            .map(|c| {
                c.split(',')
                    .map(|s| s.trim().to_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        products.push(AffiliateProduct {
            name: cell(row, name_col).unwrap_or_else(|| format!("Product {}", products.len() + 1)),
            description: cell(row, desc_col).unwrap_or_default(),
            link,
            image_url: cell(row, image_col),
            categories,
            commission: cell(row, commission_col),
            price: cell(row, price_col),
        });
    }
    products
}

struct CacheState {
    ttl: Duration,
    entry: Option<(Instant, Vec<AffiliateProduct>)>,
}

/// Process-lifetime product cache in front of the spreadsheet.
pub struct ProductCatalog {
    source: Arc<dyn ProductSource>,
    cache: Mutex<CacheState>,
}

impl ProductCatalog {
    pub fn new(source: Arc<dyn ProductSource>, ttl: Duration) -> Self {
        Self {
            source,
            cache: Mutex::new(CacheState { ttl, entry: None }),
        }
    }

    /// Applies to the cached entry too, so a shorter TTL can expire it immediately.
    pub async fn set_ttl(&self, ttl: Duration) {
        self.cache.lock().await.ttl = ttl;
    }

    pub async fn ttl(&self) -> Duration {
        self.cache.lock().await.ttl
    }

    pub async fn products(&self) -> Result<Vec<AffiliateProduct>> {
        let mut cache = self.cache.lock().await;
        if let Some((at, products)) = cache.entry.as_ref() {
            if at.elapsed() < cache.ttl {
                return Ok(products.clone());
            }
        }
        let products = self.source.fetch_products().await?;
        cache.entry = Some((Instant::now(), products.clone()));
        Ok(products)
    }

    /// Products narrowed by a case-insensitive category substring.
    pub async fn products_in(&self, category: Option<&str>) -> Result<Vec<AffiliateProduct>> {
        let products = self.products().await?;
        Ok(match category.filter(|c| !c.trim().is_empty()) {
            Some(cat) => products.into_iter().filter(|p| p.in_category(cat)).collect(),
            None => products,
        })
    }
}
