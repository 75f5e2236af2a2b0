use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use cortex::core::automation::Automation;
use cortex::core::blogger::{PostDraft, PublishedPost, Publisher};
use cortex::core::config::Config;
use cortex::core::error::{PipelineError, Result};
use cortex::core::history::temporary_db;
use cortex::core::images::{Attribution, ImageAsset, ImageSource};
use cortex::core::llm::TextGenerator;
use cortex::core::pipeline::{Pipeline, RuntimeSettings};
use cortex::core::sheets::{AffiliateProduct, ProductSource};
use cortex::core::trends::{Topic, TrendSource};
use nexus::{build_router, AppState};

struct Trends;

#[async_trait]
impl TrendSource for Trends {
    async fn trending_topics(&self, sources: &[String], _: &[String], count: usize) -> Result<Vec<Topic>> {
        Ok(sources
            .iter()
            .flat_map(|s| {
                (0..3).map(move |i| Topic::new(s, &format!("{} story number {}", s, i), &format!("https://{}.test/{}", s, i)))
            })
            .take(count)
            .collect())
    }
}

struct Generator {
    delay: Duration,
}

#[async_trait]
impl TextGenerator for Generator {
    async fn generate_blog_content(&self, prompt: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        let body: Vec<String> = (0..350).map(|i| format!("term{}", i)).collect();
        Ok(format!("<h1>{}</h1><p>{}</p>", prompt, body.join(" ")))
    }
}

struct Images;

#[async_trait]
impl ImageSource for Images {
    async fn image_for(&self, prompt: &str, _: &Path) -> ImageAsset {
        ImageAsset {
            path: None,
            url: Some("https://placehold.test/img".to_string()),
            attribution: Attribution {
                source: "Placeholder".to_string(),
                original_topic: prompt.to_string(),
                ..Default::default()
            },
            placeholder: true,
        }
    }
}

struct Products(Vec<AffiliateProduct>);

#[async_trait]
impl ProductSource for Products {
    async fn fetch_products(&self) -> Result<Vec<AffiliateProduct>> {
        Ok(self.0.clone())
    }
}

struct FailingPublisher;

#[async_trait]
impl Publisher for FailingPublisher {
    async fn publish(&self, _: &PostDraft) -> Result<PublishedPost> {
        Err(PipelineError::external("blogger", "401 Unauthorized"))
    }
}

fn product(name: &str, categories: &[&str]) -> AffiliateProduct {
    AffiliateProduct {
        name: name.to_string(),
        description: format!("{} description", name),
        link: format!("https://aff.test/{}", name),
        image_url: None,
        categories: categories.iter().map(|c| c.to_string()).collect(),
        commission: None,
        price: Some("$10".to_string()),
    }
}

fn setup(products: Vec<AffiliateProduct>, delay: Duration, admin_key: Option<&str>) -> (Router, Arc<Automation>) {
    let pipeline = Pipeline::new(
        Arc::new(Trends),
        Arc::new(Generator { delay }),
        Arc::new(Images),
        Arc::new(Products(products)),
        Arc::new(FailingPublisher),
        RuntimeSettings::from_config(&Config::default()),
    );
    let automation = Arc::new(Automation::new(Arc::new(pipeline), &temporary_db().unwrap()).unwrap());
    let app = build_router(AppState {
        automation: automation.clone(),
        admin_key: admin_key.map(str::to_string),
    });
    (app, automation)
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn analyze_seo_flags_overused_keyword() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(
        &app,
        post_json("/api/analyze-seo", json!({ "content": "word word word keyword keyword" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let report = &body["report"];
    assert!(report["score"].as_u64().unwrap() < 100);
    assert_eq!(report["word_count"], 5);
    let issues = report["issues"].as_array().unwrap();
    assert!(issues.iter().any(|i| i.as_str().unwrap().contains("'keyword'")));
}

#[tokio::test]
async fn malformed_body_is_bad_request() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(&app, post_json("/api/analyze-seo", json!({ "text": "x" }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, _) = send(&app, post_json("/api/generate-blog", json!({ "prompt": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_blog_returns_content() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(&app, post_json("/api/generate-blog", json!({ "prompt": "Tides" }))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["content"].as_str().unwrap().starts_with("<h1>Tides</h1>"));
}

#[tokio::test]
async fn empty_catalog_leaves_content_unchanged() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let content = "<p>First.</p><p>Second.</p>";
    let (status, body) = send(
        &app,
        post_json("/api/add-affiliate-ads", json!({ "content": content })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], content);
    assert_eq!(body["products_used"], 0);
    assert_eq!(body["total_products_available"], 0);
}

#[tokio::test]
async fn ad_count_respects_max_and_category() {
    let products = vec![
        product("kettle", &["kitchen"]),
        product("whisk", &["kitchen", "baking"]),
        product("tent", &["outdoor"]),
    ];
    let (app, _) = setup(products, Duration::ZERO, None);
    let content = "<p>Kitchen tips.</p><p>More kitchen tips.</p><p>Even more.</p>";

    let (_, body) = send(
        &app,
        post_json("/api/add-affiliate-ads", json!({ "content": content })),
    )
    .await;
    assert_eq!(body["products_used"], 2);
    assert_eq!(body["total_products_available"], 3);

    let (_, body) = send(
        &app,
        post_json(
            "/api/add-affiliate-ads",
            json!({ "content": content, "max_affiliate_ads": 5, "category": "Outdoor" }),
        ),
    )
    .await;
    assert_eq!(body["products_used"], 1);
    assert_eq!(body["total_products_available"], 1);
    assert!(body["content"].as_str().unwrap().contains("https://aff.test/tent"));
}

#[tokio::test]
async fn product_listing_filters_and_limits() {
    let products = vec![
        product("kettle", &["kitchen"]),
        product("whisk", &["kitchen", "baking"]),
        product("tent", &["outdoor"]),
    ];
    let (app, _) = setup(products, Duration::ZERO, None);

    let (status, body) = send(&app, get("/api/affiliate-products?category=kitchen&limit=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);
    assert_eq!(body["products"].as_array().unwrap().len(), 1);
    assert_eq!(body["products"][0]["name"], "kettle");
}

#[tokio::test]
async fn trending_topics_uses_requested_sources() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(&app, get("/api/trending-topics?sources=rss&count=2")).await;
    assert_eq!(status, StatusCode::OK);
    let trends = body["trends"].as_array().unwrap();
    assert_eq!(trends.len(), 2);
    assert!(trends.iter().all(|t| t["source"] == "rss"));

    let (status, _) = send(&app, get("/api/trending-topics?count=0")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn publisher_failure_maps_to_bad_gateway() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(
        &app,
        post_json(
            "/api/publish",
            json!({ "title": "Hello", "content": "<p>Body</p>", "labels": ["news"] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("blogger"));
}

#[tokio::test]
async fn run_now_conflicts_with_cycle_in_flight() {
    let (app, automation) = setup(vec![], Duration::from_millis(300), None);
    let background = {
        let automation = automation.clone();
        tokio::spawn(async move { automation.run_now().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(automation.cycle_in_flight());

    let req = Request::post("/api/automation/run-now").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].is_string());

    // the first cycle still completes; publishing fails against the fake
    let entry = background.await.unwrap().unwrap();
    assert_eq!(serde_json::to_value(entry.status).unwrap(), "error");
}

#[tokio::test]
async fn run_now_returns_logged_result_and_feeds_analytics() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let req = Request::post("/api/automation/run-now").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"]["status"], "error");
    assert_eq!(body["result"]["seo_score"], 100);

    let (_, status_body) = send(&app, get("/api/automation/status")).await;
    assert_eq!(status_body["running"], false);
    assert_eq!(status_body["state"], "idle");
    assert_eq!(status_body["recent_logs"].as_array().unwrap().len(), 1);

    let (_, analytics) = send(&app, get("/api/analytics")).await;
    assert_eq!(analytics["error_count"], 1);
    assert_eq!(analytics["posts_count"], 0);
    assert_eq!(analytics["average_seo_score"], 100.0);
}

#[tokio::test]
async fn start_with_patch_then_stop() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(
        &app,
        post_json("/api/automation/start", json!({ "posts_per_day": 2 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "started");
    assert_eq!(body["config"]["posts_per_day"], 2);

    let req = Request::post("/api/automation/start").body(Body::empty()).unwrap();
    let (_, body) = send(&app, req).await;
    assert_eq!(body["status"], "already_running");

    let req = Request::post("/api/automation/stop").body(Body::empty()).unwrap();
    let (_, body) = send(&app, req).await;
    assert_eq!(body["status"], "stopped");
}

#[tokio::test]
async fn config_roundtrip_and_validation() {
    let (app, _) = setup(vec![], Duration::ZERO, None);
    let (status, body) = send(
        &app,
        post_json(
            "/api/config",
            json!({
                "automation": { "min_seo_score": 55 },
                "affiliate": { "max_affiliate_ads": 1 }
            }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "updated");

    let (_, config) = send(&app, get("/api/config")).await;
    assert_eq!(config["automation"]["min_seo_score"], 55);
    assert_eq!(config["automation"]["posts_per_day"], 1);
    assert_eq!(config["affiliate"]["max_affiliate_ads"], 1);
    assert!(config["image"]["output_dir"].is_string());

    let (status, _) = send(
        &app,
        post_json("/api/config", json!({ "automation": { "posts_per_day": 100 } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_key_guards_mutating_routes() {
    let (app, _) = setup(vec![], Duration::ZERO, Some("s3cret"));

    let req = Request::post("/api/automation/stop").body(Body::empty()).unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());

    let req = Request::post("/api/automation/stop")
        .header("X-PRESSLOOP-KEY", "s3cret")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "not_running");

    // reads stay open
    let (status, _) = send(&app, get("/api/automation/status")).await;
    assert_eq!(status, StatusCode::OK);
}
