pub mod affiliate;
pub mod analytics;
pub mod automation;
pub mod blogger;
pub mod config;
pub mod error;
pub mod history;
pub mod images;
pub mod llm;
pub mod pipeline;
pub mod run_log;
pub mod seo;
pub mod sheets;
pub mod trends;
