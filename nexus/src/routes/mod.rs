pub mod affiliate;
pub mod analytics;
pub mod automation;
pub mod content;
pub mod settings;
pub mod topics;
