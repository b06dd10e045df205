// src/lib.rs
pub mod classifier;
pub mod config;
pub mod errors;
pub mod generator;
pub mod handlers;
pub mod inspector;
pub mod models;
pub mod namer;
pub mod pipeline;
pub mod resolver;
pub mod rewriter;
pub mod scanner;
pub mod services;
pub mod storage;

pub use config::FilterConfig;
pub use errors::FilterError;
pub use models::FilterOutcome;
pub use pipeline::FilterPipeline;
