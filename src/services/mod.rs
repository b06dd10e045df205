// src/services/mod.rs
pub mod fetcher;
pub mod flood;
pub mod image_processor;
pub mod redis_service;

pub use fetcher::{FetchedSource, HttpClient, RemoteFetcher, ReqwestClient, TemporaryFile};
pub use flood::{FloodControl, FloodStore, MemoryFloodStore};
pub use image_processor::ImageProcessor;
pub use redis_service::RedisFloodStore;
