// src/services/flood.rs
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::errors::FilterError;

pub const REMOTE_FETCH: &str = "remote-fetch";
pub const DERIVATIVE_GENERATE: &str = "derivative-generate";

/// Counter for one action key. Starts when the first event is registered and resets
/// once `window` has elapsed.
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub started: Instant,
    pub window: Duration,
    pub max_events: u32,
    pub count: u32,
}

impl RateWindow {
    fn new(now: Instant, window: Duration, max_events: u32) -> Self {
        Self {
            started: now,
            window,
            max_events,
            count: 0,
        }
    }

    fn try_register(&mut self, now: Instant) -> bool {
        if now.duration_since(self.started) >= self.window {
            self.started = now;
            self.count = 0;
        }
        if self.count >= self.max_events {
            return false;
        }
        self.count += 1;
        true
    }
}

#[async_trait]
pub trait FloodStore: Send + Sync {
    async fn try_register(
        &self,
        action: &str,
        threshold: u32,
        window: Duration,
    ) -> Result<bool, FilterError>;
}

#[derive(Default)]
pub struct MemoryFloodStore {
    windows: Mutex<HashMap<String, RateWindow>>,
}

impl MemoryFloodStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FloodStore for MemoryFloodStore {
    async fn try_register(
        &self,
        action: &str,
        threshold: u32,
        window: Duration,
    ) -> Result<bool, FilterError> {
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows
            .entry(action.to_string())
            .or_insert_with(|| RateWindow::new(now, window, threshold));
        entry.window = window;
        entry.max_events = threshold;
        Ok(entry.try_register(now))
    }
}

#[derive(Clone)]
pub struct FloodControl {
    store: Arc<dyn FloodStore>,
    threshold: u32,
    window: Duration,
}

impl FloodControl {
    pub fn new(store: Arc<dyn FloodStore>, threshold: u32, window: Duration) -> Self {
        Self {
            store,
            threshold,
            window,
        }
    }

    pub fn in_memory(threshold: u32, window: Duration) -> Self {
        Self::new(Arc::new(MemoryFloodStore::new()), threshold, window)
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Admits one `action` event or returns `FilterError::RateLimited`. A store failure
    /// is treated as a refusal.
    pub async fn admit(&self, action: &str) -> Result<(), FilterError> {
        let allowed = match self
            .store
            .try_register(action, self.threshold, self.window)
            .await
        {
            Ok(allowed) => allowed,
            Err(e) => {
                log::warn!("Flood store unavailable for {}: {}", action, e);
                false
            }
        };
        if allowed {
            Ok(())
        } else {
            log::warn!(
                "Rate limit of {} {} events per {}s reached",
                self.threshold,
                action,
                self.window.as_secs()
            );
            Err(FilterError::RateLimited {
                action: action.to_string(),
                threshold: self.threshold,
                window_secs: self.window.as_secs(),
            })
        }
    }
}
