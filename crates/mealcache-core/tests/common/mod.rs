#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mealcache_core::{CacheConfig, FetchError, Fetcher, Request, Response, Tier};
use reqwest::Url;

pub const ORIGIN: &str = "https://meals.example";

/// In-process network: canned responses per URL, a connectivity switch and
/// an optional artificial latency. Unscripted URLs answer 200 with their path.
pub struct ScriptedFetcher {
    routes: Mutex<HashMap<String, (u16, String)>>,
    online: AtomicBool,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), (status, body.to_string()));
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Transport("connection refused".into()));
        }

        let scripted = self.routes.lock().unwrap().get(&request.cache_key()).cloned();
        Ok(match scripted {
            Some((status, body)) => Response::new(status, body),
            None => Response::new(200, request.url.path().to_string()),
        })
    }
}

pub fn config() -> CacheConfig {
    let mut config = CacheConfig::default();
    config.origin = Some(ORIGIN.to_string());
    config.static_manifest = vec!["/".into(), "/css/app.css".into(), "/js/app.js".into()];
    config
}

pub fn with_tier_limit(mut config: CacheConfig, tier: &str, max_entries: usize) -> CacheConfig {
    for t in config.tiers.iter_mut().filter(|t| t.name == tier) {
        *t = Tier::new(t.name.clone(), max_entries, t.max_age);
    }
    config
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn get(s: &str) -> Request {
    Request::get(url(s))
}
