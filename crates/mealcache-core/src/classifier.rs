//! Request classification.
//!
//! Maps every request to a route: which tier it lives in and which strategy
//! serves it. Classification is a pure function of the request and the
//! configuration, so identical requests always land in the same tier.

use std::fmt;
use std::time::Duration;

use regex::RegexSet;
use reqwest::{Method, Url};
use thiserror::Error;

use crate::config::CacheConfig;
use crate::http::Request;
use crate::tier::{API_TIER, DYNAMIC_TIER, IMAGES_TIER, PAGES_TIER, RECIPES_TIER, STATIC_TIER};

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Invalid URL pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Invalid origin '{origin}': {reason}")]
    InvalidOrigin { origin: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestClass {
    Static,
    DynamicApi,
    Image,
    HtmlDynamic,
    DynamicDefault,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Static => "static",
            RequestClass::DynamicApi => "dynamic-api",
            RequestClass::Image => "image",
            RequestClass::HtmlDynamic => "html-dynamic",
            RequestClass::DynamicDefault => "dynamic-default",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    CacheFirstWithRevalidate,
    NetworkFirstWithCacheFallback,
    CacheFirstSimple,
    NetworkFirstDefault,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::CacheFirstWithRevalidate => "cache-first-revalidate",
            Strategy::NetworkFirstWithCacheFallback => "network-first-fallback",
            Strategy::CacheFirstSimple => "cache-first",
            Strategy::NetworkFirstDefault => "network-first",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where and how a cacheable request is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub class: RequestClass,
    pub tier: &'static str,
    pub strategy: Strategy,
    /// Upper bound on the network attempt; `None` defers to the transport.
    pub timeout: Option<Duration>,
    /// Secondary tier that successful responses are also written to.
    pub mirror_tier: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Not a GET: forwarded untouched and never cached.
    Passthrough,
    Cached(Route),
}

pub struct RequestClassifier {
    origin: Option<Url>,
    manifest: Vec<String>,
    api: RegexSet,
    recipe_mirror: RegexSet,
    image_hosts: RegexSet,
    image_extensions: Vec<String>,
    api_timeout: Duration,
}

impl RequestClassifier {
    pub fn new(config: &CacheConfig) -> Result<Self, ClassifierError> {
        let origin = config
            .origin
            .as_deref()
            .map(|o| {
                Url::parse(o).map_err(|e| ClassifierError::InvalidOrigin {
                    origin: o.to_string(),
                    reason: e.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            origin,
            manifest: config.static_manifest.clone(),
            api: RegexSet::new(&config.api_patterns)?,
            recipe_mirror: RegexSet::new(&config.recipe_mirror_patterns)?,
            image_hosts: RegexSet::new(&config.image_host_patterns)?,
            image_extensions: config
                .image_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            api_timeout: config.api_timeout(),
        })
    }

    pub fn classify(&self, request: &Request) -> Classification {
        if request.method != Method::GET {
            return Classification::Passthrough;
        }

        let url = &request.url;
        let route = if self.is_static(url) {
            Route {
                class: RequestClass::Static,
                tier: STATIC_TIER,
                strategy: Strategy::CacheFirstWithRevalidate,
                timeout: None,
                mirror_tier: None,
            }
        } else if self.api.is_match(url.as_str()) {
            let mirror_tier = self
                .recipe_mirror
                .is_match(url.as_str())
                .then_some(RECIPES_TIER);
            Route {
                class: RequestClass::DynamicApi,
                tier: API_TIER,
                strategy: Strategy::NetworkFirstWithCacheFallback,
                timeout: Some(self.api_timeout),
                mirror_tier,
            }
        } else if self.is_image(url) {
            Route {
                class: RequestClass::Image,
                tier: IMAGES_TIER,
                strategy: Strategy::CacheFirstSimple,
                timeout: None,
                mirror_tier: None,
            }
        } else if request.accepts_html() {
            Route {
                class: RequestClass::HtmlDynamic,
                tier: PAGES_TIER,
                strategy: Strategy::NetworkFirstWithCacheFallback,
                timeout: None,
                mirror_tier: None,
            }
        } else {
            Route {
                class: RequestClass::DynamicDefault,
                tier: DYNAMIC_TIER,
                strategy: Strategy::NetworkFirstDefault,
                timeout: None,
                mirror_tier: None,
            }
        };
        Classification::Cached(route)
    }

    /// Resolve a manifest path against the configured origin.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ClassifierError> {
        let origin = self.origin.as_ref().ok_or_else(|| ClassifierError::InvalidOrigin {
            origin: String::new(),
            reason: "no origin configured".to_string(),
        })?;
        self.manifest
            .iter()
            .map(|path| {
                origin.join(path).map_err(|e| ClassifierError::InvalidOrigin {
                    origin: origin.to_string(),
                    reason: format!("{}: {}", path, e),
                })
            })
            .collect()
    }

    /// Manifest paths are relative to the app origin; without one nothing is static.
    fn is_static(&self, url: &Url) -> bool {
        let Some(origin) = &self.origin else {
            return false;
        };
        if url.origin() != origin.origin() {
            return false;
        }
        let path = url.path();
        self.manifest.iter().any(|entry| {
            path == entry || (entry.len() > 1 && entry.ends_with('/') && path.starts_with(entry.as_str()))
        })
    }

    fn is_image(&self, url: &Url) -> bool {
        let file = url.path().rsplit('/').next().unwrap_or("").to_ascii_lowercase();
        let by_suffix = file
            .rsplit_once('.')
            .map(|(_, ext)| self.image_extensions.iter().any(|e| e == ext))
            .unwrap_or(false);
        by_suffix || url.host_str().map(|h| self.image_hosts.is_match(h)).unwrap_or(false)
    }
}
