//! Deterministic offline responses.
//!
//! Used when neither the network nor any tier can answer. The same request
//! always yields byte-identical output.

use serde::Serialize;

use crate::classifier::RequestClass;
use crate::http::{Request, Response, ResponseSource};

/// Default message placed in offline JSON envelopes.
const OFFLINE_MESSAGE: &str = "You are offline and this data has not been cached yet.";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>Offline</title>
</head>
<body>
<main>
<h1>You are offline</h1>
<p>This page is not available without a connection.</p>
<button type="button" id="retry" onclick="window.location.reload()">Try again</button>
</main>
</body>
</html>
"#;

const PLACEHOLDER_IMAGE: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300" viewBox="0 0 400 300"><rect width="400" height="300" fill="#e5e7eb"/><text x="200" y="150" text-anchor="middle" dominant-baseline="middle" font-family="sans-serif" font-size="18" fill="#6b7280">Image unavailable offline</text></svg>"##;

const UNAVAILABLE_TEXT: &str = "Service unavailable while offline";

/// Kind of substitute body to synthesize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    Html,
    Json,
    Image,
    Generic,
}

#[derive(Debug, Serialize)]
struct OfflineEnvelope<'a> {
    error: &'a str,
    message: &'a str,
    cached: bool,
}

#[derive(Debug, Clone)]
pub struct FallbackSynthesizer {
    message: String,
}

impl Default for FallbackSynthesizer {
    fn default() -> Self {
        Self::new(OFFLINE_MESSAGE)
    }
}

impl FallbackSynthesizer {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Choose a fallback kind from the request class and its `Accept` header.
    pub fn kind_for(request: &Request, class: Option<RequestClass>) -> FallbackKind {
        match class {
            Some(RequestClass::Image) => FallbackKind::Image,
            Some(RequestClass::DynamicApi) => FallbackKind::Json,
            _ if request.accepts_html() => FallbackKind::Html,
            _ if request.accepts_json() => FallbackKind::Json,
            _ => FallbackKind::Generic,
        }
    }

    pub fn synthesize(&self, request: &Request, class: Option<RequestClass>) -> Response {
        self.build(Self::kind_for(request, class))
    }

    pub fn build(&self, kind: FallbackKind) -> Response {
        let response = match kind {
            FallbackKind::Html => Response::new(200, OFFLINE_PAGE).with_content_type("text/html; charset=utf-8"),
            FallbackKind::Json => {
                let envelope = OfflineEnvelope {
                    error: "offline",
                    message: &self.message,
                    cached: false,
                };
                // Serializing a struct of strings and a bool cannot fail
                let body = serde_json::to_vec(&envelope).unwrap_or_default();
                Response::new(503, body).with_content_type("application/json")
            }
            FallbackKind::Image => Response::new(200, PLACEHOLDER_IMAGE).with_content_type("image/svg+xml"),
            FallbackKind::Generic => {
                Response::new(503, UNAVAILABLE_TEXT).with_content_type("text/plain; charset=utf-8")
            }
        };
        response
            .with_header("cache-control", "no-store")
            .tagged(ResponseSource::Fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Url;

    fn get(url: &str) -> Request {
        Request::get(Url::parse(url).unwrap())
    }

    #[test]
    fn test_html_fallback_has_retry_control() {
        let synth = FallbackSynthesizer::default();
        let req = get("https://meals.example/planner").with_accept("text/html");
        let resp = synth.synthesize(&req, Some(RequestClass::HtmlDynamic));

        assert_eq!(resp.source, ResponseSource::Fallback);
        assert!(resp.content_type().unwrap().starts_with("text/html"));
        assert!(resp.body_text().contains("id=\"retry\""));
    }

    #[test]
    fn test_api_fallback_envelope() {
        let synth = FallbackSynthesizer::default();
        let resp = synth.synthesize(&get("https://meals.example/api/plan"), Some(RequestClass::DynamicApi));

        assert_eq!(resp.status, 503);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], "offline");
        assert_eq!(body["cached"], false);
        assert!(body["message"].as_str().unwrap().contains("offline"));
    }

    #[test]
    fn test_image_placeholder() {
        let synth = FallbackSynthesizer::default();
        let resp = synth.synthesize(&get("https://meals.example/a.png"), Some(RequestClass::Image));
        assert_eq!(resp.content_type(), Some("image/svg+xml"));
        assert!(resp.body_text().contains("Image unavailable offline"));
    }

    #[test]
    fn test_kind_selection() {
        let json = get("https://meals.example/data").with_accept("application/json");
        assert_eq!(
            FallbackSynthesizer::kind_for(&json, Some(RequestClass::DynamicDefault)),
            FallbackKind::Json
        );
        assert_eq!(
            FallbackSynthesizer::kind_for(&get("https://meals.example/x.woff2"), None),
            FallbackKind::Generic
        );
        // Image class wins over an HTML accept header
        let img = get("https://meals.example/a.png").with_accept("text/html");
        assert_eq!(
            FallbackSynthesizer::kind_for(&img, Some(RequestClass::Image)),
            FallbackKind::Image
        );
    }

    #[test]
    fn test_fallbacks_are_deterministic() {
        let synth = FallbackSynthesizer::default();
        for kind in [FallbackKind::Html, FallbackKind::Json, FallbackKind::Image, FallbackKind::Generic] {
            assert_eq!(synth.build(kind), synth.build(kind));
        }
        assert_eq!(synth.build(FallbackKind::Generic).status, 503);
    }
}
