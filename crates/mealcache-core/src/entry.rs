use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::http::{Response, ResponseSource};

/// A stored response snapshot, owned by exactly one tier namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub stored_at: DateTime<Utc>,
    pub payload: Response,
}

impl CacheEntry {
    /// Capture a response under `key`, stamped with the current time.
    ///
    /// The stored payload is always recorded as network-sourced; the source
    /// tag is reapplied when the entry is served.
    pub fn capture(key: impl Into<String>, response: &Response) -> Self {
        Self::captured_at(key, response, Utc::now())
    }

    pub fn captured_at(key: impl Into<String>, response: &Response, at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            stored_at: at,
            payload: response.clone().tagged(ResponseSource::Network),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        age_display(self.age_minutes())
    }

    /// The payload as a cache-sourced response.
    pub fn into_response(self) -> Response {
        self.payload.tagged(ResponseSource::Cache)
    }
}

/// Human-readable age: "just now", "5m ago", "2h ago", "3d ago".
pub fn age_display(minutes: i64) -> String {
    if minutes < 1 {
        // Also covers clock skew
        "just now".to_string()
    } else if minutes < 60 {
        format!("{}m ago", minutes)
    } else if minutes < 1440 {
        let hours = minutes / 60;
        if minutes % 60 >= 30 {
            format!("{}h ago", hours + 1)
        } else {
            format!("{}h ago", hours)
        }
    } else {
        let days = minutes / 1440;
        if (minutes % 1440) / 60 >= 12 {
            format!("{}d ago", days + 1)
        } else {
            format!("{}d ago", days)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_age_display() {
        assert_eq!(age_display(-3), "just now");
        assert_eq!(age_display(0), "just now");
        assert_eq!(age_display(5), "5m ago");
        assert_eq!(age_display(89), "1h ago");
        assert_eq!(age_display(90), "2h ago");
        assert_eq!(age_display(1440 + 11 * 60), "1d ago");
        assert_eq!(age_display(1440 + 12 * 60), "2d ago");
    }

    #[test]
    fn test_capture_strips_source_tag() {
        let resp = Response::new(200, "{}").tagged(ResponseSource::Cache);
        let entry = CacheEntry::capture("k", &resp);
        assert_eq!(entry.payload.source, ResponseSource::Network);
        assert_eq!(entry.into_response().source, ResponseSource::Cache);
    }

    #[test]
    fn test_age_minutes() {
        let at = Utc::now() - Duration::minutes(61);
        let entry = CacheEntry::captured_at("k", &Response::new(200, ""), at);
        assert!(entry.age_minutes() >= 61);
        assert_eq!(entry.age_display(), "1h ago");
    }
}
