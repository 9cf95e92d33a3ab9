//! Tier definitions and versioned namespace naming.
//!
//! A tier is a logical partition of cached responses that shares one
//! eviction bound and one staleness threshold. Every tier is stored in a
//! physical namespace named `<prefix>-<tier>-<version>`, so a new build
//! can populate its namespaces while the previous build keeps serving
//! from its own.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tier holding the eagerly cached application shell.
pub const STATIC_TIER: &str = "static";

/// Tier holding backend API responses.
pub const API_TIER: &str = "api";

/// Secondary tier mirroring recipe API responses.
pub const RECIPES_TIER: &str = "recipes";

/// Tier holding images and other media.
pub const IMAGES_TIER: &str = "images";

/// Tier holding HTML documents fetched at runtime.
pub const PAGES_TIER: &str = "pages";

/// Tier holding everything the classifier could not place elsewhere.
pub const DYNAMIC_TIER: &str = "dynamic";

/// Separator between prefix, tier name and version tag in a namespace name.
const NAMESPACE_SEPARATOR: char = '-';

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionTagError {
    #[error("Version tag must not be empty")]
    Empty,

    #[error("Version tag '{0}' must not contain '-' or whitespace")]
    InvalidCharacter(String),
}

/// Identifies the build that created a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionTag(String);

impl VersionTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, VersionTagError> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(VersionTagError::Empty);
        }
        if tag
            .chars()
            .any(|c| c == NAMESPACE_SEPARATOR || c.is_whitespace())
        {
            return Err(VersionTagError::InvalidCharacter(tag));
        }
        Ok(Self(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for VersionTag {
    fn default() -> Self {
        Self("v1".to_string())
    }
}

impl fmt::Display for VersionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionTag {
    type Err = VersionTagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for VersionTag {
    type Error = VersionTagError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VersionTag> for String {
    fn from(tag: VersionTag) -> Self {
        tag.0
    }
}

/// A logical cache partition with a fixed size bound and staleness threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,
    pub max_entries: usize,
    #[serde(rename = "max_age_secs", with = "duration_secs")]
    pub max_age: Duration,
}

impl Tier {
    pub fn new(name: impl Into<String>, max_entries: usize, max_age: Duration) -> Self {
        Self {
            name: name.into(),
            max_entries,
            max_age,
        }
    }

    /// Default tier table used when the configuration does not override it.
    pub fn defaults() -> Vec<Tier> {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        vec![
            Tier::new(STATIC_TIER, 100, Duration::from_secs(7 * DAY)),
            Tier::new(API_TIER, 50, Duration::from_secs(5 * 60)),
            Tier::new(RECIPES_TIER, 100, Duration::from_secs(DAY)),
            Tier::new(IMAGES_TIER, 60, Duration::from_secs(30 * DAY)),
            Tier::new(PAGES_TIER, 30, Duration::from_secs(DAY)),
            Tier::new(DYNAMIC_TIER, 50, Duration::from_secs(DAY)),
        ]
    }
}

/// The fixed set of tiers known to a running build.
///
/// Built once at startup and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    pub fn new(tiers: Vec<Tier>) -> Self {
        Self { tiers }
    }

    pub fn get(&self, name: &str) -> Option<&Tier> {
        self.tiers.iter().find(|t| t.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }
}

impl Default for TierSet {
    fn default() -> Self {
        Self::new(Tier::defaults())
    }
}

/// Physical namespace name for a tier at a given version.
pub fn namespace_name(prefix: &str, tier: &str, version: &VersionTag) -> String {
    format!(
        "{prefix}{sep}{tier}{sep}{version}",
        sep = NAMESPACE_SEPARATOR
    )
}

/// A namespace name split back into its tier name and version tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNamespace {
    pub tier: String,
    pub version: VersionTag,
}

/// Parse a namespace created under `prefix`.
///
/// Returns `None` for namespaces that belong to someone else or do not carry
/// a valid version tag. Tier names may themselves contain `-`; the version
/// tag never does, so the last separator splits them.
pub fn parse_namespace(prefix: &str, namespace: &str) -> Option<ParsedNamespace> {
    let rest = namespace
        .strip_prefix(prefix)?
        .strip_prefix(NAMESPACE_SEPARATOR)?;
    let (tier, version) = rest.rsplit_once(NAMESPACE_SEPARATOR)?;
    if tier.is_empty() {
        return None;
    }
    let version = VersionTag::new(version).ok()?;
    Some(ParsedNamespace {
        tier: tier.to_string(),
        version,
    })
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_tag_rejects_separator() {
        assert_eq!(VersionTag::new(""), Err(VersionTagError::Empty));
        assert!(matches!(
            VersionTag::new("v1-beta"),
            Err(VersionTagError::InvalidCharacter(_))
        ));
        assert!(VersionTag::new("v1.4.2").is_ok());
    }

    #[test]
    fn test_namespace_name_and_parse() {
        let version = VersionTag::new("v3").unwrap();
        let name = namespace_name("mealcache", STATIC_TIER, &version);
        assert_eq!(name, "mealcache-static-v3");

        let parsed = parse_namespace("mealcache", &name).unwrap();
        assert_eq!(parsed.tier, "static");
        assert_eq!(parsed.version, version);
    }

    #[test]
    fn test_parse_namespace_tier_with_dash() {
        let parsed = parse_namespace("mealcache", "mealcache-user-avatars-v9").unwrap();
        assert_eq!(parsed.tier, "user-avatars");
        assert_eq!(parsed.version.as_str(), "v9");
    }

    #[test]
    fn test_parse_namespace_foreign() {
        assert!(parse_namespace("mealcache", "workbox-precache-v2").is_none());
        assert!(parse_namespace("mealcache", "mealcache").is_none());
        assert!(parse_namespace("mealcache", "mealcache-static").is_none());
        assert!(parse_namespace("mealcache", "mealcachex-static-v1").is_none());
    }

    #[test]
    fn test_tier_serde_uses_seconds() {
        let tier = Tier::new("images", 2, Duration::from_secs(90));
        let json = serde_json::to_value(&tier).unwrap();
        assert_eq!(json["max_age_secs"], 90);
        let back: Tier = serde_json::from_value(json).unwrap();
        assert_eq!(back, tier);
    }

    #[test]
    fn test_tier_set_lookup() {
        let set = TierSet::default();
        assert_eq!(set.get(IMAGES_TIER).unwrap().max_entries, 60);
        assert!(set.get("nope").is_none());
        assert_eq!(set.len(), 6);
    }
}
