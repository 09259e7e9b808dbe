use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::CoreError;

/// Longest accepted `title` override.
pub const MAX_TITLE_OVERRIDE: usize = 100;
/// Longest accepted `description` override.
pub const MAX_DESCRIPTION_OVERRIDE: usize = 500;
/// `limit` option bounds.
pub const LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=50;

/// One article, either extracted from HTML or decoded from a native feed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub title: String,
    pub link: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub published_at: DateTime<Utc>,
    pub guid: String,
}

impl Article {
    /// The guid defaults to the link when the source provides none.
    pub fn guid_or_link(link: &str, guid: Option<String>) -> String {
        match guid {
            Some(g) if !g.trim().is_empty() => g.trim().to_owned(),
            _ => link.to_owned(),
        }
    }
}

/// Channel-level data handed to the assembler for synthesis.
#[derive(Debug, Clone)]
pub struct FeedEnvelope {
    pub title: String,
    pub description: String,
    pub site_link: String,
    pub self_link: String,
    pub language: Option<String>,
    pub categories: Vec<String>,
    pub ttl_minutes: u64,
    pub generator: String,
    pub build_time: DateTime<Utc>,
    pub items: Vec<Article>,
}

/// Caller-supplied feed options. Fields outside this set never perturb the
/// cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeedOptions {
    pub title: Option<String>,
    pub description: Option<String>,
    pub limit: Option<usize>,
}

impl FeedOptions {
    /// Validates the option bounds; every violation is an `InvalidInput`.
    pub fn validate(&self) -> Result<(), CoreError> {
        if let Some(title) = &self.title {
            if title.chars().count() > MAX_TITLE_OVERRIDE {
                return Err(CoreError::InvalidInput(format!(
                    "title exceeds {MAX_TITLE_OVERRIDE} characters"
                )));
            }
        }
        if let Some(description) = &self.description {
            if description.chars().count() > MAX_DESCRIPTION_OVERRIDE {
                return Err(CoreError::InvalidInput(format!(
                    "description exceeds {MAX_DESCRIPTION_OVERRIDE} characters"
                )));
            }
        }
        if let Some(limit) = self.limit {
            if !LIMIT_RANGE.contains(&limit) {
                return Err(CoreError::InvalidInput(format!(
                    "limit must be {}..={}, got {limit}",
                    LIMIT_RANGE.start(),
                    LIMIT_RANGE.end()
                )));
            }
        }
        Ok(())
    }

    /// Canonical serialization with a fixed key order; the cache key and
    /// ETag are derived from this, so the order must never change.
    pub fn canonical(&self) -> String {
        format!(
            "title={};description={};limit={}",
            self.title.as_deref().unwrap_or(""),
            self.description.as_deref().unwrap_or(""),
            self.limit.map(|l| l.to_string()).unwrap_or_default()
        )
    }

    /// Soft upper bound on items: the request `limit` clamped by the
    /// configured hard ceiling.
    pub fn effective_limit(&self, max_articles: usize) -> usize {
        self.limit.map_or(max_articles, |l| l.min(max_articles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guid_defaults_to_link() {
        assert_eq!(
            Article::guid_or_link("https://example.com/a", None),
            "https://example.com/a"
        );
        assert_eq!(
            Article::guid_or_link("https://example.com/a", Some("  ".into())),
            "https://example.com/a"
        );
        assert_eq!(
            Article::guid_or_link("https://example.com/a", Some("tag:1".into())),
            "tag:1"
        );
    }

    #[test]
    fn test_options_validate_bounds() {
        assert!(FeedOptions::default().validate().is_ok());

        let opts = FeedOptions {
            title: Some("x".repeat(101)),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        let opts = FeedOptions {
            description: Some("x".repeat(501)),
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        for bad in [0usize, 51] {
            let opts = FeedOptions {
                limit: Some(bad),
                ..Default::default()
            };
            assert!(opts.validate().is_err(), "limit {bad} should fail");
        }

        let opts = FeedOptions {
            limit: Some(50),
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_canonical_is_order_stable() {
        let opts = FeedOptions {
            title: Some("My Feed".into()),
            description: None,
            limit: Some(5),
        };
        assert_eq!(opts.canonical(), "title=My Feed;description=;limit=5");
        assert_eq!(FeedOptions::default().canonical(), "title=;description=;limit=");
    }

    #[test]
    fn test_effective_limit_clamps_to_ceiling() {
        let opts = FeedOptions {
            limit: Some(40),
            ..Default::default()
        };
        assert_eq!(opts.effective_limit(20), 20);

        let opts = FeedOptions {
            limit: Some(3),
            ..Default::default()
        };
        assert_eq!(opts.effective_limit(20), 3);

        assert_eq!(FeedOptions::default().effective_limit(20), 20);
    }
}
