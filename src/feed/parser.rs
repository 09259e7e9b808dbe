use chrono::{DateTime, Utc};
use feed_rs::parser;
use thiserror::Error;

use crate::error::CoreError;
use crate::feed::model::Article;
use crate::util::{strip_tags, truncate_chars};

const MAX_DESCRIPTION_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("unparseable feed at {url}: {message}")]
    Malformed { url: String, message: String },
}

impl From<ParseError> for CoreError {
    fn from(e: ParseError) -> Self {
        CoreError::ParseFailure(e.to_string())
    }
}

#[derive(Debug)]
pub struct ParsedFeed {
    pub title: Option<String>,
    pub description: Option<String>,
    pub articles: Vec<Article>,
}

/// Decodes RSS 2.0 or Atom bytes into article records.
///
/// Entries without a usable link are skipped (their count is logged), since
/// every downstream consumer requires an absolute link. Unknown elements
/// are ignored by the underlying parser.
pub fn parse_feed(
    bytes: &[u8],
    feed_url: &str,
    now: DateTime<Utc>,
) -> Result<ParsedFeed, ParseError> {
    let feed = parser::parse(bytes).map_err(|e| ParseError::Malformed {
        url: feed_url.to_owned(),
        message: e.to_string(),
    })?;

    let mut skipped = 0usize;
    let articles: Vec<Article> = feed
        .entries
        .into_iter()
        .filter_map(|entry| {
            let link = entry
                .links
                .iter()
                .find(|l| l.rel.as_deref() == Some("alternate"))
                .or_else(|| entry.links.first())
                .map(|l| l.href.clone());
            let Some(link) = link else {
                skipped += 1;
                return None;
            };

            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_owned());

            let content = entry.content.and_then(|c| c.body);
            let raw_description = entry
                .summary
                .map(|s| s.content)
                .or_else(|| content.clone());
            let description = raw_description
                .map(|d| truncate_chars(&strip_tags(&d), MAX_DESCRIPTION_CHARS).into_owned())
                .unwrap_or_default();

            let published_at = entry.published.or(entry.updated).unwrap_or(now);

            let author = entry
                .authors
                .first()
                .map(|p| p.name.clone())
                .filter(|n| !n.is_empty());
            let category = entry
                .categories
                .first()
                .map(|c| c.term.clone())
                .filter(|t| !t.is_empty());

            // media:content / media:thumbnail / enclosure all surface
            // through feed-rs media objects
            let image = entry.media.iter().find_map(|m| {
                m.thumbnails
                    .first()
                    .map(|t| t.image.uri.clone())
                    .or_else(|| {
                        m.content
                            .iter()
                            .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
                    })
            });

            let guid = Article::guid_or_link(&link, Some(entry.id));

            Some(Article {
                title,
                link,
                description,
                content,
                author,
                category,
                image,
                published_at,
                guid,
            })
        })
        .collect();

    if skipped > 0 {
        tracing::warn!(feed = %feed_url, skipped = skipped, "Entries without links skipped");
    }

    Ok(ParsedFeed {
        title: feed.title.map(|t| t.content),
        description: feed.description.map(|d| d.content),
        articles,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 1, 0, 0, 0).unwrap()
    }

    const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0" xmlns:media="http://search.yahoo.com/mrss/">
  <channel>
    <title>Example Blog</title>
    <description>Posts about things</description>
    <item>
      <guid>post-1</guid>
      <title>First Post</title>
      <link>https://example.com/post/1</link>
      <description><![CDATA[<p>Rich <b>summary</b> text</p>]]></description>
      <pubDate>Sun, 01 Jun 2025 10:00:00 +0000</pubDate>
      <category>tech</category>
      <media:thumbnail url="https://example.com/thumb1.jpg"/>
    </item>
    <item>
      <title>No Link Post</title>
    </item>
  </channel>
</rss>"#;

    const ATOM: &str = r#"<?xml version="1.0"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title>Atom Blog</title>
  <link href="https://example.com/" rel="alternate"/>
  <entry>
    <id>tag:example.com,2025:1</id>
    <title>Entry One</title>
    <link href="https://example.com/entries/1" rel="alternate"/>
    <summary>Plain summary for the first entry</summary>
    <published>2025-06-02T08:00:00Z</published>
    <author><name>Alice</name></author>
  </entry>
</feed>"#;

    #[test]
    fn test_parse_rss_items() {
        let parsed = parse_feed(RSS.as_bytes(), "https://example.com/feed", now()).unwrap();
        assert_eq!(parsed.title.as_deref(), Some("Example Blog"));
        // The linkless item is skipped
        assert_eq!(parsed.articles.len(), 1);

        let a = &parsed.articles[0];
        assert_eq!(a.title, "First Post");
        assert_eq!(a.link, "https://example.com/post/1");
        assert_eq!(a.guid, "post-1");
        assert_eq!(a.description, "Rich summary text");
        assert_eq!(a.category.as_deref(), Some("tech"));
        assert_eq!(a.image.as_deref(), Some("https://example.com/thumb1.jpg"));
        assert_eq!(
            a.published_at,
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_parse_atom_entries() {
        let parsed = parse_feed(ATOM.as_bytes(), "https://example.com/atom", now()).unwrap();
        assert_eq!(parsed.articles.len(), 1);

        let a = &parsed.articles[0];
        assert_eq!(a.title, "Entry One");
        assert_eq!(a.link, "https://example.com/entries/1");
        assert_eq!(a.guid, "tag:example.com,2025:1");
        assert_eq!(a.author.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_malformed_feed_is_parse_error() {
        let result = parse_feed(b"<html>not a feed</html>", "https://example.com/x", now());
        assert!(matches!(result, Err(ParseError::Malformed { .. })));
    }

    #[test]
    fn test_missing_dates_fall_back_to_now() {
        let rss = r#"<?xml version="1.0"?>
<rss version="2.0"><channel><title>T</title>
<item><title>Undated</title><link>https://example.com/u</link></item>
</channel></rss>"#;
        let parsed = parse_feed(rss.as_bytes(), "https://example.com/feed", now()).unwrap();
        assert_eq!(parsed.articles[0].published_at, now());
    }
}
