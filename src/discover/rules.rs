use url::Url;

use crate::util::{first_path_segment, origin_of, registrable_domain};

/// One way a domain maps page paths to feed paths.
#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    /// Append a literal path to the origin, ignoring the page path.
    Fixed(&'static str),
    /// Substitute the first non-empty path segment into a template
    /// (`{s}` placeholder). Root requests fall back to the domain's
    /// homepage feed instead.
    PathToRss(&'static str),
}

/// Per-domain feed-path knowledge, keyed by registrable domain.
#[derive(Debug, Clone, Copy)]
pub struct DomainRules {
    pub domain: &'static str,
    /// Tried in order; the first validating candidate wins.
    pub patterns: &'static [Pattern],
    /// Feed served for the domain's root page.
    pub homepage_feed: &'static str,
}

/// Sites whose feed layout is known and does not reward probing.
/// Section paths map onto per-section feeds for the Vietnamese news sites;
/// the others publish a single sitewide feed.
const RULES: &[DomainRules] = &[
    DomainRules {
        domain: "vnexpress.net",
        patterns: &[Pattern::PathToRss("/rss/{s}.rss")],
        homepage_feed: "/rss/trang-chu.rss",
    },
    DomainRules {
        domain: "thanhnien.vn",
        patterns: &[Pattern::PathToRss("/rss/{s}.rss")],
        homepage_feed: "/rss/home.rss",
    },
    DomainRules {
        domain: "tuoitre.vn",
        patterns: &[Pattern::PathToRss("/rss/{s}.rss")],
        homepage_feed: "/rss/tin-moi-nhat.rss",
    },
    DomainRules {
        domain: "dantri.com.vn",
        patterns: &[Pattern::PathToRss("/rss/{s}.rss")],
        homepage_feed: "/rss/home.rss",
    },
    DomainRules {
        domain: "techcrunch.com",
        patterns: &[Pattern::Fixed("/feed/")],
        homepage_feed: "/feed/",
    },
    DomainRules {
        domain: "theverge.com",
        patterns: &[Pattern::Fixed("/rss/index.xml")],
        homepage_feed: "/rss/index.xml",
    },
    DomainRules {
        domain: "theguardian.com",
        patterns: &[Pattern::PathToRss("/{s}/rss")],
        homepage_feed: "/rss",
    },
];

/// Looks up the rule entry for a page URL's registrable domain.
pub fn rules_for(page: &Url) -> Option<&'static DomainRules> {
    let domain = registrable_domain(page);
    RULES.iter().find(|r| r.domain == domain)
}

/// Expands a rule entry into ordered candidate URLs for a page.
pub fn candidates_for(rules: &DomainRules, page: &Url) -> Vec<String> {
    let origin = origin_of(page);
    let segment = first_path_segment(page);

    let mut out = Vec::with_capacity(rules.patterns.len());
    for pattern in rules.patterns {
        match pattern {
            Pattern::Fixed(path) => out.push(format!("{origin}{path}")),
            Pattern::PathToRss(template) => match segment {
                Some(s) => out.push(format!("{origin}{}", template.replace("{s}", s))),
                None => out.push(format!("{origin}{}", rules.homepage_feed)),
            },
        }
    }
    out.dedup();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::normalize_page_url;

    #[test]
    fn test_path_to_rss_substitutes_first_segment() {
        let page = normalize_page_url("https://vnexpress.net/the-gioi").unwrap();
        let rules = rules_for(&page).unwrap();
        assert_eq!(
            candidates_for(rules, &page),
            vec!["https://vnexpress.net/rss/the-gioi.rss"]
        );
    }

    #[test]
    fn test_root_request_uses_homepage_feed() {
        let page = normalize_page_url("https://vnexpress.net/").unwrap();
        let rules = rules_for(&page).unwrap();
        assert_eq!(
            candidates_for(rules, &page),
            vec!["https://vnexpress.net/rss/trang-chu.rss"]
        );
    }

    #[test]
    fn test_fixed_pattern_ignores_path() {
        let page = normalize_page_url("https://techcrunch.com/2025/07/01/some-story").unwrap();
        let rules = rules_for(&page).unwrap();
        assert_eq!(candidates_for(rules, &page), vec!["https://techcrunch.com/feed/"]);
    }

    #[test]
    fn test_www_prefix_matches_rule() {
        let page = normalize_page_url("https://www.theguardian.com/world").unwrap();
        let rules = rules_for(&page).unwrap();
        assert_eq!(
            candidates_for(rules, &page),
            vec!["https://www.theguardian.com/world/rss"]
        );
    }

    #[test]
    fn test_unknown_domain_has_no_rules() {
        let page = normalize_page_url("https://example.com/news").unwrap();
        assert!(rules_for(&page).is_none());
    }
}
