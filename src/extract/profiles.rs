/// Selectors removed before any extraction, on every site.
pub const BASE_REMOVE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "footer",
    "aside",
    ".ad",
    ".advertisement",
];

/// Generic author selectors, shared by all profiles.
pub const AUTHOR_SELECTORS: &[&str] = &[".author", ".byline", "[rel=\"author\"]"];

/// Generic category selectors, shared by all profiles.
pub const CATEGORY_SELECTORS: &[&str] = &[".category", ".tag", ".section"];

/// A fully-resolved set of selectors for one site. Selector order matters:
/// earlier entries are more specific and win.
#[derive(Debug, Clone, Copy)]
pub struct SiteProfile {
    pub article_selectors: &'static [&'static str],
    pub title_selectors: &'static [&'static str],
    pub link_selectors: &'static [&'static str],
    pub description_selectors: &'static [&'static str],
    pub image_selectors: &'static [&'static str],
    pub date_selectors: &'static [&'static str],
    pub remove_selectors: &'static [&'static str],
}

pub const DEFAULT_PROFILE: SiteProfile = SiteProfile {
    article_selectors: &[
        "article",
        ".post",
        ".entry",
        ".news-item",
        ".article-item",
        "[class*=\"post\"]",
        "[class*=\"article\"]",
    ],
    title_selectors: &[
        "h1",
        "h2",
        "h3",
        ".title",
        ".post-title",
        ".entry-title",
        "[class*=\"title\"]",
        "a",
    ],
    link_selectors: &["a[href]"],
    description_selectors: &[
        ".summary",
        ".excerpt",
        ".description",
        ".sapo",
        "[class*=\"desc\"]",
        "p",
    ],
    image_selectors: &["img"],
    date_selectors: &["time", ".date", ".time", "[class*=\"date\"]", "[datetime]"],
    remove_selectors: &[],
};

/// Per-domain overrides. A `None` field inherits the default profile.
struct ProfileOverride {
    domain: &'static str,
    article_selectors: Option<&'static [&'static str]>,
    title_selectors: Option<&'static [&'static str]>,
    link_selectors: Option<&'static [&'static str]>,
    description_selectors: Option<&'static [&'static str]>,
    image_selectors: Option<&'static [&'static str]>,
    date_selectors: Option<&'static [&'static str]>,
    remove_selectors: Option<&'static [&'static str]>,
}

const NO_OVERRIDE: ProfileOverride = ProfileOverride {
    domain: "",
    article_selectors: None,
    title_selectors: None,
    link_selectors: None,
    description_selectors: None,
    image_selectors: None,
    date_selectors: None,
    remove_selectors: None,
};

const OVERRIDES: &[ProfileOverride] = &[
    ProfileOverride {
        domain: "vnexpress.net",
        article_selectors: Some(&[".item-news", "article.item-news-common"]),
        title_selectors: Some(&[".title-news", "h3 a", "h2 a"]),
        description_selectors: Some(&[".description"]),
        date_selectors: Some(&[".time-count", "time"]),
        remove_selectors: Some(&[".banner-top", ".box-tinkhac"]),
        ..NO_OVERRIDE
    },
    ProfileOverride {
        domain: "tuoitre.vn",
        article_selectors: Some(&[".box-category-item", ".news-item"]),
        title_selectors: Some(&[".box-category-link-title", "h3 a"]),
        description_selectors: Some(&[".box-category-sapo", ".sapo"]),
        ..NO_OVERRIDE
    },
    ProfileOverride {
        domain: "techcrunch.com",
        article_selectors: Some(&["article", ".post-block", ".wp-block-post"]),
        title_selectors: Some(&["h2 a", ".post-block__title", "h2"]),
        description_selectors: Some(&[".post-block__content", ".wp-block-post-excerpt", "p"]),
        remove_selectors: Some(&[".newsletter-signup"]),
        ..NO_OVERRIDE
    },
];

/// Resolves the profile for a registrable domain, merging any override
/// onto the default profile field by field.
pub fn profile_for(domain: &str) -> SiteProfile {
    let Some(ov) = OVERRIDES.iter().find(|o| o.domain == domain) else {
        return DEFAULT_PROFILE;
    };
    SiteProfile {
        article_selectors: ov.article_selectors.unwrap_or(DEFAULT_PROFILE.article_selectors),
        title_selectors: ov.title_selectors.unwrap_or(DEFAULT_PROFILE.title_selectors),
        link_selectors: ov.link_selectors.unwrap_or(DEFAULT_PROFILE.link_selectors),
        description_selectors: ov
            .description_selectors
            .unwrap_or(DEFAULT_PROFILE.description_selectors),
        image_selectors: ov.image_selectors.unwrap_or(DEFAULT_PROFILE.image_selectors),
        date_selectors: ov.date_selectors.unwrap_or(DEFAULT_PROFILE.date_selectors),
        remove_selectors: ov.remove_selectors.unwrap_or(DEFAULT_PROFILE.remove_selectors),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_domain_gets_default() {
        let profile = profile_for("example.com");
        assert_eq!(profile.article_selectors, DEFAULT_PROFILE.article_selectors);
        assert_eq!(profile.link_selectors, DEFAULT_PROFILE.link_selectors);
    }

    #[test]
    fn test_override_merges_with_default() {
        let profile = profile_for("vnexpress.net");
        assert_eq!(profile.article_selectors[0], ".item-news");
        // Unspecified fields inherit
        assert_eq!(profile.link_selectors, DEFAULT_PROFILE.link_selectors);
        assert_eq!(profile.image_selectors, DEFAULT_PROFILE.image_selectors);
    }

    #[test]
    fn test_all_static_selectors_parse() {
        let mut profiles = vec![DEFAULT_PROFILE];
        profiles.extend(OVERRIDES.iter().map(|o| profile_for(o.domain)));

        let mut all: Vec<&str> = Vec::new();
        all.extend(BASE_REMOVE_SELECTORS);
        all.extend(AUTHOR_SELECTORS);
        all.extend(CATEGORY_SELECTORS);
        for profile in &profiles {
            all.extend(profile.article_selectors);
            all.extend(profile.title_selectors);
            all.extend(profile.link_selectors);
            all.extend(profile.description_selectors);
            all.extend(profile.image_selectors);
            all.extend(profile.date_selectors);
            all.extend(profile.remove_selectors);
        }
        for selector in all {
            assert!(
                scraper::Selector::parse(selector).is_ok(),
                "selector {selector:?} does not parse"
            );
        }
    }
}
