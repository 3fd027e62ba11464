//! RSS 2.0 feed strategy.

use chrono::DateTime;
use quick_xml::de::from_str;
use scraper::Html;
use serde::Deserialize;

use super::RawFields;
use super::fields::{DESCRIPTION_MAX_CHARS, FIELD_MAX_CHARS};
use crate::error::ExtractionError;
use crate::fetch::RawPage;
use crate::registry::SourceDescriptor;
use crate::utils::{clean_text, resolve_link};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<String>,
    description: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    #[serde(rename = "region")]
    region: Option<String>,
}

/// Feeds embed HTML named entities that XML does not define.
fn scrub_html_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

fn strip_markup(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment.root_element().text().collect::<Vec<_>>().join(" ")
}

/// Job feeds commonly title items as `Company: Role`.
fn split_company_prefix(title: &str) -> (Option<String>, String) {
    match title.split_once(": ") {
        Some((org, role)) if !org.is_empty() && org.chars().count() <= 60 && !role.trim().is_empty() => {
            (Some(org.trim().to_string()), role.trim().to_string())
        }
        _ => (None, title.to_string()),
    }
}

/// Parse one feed document into raw field bundles.
pub(crate) fn parse_feed(
    source: &SourceDescriptor,
    page: &RawPage,
) -> Result<Vec<RawFields>, ExtractionError> {
    let rss: Rss = from_str(&scrub_html_entities(&page.body)).map_err(|e| {
        ExtractionError::MalformedFeed {
            source_name: source.name.clone(),
            message: e.to_string(),
        }
    })?;

    let mut out = Vec::with_capacity(rss.channel.items.len());
    for item in rss.channel.items {
        let raw_title = clean_text(item.title.as_deref().unwrap_or_default(), FIELD_MAX_CHARS);
        let (organization, title) = if source.default_organization.is_some() {
            (None, raw_title)
        } else {
            split_company_prefix(&raw_title)
        };
        let description = item
            .description
            .as_deref()
            .map(|d| clean_text(&strip_markup(d), DESCRIPTION_MAX_CHARS))
            .unwrap_or_default();
        let link = item
            .link
            .as_deref()
            .or(item.guid.as_deref())
            .and_then(|href| resolve_link(&source.base_url, href));
        let posted = item
            .pub_date
            .as_deref()
            .and_then(|d| DateTime::parse_from_rfc2822(d.trim()).ok())
            .map(|d| d.to_rfc3339());

        out.push(RawFields {
            full_text: format!("{title}\n{description}"),
            title: Some(title),
            organization,
            location: item.region,
            description: Some(description),
            posted,
            link,
            ..RawFields::default()
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceRegistry;
    use url::Url;

    const FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Remote Programming Jobs</title>
    <item>
      <title>Acme Co: Senior Rust Engineer</title>
      <region>Anywhere in the World</region>
      <link>https://jobs.example/acme-rust</link>
      <pubDate>Mon, 12 Oct 2026 09:00:00 +0000</pubDate>
      <description>&lt;p&gt;Build &lt;b&gt;fast&lt;/b&gt; services&amp;nbsp;with Rust&lt;/p&gt;</description>
    </item>
    <item>
      <title>Untitled role without company</title>
      <guid>https://jobs.example/2</guid>
    </item>
  </channel>
</rss>"#;

    fn feed_source() -> SourceDescriptor {
        let yaml = r#"
sources:
  - name: feedy
    endpoints: ["https://jobs.example/feed.rss"]
    strategy: { type: feed }
"#;
        SourceRegistry::from_yaml_str(yaml, "test")
            .unwrap()
            .get("feedy")
            .unwrap()
            .clone()
    }

    fn page(body: &str) -> RawPage {
        RawPage {
            url: Url::parse("https://jobs.example/feed.rss").unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_parse_feed_items() {
        let items = parse_feed(&feed_source(), &page(FEED)).unwrap();
        assert_eq!(items.len(), 2);

        let first = &items[0];
        assert_eq!(first.title.as_deref(), Some("Senior Rust Engineer"));
        assert_eq!(first.organization.as_deref(), Some("Acme Co"));
        assert_eq!(first.link.as_deref(), Some("https://jobs.example/acme-rust"));
        assert_eq!(first.description.as_deref(), Some("Build fast services with Rust"));
        assert!(first.posted.as_deref().unwrap().starts_with("2026-10-12"));

        assert_eq!(items[1].organization, None);
        assert_eq!(items[1].link.as_deref(), Some("https://jobs.example/2"));
    }

    #[test]
    fn test_malformed_feed_is_an_error() {
        let err = parse_feed(&feed_source(), &page("<html><body>nope")).unwrap_err();
        assert!(matches!(err, ExtractionError::MalformedFeed { .. }));
    }
}
