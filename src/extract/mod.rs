//! Candidate extraction.
//!
//! Turns the raw pages fetched for one source into a bounded list of
//! classified [`Candidate`]s. Each strategy first produces [`RawFields`]
//! bundles (whatever text the markup exposes per field), and a single
//! builder then fills the gaps with the free-text heuristics in [`fields`],
//! applies the discard rules and classifies the result:
//!
//! 1. **Selector-based**: per-field selector lists, first non-empty match wins
//! 2. **Generic fallback**: vocabulary container selectors plus text heuristics
//! 3. **Feed**: RSS 2.0 items (see [`feed`])
//!
//! A candidate is dropped when its title is missing or too short, or when no
//! usable application link resolves. Nothing is defaulted from the wall clock
//! except relative posting dates, so re-extracting an unchanged page yields
//! the same candidates.

pub mod feed;
pub mod fields;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::classify::classify_candidate;
use crate::dedup::identity_key_bounded;
use crate::error::ExtractionError;
use crate::fetch::RawPage;
use crate::models::{Candidate, Location};
use crate::registry::{ExtractionStrategy, KeywordSet, SelectorSet, SourceDescriptor};
use crate::utils::{clean_text, resolve_link};
use fields::*;

/// Deadlines closer than this mark a listing as urgent.
const URGENT_WINDOW_DAYS: i64 = 7;

static GENERIC_TITLE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("h1, h2, h3, h4, .title, [class*=title]").expect("static title selector")
});
static GENERIC_ORG: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(".company, [class*=company], .organizer, [class*=organi], .host")
        .expect("static organization selector")
});
static ANY_LINK: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("static link selector"));

/// Whatever one listing element exposes, before heuristics and validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct RawFields {
    pub title: Option<String>,
    pub organization: Option<String>,
    pub location: Option<String>,
    pub compensation: Option<String>,
    pub deadline: Option<String>,
    pub posted: Option<String>,
    pub description: Option<String>,
    pub link: Option<String>,
    /// All text of the element, line structure preserved.
    pub full_text: String,
}

/// Text of an element with one text node per line.
fn element_text(el: &ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// First selector whose first match has non-empty cleaned text.
fn first_text(el: &ElementRef<'_>, selectors: &[Selector], max: usize) -> Option<String> {
    selectors.iter().find_map(|sel| {
        el.select(sel)
            .map(|m| clean_text(&element_text(&m), max))
            .find(|t| !t.is_empty())
    })
}

/// Like [`first_text`], but prefers a `datetime` attribute when present.
fn first_datetime(el: &ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors.iter().find_map(|sel| {
        el.select(sel).find_map(|m| {
            m.value()
                .attr("datetime")
                .map(str::to_string)
                .or_else(|| Some(clean_text(&element_text(&m), FIELD_MAX_CHARS)))
                .filter(|t| !t.is_empty())
        })
    })
}

/// First resolvable link among the selectors, then the element's own `href`.
fn first_link(el: &ElementRef<'_>, selectors: &[Selector], base: &Url) -> Option<String> {
    selectors
        .iter()
        .find_map(|sel| {
            el.select(sel)
                .filter_map(|m| m.value().attr("href"))
                .find_map(|href| resolve_link(base, href))
        })
        .or_else(|| {
            el.value()
                .attr("href")
                .or_else(|| el.value().attr("data-href"))
                .and_then(|href| resolve_link(base, href))
        })
}

fn select_with_selectors(document: &Html, set: &SelectorSet, base: &Url) -> Vec<RawFields> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for container in &set.containers {
        for el in document.select(container) {
            if !seen.insert(el.id()) {
                continue;
            }
            out.push(RawFields {
                title: first_text(&el, &set.title, FIELD_MAX_CHARS),
                organization: first_text(&el, &set.organization, FIELD_MAX_CHARS),
                location: first_text(&el, &set.location, FIELD_MAX_CHARS),
                compensation: first_text(&el, &set.compensation, FIELD_MAX_CHARS),
                deadline: first_text(&el, &set.deadline, FIELD_MAX_CHARS),
                posted: first_datetime(&el, &set.posted),
                description: first_text(&el, &set.description, DESCRIPTION_MAX_CHARS),
                link: first_link(&el, &set.link, base),
                full_text: element_text(&el),
            });
        }
    }
    out
}

fn select_generic(document: &Html, keyword_set: KeywordSet, base: &Url) -> Vec<RawFields> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for container in keyword_set.containers() {
        for el in document.select(container) {
            if !seen.insert(el.id()) {
                continue;
            }
            let full_text = element_text(&el);
            if clean_text(&full_text, usize::MAX).chars().count() < keyword_set.min_text_len() {
                continue;
            }
            out.push(RawFields {
                title: first_text(&el, std::slice::from_ref(&*GENERIC_TITLE), FIELD_MAX_CHARS),
                organization: first_text(&el, std::slice::from_ref(&*GENERIC_ORG), FIELD_MAX_CHARS),
                link: first_link(&el, std::slice::from_ref(&*ANY_LINK), base),
                full_text,
                ..RawFields::default()
            });
        }
    }
    out
}

/// Fill gaps with heuristics, validate, and classify one raw bundle.
///
/// Returns `None` when the bundle has no usable title or link.
pub(crate) fn build_candidate(
    source: &SourceDescriptor,
    page_url: &Url,
    raw: RawFields,
    now: DateTime<Utc>,
) -> Option<Candidate> {
    let text = raw.full_text.as_str();

    let title = raw
        .title
        .map(|t| clean_text(&t, FIELD_MAX_CHARS))
        .filter(|t| !t.is_empty())
        .or_else(|| title_from_text(text))?;
    if title.chars().count() < source.min_title_len {
        debug!(source = %source.name, %title, "dropping candidate with short title");
        return None;
    }
    let Some(application_url) = raw.link else {
        debug!(source = %source.name, %title, "dropping candidate without a usable link");
        return None;
    };

    let organization = raw
        .organization
        .filter(|o| !o.is_empty())
        .or_else(|| source.default_organization.clone())
        .or_else(|| organization_from_text(text))
        .unwrap_or_else(|| source.name.clone());

    let location = raw
        .location
        .as_deref()
        .and_then(parse_location)
        .or_else(|| location_from_text(text))
        .unwrap_or_else(|| Location::FreeText(DEFAULT_LOCATION.to_string()));

    let description = raw
        .description
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| clean_text(text, DESCRIPTION_MAX_CHARS));

    let compensation = raw
        .compensation
        .filter(|c| !c.is_empty())
        .or_else(|| compensation_from_text(text));

    let deadline = raw
        .deadline
        .as_deref()
        .and_then(deadline_from_field)
        .or_else(|| deadline_from_text(text));

    let posted_at = raw
        .posted
        .as_deref()
        .and_then(|p| posted_at_from_field(p, now))
        .or_else(|| posted_at_from_text(text, now));

    let skills = skills_from_text(&format!("{title}\n{description}\n{text}"));
    let remote = location.is_remote() || is_remote_text(text);
    let closing_soon =
        deadline.is_some_and(|d| d >= now && d - now <= Duration::days(URGENT_WINDOW_DAYS));
    let urgent = is_urgent_text(text) || closing_soon;

    let mut candidate = Candidate {
        title,
        organization,
        location,
        kind: source.default_kind,
        category: String::new(),
        domain: String::new(),
        description,
        skills,
        compensation,
        experience: experience_from_text(text).unwrap_or_else(|| DEFAULT_EXPERIENCE.to_string()),
        posted_at,
        deadline,
        application_url,
        source_url: page_url.to_string(),
        source: source.name.clone(),
        priority: source.priority,
        remote,
        urgent,
    };
    classify_candidate(&mut candidate, source.default_kind);
    Some(candidate)
}

/// Extract the candidates of one source from its fetched pages.
///
/// Candidates sharing an identity key (cut to `key_len`, the same bound the
/// upsert pass uses) are collapsed, first wins. The source's result cap is
/// applied afterwards.
///
/// # Errors
///
/// Returns the first parse error only when every page failed to parse; a
/// page that parses but yields nothing is not an error.
#[instrument(level = "info", skip_all, fields(source = %source.name, pages = pages.len()))]
pub fn extract_candidates(
    source: &SourceDescriptor,
    pages: &[RawPage],
    key_len: usize,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, ExtractionError> {
    let mut errors = Vec::new();
    let mut keys = HashSet::new();
    let mut candidates = Vec::new();

    for page in pages {
        let raw = match &source.strategy {
            ExtractionStrategy::SelectorBased { selectors } => {
                let document = Html::parse_document(&page.body);
                select_with_selectors(&document, selectors, &source.base_url)
            }
            ExtractionStrategy::GenericFallback { keyword_set } => {
                let document = Html::parse_document(&page.body);
                select_generic(&document, *keyword_set, &source.base_url)
            }
            ExtractionStrategy::Feed => match feed::parse_feed(source, page) {
                Ok(items) => items,
                Err(e) => {
                    warn!(url = %page.url, error = %e, "page could not be parsed");
                    errors.push(e);
                    continue;
                }
            },
        };
        debug!(url = %page.url, elements = raw.len(), "matched listing elements");

        for fields in raw {
            if let Some(c) = build_candidate(source, &page.url, fields, now) {
                let key =
                    identity_key_bounded(&c.title, &c.organization, &c.application_url, key_len);
                if keys.insert(key) {
                    candidates.push(c);
                }
            }
        }
    }

    if !pages.is_empty() && errors.len() == pages.len() {
        return Err(errors.remove(0));
    }
    candidates.truncate(source.max_results);
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ListingKind, WorkMode};
    use crate::dedup::DEFAULT_KEY_LEN;
    use crate::registry::SourceRegistry;
    use chrono::TimeZone;

    const YAML: &str = r#"
sources:
  - name: board
    endpoints: ["https://board.example/internships/"]
    default_kind: internship
    max_results: 2
    strategy:
      type: selectors
      containers: [".card", ".featured"]
      title: [".missing", "h3"]
      organization: [".company"]
      location: [".loc"]
      compensation: [".stipend"]
      deadline: [".apply-by"]
      posted: ["time"]
      link: ["a.apply"]
  - name: careers
    endpoints: ["https://careers.example/jobs"]
    organization: "Careers Inc"
    strategy: { type: generic, keyword_set: jobs }
"#;

    const BOARD: &str = r#"
<html><body>
  <div class="card featured">
    <h3>Software Intern</h3>
    <span class="company">Acme Co</span>
    <span class="loc">Bengaluru (Hybrid)</span>
    <span class="stipend">₹ 15,000 /month</span>
    <span class="apply-by">Apply by 30 Oct 2026</span>
    <time datetime="2026-10-17">2 days ago</time>
    <p>Work with React and Node.js. Freshers welcome.</p>
    <a class="apply" href="/internship/detail/1">Apply</a>
  </div>
  <div class="card">
    <h3>Tiny</h3>
    <a class="apply" href="/internship/detail/2">Apply</a>
  </div>
  <div class="card">
    <h3>Data Science Intern</h3>
    <a class="apply" href="javascript:void(0)">Apply</a>
  </div>
  <div class="card">
    <h3>Marketing Intern</h3>
    <span class="company">Beta</span>
    <a class="apply" href="https://beta.example/apply">Apply</a>
  </div>
  <div class="card">
    <h3>Design Intern</h3>
    <span class="company">Gamma</span>
    <a class="apply" href="https://gamma.example/apply">Apply</a>
  </div>
</body></html>"#;

    fn registry() -> SourceRegistry {
        SourceRegistry::from_yaml_str(YAML, "test").unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    }

    fn page(url: &str, body: &str) -> RawPage {
        RawPage {
            url: Url::parse(url).unwrap(),
            body: body.to_string(),
        }
    }

    #[test]
    fn test_selector_strategy_extracts_fields() {
        let reg = registry();
        let source = reg.get("board").unwrap();
        let pages = [page("https://board.example/internships/", BOARD)];
        let out = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();

        // short title and unusable link dropped, cap of 2 applied
        assert_eq!(out.len(), 2);
        let c = &out[0];
        assert_eq!(c.title, "Software Intern");
        assert_eq!(c.organization, "Acme Co");
        assert_eq!(c.application_url, "https://board.example/internship/detail/1");
        assert_eq!(c.compensation.as_deref(), Some("₹ 15,000 /month"));
        assert_eq!(c.experience, "Fresher");
        assert_eq!(
            c.location,
            Location::Structured {
                city: Some("Bangalore".into()),
                venue: None,
                mode: WorkMode::Hybrid,
            }
        );
        assert_eq!(c.kind, ListingKind::Internship);
        assert!(c.skills.contains("React") && c.skills.contains("Node.js"));
        assert_eq!(c.posted_at.unwrap().to_rfc3339(), "2026-10-17T00:00:00+00:00");
        assert_eq!(c.deadline.unwrap().to_rfc3339(), "2026-10-30T23:59:59+00:00");
        assert!(!c.urgent);
        assert_eq!(c.source, "board");

        assert_eq!(out[1].title, "Marketing Intern");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let reg = registry();
        let source = reg.get("board").unwrap();
        let pages = [page("https://board.example/internships/", BOARD)];
        let a = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();
        let b = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_pages_collapse_by_identity() {
        let reg = registry();
        let source = reg.get("board").unwrap();
        let pages = [
            page("https://board.example/internships/", BOARD),
            page("https://board.example/internships/?page=2", BOARD),
        ];
        let out = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_collapse_honours_configured_key_length() {
        let reg = registry();
        let source = reg.get("board").unwrap();
        let html = r#"
<div class="card"><h3>Software Intern</h3><span class="company">Acme Co</span>
  <a class="apply" href="https://acme.co/1">Apply</a></div>
<div class="card"><h3>Software Intern</h3><span class="company">Acme Co</span>
  <a class="apply" href="https://acme.co/2">Apply</a></div>"#;
        let pages = [page("https://board.example/internships/", html)];

        let full = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();
        assert_eq!(full.len(), 2);
        // "softwareintern-acmec" is shared by both once keys are cut to 20.
        let short = extract_candidates(source, &pages, 20, now()).unwrap();
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].application_url, "https://acme.co/1");
    }

    #[test]
    fn test_generic_strategy_uses_text_heuristics() {
        let html = r#"
<html><body>
  <nav class="listing">Home</nav>
  <div class="job">
    <h2>Backend Engineer (Rust)</h2>
    <p>Remote. 2-4 years of experience. Deadline: 22/10/2026. Docker, AWS, Rust.</p>
    <a href="/jobs/backend-rust">Details</a>
  </div>
</body></html>"#;
        let reg = registry();
        let source = reg.get("careers").unwrap();
        let pages = [page("https://careers.example/jobs", html)];
        let out = extract_candidates(source, &pages, DEFAULT_KEY_LEN, now()).unwrap();
        assert_eq!(out.len(), 1);
        let c = &out[0];
        assert_eq!(c.title, "Backend Engineer (Rust)");
        assert_eq!(c.organization, "Careers Inc");
        assert_eq!(c.application_url, "https://careers.example/jobs/backend-rust");
        assert!(c.remote);
        assert!(c.urgent, "deadline three days out");
        assert_eq!(c.experience, "2-4 years of experience");
        assert_eq!(c.kind, ListingKind::Job);
        assert!(c.skills.contains("Rust") && c.skills.contains("AWS"));
    }

    #[test]
    fn test_empty_page_is_not_an_error() {
        let reg = registry();
        let source = reg.get("careers").unwrap();
        let out = extract_candidates(
            source,
            &[page("https://careers.example/jobs", "<html></html>")],
            DEFAULT_KEY_LEN,
            now(),
        )
        .unwrap();
        assert!(out.is_empty());
    }
}
