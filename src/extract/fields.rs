//! Pure field extractors.
//!
//! Every function here maps a piece of scraped text to one typed attribute
//! and has no side effects. Matching against fixed vocabularies is done on
//! whole terms (a keyword must not be glued to a letter or digit on either
//! side), so `"ai"` does not fire inside `"maintain"` and `"java"` does not
//! fire inside `"javascript"`.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

use crate::models::{Location, WorkMode};
use crate::utils::clean_text;

/// Maximum characters kept for short fields (title, organization, location...).
pub const FIELD_MAX_CHARS: usize = 200;
/// Maximum characters kept for descriptions.
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
/// Maximum number of skills attached to one listing.
pub const MAX_SKILLS: usize = 8;
/// Location used when neither the markup nor the text names one.
pub const DEFAULT_LOCATION: &str = "India";
/// Experience level used when the text names none.
pub const DEFAULT_EXPERIENCE: &str = "Any Level";

const CITIES: &[(&str, &str)] = &[
    ("mumbai", "Mumbai"),
    ("delhi", "Delhi"),
    ("new delhi", "Delhi"),
    ("ncr", "Delhi NCR"),
    ("bangalore", "Bangalore"),
    ("bengaluru", "Bangalore"),
    ("hyderabad", "Hyderabad"),
    ("chennai", "Chennai"),
    ("pune", "Pune"),
    ("kolkata", "Kolkata"),
    ("gurugram", "Gurugram"),
    ("gurgaon", "Gurugram"),
    ("noida", "Noida"),
    ("ahmedabad", "Ahmedabad"),
    ("jaipur", "Jaipur"),
];

const REMOTE_TERMS: &[&str] = &[
    "remote",
    "work from home",
    "wfh",
    "online",
    "virtual",
    "anywhere",
];

const SKILLS: &[&str] = &[
    "JavaScript",
    "TypeScript",
    "Python",
    "Java",
    "C++",
    "Rust",
    "Kotlin",
    "Swift",
    "React",
    "Angular",
    "Vue.js",
    "Node.js",
    "Express",
    "Django",
    "Flask",
    "Spring",
    "Flutter",
    "HTML",
    "CSS",
    "SQL",
    "MongoDB",
    "PostgreSQL",
    "AWS",
    "Azure",
    "Docker",
    "Kubernetes",
    "Git",
    "Machine Learning",
    "Data Science",
    "TensorFlow",
    "PyTorch",
    "Tableau",
    "Power BI",
    "Excel",
    "Solidity",
    "UI/UX",
    "Figma",
];

const URGENT_TERMS: &[&str] = &["urgent", "immediate", "asap", "closing soon", "last date"];

static COMPENSATION_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(?:prize\s*pool|cash\s*prizes?|prizes?\s*worth|prizes?)\s*:?\s*(?:₹|\$|inr|usd|rs\.?)\s*[\d,]+(?:\s*(?:k|lakhs?))?",
        r"(?i)₹\s*[\d,]+(?:\s*[-–]\s*₹?\s*[\d,]+)?(?:\s*(?:/\s*month|per\s+month|/\s*mo|lpa|per\s+annum|lakhs?))?",
        r"(?i)\$\s*[\d,]+(?:\.\d+)?(?:\s*[-–]\s*\$?\s*[\d,]+(?:\.\d+)?)?(?:\s*(?:/\s*(?:hr|hour|month|year)|k))?",
        r"(?i)\b\d+(?:\.\d+)?\s*(?:[-–]\s*\d+(?:\.\d+)?\s*)?lpa\b",
        r"(?i)\b(?:unpaid|performance[\s-]based stipend|stipend)\b",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static compensation pattern"))
    .collect()
});

static EXPERIENCE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\d+\s*\+?\s*(?:(?:to|-|–)\s*\d+\s*)?(?:years?|yrs?)\s*(?:of\s*)?(?:experience|exp)\b",
        r"(?i)experience\s*:?\s*\d+\s*\+?\s*(?:(?:to|-|–)\s*\d+\s*)?(?:years?|yrs?)",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static experience pattern"))
    .collect()
});

static FRESHER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bfreshers?\b").expect("static fresher pattern"));
static ENTRY_LEVEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bentry[\s-]level\b").expect("static entry-level pattern"));

const DATE_ALTERNATIVES: &str = r"(\d{4}-\d{2}-\d{2}|\d{1,2}[/.-]\d{1,2}[/.-]\d{2,4}|\d{1,2}(?:st|nd|rd|th)?\s+[A-Za-z]{3,9},?\s+\d{4}|[A-Za-z]{3,9}\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4})";

static KEYED_DEADLINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)(?:deadline|last\s*date(?:\s*to\s*apply)?|apply\s*by|register\s*by|registrations?\s*close[sd]?(?:\s*on)?|submit\s*by|ends?\s*on|closes?\s*on)\s*:?\s*{DATE_ALTERNATIVES}"
    ))
    .expect("static deadline pattern")
});

static ANY_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(DATE_ALTERNATIVES).expect("static date pattern"));

static POSTED_RELATIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d+|an?|one)\s*\+?\s*(minute|hour|day|week|month)s?\s+ago\b")
        .expect("static relative date pattern")
});

static POSTED_KEYED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)posted\s*(?:on)?\s*:?\s*{DATE_ALTERNATIVES}"))
        .expect("static posted pattern")
});

static ORG_AT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)(?:^|\s)at\s+([A-Z][A-Za-z0-9&.' -]{1,60}?)(?:\s+(?:in|for|on|from)\b|[|,\n]|$)")
        .expect("static organization pattern")
});

static ORG_KEYED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:company|organi[sz]ation|organi[sz]er|hosted\s+by)\s*:\s*([^\n|,]{2,60})")
        .expect("static organization pattern")
});

/// Case-insensitive whole-term search.
///
/// `haystack_lower` must already be lowercased. A hit counts only if the
/// characters right before and after it are not alphanumeric.
pub fn contains_term(haystack_lower: &str, term: &str) -> bool {
    let term = term.to_lowercase();
    if term.is_empty() {
        return false;
    }
    haystack_lower.match_indices(&term).any(|(start, m)| {
        let before = haystack_lower[..start].chars().next_back();
        let after = haystack_lower[start + m.len()..].chars().next();
        !before.is_some_and(|c| c.is_alphanumeric()) && !after.is_some_and(|c| c.is_alphanumeric())
    })
}

/// Pick a title out of a block of free text: the first line of 6 to 99 characters.
pub fn title_from_text(text: &str) -> Option<String> {
    text.lines()
        .map(|l| clean_text(l, FIELD_MAX_CHARS))
        .find(|l| {
            let n = l.chars().count();
            n > 5 && n < 100
        })
}

/// Recognise a city and/or attendance mode in free text.
///
/// Returns `None` when neither a known city nor a remote/hybrid marker appears.
pub fn location_from_text(text: &str) -> Option<Location> {
    let lower = text.to_lowercase();
    let city = CITIES
        .iter()
        .find(|(needle, _)| contains_term(&lower, needle))
        .map(|(_, name)| name.to_string());
    let mode = if contains_term(&lower, "hybrid") {
        Some(WorkMode::Hybrid)
    } else if REMOTE_TERMS.iter().any(|t| contains_term(&lower, t)) {
        Some(WorkMode::Remote)
    } else if city.is_some() {
        Some(WorkMode::Onsite)
    } else {
        None
    };
    mode.map(|mode| Location::Structured {
        city,
        venue: None,
        mode,
    })
}

/// Interpret an explicit location field taken from the markup.
///
/// Known cities and modes produce a structured location; anything else is
/// kept verbatim as free text.
pub fn parse_location(raw: &str) -> Option<Location> {
    let cleaned = clean_text(raw, FIELD_MAX_CHARS);
    if cleaned.is_empty() {
        return None;
    }
    Some(location_from_text(&cleaned).unwrap_or(Location::FreeText(cleaned)))
}

/// First compensation-looking phrase in the text (stipend, salary range, prize).
pub fn compensation_from_text(text: &str) -> Option<String> {
    COMPENSATION_PATTERNS
        .iter()
        .find_map(|re| re.find(text))
        .map(|m| clean_text(m.as_str(), FIELD_MAX_CHARS))
}

/// Experience requirement from free text, or `None` if the text states none.
pub fn experience_from_text(text: &str) -> Option<String> {
    if let Some(m) = EXPERIENCE_PATTERNS.iter().find_map(|re| re.find(text)) {
        return Some(clean_text(m.as_str(), FIELD_MAX_CHARS));
    }
    if FRESHER.is_match(text) {
        return Some("Fresher".to_string());
    }
    if ENTRY_LEVEL.is_match(text) {
        return Some("Entry Level".to_string());
    }
    None
}

/// Skills from the fixed vocabulary that appear in the text, at most [`MAX_SKILLS`].
pub fn skills_from_text(text: &str) -> BTreeSet<String> {
    let lower = text.to_lowercase();
    SKILLS
        .iter()
        .filter(|s| contains_term(&lower, s))
        .take(MAX_SKILLS)
        .map(|s| s.to_string())
        .collect()
}

/// Deadline announced in free text (`Deadline: 12/03/2026`, `Apply by 5 Jan 2026`, ...).
///
/// Only dates introduced by a deadline keyword count; bare dates in free
/// text are too often posting or event dates.
pub fn deadline_from_text(text: &str) -> Option<DateTime<Utc>> {
    KEYED_DEADLINE
        .captures_iter(text)
        .find_map(|c| c.get(1).and_then(|m| parse_date(m.as_str())))
        .map(end_of_day)
}

/// Deadline from a dedicated deadline element: any date in it counts.
pub fn deadline_from_field(text: &str) -> Option<DateTime<Utc>> {
    deadline_from_text(text).or_else(|| {
        ANY_DATE
            .find_iter(text)
            .find_map(|m| parse_date(m.as_str()))
            .map(end_of_day)
    })
}

/// Posting date, absolute or relative to `now` ("3 days ago", "yesterday").
///
/// The result is truncated to midnight UTC so that repeated observations of
/// the same listing on the same day agree.
pub fn posted_at_from_text(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(date) = POSTED_KEYED
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| parse_date(m.as_str()))
    {
        return Some(start_of_day(date));
    }
    if let Some(c) = POSTED_RELATIVE.captures(text) {
        let n: i64 = match c[1].to_lowercase().as_str() {
            "a" | "an" | "one" => 1,
            digits => digits.parse().ok()?,
        };
        // Counts come from scraped text; anything chrono cannot represent
        // is treated as no date at all.
        let delta = match c[2].to_lowercase().as_str() {
            "minute" => Duration::try_minutes(n),
            "hour" => Duration::try_hours(n),
            "day" => Duration::try_days(n),
            "week" => Duration::try_weeks(n),
            _ => n.checked_mul(30).and_then(Duration::try_days),
        }?;
        let posted = now.checked_sub_signed(delta)?;
        return Some(start_of_day(posted.date_naive()));
    }
    let lower = text.to_lowercase();
    if contains_term(&lower, "yesterday") {
        return Some(start_of_day((now - Duration::days(1)).date_naive()));
    }
    if contains_term(&lower, "today") || contains_term(&lower, "just now") {
        return Some(start_of_day(now.date_naive()));
    }
    None
}

/// Posting date from a dedicated element: its text, or a bare date such as a
/// `<time datetime="...">` attribute.
pub fn posted_at_from_field(raw: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    posted_at_from_text(raw, now).or_else(|| {
        ANY_DATE
            .find_iter(raw)
            .find_map(|m| parse_date(m.as_str()))
            .map(start_of_day)
    })
}

/// Whether the text carries an urgency marker.
pub fn is_urgent_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    URGENT_TERMS.iter().any(|t| contains_term(&lower, t))
}

/// Whether the text says the opportunity can be done remotely.
pub fn is_remote_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    REMOTE_TERMS.iter().any(|t| contains_term(&lower, t))
}

/// Organization named in free text (`... at Acme Labs in Pune`, `Company: Acme`).
pub fn organization_from_text(text: &str) -> Option<String> {
    ORG_KEYED
        .captures(text)
        .or_else(|| ORG_AT.captures(text))
        .and_then(|c| c.get(1))
        .map(|m| clean_text(m.as_str().trim_matches(|c: char| c == '.' || c.is_whitespace()), FIELD_MAX_CHARS))
        .filter(|s| s.chars().count() > 2)
}

/// Parse one of the supported date spellings.
///
/// Numeric dates are read day-first unless the second field cannot be a
/// month: `12/25/2026` is read month-first.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim().trim_end_matches(',');
    if let Ok(d) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(d);
    }

    let numeric: Vec<&str> = raw.split(['/', '-', '.']).collect();
    if numeric.len() == 3 && numeric.iter().all(|p| p.chars().all(|c| c.is_ascii_digit())) {
        let a: u32 = numeric[0].parse().ok()?;
        let b: u32 = numeric[1].parse().ok()?;
        let mut year: i32 = numeric[2].parse().ok()?;
        if numeric[2].len() <= 2 {
            year += 2000;
        }
        let (day, month) = if b > 12 && a <= 12 { (b, a) } else { (a, b) };
        return NaiveDate::from_ymd_opt(year, month, day);
    }

    let words: String = raw
        .replace(',', " ")
        .split_whitespace()
        .map(|w| {
            w.trim_end_matches("st")
                .trim_end_matches("nd")
                .trim_end_matches("rd")
                .trim_end_matches("th")
        })
        .map(|w| w.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    let mut parts = words.split(' ');
    let (first, second, third) = (parts.next()?, parts.next()?, parts.next()?);
    let (day, month_word, year) = if first.chars().all(|c| c.is_ascii_digit()) {
        (first, second, third)
    } else {
        (second, first, third)
    };
    let month = month_number(month_word)?;
    NaiveDate::from_ymd_opt(year.parse().ok()?, month, day.parse().ok()?)
}

fn month_number(word: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = word.to_lowercase();
    let prefix = lower.get(..3)?;
    MONTHS
        .iter()
        .position(|m| *m == prefix)
        .map(|i| i as u32 + 1)
}

fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    let t = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    Utc.from_utc_datetime(&date.and_time(t))
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
