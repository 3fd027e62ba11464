//! Keyword-scored classification of candidates.
//!
//! Three fixed tables tag every candidate with a kind, a coarse category and
//! an engineering domain. The score of an entry is the number of its terms
//! that occur as whole words in the case-folded combined text (title,
//! description and skills). The highest score wins; equal scores resolve to
//! the entry registered first, so identical text always yields the same tags.

use tracing::debug;

use crate::extract::fields::contains_term;
use crate::models::{Candidate, ListingKind};

/// Category assigned when no category term matches.
pub const DEFAULT_CATEGORY: &str = "general";
/// Domain assigned when no domain term matches.
pub const DEFAULT_DOMAIN: &str = "General";

type Table<T> = &'static [(T, &'static [&'static str])];

const KIND_TABLE: Table<ListingKind> = &[
    (
        ListingKind::Internship,
        &["intern", "internship", "internships", "trainee", "apprentice", "stipend"],
    ),
    (
        ListingKind::Hackathon,
        &["hackathon", "hackathons", "ideathon", "codathon", "competition", "coding challenge", "contest"],
    ),
    (
        ListingKind::Workshop,
        &["workshop", "workshops", "bootcamp", "hands-on", "masterclass"],
    ),
    (
        ListingKind::Event,
        &["event", "events", "conference", "summit", "webinar", "seminar", "meetup", "fest", "symposium"],
    ),
    (
        ListingKind::Job,
        &["job", "full-time", "full time", "hiring", "opening", "vacancy", "ctc", "permanent"],
    ),
];

const CATEGORY_TABLE: Table<&'static str> = &[
    (
        "software",
        &["developer", "engineer", "programming", "coding", "software", "frontend", "backend", "fullstack", "full stack"],
    ),
    (
        "data-science",
        &["data", "analytics", "machine learning", "ai", "ml", "scientist", "analyst"],
    ),
    ("product", &["product manager", "product management", "product"]),
    ("design", &["designer", "ui", "ux", "ui/ux", "design", "creative", "figma"]),
    ("marketing", &["marketing", "growth", "digital marketing", "content", "seo"]),
    ("finance", &["finance", "fintech", "financial", "accounting"]),
    ("blockchain", &["blockchain", "crypto", "web3", "defi"]),
];

const DOMAIN_TABLE: Table<&'static str> = &[
    (
        "Web Development",
        &["frontend", "backend", "full stack", "react", "angular", "vue", "nodejs", "node.js", "web developer", "html", "css", "javascript"],
    ),
    (
        "Mobile Development",
        &["android", "ios", "flutter", "react native", "mobile app", "swift", "kotlin", "mobile developer"],
    ),
    (
        "AI/ML",
        &["artificial intelligence", "machine learning", "deep learning", "neural network", "ai", "ml", "nlp", "computer vision", "tensorflow", "pytorch"],
    ),
    (
        "Data Science",
        &["data science", "data analyst", "data engineer", "big data", "analytics", "python", "sql", "tableau", "power bi"],
    ),
    (
        "Cybersecurity",
        &["cybersecurity", "security", "ethical hacking", "penetration testing", "infosec", "security analyst", "ctf"],
    ),
    (
        "Cloud Computing",
        &["cloud", "aws", "azure", "gcp", "cloud engineer", "cloud architect", "kubernetes", "docker"],
    ),
    (
        "DevOps",
        &["devops", "ci/cd", "jenkins", "terraform", "ansible", "kubernetes", "docker", "linux"],
    ),
    (
        "Blockchain",
        &["blockchain", "web3", "cryptocurrency", "smart contract", "ethereum", "solidity", "nft"],
    ),
    (
        "IoT",
        &["iot", "internet of things", "embedded", "arduino", "raspberry pi", "sensors"],
    ),
    (
        "Game Development",
        &["game development", "unity", "unreal", "game design", "game developer"],
    ),
    (
        "AR/VR",
        &["augmented reality", "virtual reality", "ar", "vr", "metaverse"],
    ),
    (
        "Electronics",
        &["electronics", "ece", "vlsi", "embedded systems", "circuit design", "pcb"],
    ),
    (
        "Mechanical",
        &["mechanical", "cad", "solidworks", "autocad", "manufacturing", "automobile"],
    ),
    (
        "Civil",
        &["civil engineering", "construction", "structural", "architecture", "surveying"],
    ),
    (
        "Electrical",
        &["electrical", "power systems", "electrical engineering", "eee"],
    ),
    (
        "Management",
        &["management", "mba", "business", "operations", "project management", "product management"],
    ),
    (
        "Finance",
        &["finance", "accounting", "investment", "banking", "financial analyst"],
    ),
    (
        "Marketing",
        &["marketing", "digital marketing", "social media", "seo", "content marketing"],
    ),
    (
        "Design",
        &["design", "ui", "ux", "graphic design", "product design", "figma"],
    ),
];

/// Tags assigned to one candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub kind: ListingKind,
    pub category: String,
    pub domain: String,
}

/// Entry with the highest whole-word score, first entry on ties, `None` if nothing scores.
fn best_match<T: Copy>(table: Table<T>, text_lower: &str) -> Option<T> {
    let mut best: Option<(T, usize)> = None;
    for (tag, terms) in table {
        let score = terms.iter().filter(|t| contains_term(text_lower, t)).count();
        if score > 0 && best.is_none_or(|(_, s)| score > s) {
            best = Some((*tag, score));
        }
    }
    best.map(|(tag, _)| tag)
}

/// Classify free text.
///
/// # Arguments
///
/// * `text` - Combined candidate text; case does not matter
/// * `default_kind` - Kind used when no kind term matches (the source's default)
pub fn classify_text(text: &str, default_kind: ListingKind) -> Classification {
    let lower = text.to_lowercase();
    Classification {
        kind: best_match(KIND_TABLE, &lower).unwrap_or(default_kind),
        category: best_match(CATEGORY_TABLE, &lower)
            .unwrap_or(DEFAULT_CATEGORY)
            .to_string(),
        domain: best_match(DOMAIN_TABLE, &lower)
            .unwrap_or(DEFAULT_DOMAIN)
            .to_string(),
    }
}

/// Tag a candidate in place from its title, description and skills.
pub fn classify_candidate(candidate: &mut Candidate, default_kind: ListingKind) {
    let skills = candidate.skills.iter().map(String::as_str).collect::<Vec<_>>().join(" ");
    let text = format!("{} {} {}", candidate.title, candidate.description, skills);
    let tags = classify_text(&text, default_kind);
    debug!(
        title = %candidate.title,
        kind = %tags.kind,
        category = %tags.category,
        domain = %tags.domain,
        "classified candidate"
    );
    candidate.kind = tags.kind;
    candidate.category = tags.category;
    candidate.domain = tags.domain;
}
