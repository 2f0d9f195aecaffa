//! Lexical scorer — deterministic keyword overlap between a resume and a job
//! description. No network access, no randomness: the same pair of texts
//! always produces the same score.
//!
//! Algorithm:
//! 1. Normalize both texts: lowercase, strip punctuation (keeping `+` and `#`
//!    so "c++" and "c#" survive), drop stopwords and one-character tokens.
//! 2. Build term-frequency maps.
//! 3. raw = Σ tf_jd(t) over terms present in both / Σ tf_jd(t) over all JD
//!    terms — i.e. how much of the JD's weighted vocabulary the resume covers.
//! 4. score = round(raw × 100), a fixed linear scale.

use std::collections::HashMap;

/// Common English + job-posting boilerplate words excluded from scoring.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "for", "from", "has",
    "have", "in", "is", "it", "its", "of", "on", "or", "our", "that", "the", "their", "they",
    "this", "to", "was", "we", "were", "will", "with", "you", "your", "who", "what", "when",
    "where", "which", "while", "would", "should", "could", "about", "after", "all", "also", "am",
    "any", "because", "before", "between", "both", "do", "does", "each", "etc", "more", "most",
    "must", "not", "other", "over", "per", "plus", "such", "than", "then", "there", "these",
    "those", "through", "under", "up", "us", "use", "using", "via", "work", "working", "years",
    "year", "experience", "role", "team", "job", "candidate", "ability", "strong", "skills",
    "required", "preferred", "including", "looking", "join", "opportunity",
];

/// Splits text into normalized tokens. Alphanumerics plus `+`/`#` form
/// tokens; everything else separates them.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    lowered
        .split(|c: char| !(c.is_alphanumeric() || c == '+' || c == '#'))
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(String::from)
        .collect()
}

fn term_frequencies(tokens: &[String]) -> HashMap<&str, u32> {
    let mut tf: HashMap<&str, u32> = HashMap::new();
    for token in tokens {
        *tf.entry(token.as_str()).or_insert(0) += 1;
    }
    tf
}

/// Output of one lexical scoring pass.
#[derive(Debug, Clone)]
pub struct LexicalScore {
    pub score: u32,
    pub rationale: String,
    /// JD terms covered by the resume, sorted by descending JD weight.
    pub matched: Vec<String>,
    /// JD terms the resume lacks, sorted by descending JD weight.
    pub missing: Vec<String>,
}

/// Scores a resume against a job description. Empty-but-present inputs score
/// 0 with rationale "insufficient input" — never an error.
pub fn score_lexical(resume_text: &str, job_description: &str) -> LexicalScore {
    let resume_tokens = tokenize(resume_text);
    let jd_tokens = tokenize(job_description);

    if resume_tokens.is_empty() || jd_tokens.is_empty() {
        return LexicalScore {
            score: 0,
            rationale: "insufficient input".to_string(),
            matched: Vec::new(),
            missing: Vec::new(),
        };
    }

    let resume_tf = term_frequencies(&resume_tokens);
    let jd_tf = term_frequencies(&jd_tokens);

    let total_weight: u32 = jd_tf.values().sum();
    let mut covered_weight = 0u32;
    let mut matched: Vec<(&str, u32)> = Vec::new();
    let mut missing: Vec<(&str, u32)> = Vec::new();

    for (term, weight) in &jd_tf {
        if resume_tf.contains_key(term) {
            covered_weight += weight;
            matched.push((term, *weight));
        } else {
            missing.push((term, *weight));
        }
    }

    // Sort by descending weight, then alphabetically for a stable order.
    matched.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));
    missing.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

    let score = ((covered_weight as f64 / total_weight as f64) * 100.0).round() as u32;
    let score = score.min(100);

    let top = |v: &[(&str, u32)]| {
        v.iter()
            .take(5)
            .map(|(t, _)| t.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    };
    let rationale = format!(
        "keyword coverage {score}/100: matched [{}]; missing [{}]",
        top(&matched),
        top(&missing)
    );

    LexicalScore {
        score,
        rationale,
        matched: matched.into_iter().map(|(t, _)| t.to_string()).collect(),
        missing: missing.into_iter().map(|(t, _)| t.to_string()).collect(),
    }
}
