use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::core::config::SeoSettings;

const STOP_WORDS: &[&str] = &["the", "and", "is", "in", "to", "of", "a", "for", "on", "with"];
const TOP_WORDS: usize = 10;
const SHORT_CONTENT_PENALTY: i32 = 20;
const ISSUE_PENALTY: i32 = 10;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct KeywordStat {
    pub word: String,
    pub count: usize,
    pub density: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SeoReport {
    pub word_count: usize,
    /// Most frequent non-stop words, highest count first.
    pub keywords: Vec<KeywordStat>,
    pub issues: Vec<String>,
    pub score: u8,
}

impl SeoReport {
    pub fn top_keywords(&self, n: usize) -> impl Iterator<Item = &str> {
        self.keywords.iter().take(n).map(|k| k.word.as_str())
    }
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\w+").expect("valid word regex"))
}

/// Markup is dropped before counting so tag names never show up as keywords.
pub fn strip_tags(content: &str) -> String {
    tag_re().replace_all(content, " ").to_string()
}

pub fn words(content: &str) -> Vec<String> {
    let text = strip_tags(content).to_lowercase();
    word_re()
        .find_iter(&text)
        .map(|m| m.as_str().to_string())
        .collect()
}

pub fn is_stop_word(word: &str) -> bool {
    STOP_WORDS.contains(&word)
}

pub fn analyze(content: &str, settings: &SeoSettings) -> SeoReport {
    let words = words(content);
    let word_count = words.len();

    // Frequency with first-seen order so equal counts rank deterministically.
    let mut order: Vec<&str> = Vec::new();
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for w in &words {
        let entry = counts.entry(w.as_str()).or_insert(0);
        if *entry == 0 {
            order.push(w.as_str());
        }
        *entry += 1;
    }
    let mut ranked: Vec<(usize, &str)> = order.iter().enumerate().map(|(i, w)| (i, *w)).collect();
    ranked.sort_by(|a, b| counts[b.1].cmp(&counts[a.1]).then(a.0.cmp(&b.0)));

    let keywords: Vec<KeywordStat> = ranked
        .into_iter()
        .take(TOP_WORDS)
        .filter(|(_, w)| !is_stop_word(w))
        .map(|(_, w)| {
            let count = counts[w];
            KeywordStat {
                word: w.to_string(),
                count,
                density: count as f64 / word_count as f64,
            }
        })
        .collect();

    let mut issues = Vec::new();
    let too_short = word_count < settings.min_word_count;
    if too_short {
        issues.push(format!(
            "Content length ({} words) is below recommended minimum of {}",
            word_count, settings.min_word_count
        ));
    }
    for k in &keywords {
        if k.density > settings.optimal_keyword_density * 2.0 {
            issues.push(format!(
                "Keyword '{}' may be overused (density: {:.1}%)",
                k.word,
                k.density * 100.0
            ));
        }
    }

    let score = score(too_short, issues.len());
    SeoReport {
        word_count,
        keywords,
        issues,
        score,
    }
}

fn score(too_short: bool, issue_count: usize) -> u8 {
    let mut score: i32 = 100;
    if too_short {
        score -= SHORT_CONTENT_PENALTY;
    }
    score -= ISSUE_PENALTY.saturating_mul(issue_count.min(100) as i32);
    score.clamp(0, 100) as u8
}
