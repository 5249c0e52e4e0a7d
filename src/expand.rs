//! Query expansion: one user query in, an ordered list of variants out.
//!
//! The first two variants are always the query verbatim and its lowercase
//! form. An exact hit on a synonym or acronym key short-circuits to that
//! entry's expansions. Otherwise every table key found inside the query
//! contributes its expansions, with keys that line up with a major word of
//! the query ahead of the rest. A query with no table hits gets mechanical
//! variants instead.

use std::{
    collections::{HashMap, HashSet},
    sync::LazyLock,
};

use regex::Regex;

use crate::{config::RankingConfig, text_util};

/// Upper bound on identifiers pulled out of caller-supplied content.
const MAX_CONTENT_TERMS: usize = 8;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([A-Za-z_][\w.-]*:)?([A-Za-z_][\w.-]*)").unwrap()
});

static XMLNS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"xmlns:([A-Za-z_][\w-]*)\s*=\s*["']([^"']+)["']"#).unwrap()
});

static NAMESPACED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b[A-Za-z_]\w*(?:(?:\.|::)[A-Za-z_]\w*)+\b").unwrap()
});

static DECLARED_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i:\b(?:class|struct|interface|enum|trait|type|record))\s+([A-Za-z_]\w*)",
    )
    .unwrap()
});

/// Ordered, deduplicating variant list.
///
/// The first two slots are reserved for the verbatim and lowercased query
/// and are kept even when they are equal.
struct Variants {
    items: Vec<String>,
    seen: HashSet<String>,
}

impl Variants {
    fn new(query: &str) -> Self {
        let lowered = query.to_lowercase();
        let mut seen = HashSet::new();
        seen.insert(query.to_string());
        seen.insert(lowered.clone());
        Self {
            items: vec![query.to_string(), lowered],
            seen,
        }
    }

    fn push(&mut self, value: &str) {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return;
        }
        if self.seen.insert(trimmed.to_string()) {
            self.items.push(trimmed.to_string());
        }
    }

    fn extend<'a>(&mut self, values: impl IntoIterator<Item = &'a String>) {
        for value in values {
            self.push(value);
        }
    }

    fn finish(mut self, max: usize) -> Vec<String> {
        self.items.truncate(max.max(2));
        self.items
    }
}

/// Expands queries using the synonym and acronym tables of a configuration.
#[derive(Debug, Clone, Copy)]
pub struct QueryExpander<'a> {
    config: &'a RankingConfig,
}

impl<'a> QueryExpander<'a> {
    pub fn new(config: &'a RankingConfig) -> Self {
        Self { config }
    }

    pub fn expand(&self, query: &str) -> Vec<String> {
        self.expand_with_content(query, None)
    }

    /// Expand `query`, also mining identifiers from `content` when given.
    pub fn expand_with_content(
        &self,
        query: &str,
        content: Option<&str>,
    ) -> Vec<String> {
        let max = self.config.expansion.max_variants;
        let mut variants = Variants::new(query);
        let lowered = text_util::normalize(query);

        if let Some(exact) = self.exact_expansions(&lowered) {
            variants.extend(exact);
            return variants.finish(max);
        }

        let major = text_util::major_words(&lowered);
        let mut primary: Vec<&String> = Vec::new();
        let mut supplementary: Vec<&String> = Vec::new();
        let mut matched = false;

        for (key, expansions) in self.partial_matches(&lowered) {
            matched = true;
            let aligned = text_util::tokens(key)
                .iter()
                .any(|token| major.contains(token));
            if aligned {
                primary.extend(expansions);
            } else {
                supplementary.extend(expansions);
            }
        }

        variants.extend(primary);
        variants.extend(supplementary);

        if !matched {
            let stripped = text_util::strip_punctuation(&lowered);
            variants.push(&lowered);
            variants.push(&stripped);
            variants.push(&text_util::hyphenate(&stripped));
        }

        if let Some(content) = content {
            variants.extend(&content_identifiers(content));
        }

        variants.finish(max)
    }

    /// Expansions of every table entry whose key equals the whole query.
    fn exact_expansions(&self, lowered: &str) -> Option<Vec<&'a String>> {
        let mut out: Vec<&String> = Vec::new();
        for entry in &self.config.synonyms {
            if entry.from == lowered {
                out.extend(&entry.to);
            }
        }
        if let Some(expansions) = self.config.acronyms.get(lowered) {
            out.extend(expansions);
        }
        (!out.is_empty()).then_some(out)
    }

    /// Table entries whose key occurs inside the query as a substring, in
    /// table order. Synonyms come before acronyms.
    fn partial_matches(
        &self,
        lowered: &str,
    ) -> Vec<(&'a str, &'a Vec<String>)> {
        let config = self.config;
        let synonyms = config
            .synonyms
            .iter()
            .filter(|entry| lowered.contains(entry.from.as_str()))
            .map(|entry| (entry.from.as_str(), &entry.to));
        let acronyms = config
            .acronyms
            .iter()
            .filter(|(key, _)| lowered.contains(key));
        synonyms.chain(acronyms).collect()
    }
}

/// Pull identifiers out of a code or markup snippet: tag names (resolved
/// against `xmlns:` prefixes when possible), dotted or `::`-separated
/// names, and declared type names.
pub fn content_identifiers(content: &str) -> Vec<String> {
    let prefixes: HashMap<&str, &str> = XMLNS_RE
        .captures_iter(content)
        .filter_map(|caps| {
            Some((caps.get(1)?.as_str(), caps.get(2)?.as_str()))
        })
        .collect();

    let mut out: Vec<String> = Vec::new();
    let mut push = |value: String| {
        if !out.contains(&value) {
            out.push(value);
        }
    };

    for caps in TAG_RE.captures_iter(content) {
        let Some(name) = caps.get(2).map(|m| m.as_str()) else {
            continue;
        };
        let prefix = caps.get(1).map(|m| m.as_str().trim_end_matches(':'));
        if let Some(namespace) = prefix.and_then(|p| prefixes.get(p)) {
            push(format!("{namespace}.{name}"));
        }
        push(name.to_string());
    }

    for m in NAMESPACED_RE.find_iter(content) {
        push(m.as_str().to_string());
    }

    for caps in DECLARED_TYPE_RE.captures_iter(content) {
        if let Some(name) = caps.get(1) {
            push(name.as_str().to_string());
        }
    }

    out.truncate(MAX_CONTENT_TERMS);
    out
}
