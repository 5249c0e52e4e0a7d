//! Assigns a query to one technical domain, or to the mixed context.

use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::{
    config::{MIXED_CONTEXT, RankingConfig},
    text_util,
};

/// The dominant domain of a query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ContextLabel {
    Mixed,
    Domain(String),
}

impl ContextLabel {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Mixed => MIXED_CONTEXT,
            Self::Domain(label) => label,
        }
    }

    pub fn is_mixed(&self) -> bool {
        matches!(self, Self::Mixed)
    }
}

impl fmt::Display for ContextLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ContextLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ContextClassifier<'a> {
    config: &'a RankingConfig,
}

impl<'a> ContextClassifier<'a> {
    pub fn new(config: &'a RankingConfig) -> Self {
        Self { config }
    }

    /// Count indicator-term hits per label over the query and its variants.
    ///
    /// Each distinct (normalized) text counts once per term it contains.
    /// Labels come back in declaration order.
    pub fn scores(&self, original: &str, variants: &[String]) -> Vec<(&'a str, usize)> {
        let mut texts: Vec<String> = Vec::with_capacity(variants.len() + 1);
        for text in std::iter::once(original).chain(variants.iter().map(String::as_str)) {
            let normalized = text_util::normalize(text);
            if !normalized.is_empty() && !texts.contains(&normalized) {
                texts.push(normalized);
            }
        }

        self.config
            .context_indicator_terms
            .iter()
            .map(|(label, terms)| {
                let hits = texts
                    .iter()
                    .map(|text| {
                        terms
                            .iter()
                            .filter(|term| text_util::contains_phrase(text, term))
                            .count()
                    })
                    .sum();
                (label, hits)
            })
            .collect()
    }

    /// The label with the strictly highest hit count; ties go to the label
    /// declared first. No hits at all means [`ContextLabel::Mixed`].
    pub fn classify(&self, original: &str, variants: &[String]) -> ContextLabel {
        let scores = self.scores(original, variants);
        let mut best: Option<(&str, usize)> = None;
        for (label, hits) in &scores {
            if *hits > best.map_or(0, |(_, h)| h) {
                best = Some((*label, *hits));
            }
        }

        let label = match best {
            Some((label, _)) if label != MIXED_CONTEXT => {
                ContextLabel::Domain(label.to_string())
            }
            _ => ContextLabel::Mixed,
        };
        debug!(query = original, context = %label, ?scores, "classified query");
        label
    }
}
