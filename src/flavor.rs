//! Dialect ("flavor") filtering for sources that document mutually
//! exclusive variants of the same subject.

use tracing::debug;

use crate::{config::RankingConfig, score::ScoredResult, text_util};

/// The dialect chosen for one group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialectSelection {
    pub group: String,
    /// `None` when the query names no dialect and the group has no default.
    pub dialect: Option<String>,
    /// The query named this dialect itself.
    pub explicit: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct FlavorFilter<'a> {
    config: &'a RankingConfig,
}

impl<'a> FlavorFilter<'a> {
    pub fn new(config: &'a RankingConfig) -> Self {
        Self { config }
    }

    /// Pick a dialect for every group declared in the registry.
    ///
    /// A keyword in the query wins; when several dialects of a group match,
    /// the one declared first wins. Otherwise the group default applies.
    pub fn detect(&self, query: &str) -> Vec<DialectSelection> {
        let lowered = text_util::normalize(query);
        self.config
            .dialect_groups()
            .into_iter()
            .map(|group| {
                let requested = self
                    .config
                    .dialect_keywords
                    .get(group)
                    .and_then(|dialects| {
                        dialects.iter().find(|(_, keywords)| {
                            keywords
                                .iter()
                                .any(|k| text_util::contains_phrase(&lowered, k))
                        })
                    })
                    .map(|(dialect, _)| dialect.to_string());

                match requested {
                    Some(dialect) => DialectSelection {
                        group: group.to_string(),
                        dialect: Some(dialect),
                        explicit: true,
                    },
                    None => DialectSelection {
                        group: group.to_string(),
                        dialect: self.config.dialect_defaults.get(group).cloned(),
                        explicit: false,
                    },
                }
            })
            .collect()
    }

    /// Whether a result from `source_id` survives the given selections.
    ///
    /// Unregistered and ungrouped sources always survive.
    pub fn retains(&self, source_id: &str, selections: &[DialectSelection]) -> bool {
        let Some(source) = self.config.source(source_id) else {
            return true;
        };
        let Some(group) = source.dialect_group.as_deref() else {
            return true;
        };
        match selections.iter().find(|s| s.group == group) {
            Some(DialectSelection {
                dialect: Some(wanted),
                ..
            }) => source.dialect.as_deref() == Some(wanted.as_str()),
            _ => true,
        }
    }

    /// Drop results from sibling dialects of the one selected per group.
    pub fn filter(&self, results: Vec<ScoredResult>, query: &str) -> Vec<ScoredResult> {
        let selections = self.detect(query);
        self.apply(results, &selections)
    }

    /// [`filter`](Self::filter) with selections detected by the caller.
    pub fn apply(
        &self,
        results: Vec<ScoredResult>,
        selections: &[DialectSelection],
    ) -> Vec<ScoredResult> {
        if !self.config.has_dialect_groups() {
            return results;
        }

        let before = results.len();
        let kept: Vec<ScoredResult> = results
            .into_iter()
            .filter(|r| self.retains(&r.candidate.source_id, selections))
            .collect();
        debug!(
            ?selections,
            dropped = before - kept.len(),
            "applied dialect filter"
        );
        kept
    }
}
