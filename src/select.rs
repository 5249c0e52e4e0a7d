//! Final ordering, de-duplication, and per-source diversity caps.

use std::{
    cmp::Ordering,
    collections::{HashMap, HashSet},
};

use tracing::debug;

use crate::{classify::ContextLabel, config::SelectionSettings, score::ScoredResult};

/// Caps applied while picking the final result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionLimits {
    pub max_total: usize,
    pub max_per_source: usize,
}

impl SelectionLimits {
    /// Limits for `context`, with caller overrides taking precedence.
    ///
    /// A mixed query spreads results over more sources than a focused one.
    pub fn for_context(
        settings: &SelectionSettings,
        context: &ContextLabel,
        max_total: Option<usize>,
        max_per_source: Option<usize>,
    ) -> Self {
        let per_source_default = if context.is_mixed() {
            settings.mixed_per_source
        } else {
            settings.focused_per_source
        };
        Self {
            max_total: max_total.unwrap_or(settings.max_total),
            max_per_source: max_per_source.unwrap_or(per_source_default),
        }
    }
}

/// Total order used for the final list: score descending, then title,
/// then id.
pub fn compare(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.final_score
        .total_cmp(&a.final_score)
        .then_with(|| {
            a.candidate
                .title
                .to_lowercase()
                .cmp(&b.candidate.title.to_lowercase())
        })
        .then_with(|| a.candidate.id.cmp(&b.candidate.id))
}

/// Sort, drop repeated ids, then walk best-first admitting results until
/// either cap is reached.
///
/// The output depends only on the contents of `results`, never on their
/// incoming order.
pub fn select(mut results: Vec<ScoredResult>, limits: SelectionLimits) -> Vec<ScoredResult> {
    results.sort_by(compare);

    let considered = results.len();
    let mut seen: HashSet<String> = HashSet::with_capacity(results.len());
    let mut per_source: HashMap<String, usize> = HashMap::new();
    let mut selected = Vec::with_capacity(limits.max_total.min(results.len()));

    for result in results {
        if selected.len() >= limits.max_total {
            break;
        }
        if !seen.insert(result.candidate.id.clone()) {
            continue;
        }
        let count = per_source
            .entry(result.candidate.source_id.clone())
            .or_insert(0);
        if *count >= limits.max_per_source {
            continue;
        }
        *count += 1;
        selected.push(result);
    }

    debug!(
        considered,
        selected = selected.len(),
        sources = per_source.len(),
        "selected final results"
    );
    selected
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{retriever::tests::doc, score::MatchTier};

    fn result(id: &str, source: &str, title: &str, score: f32) -> ScoredResult {
        ScoredResult {
            candidate: doc(id, source, title),
            library_id: source.to_string(),
            url: None,
            match_tier: MatchTier::FuzzyPartial,
            final_score: score,
            context_label: ContextLabel::Mixed,
        }
    }

    fn limits(max_total: usize, max_per_source: usize) -> SelectionLimits {
        SelectionLimits {
            max_total,
            max_per_source,
        }
    }

    fn ids(results: &[ScoredResult]) -> Vec<&str> {
        results.iter().map(|r| r.candidate.id.as_str()).collect()
    }

    #[test]
    fn orders_by_score_then_title_then_id() {
        let picked = select(
            vec![
                result("c", "s1", "Beta", 10.0),
                result("b", "s2", "alpha", 10.0),
                result("a", "s3", "Alpha", 10.0),
                result("d", "s4", "Zeta", 20.0),
            ],
            limits(10, 10),
        );
        assert_eq!(ids(&picked), vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn repeated_ids_keep_the_best() {
        let picked = select(
            vec![result("x", "s1", "Low", 1.0), result("x", "s1", "High", 9.0)],
            limits(10, 10),
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].candidate.title, "High");
    }

    #[test]
    fn per_source_cap_lets_other_sources_in() {
        let mut pool: Vec<ScoredResult> = (0..6)
            .map(|i| result(&format!("a{i}"), "big", "A", 100.0 - i as f32))
            .collect();
        pool.push(result("b0", "small", "B", 10.0));
        let picked = select(pool, limits(10, 3));
        assert_eq!(ids(&picked), vec!["a0", "a1", "a2", "b0"]);
    }

    #[test]
    fn total_cap_applies() {
        let pool: Vec<ScoredResult> = (0..20)
            .map(|i| result(&format!("{i:02}"), &format!("s{i}"), "T", i as f32))
            .collect();
        let picked = select(pool, limits(10, 3));
        assert_eq!(picked.len(), 10);
        assert_eq!(picked[0].candidate.id, "19");
    }

    #[test]
    fn zero_caps_select_nothing() {
        let pool = vec![result("a", "s", "T", 1.0)];
        assert!(select(pool.clone(), limits(0, 5)).is_empty());
        assert!(select(pool, limits(5, 0)).is_empty());
    }

    #[test]
    fn limits_follow_context_and_overrides() {
        let settings = SelectionSettings::default();
        let mixed = SelectionLimits::for_context(&settings, &ContextLabel::Mixed, None, None);
        assert_eq!(mixed, limits(10, 3));

        let focused = ContextLabel::Domain("ui5".into());
        assert_eq!(
            SelectionLimits::for_context(&settings, &focused, None, None),
            limits(10, 5)
        );
        assert_eq!(
            SelectionLimits::for_context(&settings, &focused, Some(4), Some(1)),
            limits(4, 1)
        );
    }

    fn pool_strategy() -> impl Strategy<Value = Vec<ScoredResult>> {
        prop::collection::vec((0u8..30, 0u8..5, 0u8..4, 0u16..50), 0..60).prop_map(
            |entries| {
                entries
                    .into_iter()
                    .map(|(id, source, title, score)| {
                        result(
                            &format!("doc{id}"),
                            &format!("src{source}"),
                            &format!("Title {title}"),
                            f32::from(score),
                        )
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_no_duplicates_and_caps_hold(
            pool in pool_strategy(),
            max_total in 0usize..15,
            max_per_source in 0usize..6,
        ) {
            let picked = select(pool, limits(max_total, max_per_source));
            prop_assert!(picked.len() <= max_total);

            let mut seen = HashSet::new();
            let mut counts: HashMap<&str, usize> = HashMap::new();
            for r in &picked {
                prop_assert!(seen.insert(r.candidate.id.as_str()));
                *counts.entry(r.candidate.source_id.as_str()).or_default() += 1;
            }
            prop_assert!(counts.values().all(|&n| n <= max_per_source));
        }

        #[test]
        fn prop_output_is_sorted(pool in pool_strategy()) {
            let picked = select(pool, limits(15, 6));
            for pair in picked.windows(2) {
                prop_assert_ne!(compare(&pair[0], &pair[1]), Ordering::Greater);
            }
        }

        #[test]
        fn prop_input_order_does_not_matter(pool in pool_strategy()) {
            // Distinct ids make the sort order total.
            let mut unique = Vec::new();
            let mut ids = HashSet::new();
            for r in pool {
                if ids.insert(r.candidate.id.clone()) {
                    unique.push(r);
                }
            }
            let mut reversed = unique.clone();
            reversed.reverse();
            prop_assert_eq!(
                select(unique, limits(10, 3)),
                select(reversed, limits(10, 3))
            );
        }
    }
}
